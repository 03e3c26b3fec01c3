use thiserror::Error;

/// Error taxonomy surfaced at the engine boundary.
///
/// Provider traits return `anyhow::Result`; call sites classify failures into
/// these variants when they need to be reported, but most of them are logged
/// and degraded to an empty result instead of propagating.
#[derive(Debug, Error)]
pub enum SupportError {
    #[error("{0} is not configured")]
    ConfigurationMissing(&'static str),

    #[error("{provider} timed out: {message}")]
    ProviderTimeout {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} failed: {message}")]
    ProviderFailure {
        provider: &'static str,
        message: String,
    },

    #[error("malformed response from {provider}: {message}")]
    MalformedResponse {
        provider: &'static str,
        message: String,
    },

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SupportError {
    /// Classify an opaque provider error, distinguishing timeouts from other failures.
    pub fn from_provider(provider: &'static str, err: &anyhow::Error) -> Self {
        let is_timeout = err
            .chain()
            .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
            .any(|e| e.is_timeout())
            || err.downcast_ref::<tokio::time::error::Elapsed>().is_some();

        if is_timeout {
            SupportError::ProviderTimeout {
                provider,
                message: err.to_string(),
            }
        } else {
            SupportError::ProviderFailure {
                provider,
                message: err.to_string(),
            }
        }
    }

    /// Stable machine-readable code, used as a structured logging field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigurationMissing(_) => "configuration_missing",
            Self::ProviderTimeout { .. } => "provider_timeout",
            Self::ProviderFailure { .. } => "provider_failure",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::ValidationFailure(_) => "validation_failure",
            Self::NotFound(_) => "not_found",
            Self::Cancelled => "cancelled",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

pub type SupportResult<T> = std::result::Result<T, SupportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_classified_as_timeout() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let elapsed = rt.block_on(async {
            tokio::time::timeout(
                std::time::Duration::from_millis(1),
                futures::future::pending::<()>(),
            )
            .await
            .unwrap_err()
        });
        let err = SupportError::from_provider("embedding", &anyhow::Error::new(elapsed));
        assert_eq!(err.code(), "provider_timeout");
    }

    #[test]
    fn test_plain_error_is_provider_failure() {
        let err = SupportError::from_provider("generation", &anyhow::anyhow!("HTTP 500"));
        assert!(matches!(err, SupportError::ProviderFailure { provider: "generation", .. }));
        assert!(err.to_string().contains("HTTP 500"));
    }
}
