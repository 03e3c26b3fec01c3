//! Tracing subscriber setup for binaries and integration harnesses embedding the engine.

/// Install a fmt subscriber honouring `RUST_LOG`, defaulting to `info`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with("info")
}

pub fn init_tracing_with(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
