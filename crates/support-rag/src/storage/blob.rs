//! Named-blob persistence for the in-memory stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;

/// Named JSON blob storage. A missing blob loads as `None`; saves replace the
/// whole blob atomically.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<String>>;
    async fn save(&self, name: &str, contents: String) -> Result<()>;
}

/// Blobs stored as `<root>/<name>.json`, written through a temp file and rename.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob {}", path.display())),
        }
    }

    async fn save(&self, name: &str, contents: String) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let path = self.path_for(name);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
        }
        Ok(())
    }
}

/// Process-local blob store, used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn load(&self, name: &str) -> Result<Option<String>> {
        Ok(self.blobs.get(name).map(|b| b.value().clone()))
    }

    async fn save(&self, name: &str, contents: String) -> Result<()> {
        self.blobs.insert(name.to_string(), contents);
        Ok(())
    }
}

/// Load a JSON array blob. Missing yields an empty collection; a corrupt blob
/// is logged and also treated as empty.
pub async fn load_collection<T: DeserializeOwned>(store: &dyn BlobStore, name: &str) -> Result<Vec<T>> {
    let Some(json) = store.load(name).await? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&json) {
        Ok(items) => Ok(items),
        Err(e) => {
            tracing::warn!(blob = name, error = %e, "Corrupt blob, starting fresh");
            Ok(Vec::new())
        }
    }
}

pub async fn save_collection<T: Serialize>(store: &dyn BlobStore, name: &str, items: &[T]) -> Result<()> {
    let json = serde_json::to_string(items)?;
    store.save(name, json).await
}
