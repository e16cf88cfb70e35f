use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Object persistence for uploaded files. Keys are relative paths such as
/// `img/tours/tour-….jpeg`.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
}

/// Files under the public directory, served back by the static file routes.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(key);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        anyhow::ensure!(clean && !key.is_empty(), "invalid storage key {key:?}");
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        debug!(key, content_type, bytes = body.len(), "object stored");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete {}", path.display())),
        }
    }
}
