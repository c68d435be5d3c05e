use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StoragePath;
use object_store::ObjectStore;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{CompletedPart, ObjectMeta, ObjectStoreClient, PartTarget, StorageError, StorageResult};

/// Filesystem driver: keys are relative paths under `root`
///
/// Clients cannot upload to a directory tree on their own, so this variant
/// has no presigning and no multipart support; bytes must be streamed through
/// the application instead.
#[derive(Debug)]
pub struct LocalObjectClient {
    store: LocalFileSystem,
    root: PathBuf,
}

impl LocalObjectClient {
    /// Open (creating if needed) the directory tree rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)?;
        tracing::debug!(root = %root.display(), "Opened filesystem driver");
        Ok(Self { store, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location(key: &str) -> StorageResult<StoragePath> {
        StoragePath::parse(key).map_err(|e| StorageError::InvalidKey(format!("{key}: {e}")))
    }
}

#[async_trait]
impl ObjectStoreClient for LocalObjectClient {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let location = Self::location(key)?;
        let size = data.len();
        self.store.put(&location, data.into()).await?;
        tracing::debug!(key, size, "Wrote object to filesystem driver");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let location = Self::location(key)?;
        let result = self.store.get(&location).await?;
        Ok(result.bytes().await?)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let location = Self::location(key)?;
        let meta = self.store.head(&location).await?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: meta.size as u64,
            e_tag: meta.e_tag,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let location = Self::location(key)?;
        match self.store.delete(&location).await {
            Ok(()) => {
                tracing::debug!(key, "Deleted object from filesystem driver");
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Configuration(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(self.root.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_multipart_upload(&self, _key: &str) -> StorageResult<String> {
        Err(StorageError::Unsupported(
            "multipart upload on a filesystem driver".to_string(),
        ))
    }

    async fn presigned_put_url(
        &self,
        _key: &str,
        _expires_in: Duration,
        _part: Option<&PartTarget>,
    ) -> StorageResult<String> {
        Err(StorageError::Unsupported(
            "presigned URLs on a filesystem driver".to_string(),
        ))
    }

    async fn complete_multipart_upload(
        &self,
        _key: &str,
        _upload_id: &str,
        _parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        Err(StorageError::Unsupported(
            "multipart upload on a filesystem driver".to_string(),
        ))
    }

    async fn abort_multipart_upload(&self, _key: &str, _upload_id: &str) -> StorageResult<()> {
        Err(StorageError::Unsupported(
            "multipart upload on a filesystem driver".to_string(),
        ))
    }

    fn supports_presign(&self) -> bool {
        false
    }

    fn bucket(&self) -> Option<&str> {
        None
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
