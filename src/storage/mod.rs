//! Object store clients behind storage drivers
//!
//! Every driver owns one [`ObjectStoreClient`]. The trait is the full
//! capability set a driver may offer; variants that cannot provide a
//! capability return [`StorageError::Unsupported`] instead of silently doing
//! nothing:
//!
//! - [`LocalObjectClient`] - directory tree via `object_store`'s local filesystem store
//! - [`S3ObjectClient`] - S3-compatible endpoint via `aws-sdk-s3`
//! - [`MemoryObjectClient`] - in-process bucket for development and tests
//!
//! [`RetryingClient`] wraps any of them with the timeout and retry policy.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

mod local;
mod memory;
mod retry;
mod s3;

pub use local::LocalObjectClient;
pub use memory::{FaultKind, MemoryObjectClient, Operation};
pub use retry::{RetryPolicy, RetryingClient, is_retryable, with_retry, with_retry_observed};
pub use s3::{S3Credentials, S3ObjectClient, S3Settings};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("access denied by backend: {0}")]
    PermissionDenied(String),

    /// Connection resets, timeouts, throttling and 5xx responses
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("operation not supported by this driver: {0}")]
    Unsupported(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("driver misconfigured: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            object_store::Error::NotImplemented => {
                StorageError::Unsupported("not implemented by object store".to_string())
            }
            object_store::Error::PermissionDenied { path, .. }
            | object_store::Error::Unauthenticated { path, .. } => {
                StorageError::PermissionDenied(path)
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// What a `HEAD` on an object reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Identifies one part of an open multipart upload when presigning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTarget {
    pub upload_id: String,
    /// 1-based, as S3 numbers parts
    pub part_number: u32,
}

/// A part the client reports as uploaded, used to complete a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
}

/// Capability set of a storage backend
///
/// All calls may block on the network and must be awaited from a task, never
/// from a latency-sensitive path. Presigning is the exception: it is a local
/// signing step.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Write `data` at `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Read a whole object.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Object metadata; `NotFound` when the object is absent.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Remove an object. Removing an absent object succeeds, as on S3.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check that the bucket (or root directory) is reachable.
    async fn head_bucket(&self) -> StorageResult<()>;

    /// Open a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str) -> StorageResult<String>;

    /// Time-bounded URL a client can `PUT` bytes to, for the whole object or
    /// for one part of a multipart upload.
    async fn presigned_put_url(
        &self,
        key: &str,
        expires_in: Duration,
        part: Option<&PartTarget>,
    ) -> StorageResult<String>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Whether `presigned_put_url` can succeed, i.e. clients may upload directly.
    fn supports_presign(&self) -> bool;

    /// Bucket the client writes into; `None` for filesystem stores.
    fn bucket(&self) -> Option<&str>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}
