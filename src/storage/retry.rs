//! Bounded timeout and exponential backoff around backend calls

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::observability::Metrics;

use super::{CompletedPart, ObjectMeta, ObjectStoreClient, PartTarget, StorageError, StorageResult};

/// How backend calls are bounded and retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, still bounded by the timeout.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0-based): initial · 2^retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Only transient failures are worth another attempt; 403s, bad keys and
/// missing objects will fail the same way again.
pub fn is_retryable(error: &StorageError) -> bool {
    match error {
        StorageError::Transient(_) => true,
        StorageError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        ),
        StorageError::NotFound(_)
        | StorageError::PermissionDenied(_)
        | StorageError::Unsupported(_)
        | StorageError::InvalidKey(_)
        | StorageError::Configuration(_)
        | StorageError::Backend(_) => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent. A timed-out attempt counts as a transient failure.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    name: &str,
    operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    with_retry_observed(policy, name, || {}, operation).await
}

/// [`with_retry`] calling `on_retry` before every repeated attempt.
pub async fn with_retry_observed<T, F, Fut, R>(
    policy: &RetryPolicy,
    name: &str,
    on_retry: R,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
    R: Fn(),
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Transient(format!(
                "{name} timed out after {:?}",
                policy.timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let delay = policy.backoff(attempt - 1);
                warn!(operation = name, attempt, ?delay, error = %err, "Backend call failed, retrying");
                on_retry();
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Adds the retry policy to every network-bound call of the wrapped client
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl<C> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            metrics: None,
        }
    }

    /// Count every repeated attempt in `backend_retries`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn retry<T, F, Fut>(&self, name: &str, operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let on_retry = || {
            if let Some(metrics) = &self.metrics {
                metrics.backend_retried();
            }
        };
        with_retry_observed(&self.policy, name, on_retry, operation).await
    }
}

#[async_trait]
impl<C: ObjectStoreClient> ObjectStoreClient for RetryingClient<C> {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.retry("put", || self.inner.put(key, data.clone())).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.retry("get", || self.inner.get(key)).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.retry("head", || self.inner.head(key)).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.retry("delete", || self.inner.delete(key)).await
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        self.retry("head_bucket", || self.inner.head_bucket()).await
    }

    // Not idempotent: a repeat after a lost response would leave an upload
    // id nobody tracks. One bounded attempt only.
    async fn create_multipart_upload(&self, key: &str) -> StorageResult<String> {
        let once = RetryPolicy {
            max_attempts: 1,
            ..self.policy.clone()
        };
        with_retry(&once, "create_multipart_upload", || {
            self.inner.create_multipart_upload(key)
        })
        .await
    }

    // Signing is local; nothing to retry.
    async fn presigned_put_url(
        &self,
        key: &str,
        expires_in: Duration,
        part: Option<&PartTarget>,
    ) -> StorageResult<String> {
        self.inner.presigned_put_url(key, expires_in, part).await
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        self.retry("complete_multipart_upload", || {
            self.inner
                .complete_multipart_upload(key, upload_id, parts.clone())
        })
        .await
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.retry("abort_multipart_upload", || {
            self.inner.abort_multipart_upload(key, upload_id)
        })
        .await
    }

    fn supports_presign(&self) -> bool {
        self.inner.supports_presign()
    }

    fn bucket(&self) -> Option<&str> {
        self.inner.bucket()
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}
