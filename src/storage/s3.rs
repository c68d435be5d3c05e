use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};

use super::{CompletedPart, ObjectMeta, ObjectStoreClient, PartTarget, StorageError, StorageResult};

/// Static access key pair for one driver
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Custom endpoint for MinIO, LocalStack and other S3-compatible services
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub path_style_access: bool,
    /// `None` falls back to the AWS default provider chain
    pub credentials: Option<S3Credentials>,
    /// Per-operation timeout handed to the SDK
    pub timeout: Duration,
}

/// S3-compatible driver backed by `aws-sdk-s3`
///
/// SDK-level retries are disabled; wrap the client in
/// [`RetryingClient`](super::RetryingClient) to get the configured policy.
#[derive(Clone)]
pub struct S3ObjectClient {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3ObjectClient {
    pub async fn new(settings: S3Settings) -> StorageResult<Self> {
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(settings.timeout)
            .build();

        let mut builder = match &settings.credentials {
            Some(credentials) => aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(
                    credentials.access_key.clone(),
                    credentials.secret_key.clone(),
                    None,
                    None,
                    "dvstore",
                )),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.path_style_access)
            .timeout_config(timeouts)
            .retry_config(RetryConfig::disabled());
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::info!(
            bucket = %settings.bucket,
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = %settings.region,
            path_style = settings.path_style_access,
            "Configured S3 driver"
        );

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket,
            endpoint: settings.endpoint,
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn presigning(expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::Configuration(format!("presign expiry {expires_in:?}: {e}")))
    }
}

/// Fold an SDK failure into the storage taxonomy by HTTP status.
fn classify<E>(err: SdkError<E, HttpResponse>, what: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = format!("{what}: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transient(message)
        }
        SdkError::ServiceError(service) => match service.raw().status().as_u16() {
            404 => StorageError::NotFound(what.to_string()),
            401 | 403 => StorageError::PermissionDenied(message),
            408 | 429 | 500..=599 => StorageError::Transient(message),
            _ => StorageError::Backend(message),
        },
        _ => StorageError::Backend(message),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl ObjectStoreClient for S3ObjectClient {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let start = Instant::now();
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                let err = classify(e, key);
                tracing::error!(
                    error = %err,
                    bucket = %self.bucket,
                    key,
                    size_bytes = size,
                    duration_ms = elapsed_ms(start),
                    "S3 put failed"
                );
                err
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key,
            size_bytes = size,
            duration_ms = elapsed_ms(start),
            "S3 put successful"
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("{key}: reading body: {e}")))?;
        Ok(body.into_bytes())
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: response
                .content_length()
                .and_then(|len| u64::try_from(len).ok())
                .unwrap_or(0),
            e_tag: response.e_tag().map(str::to_string),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let start = Instant::now();

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let err = classify(e, key);
                tracing::error!(
                    error = %err,
                    bucket = %self.bucket,
                    key,
                    duration_ms = elapsed_ms(start),
                    "S3 delete failed"
                );
                err
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key,
            duration_ms = elapsed_ms(start),
            "S3 delete successful"
        );
        Ok(())
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify(e, &self.bucket))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> StorageResult<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| StorageError::Backend(format!("{key}: no upload id returned")))?;
        tracing::info!(bucket = %self.bucket, key, upload_id, "S3 multipart upload created");
        Ok(upload_id.to_string())
    }

    async fn presigned_put_url(
        &self,
        key: &str,
        expires_in: Duration,
        part: Option<&PartTarget>,
    ) -> StorageResult<String> {
        let presigning = Self::presigning(expires_in)?;

        let request = match part {
            None => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| classify(e, key))?,
            Some(part) => {
                let part_number = i32::try_from(part.part_number).map_err(|_| {
                    StorageError::InvalidKey(format!("part number {} out of range", part.part_number))
                })?;
                self.client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&part.upload_id)
                    .part_number(part_number)
                    .presigned(presigning)
                    .await
                    .map_err(|e| classify(e, key))?
            }
        };

        Ok(request.uri().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        let start = Instant::now();
        let count = parts.len();

        let mut completed = Vec::with_capacity(count);
        for part in parts {
            let number = i32::try_from(part.part_number).map_err(|_| {
                StorageError::InvalidKey(format!("part number {} out of range", part.part_number))
            })?;
            completed.push(
                S3CompletedPart::builder()
                    .part_number(number)
                    .e_tag(part.e_tag)
                    .build(),
            );
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        tracing::info!(
            bucket = %self.bucket,
            key,
            upload_id,
            parts = count,
            duration_ms = elapsed_ms(start),
            "S3 multipart upload completed"
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        tracing::info!(bucket = %self.bucket, key, upload_id, "S3 multipart upload aborted");
        Ok(())
    }

    fn supports_presign(&self) -> bool {
        true
    }

    fn bucket(&self) -> Option<&str> {
        Some(&self.bucket)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::head_object::HeadObjectError;

    async fn minio() -> S3ObjectClient {
        S3ObjectClient::new(S3Settings {
            endpoint: Some("http://localhost:9000".to_string()),
            bucket: "mybucket".to_string(),
            region: "us-east-1".to_string(),
            path_style_access: true,
            credentials: Some(S3Credentials {
                access_key: "4cc355_k3y".to_string(),
                secret_key: "s3cr3t_4cc355_k3y".to_string(),
            }),
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_presigns_path_style_single_put() {
        let client = minio().await;
        let url = client
            .presigned_put_url(
                "10.5072/FK2/ABC123/18b8c06688c-21b8320a3ee5",
                Duration::from_secs(3600),
                None,
            )
            .await
            .unwrap();

        assert!(url.starts_with("http://localhost:9000/mybucket/10.5072/FK2/ABC123/"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presigns_upload_part() {
        let client = minio().await;
        let target = PartTarget {
            upload_id: "abc123".to_string(),
            part_number: 2,
        };
        let url = client
            .presigned_put_url("k", Duration::from_secs(60), Some(&target))
            .await
            .unwrap();

        assert!(url.contains("partNumber=2"));
        assert!(url.contains("uploadId=abc123"));
    }

    #[test]
    fn test_timeouts_classify_as_transient() {
        let err: SdkError<HeadObjectError, HttpResponse> = SdkError::timeout_error("slow");
        assert!(matches!(classify(err, "k"), StorageError::Transient(_)));
    }

    #[test]
    fn test_construction_failures_are_permanent() {
        let err: SdkError<HeadObjectError, HttpResponse> =
            SdkError::construction_failure("bad request");
        assert!(matches!(classify(err, "k"), StorageError::Backend(_)));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = S3Credentials {
            access_key: "AKIA".to_string(),
            secret_key: "hunter2".to_string(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("AKIA"));
        assert!(!shown.contains("hunter2"));
    }
}
