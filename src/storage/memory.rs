//! In-process bucket with direct-upload support
//!
//! Behaves like an S3 bucket as far as drivers are concerned: it hands out
//! presigned URLs (with a `memory://` scheme), runs multipart uploads and can
//! be told to fail upcoming calls. [`MemoryObjectClient::put_presigned`]
//! plays the part of a client uploading to one of its URLs.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use object_store::memory::InMemory;
use object_store::path::Path as StoragePath;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CompletedPart, ObjectMeta, ObjectStoreClient, PartTarget, StorageError, StorageResult};

const SCHEME: &str = "memory://";

/// Backend call that a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Get,
    Head,
    Delete,
    HeadBucket,
    CreateMultipart,
    CompleteMultipart,
    AbortMultipart,
}

/// Failure injected in place of a real result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transient,
    PermissionDenied,
    Backend,
}

impl FaultKind {
    fn to_error(self, op: Operation) -> StorageError {
        match self {
            FaultKind::Transient => StorageError::Transient(format!("injected fault on {op:?}")),
            FaultKind::PermissionDenied => {
                StorageError::PermissionDenied(format!("injected fault on {op:?}"))
            }
            FaultKind::Backend => StorageError::Backend(format!("injected fault on {op:?}")),
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

pub struct MemoryObjectClient {
    bucket: String,
    store: InMemory,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    faults: Mutex<HashMap<Operation, (u32, FaultKind)>>,
}

impl MemoryObjectClient {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            store: InMemory::new(),
            uploads: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next `times` calls of `op` fail with `kind`.
    pub async fn fail_next(&self, op: Operation, times: u32, kind: FaultKind) {
        self.faults.lock().await.insert(op, (times, kind));
    }

    /// Number of multipart uploads neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.uploads.lock().await.len()
    }

    /// Upload `data` to a URL issued by [`presigned_put_url`](ObjectStoreClient::presigned_put_url),
    /// returning the ETag the client would receive.
    pub async fn put_presigned(&self, url: &str, data: Bytes) -> StorageResult<String> {
        let target = PresignedTarget::parse(url)?;
        if target.bucket != self.bucket {
            return Err(StorageError::PermissionDenied(format!(
                "URL signed for bucket {}",
                target.bucket
            )));
        }
        if Utc::now().timestamp() > target.expires {
            return Err(StorageError::PermissionDenied(format!(
                "URL for {} has expired",
                target.key
            )));
        }

        let e_tag = e_tag_of(&data);
        match target.part {
            Some(part) => {
                let mut uploads = self.uploads.lock().await;
                let upload = uploads
                    .get_mut(&part.upload_id)
                    .filter(|upload| upload.key == target.key)
                    .ok_or_else(|| {
                        StorageError::NotFound(format!("upload {} for {}", part.upload_id, target.key))
                    })?;
                upload
                    .parts
                    .insert(part.part_number, (e_tag.clone(), data));
            }
            None => {
                let location = location(&target.key)?;
                self.store.put(&location, data.into()).await?;
            }
        }
        Ok(e_tag)
    }

    async fn check_fault(&self, op: Operation) -> StorageResult<()> {
        let mut faults = self.faults.lock().await;
        let Some((remaining, kind)) = faults.get_mut(&op) else {
            return Ok(());
        };
        let error = kind.to_error(op);
        *remaining -= 1;
        if *remaining == 0 {
            faults.remove(&op);
        }
        Err(error)
    }
}

fn location(key: &str) -> StorageResult<StoragePath> {
    StoragePath::parse(key).map_err(|e| StorageError::InvalidKey(format!("{key}: {e}")))
}

fn e_tag_of(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

struct PresignedTarget {
    bucket: String,
    key: String,
    expires: i64,
    part: Option<PartTarget>,
}

impl PresignedTarget {
    fn parse(url: &str) -> StorageResult<Self> {
        let invalid = || StorageError::InvalidKey(format!("not a presigned memory URL: {url}"));

        let rest = url.strip_prefix(SCHEME).ok_or_else(invalid)?;
        let (path, query) = rest.rsplit_once('?').ok_or_else(invalid)?;
        let (bucket, key) = path.split_once('/').ok_or_else(invalid)?;

        let mut expires = None;
        let mut upload_id = None;
        let mut part_number = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse().ok(),
                Some(("uploadId", v)) => upload_id = Some(v.to_string()),
                Some(("partNumber", v)) => part_number = v.parse().ok(),
                _ => {}
            }
        }

        let part = match (upload_id, part_number) {
            (Some(upload_id), Some(part_number)) => Some(PartTarget {
                upload_id,
                part_number,
            }),
            (None, None) => None,
            _ => return Err(invalid()),
        };

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            expires: expires.ok_or_else(invalid)?,
            part,
        })
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectClient {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.check_fault(Operation::Put).await?;
        self.store.put(&location(key)?, data.into()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.check_fault(Operation::Get).await?;
        let result = self.store.get(&location(key)?).await?;
        Ok(result.bytes().await?)
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.check_fault(Operation::Head).await?;
        let meta = self.store.head(&location(key)?).await?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: meta.size as u64,
            e_tag: meta.e_tag,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_fault(Operation::Delete).await?;
        self.store.delete(&location(key)?).await?;
        Ok(())
    }

    async fn head_bucket(&self) -> StorageResult<()> {
        self.check_fault(Operation::HeadBucket).await
    }

    async fn create_multipart_upload(&self, key: &str) -> StorageResult<String> {
        self.check_fault(Operation::CreateMultipart).await?;
        location(key)?;
        let upload_id = Uuid::new_v4().simple().to_string();
        self.uploads.lock().await.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn presigned_put_url(
        &self,
        key: &str,
        expires_in: Duration,
        part: Option<&PartTarget>,
    ) -> StorageResult<String> {
        location(key)?;
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        let mut url = format!("{SCHEME}{}/{key}?expires={expires}", self.bucket);
        if let Some(part) = part {
            url.push_str(&format!(
                "&uploadId={}&partNumber={}",
                part.upload_id, part.part_number
            ));
        }
        Ok(url)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        self.check_fault(Operation::CompleteMultipart).await?;
        if parts.is_empty() {
            return Err(StorageError::Backend(
                "multipart completion lists no parts".to_string(),
            ));
        }

        let mut uploads = self.uploads.lock().await;
        let upload = uploads
            .get(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StorageError::NotFound(format!("upload {upload_id} for {key}")))?;

        let mut ordered = parts;
        ordered.sort_by_key(|part| part.part_number);

        let mut body = BytesMut::new();
        for part in &ordered {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, data)) if *e_tag == part.e_tag => body.extend_from_slice(data),
                _ => {
                    return Err(StorageError::Backend(format!(
                        "part {} of upload {upload_id} is missing or has a different ETag",
                        part.part_number
                    )));
                }
            }
        }

        uploads.remove(upload_id);
        drop(uploads);
        self.store.put(&location(key)?, body.freeze().into()).await?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.check_fault(Operation::AbortMultipart).await?;
        let mut uploads = self.uploads.lock().await;
        match uploads.get(upload_id) {
            Some(upload) if upload.key == key => {
                uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StorageError::NotFound(format!("upload {upload_id} for {key}"))),
        }
    }

    fn supports_presign(&self) -> bool {
        true
    }

    fn bucket(&self) -> Option<&str> {
        Some(&self.bucket)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "10.5072/FK2/ABC123/18b8c06688c-21b8320a3ee5";

    #[tokio::test]
    async fn test_single_presigned_upload_lands_in_bucket() {
        let client = MemoryObjectClient::new("mybucket");
        let url = client
            .presigned_put_url(KEY, Duration::from_secs(3600), None)
            .await
            .unwrap();
        assert!(url.starts_with("memory://mybucket/10.5072/FK2/ABC123/"));

        client
            .put_presigned(&url, Bytes::from_static(b"import pandas"))
            .await
            .unwrap();
        assert_eq!(client.head(KEY).await.unwrap().size, 13);
    }

    #[tokio::test]
    async fn test_multipart_upload_concatenates_parts_in_order() {
        let client = MemoryObjectClient::new("mybucket");
        let upload_id = client.create_multipart_upload(KEY).await.unwrap();

        let mut completed = Vec::new();
        for (number, chunk) in [(2u32, "world"), (1, "hello ")] {
            let target = PartTarget {
                upload_id: upload_id.clone(),
                part_number: number,
            };
            let url = client
                .presigned_put_url(KEY, Duration::from_secs(60), Some(&target))
                .await
                .unwrap();
            let e_tag = client
                .put_presigned(&url, Bytes::from(chunk.as_bytes().to_vec()))
                .await
                .unwrap();
            completed.push(CompletedPart {
                part_number: number,
                e_tag,
            });
        }

        client
            .complete_multipart_upload(KEY, &upload_id, completed)
            .await
            .unwrap();
        assert_eq!(client.get(KEY).await.unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(client.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn test_complete_rejects_wrong_etag() {
        let client = MemoryObjectClient::new("mybucket");
        let upload_id = client.create_multipart_upload(KEY).await.unwrap();
        let parts = vec![CompletedPart {
            part_number: 1,
            e_tag: "\"bogus\"".into(),
        }];

        let result = client.complete_multipart_upload(KEY, &upload_id, parts).await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert_eq!(client.pending_uploads().await, 1);
    }

    #[tokio::test]
    async fn test_abort_discards_upload() {
        let client = MemoryObjectClient::new("mybucket");
        let upload_id = client.create_multipart_upload(KEY).await.unwrap();

        client.abort_multipart_upload(KEY, &upload_id).await.unwrap();
        assert_eq!(client.pending_uploads().await, 0);
        assert!(matches!(
            client.abort_multipart_upload(KEY, &upload_id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_url_is_refused() {
        let client = MemoryObjectClient::new("mybucket");
        let url = format!("memory://mybucket/{KEY}?expires=0");
        let result = client.put_presigned(&url, Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(StorageError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_injected_faults_fire_then_clear() {
        let client = MemoryObjectClient::new("mybucket");
        client.put(KEY, Bytes::from_static(b"x")).await.unwrap();
        client
            .fail_next(Operation::Delete, 2, FaultKind::Transient)
            .await;

        assert!(matches!(client.delete(KEY).await, Err(StorageError::Transient(_))));
        assert!(matches!(client.delete(KEY).await, Err(StorageError::Transient(_))));
        client.delete(KEY).await.unwrap();
        assert!(matches!(client.head(KEY).await, Err(StorageError::NotFound(_))));
    }
}
