use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use super::models::{Checksum, ChecksumAlgorithm, FileMetadata, FileRecord};
use crate::drivers::{DatasetTarget, DriverRegistry};
use crate::identifier::{StorageIdentifier, derive_key};
use crate::ledger::{FileLedger, Removal};
use crate::observability::Metrics;
use crate::storage::StorageError;
use crate::upload::SessionTable;
use crate::{Error, Result};

/// A client's report that bytes are in the backend
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// Wire form, parsed and validated by the service
    pub storage_identifier: String,
    /// Falls back to the size declared when the upload URLs were issued
    pub declared_size: Option<u64>,
    pub checksum: Checksum,
    pub metadata: FileMetadata,
}

/// Reconciles backend objects with file records
///
/// A record is written only after the backend has shown the object, and
/// removed only after the backend object is gone.
pub struct IngestService {
    registry: Arc<DriverRegistry>,
    ledger: FileLedger,
    sessions: Arc<SessionTable>,
    verify_size: bool,
    metrics: Arc<Metrics>,
    delete_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl IngestService {
    pub fn new(
        registry: Arc<DriverRegistry>,
        ledger: FileLedger,
        sessions: Arc<SessionTable>,
        verify_size: bool,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            ledger,
            sessions,
            verify_size,
            metrics,
            delete_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &FileLedger {
        &self.ledger
    }

    /// Commit a directly uploaded object as a file of the dataset.
    ///
    /// Everything checkable without the backend is checked first. The object
    /// must then exist (and, with `verify_size`, match a size the client sent
    /// with the commit); otherwise nothing is written.
    pub async fn commit_remote_file(
        &self,
        target: &DatasetTarget,
        request: CommitRequest,
    ) -> Result<FileRecord> {
        let result = self.reconcile_and_commit(target, request).await;
        if let Err(err) = &result {
            self.metrics.commit_rejected();
            warn!(dataset = %target.dataset, driver = %target.driver.id(), error = %err, "Rejected file commit");
        }
        result
    }

    async fn reconcile_and_commit(
        &self,
        target: &DatasetTarget,
        request: CommitRequest,
    ) -> Result<FileRecord> {
        let identifier: StorageIdentifier = request.storage_identifier.parse()?;
        request.checksum.validate()?;
        validate_metadata(&request.metadata)?;
        target.check_owns(&identifier)?;

        let session = self.sessions.get(&identifier);
        match session.as_ref().map(|s| s.dataset) {
            Some(issued_for) if issued_for != target.dataset => {
                return Err(Error::Conflict(format!(
                    "{identifier} was issued for dataset {issued_for}, not {}",
                    target.dataset
                )));
            }
            _ => {}
        }
        let explicit_size = request.declared_size.is_some();
        let declared_size = request
            .declared_size
            .or(session.map(|s| s.declared_size))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "declared size is required to commit {identifier}"
                ))
            })?;

        if self.ledger.find_by_identifier(&identifier)?.is_some() {
            return Err(Error::Conflict(format!("{identifier} is already committed")));
        }

        let object_key = target.object_key(identifier.key());
        let started = Instant::now();
        let meta = match target.driver.client.head(&object_key).await {
            Ok(meta) => meta,
            Err(StorageError::NotFound(_)) => {
                return Err(Error::NotFound(format!(
                    "no object behind {identifier}; upload the bytes before committing"
                )));
            }
            Err(err) => return Err(err.into()),
        };

        // A size carried over from the upload session is advisory only
        if self.verify_size && explicit_size && meta.size != declared_size {
            return Err(Error::Validation(format!(
                "{identifier} holds {} bytes, but {declared_size} were declared",
                meta.size
            )));
        }

        let record = self.ledger.commit(FileRecord {
            id: 0,
            dataset: target.dataset,
            storage_identifier: identifier,
            object_key,
            size_bytes: declared_size,
            checksum: request.checksum,
            metadata: request.metadata,
            created_at: Utc::now(),
        })?;
        self.sessions.take(&record.storage_identifier);
        self.metrics.file_committed();

        info!(
            id = record.id,
            dataset = %record.dataset,
            driver = %target.driver.id(),
            storage_identifier = %record.storage_identifier,
            size = record.size_bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Committed remote file"
        );
        Ok(record)
    }

    /// Store `data` through the server and commit it, for drivers or clients
    /// that do not upload directly.
    ///
    /// If the record cannot be written the object is deleted again.
    pub async fn ingest_bytes(
        &self,
        target: &DatasetTarget,
        data: Bytes,
        metadata: FileMetadata,
    ) -> Result<FileRecord> {
        validate_metadata(&metadata)?;

        let key = derive_key();
        let identifier = target.identifier(&key)?;
        let object_key = target.object_key(&key);
        let checksum = Checksum::new(ChecksumAlgorithm::Sha256, hex::encode(Sha256::digest(&data)));
        let size = data.len() as u64;
        let started = Instant::now();

        target.driver.client.put(&object_key, data).await?;

        let committed = self.ledger.commit(FileRecord {
            id: 0,
            dataset: target.dataset,
            storage_identifier: identifier,
            object_key: object_key.clone(),
            size_bytes: size,
            checksum,
            metadata,
            created_at: Utc::now(),
        });

        let record = match committed {
            Ok(record) => record,
            Err(err) => {
                error!(driver = %target.driver.id(), key = %object_key, error = %err, "Failed to record ingested file, removing object");
                if let Err(cleanup) = target.driver.client.delete(&object_key).await {
                    error!(driver = %target.driver.id(), key = %object_key, error = %cleanup, "Failed to remove orphaned object");
                }
                return Err(err.into());
            }
        };
        self.metrics.file_committed();

        info!(
            id = record.id,
            dataset = %record.dataset,
            driver = %target.driver.id(),
            storage_identifier = %record.storage_identifier,
            size,
            duration_ms = started.elapsed().as_millis() as u64,
            "Ingested file"
        );
        Ok(record)
    }

    /// Committed record by id; deleted and unknown ids are `NotFound`.
    pub fn get_file(&self, id: u64) -> Result<FileRecord> {
        self.ledger
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("file {id}")))
    }

    /// Delete the backend object, then the record.
    ///
    /// Idempotent: a file already deleted succeeds again. Any backend failure
    /// other than a missing object leaves the record in place.
    pub async fn delete_file(&self, id: u64) -> Result<()> {
        let lock = self.delete_lock(id);
        let result = {
            let _guard = lock.lock().await;
            self.delete_exclusive(id).await
        };
        self.release_delete_lock(id, lock);
        result
    }

    async fn delete_exclusive(&self, id: u64) -> Result<()> {
        let Some(record) = self.ledger.get(id)? else {
            return if self.ledger.is_deleted(id)? {
                info!(id, "File already deleted");
                Ok(())
            } else {
                Err(Error::NotFound(format!("file {id}")))
            };
        };

        let driver = self.registry.get(record.storage_identifier.driver_id())?;
        match driver.client.delete(&record.object_key).await {
            Ok(()) => {}
            Err(StorageError::NotFound(_)) => {
                warn!(id, driver = %driver.id(), key = %record.object_key, "Backend object already absent");
            }
            Err(err) => {
                error!(id, driver = %driver.id(), key = %record.object_key, error = %err, "Backend delete failed, keeping file record");
                return Err(Error::BackendUnavailable(format!(
                    "could not delete {}: {err}",
                    record.storage_identifier
                )));
            }
        }

        if let Removal::Removed(record) = self.ledger.remove(id)? {
            self.metrics.file_deleted();
            info!(
                id,
                dataset = %record.dataset,
                driver = %driver.id(),
                storage_identifier = %record.storage_identifier,
                "Deleted file"
            );
        }
        Ok(())
    }

    fn delete_lock(&self, id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .delete_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    fn release_delete_lock(&self, id: u64, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .delete_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // the map's copy plus ours means no other caller is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
    }
}

fn validate_metadata(metadata: &FileMetadata) -> Result<()> {
    if metadata.file_name.trim().is_empty() {
        return Err(Error::Validation("fileName is required".into()));
    }
    let escapes = |label: &str| label.starts_with('/') || label.split('/').any(|s| s == "..");
    match &metadata.directory_label {
        Some(label) if escapes(label) => Err(Error::Validation(format!(
            "directoryLabel '{label}' must be a relative path"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::drivers::{DriverConfig, Principal};
    use crate::storage::{FaultKind, MemoryObjectClient, ObjectStoreClient, Operation};
    use crate::upload::UploadSession;
    use crate::ErrorKind;
    use tempfile::TempDir;

    struct Fixture {
        service: IngestService,
        target: DatasetTarget,
        backend: Arc<MemoryObjectClient>,
        sessions: Arc<SessionTable>,
        metrics: Arc<Metrics>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryObjectClient::new("mybucket"));
        let registry = DriverRegistry::new("minio1").with_driver(
            DriverConfig::memory("minio1", "MinIO", "mybucket"),
            backend.clone(),
        );

        let mut catalog = Catalog::new();
        let c = catalog.create_collection("c", catalog.root()).unwrap();
        let d = catalog
            .create_dataset(c, "doi:10.5072/FK2/ABC123".parse().unwrap())
            .unwrap();
        registry
            .set_collection_binding(&Principal::Superuser, &mut catalog, c, "MinIO")
            .unwrap();
        let target = registry.dataset_target(&catalog, d).unwrap();

        let metrics = Arc::new(Metrics::new());
        let sessions = Arc::new(SessionTable::new());
        let service = IngestService::new(
            Arc::new(registry),
            FileLedger::open(dir.path().join("ledger")).unwrap(),
            sessions.clone(),
            true,
            metrics.clone(),
        );
        Fixture {
            service,
            target,
            backend,
            sessions,
            metrics,
            _dir: dir,
        }
    }

    fn request(key: &str, size: Option<u64>) -> CommitRequest {
        CommitRequest {
            storage_identifier: format!("minio1://mybucket:{key}"),
            declared_size: size,
            checksum: Checksum::new(ChecksumAlgorithm::Sha1, "123456"),
            metadata: FileMetadata::named("foobar.txt"),
        }
    }

    async fn upload(f: &Fixture, key: &str, body: &'static [u8]) {
        f.backend
            .put(&f.target.object_key(key), Bytes::from_static(body))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_commit_after_upload() {
        let f = fixture();
        upload(&f, "k1", b"foobar").await;

        let record = f
            .service
            .commit_remote_file(&f.target, request("k1", Some(6)))
            .await
            .unwrap();
        assert_eq!(record.storage_identifier.to_string(), "minio1://mybucket:k1");
        assert_eq!(record.object_key, "10.5072/FK2/ABC123/k1");
        assert_eq!(record.checksum.value, "123456");
        assert_eq!(f.service.get_file(record.id).unwrap(), record);
        assert_eq!(f.metrics.snapshot().files_committed, 1);
    }

    #[tokio::test]
    async fn test_commit_without_size_creates_nothing() {
        let f = fixture();
        upload(&f, "k1", b"foobar").await;

        let err = f
            .service
            .commit_remote_file(&f.target, request("k1", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.service.ledger().stats().unwrap().file_count, 0);
        assert_eq!(f.metrics.snapshot().commit_rejections, 1);
    }

    #[tokio::test]
    async fn test_commit_falls_back_to_session_size_without_checking_it() {
        let f = fixture();
        upload(&f, "k1", b"foobar").await;
        let now = Utc::now();
        f.sessions.insert(UploadSession {
            dataset: f.target.dataset,
            storage_identifier: "minio1://mybucket:k1".parse().unwrap(),
            object_key: f.target.object_key("k1"),
            declared_size: 1_000_000_000,
            part_size: 1_000_000_000,
            upload_id: None,
            urls: Vec::new(),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
        });

        let record = f
            .service
            .commit_remote_file(&f.target, request("k1", None))
            .await
            .unwrap();
        assert_eq!(record.size_bytes, 1_000_000_000);
        assert!(f.sessions.is_empty());
        assert_eq!(f.metrics.snapshot().commit_rejections, 0);
    }

    #[tokio::test]
    async fn test_commit_of_absent_object_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .commit_remote_file(&f.target, request("k1", Some(6)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.service.ledger().stats().unwrap().file_count, 0);
    }

    #[tokio::test]
    async fn test_commit_rejects_foreign_driver_and_duplicates() {
        let f = fixture();
        upload(&f, "k1", b"foobar").await;

        let mut foreign = request("k1", Some(6));
        foreign.storage_identifier = "localstack1://mybucket:k1".into();
        let err = f
            .service
            .commit_remote_file(&f.target, foreign)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        f.service
            .commit_remote_file(&f.target, request("k1", Some(6)))
            .await
            .unwrap();
        let err = f
            .service
            .commit_remote_file(&f.target, request("k1", Some(6)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_commit_rejects_size_mismatch_and_bad_input() {
        let f = fixture();
        upload(&f, "k1", b"foobar").await;

        let err = f
            .service
            .commit_remote_file(&f.target, request("k1", Some(7)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut malformed = request("k1", Some(6));
        malformed.storage_identifier = "no-delimiter".into();
        let err = f.service.commit_remote_file(&f.target, malformed).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut bad_checksum = request("k1", Some(6));
        bad_checksum.checksum.value = String::new();
        let err = f
            .service
            .commit_remote_file(&f.target, bad_checksum)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_ingest_bytes_and_delete() {
        let f = fixture();
        let record = f
            .service
            .ingest_bytes(&f.target, Bytes::from_static(b"a"), FileMetadata::named("a.txt"))
            .await
            .unwrap();

        assert_eq!(record.size_bytes, 1);
        assert_eq!(record.checksum.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(
            record.checksum.value,
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
        assert_eq!(f.backend.get(&record.object_key).await.unwrap(), Bytes::from_static(b"a"));

        f.service.delete_file(record.id).await.unwrap();
        assert!(matches!(
            f.backend.get(&record.object_key).await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(
            f.service.get_file(record.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        // second delete is a no-op
        f.service.delete_file(record.id).await.unwrap();
        assert_eq!(f.metrics.snapshot().files_deleted, 1);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_id_is_not_found() {
        let f = fixture();
        let err = f.service.delete_file(404).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_record() {
        let f = fixture();
        let record = f
            .service
            .ingest_bytes(&f.target, Bytes::from_static(b"a"), FileMetadata::named("a.txt"))
            .await
            .unwrap();

        f.backend
            .fail_next(Operation::Delete, 1, FaultKind::PermissionDenied)
            .await;
        let err = f.service.delete_file(record.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert_eq!(f.service.get_file(record.id).unwrap(), record);

        f.service.delete_file(record.id).await.unwrap();
        assert_eq!(
            f.service.get_file(record.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_when_object_already_gone() {
        let f = fixture();
        let record = f
            .service
            .ingest_bytes(&f.target, Bytes::from_static(b"a"), FileMetadata::named("a.txt"))
            .await
            .unwrap();
        f.backend.delete(&record.object_key).await.unwrap();

        f.service.delete_file(record.id).await.unwrap();
        assert!(f.service.ledger().is_deleted(record.id).unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_deletes_both_succeed() {
        let f = fixture();
        let record = f
            .service
            .ingest_bytes(&f.target, Bytes::from_static(b"a"), FileMetadata::named("a.txt"))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            f.service.delete_file(record.id),
            f.service.delete_file(record.id)
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(f.metrics.snapshot().files_deleted, 1);
        assert!(f.service.delete_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_validation() {
        let f = fixture();
        let err = f
            .service
            .ingest_bytes(&f.target, Bytes::from_static(b"a"), FileMetadata::named(" "))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let metadata = FileMetadata {
            directory_label: Some("../escape".into()),
            ..FileMetadata::named("a.txt")
        };
        let err = f
            .service
            .ingest_bytes(&f.target, Bytes::from_static(b"a"), metadata)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
