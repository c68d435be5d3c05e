use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::identifier::StorageIdentifier;
use crate::ingest::FileRecord;

use super::error::{LedgerError, Result};
use super::keys::{
    NEXT_FILE_ID, decode_id_value, encode_file_key, encode_identifier_key, encode_meta_key,
};

/// Fjall-backed persistent storage for file records, their identifier
/// index, tombstones and the id counter
#[derive(Clone)]
pub struct FileLedger {
    keyspace: Keyspace,
    files: PartitionHandle,
    identifiers: PartitionHandle,
    tombstones: PartitionHandle,
    metadata: PartitionHandle,
    /// Serialises read-check-write sequences (id allocation, duplicate checks)
    write_lock: Arc<Mutex<()>>,
}

/// Outcome of removing a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed(FileRecord),
    AlreadyDeleted,
}

impl FileLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening file ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let files = keyspace.open_partition("files", PartitionCreateOptions::default())?;
        let identifiers =
            keyspace.open_partition("identifiers", PartitionCreateOptions::default())?;
        let tombstones = keyspace.open_partition("tombstones", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!("File ledger opened successfully");
        Ok(Self {
            keyspace,
            files,
            identifiers,
            tombstones,
            metadata,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new record under a freshly allocated id and return it.
    ///
    /// The record, its identifier index entry and the advanced counter are
    /// written in one batch. Fails with `DuplicateIdentifier` if the storage
    /// identifier is already committed.
    pub fn commit(&self, mut record: FileRecord) -> Result<FileRecord> {
        let _guard = self.lock();

        let sid = record.storage_identifier.to_string();
        let sid_key = encode_identifier_key(&sid);
        if self.identifiers.get(&sid_key)?.is_some() {
            return Err(LedgerError::DuplicateIdentifier(sid));
        }

        let id = self.next_id()?;
        record.id = id;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.files, encode_file_key(id), serde_json::to_vec(&record)?);
        batch.insert(&self.identifiers, sid_key, id.to_string().into_bytes());
        batch.insert(
            &self.metadata,
            encode_meta_key(NEXT_FILE_ID),
            (id + 1).to_string().into_bytes(),
        );
        batch.commit()?;

        debug!(id, storage_identifier = %sid, "Committed file record");
        Ok(record)
    }

    fn next_id(&self) -> Result<u64> {
        match self.metadata.get(encode_meta_key(NEXT_FILE_ID))? {
            Some(value) => decode_id_value(&value),
            None => Ok(1),
        }
    }

    /// Get a committed record by id
    pub fn get(&self, id: u64) -> Result<Option<FileRecord>> {
        match self.files.get(encode_file_key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Id of the record committed under `identifier`, if any
    pub fn find_by_identifier(&self, identifier: &StorageIdentifier) -> Result<Option<u64>> {
        match self
            .identifiers
            .get(encode_identifier_key(&identifier.to_string()))?
        {
            Some(value) => Ok(Some(decode_id_value(&value)?)),
            None => Ok(None),
        }
    }

    pub fn is_deleted(&self, id: u64) -> Result<bool> {
        Ok(self.tombstones.get(encode_file_key(id))?.is_some())
    }

    /// Remove a record and leave a tombstone in one batch.
    ///
    /// A tombstoned id yields `AlreadyDeleted`; an id that was never
    /// committed fails with `FileNotFound`.
    pub fn remove(&self, id: u64) -> Result<Removal> {
        let _guard = self.lock();

        let Some(record) = self.get(id)? else {
            return if self.is_deleted(id)? {
                Ok(Removal::AlreadyDeleted)
            } else {
                Err(LedgerError::FileNotFound(id))
            };
        };

        let mut batch = self.keyspace.batch();
        batch.remove(&self.files, encode_file_key(id));
        batch.remove(
            &self.identifiers,
            encode_identifier_key(&record.storage_identifier.to_string()),
        );
        batch.insert(
            &self.tombstones,
            encode_file_key(id),
            Utc::now().to_rfc3339().into_bytes(),
        );
        batch.commit()?;

        debug!(id, "Removed file record");
        Ok(Removal::Removed(record))
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for health reporting)
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut file_count = 0;
        let mut tombstone_count = 0;

        for item in self.files.iter() {
            item?;
            file_count += 1;
        }

        for item in self.tombstones.iter() {
            item?;
            tombstone_count += 1;
        }

        Ok(LedgerStats {
            file_count,
            tombstone_count,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerStats {
    pub file_count: usize,
    pub tombstone_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetId;
    use crate::ingest::{Checksum, ChecksumAlgorithm, FileMetadata};
    use tempfile::TempDir;

    fn create_test_ledger() -> (FileLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = FileLedger::open(temp_dir.path().join("test_ledger")).unwrap();
        (ledger, temp_dir)
    }

    fn create_test_record(key: &str) -> FileRecord {
        FileRecord {
            id: 0,
            dataset: DatasetId(1),
            storage_identifier: StorageIdentifier::object_store("minio1", "mybucket", key).unwrap(),
            object_key: format!("10.5072/FK2/ABC123/{key}"),
            size_bytes: 6,
            checksum: Checksum::new(ChecksumAlgorithm::Sha1, "123456"),
            metadata: FileMetadata::named("foobar.txt"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_and_get() {
        let (ledger, _temp) = create_test_ledger();

        let first = ledger.commit(create_test_record("k1")).unwrap();
        let second = ledger.commit(create_test_record("k2")).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let retrieved = ledger.get(first.id).unwrap().unwrap();
        assert_eq!(retrieved, first);
        assert_eq!(
            ledger.find_by_identifier(&first.storage_identifier).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_get_nonexistent_file() {
        let (ledger, _temp) = create_test_ledger();
        assert!(ledger.get(99).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_identifier_is_rejected() {
        let (ledger, _temp) = create_test_ledger();

        ledger.commit(create_test_record("k1")).unwrap();
        let err = ledger.commit(create_test_record("k1")).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateIdentifier(_)));

        // rejected commit does not consume an id
        assert_eq!(ledger.commit(create_test_record("k2")).unwrap().id, 2);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let (ledger, _temp) = create_test_ledger();
        let record = ledger.commit(create_test_record("k1")).unwrap();

        assert_eq!(ledger.remove(record.id).unwrap(), Removal::Removed(record.clone()));
        assert!(ledger.get(record.id).unwrap().is_none());
        assert!(ledger.is_deleted(record.id).unwrap());
        assert_eq!(ledger.find_by_identifier(&record.storage_identifier).unwrap(), None);

        assert_eq!(ledger.remove(record.id).unwrap(), Removal::AlreadyDeleted);
        assert!(matches!(ledger.remove(42), Err(LedgerError::FileNotFound(42))));
    }

    #[test]
    fn test_stats() {
        let (ledger, _temp) = create_test_ledger();

        let record = ledger.commit(create_test_record("k1")).unwrap();
        ledger.commit(create_test_record("k2")).unwrap();
        ledger.remove(record.id).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.tombstone_count, 1);
    }
}
