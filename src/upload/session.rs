use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::DatasetId;
use crate::identifier::StorageIdentifier;

/// One presigned URL of a session, numbered from 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrl {
    pub part_number: u32,
    pub url: String,
}

/// Upload capability handed to a client
///
/// Advisory only: completion is established by the existence check at
/// commit, not by anything recorded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub dataset: DatasetId,
    pub storage_identifier: StorageIdentifier,
    /// Physical key the URLs write to
    #[serde(skip)]
    pub object_key: String,
    pub declared_size: u64,
    pub part_size: u64,
    /// Present only for multipart sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub urls: Vec<PartUrl>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_multipart(&self) -> bool {
        self.upload_id.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The single URL of a non-multipart session.
    pub fn single_url(&self) -> Option<&str> {
        match (&self.upload_id, self.urls.as_slice()) {
            (None, [only]) => Some(&only.url),
            _ => None,
        }
    }
}

/// In-flight sessions keyed by storage identifier
///
/// Lives only in memory; a restart forgets every session, which is fine
/// because nothing here is authoritative.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<StorageIdentifier, UploadSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StorageIdentifier, UploadSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, session: UploadSession) {
        self.lock()
            .insert(session.storage_identifier.clone(), session);
    }

    pub fn get(&self, identifier: &StorageIdentifier) -> Option<UploadSession> {
        self.lock().get(identifier).cloned()
    }

    /// Remove and return the session, e.g. once its file is committed.
    pub fn take(&self, identifier: &StorageIdentifier) -> Option<UploadSession> {
        self.lock().remove(identifier)
    }

    /// Remove and return every session expired at `now`.
    pub fn drain_expired(&self, now: DateTime<Utc>) -> Vec<UploadSession> {
        let mut sessions = self.lock();
        let expired: Vec<StorageIdentifier> = sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.storage_identifier.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
