//! Error taxonomy shared by the registry, coordinator and ingest service
//!
//! Lower layers keep their own error enums; they are folded into [`Error`]
//! at the service boundary so callers can match on a small, stable set of
//! outcomes.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown driver or label, or a binding that cannot be resolved
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller lacks the privilege required for the operation
    #[error("permission denied: {0}")]
    Permission(String),

    /// Missing or malformed input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Input is well formed but contradicts existing state
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failed after retries, or failed permanently
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Operation not offered by the driver, e.g. direct upload to a filesystem store
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Permission,
    Validation,
    Conflict,
    NotFound,
    BackendUnavailable,
    Unsupported,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Permission(_) => ErrorKind::Permission,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Error::NotFound(format!("object {key}")),
            StorageError::Unsupported(what) => Error::Unsupported(what),
            StorageError::InvalidKey(reason) => Error::Validation(reason),
            StorageError::Configuration(reason) => Error::Configuration(reason),
            other => Error::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::FileNotFound(id) => Error::NotFound(format!("file {id}")),
            LedgerError::DuplicateIdentifier(sid) => {
                Error::Conflict(format!("storage identifier {sid} is already committed"))
            }
            other => Error::BackendUnavailable(format!("metadata store: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
