//! Storage identifiers and persistent identifiers
//!
//! A storage identifier names where a file's bytes live:
//!
//! - `driverId://bucket:key` for object-store drivers, e.g. `minio1://mybucket:18b8c06688c-21b8320a3ee5`
//! - `driverId:key` for filesystem drivers, e.g. `file1:18b8c06688c-21b8320a3ee5`
//!
//! The key is relative to the owning dataset. The physical object key is the
//! dataset prefix joined with it (see [`object_key`]), so every object of a
//! dataset lives under that dataset's namespace on a shared bucket.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// S3 limits object keys to 1024 bytes of UTF-8.
pub const MAX_KEY_BYTES: usize = 1024;

const OBJECT_STORE_DELIMITER: &str = "://";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("malformed storage identifier '{0}'")]
    Malformed(String),

    #[error("invalid driver id '{0}'")]
    InvalidDriverId(String),

    #[error("invalid bucket name '{0}'")]
    InvalidBucket(String),

    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid persistent identifier '{0}'")]
    InvalidPersistentId(String),
}

impl From<IdentifierError> for crate::Error {
    fn from(err: IdentifierError) -> Self {
        crate::Error::Validation(err.to_string())
    }
}

/// Parsed form of a storage identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageIdentifier {
    driver_id: String,
    bucket: Option<String>,
    key: String,
}

impl StorageIdentifier {
    /// Identifier for an object-store driver; validates every component.
    pub fn object_store(
        driver_id: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, IdentifierError> {
        let id = Self {
            driver_id: driver_id.into(),
            bucket: Some(bucket.into()),
            key: key.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// Identifier for a filesystem driver.
    pub fn local(
        driver_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, IdentifierError> {
        let id = Self {
            driver_id: driver_id.into(),
            bucket: None,
            key: key.into(),
        };
        id.validate()?;
        Ok(id)
    }

    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate(&self) -> Result<(), IdentifierError> {
        validate_driver_id(&self.driver_id)?;
        if let Some(bucket) = &self.bucket {
            validate_bucket(bucket)?;
        }
        validate_key(&self.key)
    }
}

impl fmt::Display for StorageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucket {
            Some(bucket) => write!(f, "{}://{}:{}", self.driver_id, bucket, self.key),
            None => write!(f, "{}:{}", self.driver_id, self.key),
        }
    }
}

impl FromStr for StorageIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

impl Serialize for StorageIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StorageIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Canonical string for the given components.
pub fn encode(driver_id: &str, bucket: Option<&str>, key: &str) -> Result<String, IdentifierError> {
    let id = match bucket {
        Some(bucket) => StorageIdentifier::object_store(driver_id, bucket, key)?,
        None => StorageIdentifier::local(driver_id, key)?,
    };
    Ok(id.to_string())
}

/// Parse either wire form. `://` marks an object-store identifier, which
/// then holds exactly one more `:`; a filesystem identifier holds exactly
/// one `:`. Keys never contain `:`, so any other delimiter count is
/// malformed.
pub fn decode(input: &str) -> Result<StorageIdentifier, IdentifierError> {
    let malformed = || IdentifierError::Malformed(input.to_string());

    if let Some((driver_id, rest)) = input.split_once(OBJECT_STORE_DELIMITER) {
        let (bucket, key) = rest.split_once(':').ok_or_else(malformed)?;
        if driver_id.is_empty() || bucket.is_empty() || key.is_empty() || key.contains(':') {
            return Err(malformed());
        }
        return StorageIdentifier::object_store(driver_id, bucket, key);
    }

    let (driver_id, key) = input.split_once(':').ok_or_else(malformed)?;
    if driver_id.is_empty() || key.is_empty() || key.contains(':') {
        return Err(malformed());
    }
    StorageIdentifier::local(driver_id, key)
}

pub fn validate_driver_id(driver_id: &str) -> Result<(), IdentifierError> {
    let valid = !driver_id.is_empty()
        && driver_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(IdentifierError::InvalidDriverId(driver_id.to_string()))
    }
}

/// S3 bucket naming: 3 to 63 lowercase letters, digits, `-` and `.`,
/// starting and ending with a letter or digit.
pub fn validate_bucket(bucket: &str) -> Result<(), IdentifierError> {
    let bytes = bucket.as_bytes();
    let edge_ok = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let valid = (3..=63).contains(&bytes.len())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.'))
        && bytes.first().is_some_and(edge_ok)
        && bytes.last().is_some_and(edge_ok)
        && !bucket.contains("..");
    if valid {
        Ok(())
    } else {
        Err(IdentifierError::InvalidBucket(bucket.to_string()))
    }
}

pub fn validate_key(key: &str) -> Result<(), IdentifierError> {
    let invalid = |reason| {
        Err(IdentifierError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("empty");
    }
    if key.len() > MAX_KEY_BYTES {
        return invalid("longer than 1024 bytes");
    }
    if key.starts_with('/') {
        return invalid("leading '/'");
    }
    if key.split('/').any(|segment| segment == "..") {
        return invalid("'..' segment");
    }
    if key.chars().any(char::is_control) {
        return invalid("control character");
    }
    if key.contains(':') {
        return invalid("':' is the identifier delimiter");
    }
    Ok(())
}

/// Physical key of a file: dataset prefix, then the identifier's key.
pub fn object_key(dataset_prefix: &str, key: &str) -> String {
    format!("{}/{}", dataset_prefix.trim_end_matches('/'), key)
}

/// New file key: creation time in hex milliseconds plus 48 random bits,
/// e.g. `18b8c06688c-21b8320a3ee5`.
pub fn derive_key() -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().as_u128() & 0xffff_ffff_ffff;
    format!("{millis:x}-{random:012x}")
}

/// Persistent identifier of a dataset, e.g. `doi:10.5072/FK2/ABC123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PersistentId {
    protocol: Protocol,
    identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Doi,
    Hdl,
    Perma,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Doi => "doi",
            Protocol::Hdl => "hdl",
            Protocol::Perma => "perma",
        }
    }
}

impl PersistentId {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Namespace root for the dataset's objects: the identifier without its
    /// protocol, `doi:10.5072/FK2/ABC123` giving `10.5072/FK2/ABC123`.
    pub fn dataset_prefix(&self) -> &str {
        &self.identifier
    }
}

impl FromStr for PersistentId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentifierError::InvalidPersistentId(s.to_string());

        let (protocol, identifier) = s.split_once(':').ok_or_else(invalid)?;
        let protocol = match protocol {
            "doi" => Protocol::Doi,
            "hdl" => Protocol::Hdl,
            "perma" => Protocol::Perma,
            _ => return Err(invalid()),
        };
        validate_key(identifier).map_err(|_| invalid())?;
        if identifier.ends_with('/') {
            return Err(invalid());
        }

        Ok(Self {
            protocol,
            identifier: identifier.to_string(),
        })
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol.as_str(), self.identifier)
    }
}

impl Serialize for PersistentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PersistentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
