use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::DatasetId;
use crate::identifier::StorageIdentifier;
use crate::{Error, Result};

/// Lifecycle of a file, from the first issued URL to deletion
///
/// Only `commit_remote_file` moves `PendingCommit` to `Committed`, and only
/// `delete_file` moves `Committed` to `Deleted`. Sessions never committed stay
/// in the first two states and are garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Uploading,
    PendingCommit,
    Committed,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA-1")]
    Sha1,
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "MD5",
            ChecksumAlgorithm::Sha1 => "SHA-1",
            ChecksumAlgorithm::Sha256 => "SHA-256",
            ChecksumAlgorithm::Sha512 => "SHA-512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Ok(ChecksumAlgorithm::Md5),
            "SHA-1" | "SHA1" => Ok(ChecksumAlgorithm::Sha1),
            "SHA-256" | "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            "SHA-512" | "SHA512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(Error::Validation(format!("unknown checksum type '{s}'"))),
        }
    }
}

/// Checksum as declared by the client; recorded, never recomputed on commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type", alias = "@type")]
    pub algorithm: ChecksumAlgorithm,
    #[serde(alias = "@value")]
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into(),
        }
    }

    /// Value must be a non-empty hex string; its length is not checked
    /// against the algorithm.
    pub fn validate(&self) -> Result<()> {
        if self.value.is_empty() {
            return Err(Error::Validation(format!(
                "{} checksum value is empty",
                self.algorithm
            )));
        }
        if !self.value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!(
                "{} checksum value '{}' is not hexadecimal",
                self.algorithm, self.value
            )));
        }
        Ok(())
    }
}

/// Descriptive fields supplied with a file; none of them affect storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub restricted: bool,
}

impl FileMetadata {
    pub fn named(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }
}

/// Committed file metadata. The storage identifier never changes after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Assigned by the ledger on commit
    pub id: u64,
    pub dataset: DatasetId,
    pub storage_identifier: StorageIdentifier,
    /// Physical key inside the driver's bucket or directory
    pub object_key: String,
    pub size_bytes: u64,
    pub checksum: Checksum,
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub created_at: DateTime<Utc>,
}
