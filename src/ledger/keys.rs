/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `files`: file:{id:020} -> FileRecord (JSON)
/// - `identifiers`: sid:{storage identifier} -> id (decimal string)
/// - `tombstones`: file:{id:020} -> deletion time (RFC 3339)
/// - `metadata`: meta:{key} -> value (string)
///
/// Ids are zero-padded so keys sort in commit order.
use super::error::{LedgerError, Result};

pub const NEXT_FILE_ID: &str = "next_file_id";

/// Encode a file key: file:{id:020}
pub fn encode_file_key(id: u64) -> Vec<u8> {
    format!("file:{:020}", id).into_bytes()
}

/// Decode a file key: file:{id:020} -> id
pub fn decode_file_key(key: &[u8]) -> Option<u64> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix("file:")?.parse().ok()
}

/// Encode a storage identifier key: sid:{identifier}
pub fn encode_identifier_key(identifier: &str) -> Vec<u8> {
    format!("sid:{}", identifier).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

/// Decimal id stored as a value in `identifiers` and `metadata`
pub fn decode_id_value(value: &[u8]) -> Result<u64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| LedgerError::InvalidKey(String::from_utf8_lossy(value).into_owned()))
}
