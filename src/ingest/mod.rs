//! File ingest and reconciliation
//!
//! Ties backend objects to file records in both directions: commit checks
//! the backend before writing a record, delete removes the backend object
//! before removing the record.

mod models;
mod service;

pub use models::{Checksum, ChecksumAlgorithm, FileMetadata, FileRecord, FileState};
pub use service::{CommitRequest, IngestService};
