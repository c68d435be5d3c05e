//! Storage driver layer of a research data repository
//!
//! Collections and datasets are bound to storage drivers (a filesystem or an
//! S3-compatible endpoint). Clients upload large files straight to the
//! backend through presigned URLs; the ingest service records a file only
//! once the backend shows its object, and removes the object before the
//! record on delete.

pub mod api;
pub mod catalog;
pub mod config;
pub mod drivers;
pub mod error;
pub mod humanize;
pub mod identifier;
pub mod ingest;
pub mod ledger;
pub mod observability;
pub mod storage;
pub mod upload;

pub use error::{Error, ErrorKind, Result};
