//! HTTP boundary over the storage services
//!
//! Handlers resolve the dataset and driver under a short catalog lock, then
//! call the coordinator or ingest service without holding it.

pub mod auth;
pub mod error;
pub mod models;
pub mod server;
pub mod services;
pub mod state;
pub mod utils;

pub use server::{router, run};
