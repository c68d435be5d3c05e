//! Storage driver registry
//!
//! A driver is a configured backend with a short id (`minio1`) and a human
//! label (`MinIO`). The registry is built once from configuration and never
//! changes afterwards; bindings live on catalog nodes and are resolved
//! against it.
//!
//! - [`DriverRegistry`] - lookup by id or label, listing, binding administration
//! - [`DriverConfig`] / [`DriverKind`] - what each driver points at
//! - [`Binding`] - a node's own binding, or the `"undefined"` sentinel
//! - [`Principal`] - caller identity for administrative operations

mod registry;
mod resolver;
mod types;

pub use registry::DriverRegistry;
pub use resolver::DatasetTarget;
pub use types::{Binding, Driver, DriverConfig, DriverKind, Principal};
