//! Configuration management for dvstore
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use dvstore::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Default driver: {}", config.storage.default_driver);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `DVSTORE__<section>__<key>`
//!
//! Examples:
//! - `DVSTORE__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `DVSTORE__STORAGE__DEFAULT_DRIVER=minio1`
//! - `DVSTORE__UPLOAD__MIN_PART_SIZE=64MiB`
//!
//! Driver credentials are read only from the environment:
//! `DVSTORE_<DRIVERID>_ACCESS_KEY` and `DVSTORE_<DRIVERID>_SECRET_KEY`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/dvstore.toml`.
//! This can be overridden using the `DVSTORE_CONFIG` environment variable.

mod models;
mod provider;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    AuthConfig, BUILTIN_FILESYSTEM_ID, BUILTIN_FILESYSTEM_LABEL, BUILTIN_LOCAL_ID,
    BUILTIN_LOCAL_LABEL, Config, DriverKindName, DriverSettings, RetryConfig, ServerConfig,
    StorageConfig, TelemetryConfig, UploadConfig,
};
pub use provider::{ConfigProvider, LayeredConfig, StaticConfig};
pub use sources::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`DVSTORE__*`)
    /// 2. TOML file (default: `config/dvstore.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (unknown default driver, duplicate labels, part sizes, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        LayeredConfig::new().load()
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: impl Into<std::path::PathBuf>) -> Result<Self, ConfigError> {
        LayeredConfig::with_path(path).load()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}
