//! Where configuration comes from
//!
//! Production code loads layered files and environment variables; tests hand
//! a ready-made [`Config`] to [`StaticConfig`] instead of touching process
//! environment. Both paths run the same validation.

use std::path::PathBuf;

use super::models::Config;
use super::{ConfigError, sources, validation};

pub trait ConfigProvider: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Defaults, then the TOML file, then `DVSTORE__*` environment variables
#[derive(Debug, Clone, Default)]
pub struct LayeredConfig {
    path: Option<PathBuf>,
}

impl LayeredConfig {
    /// Read the file named by `DVSTORE_CONFIG`, or `config/dvstore.toml`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }
}

impl ConfigProvider for LayeredConfig {
    fn load(&self) -> Result<Config, ConfigError> {
        let config = match &self.path {
            None => sources::load()?,
            Some(path) => {
                let mut config = sources::load_from_sources(path)?;
                sources::load_secrets(&mut config, |name| std::env::var(name).ok());
                config
            }
        };
        validation::validate(&config)?;
        Ok(config)
    }
}

/// Fixed in-memory configuration
#[derive(Debug, Clone)]
pub struct StaticConfig(Config);

impl StaticConfig {
    pub fn new(config: Config) -> Self {
        Self(config)
    }
}

impl ConfigProvider for StaticConfig {
    fn load(&self) -> Result<Config, ConfigError> {
        validation::validate(&self.0)?;
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_static_config_is_validated() {
        let mut config = Config::default();
        config.storage.default_driver = "missing".to_string();

        let result = StaticConfig::new(config).load();
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::UnknownDefaultDriver(_)))
        ));
    }

    #[test]
    fn test_layered_config_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("dvstore.toml");
        fs::write(
            &config_path,
            r#"
[storage]
default_driver = "file1"

[telemetry]
log_level = "debug"
            "#,
        )
        .unwrap();

        let config = LayeredConfig::with_path(&config_path).load().unwrap();
        assert_eq!(config.storage.default_driver, "file1");
        assert_eq!(config.telemetry.log_level, "debug");
    }
}
