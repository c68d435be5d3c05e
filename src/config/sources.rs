use super::models::{Config, DriverKindName};
use config::{ConfigError, Environment, File};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "DVSTORE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/dvstore.toml";
const ENV_PREFIX: &str = "DVSTORE";
const ENV_SEPARATOR: &str = "__";

/// Path of the TOML file: `DVSTORE_CONFIG` or the default location.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(&config_path())?;
    load_secrets(&mut config, |name| env::var(name).ok());
    Ok(config)
}

/// Fill S3 credentials from the environment. Secrets never come from TOML.
///
/// Driver `minio1` reads `DVSTORE_MINIO1_ACCESS_KEY` and
/// `DVSTORE_MINIO1_SECRET_KEY`, falling back to `AWS_ACCESS_KEY_ID` and
/// `AWS_SECRET_ACCESS_KEY`.
pub fn load_secrets(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    for (id, driver) in config.storage.drivers.iter_mut() {
        if driver.kind != DriverKindName::S3 {
            continue;
        }
        let prefix = env_name(id);
        driver.access_key = lookup(&format!("{ENV_PREFIX}_{prefix}_ACCESS_KEY"))
            .or_else(|| lookup("AWS_ACCESS_KEY_ID"));
        driver.secret_key = lookup(&format!("{ENV_PREFIX}_{prefix}_SECRET_KEY"))
            .or_else(|| lookup("AWS_SECRET_ACCESS_KEY"));
    }
}

fn env_name(driver_id: &str) -> String {
    driver_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: &Path) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // DVSTORE__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .with_list_parse_key("auth.superuser_tokens")
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
