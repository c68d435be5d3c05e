use crate::humanize::ByteSize;
use crate::storage::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const BUILTIN_LOCAL_ID: &str = "local";
pub const BUILTIN_LOCAL_LABEL: &str = "Local";
pub const BUILTIN_FILESYSTEM_ID: &str = "file1";
pub const BUILTIN_FILESYSTEM_LABEL: &str = "Filesystem";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Directory of the fjall keyspace holding file records
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Largest body accepted by the non-direct upload endpoint
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_max_upload_bytes() -> ByteSize {
    ByteSize::mib(100)
}

/// Backend behind a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKindName {
    File,
    S3,
    Memory,
}

/// One `[storage.drivers.<id>]` table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverSettings {
    pub label: String,
    pub kind: DriverKindName,
    /// Root directory of a `file` driver; defaults to `<files_root>/<id>`
    pub directory: Option<PathBuf>,
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub path_style_access: bool,
    /// Whether clients may upload straight to the backend
    #[serde(default = "default_direct_upload")]
    pub direct_upload: bool,
    pub multipart_threshold: Option<ByteSize>,
    pub min_part_size: Option<ByteSize>,
    /// Loaded from the environment, never from the file
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_direct_upload() -> bool {
    true
}

impl DriverSettings {
    pub fn file(label: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            kind: DriverKindName::File,
            directory: Some(directory.into()),
            endpoint: None,
            bucket: None,
            region: default_region(),
            path_style_access: false,
            direct_upload: false,
            multipart_threshold: None,
            min_part_size: None,
            access_key: None,
            secret_key: None,
        }
    }

    pub fn memory(label: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            kind: DriverKindName::Memory,
            directory: None,
            bucket: Some(bucket.into()),
            direct_upload: true,
            ..Self::file(label, PathBuf::new())
        }
    }

    pub fn s3(
        label: impl Into<String>,
        endpoint: Option<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            kind: DriverKindName::S3,
            endpoint,
            path_style_access: true,
            ..Self::memory(label, bucket)
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Driver used where no binding applies
    #[serde(default = "default_driver")]
    pub default_driver: String,
    /// Root of the built-in filesystem drivers
    #[serde(default = "default_files_root")]
    pub files_root: PathBuf,
    #[serde(default)]
    pub drivers: BTreeMap<String, DriverSettings>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_driver: default_driver(),
            files_root: default_files_root(),
            drivers: BTreeMap::new(),
        }
    }
}

fn default_driver() -> String {
    BUILTIN_LOCAL_ID.to_string()
}

fn default_files_root() -> PathBuf {
    PathBuf::from("data/files")
}

impl StorageConfig {
    /// Configured drivers plus the built-in `local` and `file1` drivers.
    /// A configured driver with a built-in id replaces the built-in.
    pub fn all_drivers(&self) -> BTreeMap<String, DriverSettings> {
        let mut drivers = BTreeMap::from([
            (
                BUILTIN_LOCAL_ID.to_string(),
                DriverSettings::file(BUILTIN_LOCAL_LABEL, self.files_root.clone()),
            ),
            (
                BUILTIN_FILESYSTEM_ID.to_string(),
                DriverSettings::file(
                    BUILTIN_FILESYSTEM_LABEL,
                    self.files_root.join(BUILTIN_FILESYSTEM_ID),
                ),
            ),
        ]);
        drivers.extend(self.drivers.clone());
        drivers
    }
}

/// Direct-upload sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Declared sizes above this get a multipart session
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: ByteSize,
    #[serde(default = "default_min_part_size")]
    pub min_part_size: ByteSize,
    #[serde(default = "default_max_part_count")]
    pub max_part_count: u32,
    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u64,
    /// Reject commits whose object size differs from the `fileSize` sent with
    /// the commit
    #[serde(default = "default_verify_size")]
    pub verify_size: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            min_part_size: default_min_part_size(),
            max_part_count: default_max_part_count(),
            url_expiry_secs: default_url_expiry_secs(),
            verify_size: default_verify_size(),
        }
    }
}

impl UploadConfig {
    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.url_expiry_secs)
    }
}

fn default_multipart_threshold() -> ByteSize {
    ByteSize::gib(1)
}

fn default_min_part_size() -> ByteSize {
    ByteSize::gib(1)
}

fn default_max_part_count() -> u32 {
    10_000
}

fn default_url_expiry_secs() -> u64 {
    60 * 60
}

fn default_verify_size() -> bool {
    false
}

/// Timeout and retry policy for backend calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// API tokens accepted in the `X-Dataverse-key` header
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub superuser_tokens: Vec<String>,
    /// token → user name
    #[serde(default)]
    pub user_tokens: BTreeMap<String, String>,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
