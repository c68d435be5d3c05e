use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{DriverKindName, DriverSettings};
use crate::storage::{ObjectStoreClient, S3Credentials};

/// Backend a driver talks to
#[derive(Debug, Clone)]
pub enum DriverKind {
    File {
        directory: PathBuf,
    },
    ObjectStore {
        endpoint: Option<String>,
        bucket: String,
        region: String,
        path_style_access: bool,
        credentials: Option<S3Credentials>,
    },
    Memory {
        bucket: String,
    },
}

/// Immutable description of one configured driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub id: String,
    pub label: String,
    pub kind: DriverKind,
    /// Clients may upload straight to the backend
    pub direct_upload: bool,
    /// Overrides of `[upload]` for this driver
    pub multipart_threshold: Option<u64>,
    pub min_part_size: Option<u64>,
}

impl DriverConfig {
    /// Build from a validated `[storage.drivers.<id>]` table.
    pub fn from_settings(id: &str, settings: &DriverSettings, files_root: &Path) -> Self {
        let kind = match settings.kind {
            DriverKindName::File => DriverKind::File {
                directory: settings
                    .directory
                    .clone()
                    .unwrap_or_else(|| files_root.join(id)),
            },
            DriverKindName::S3 => DriverKind::ObjectStore {
                endpoint: settings.endpoint.clone(),
                bucket: settings.bucket.clone().unwrap_or_default(),
                region: settings.region.clone(),
                path_style_access: settings.path_style_access,
                credentials: match (&settings.access_key, &settings.secret_key) {
                    (Some(access_key), Some(secret_key)) => Some(S3Credentials {
                        access_key: access_key.clone(),
                        secret_key: secret_key.clone(),
                    }),
                    _ => None,
                },
            },
            DriverKindName::Memory => DriverKind::Memory {
                bucket: settings.bucket.clone().unwrap_or_default(),
            },
        };

        Self {
            id: id.to_string(),
            label: settings.label.clone(),
            kind,
            direct_upload: settings.direct_upload && settings.kind != DriverKindName::File,
            multipart_threshold: settings.multipart_threshold.map(|s| s.as_u64()),
            min_part_size: settings.min_part_size.map(|s| s.as_u64()),
        }
    }

    pub fn file(id: &str, label: &str, directory: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: DriverKind::File {
                directory: directory.into(),
            },
            direct_upload: false,
            multipart_threshold: None,
            min_part_size: None,
        }
    }

    pub fn memory(id: &str, label: &str, bucket: &str) -> Self {
        Self {
            kind: DriverKind::Memory {
                bucket: bucket.to_string(),
            },
            direct_upload: true,
            ..Self::file(id, label, PathBuf::new())
        }
    }

    pub fn bucket(&self) -> Option<&str> {
        match &self.kind {
            DriverKind::File { .. } => None,
            DriverKind::ObjectStore { bucket, .. } | DriverKind::Memory { bucket } => Some(bucket),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            DriverKind::File { .. } => "file",
            DriverKind::ObjectStore { .. } => "s3",
            DriverKind::Memory { .. } => "memory",
        }
    }
}

/// A driver together with the client that reaches its backend
#[derive(Clone)]
pub struct Driver {
    pub config: DriverConfig,
    pub client: Arc<dyn ObjectStoreClient>,
}

impl Driver {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    /// Direct upload needs both the driver flag and a client able to presign.
    pub fn allows_direct_upload(&self) -> bool {
        self.config.direct_upload && self.client.supports_presign()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.config)
            .field("backend", &self.client.backend_name())
            .finish()
    }
}

/// Binding stored at one node, as opposed to the resolved driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Explicit(String),
    Undefined,
}

impl Binding {
    pub const UNDEFINED: &'static str = "undefined";

    /// Driver id, or `"undefined"` when the node has no binding of its own.
    pub fn as_str(&self) -> &str {
        match self {
            Binding::Explicit(id) => id,
            Binding::Undefined => Self::UNDEFINED,
        }
    }
}

/// Who is calling, as established by the authentication collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Superuser,
    User(String),
    Anonymous,
}

impl Principal {
    pub fn is_superuser(&self) -> bool {
        matches!(self, Principal::Superuser)
    }

    pub(crate) fn require_superuser(&self, action: &str) -> crate::Result<()> {
        if self.is_superuser() {
            Ok(())
        } else {
            Err(crate::Error::Permission(format!("{action} requires a superuser")))
        }
    }
}
