use std::collections::BTreeMap;
use std::sync::Arc;

use super::types::{Driver, DriverConfig, DriverKind, Principal};
use crate::config::Config;
use crate::observability::Metrics;
use crate::storage::{
    LocalObjectClient, MemoryObjectClient, ObjectStoreClient, RetryPolicy, RetryingClient,
    S3ObjectClient, S3Settings,
};
use crate::{Error, Result};

/// Drivers keyed by id and by label, built once at startup
#[derive(Clone, Debug)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<Driver>>,
    labels: BTreeMap<String, String>,
    default_driver: String,
}

impl DriverRegistry {
    /// Empty registry; at least the default driver must be added before use.
    pub fn new(default_driver: impl Into<String>) -> Self {
        Self {
            drivers: BTreeMap::new(),
            labels: BTreeMap::new(),
            default_driver: default_driver.into(),
        }
    }

    /// Build every configured driver (built-ins included) and its client.
    /// Each client is wrapped in the configured retry policy.
    pub async fn from_config(config: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        let policy = config.retry.policy();
        let mut registry = Self::new(config.storage.default_driver.clone());

        for (id, settings) in config.storage.all_drivers() {
            let driver_config =
                DriverConfig::from_settings(&id, &settings, &config.storage.files_root);
            let client = build_client(&driver_config, &policy, &metrics).await?;
            tracing::info!(
                driver = %id,
                label = %driver_config.label,
                kind = driver_config.kind_name(),
                direct_upload = driver_config.direct_upload,
                "Registered storage driver"
            );
            registry = registry.with_driver(driver_config, client);
        }

        registry.get(&config.storage.default_driver)?;
        Ok(registry)
    }

    /// Add or replace a driver with an explicit client.
    pub fn with_driver(mut self, config: DriverConfig, client: Arc<dyn ObjectStoreClient>) -> Self {
        if let Some(previous) = self.drivers.get(&config.id) {
            self.labels.remove(previous.label());
        }
        self.labels.insert(config.label.clone(), config.id.clone());
        self.drivers
            .insert(config.id.clone(), Arc::new(Driver { config, client }));
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<Driver>> {
        self.drivers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("unknown storage driver '{id}'")))
    }

    pub fn by_label(&self, label: &str) -> Result<Arc<Driver>> {
        let id = self
            .labels
            .get(label)
            .ok_or_else(|| Error::Configuration(format!("unknown storage driver label '{label}'")))?;
        self.get(id)
    }

    pub fn default_driver(&self) -> Result<Arc<Driver>> {
        self.get(&self.default_driver)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &Arc<Driver>> {
        self.drivers.values()
    }

    /// Label → driver id for every registered driver.
    pub fn list(&self, principal: &Principal) -> Result<BTreeMap<String, String>> {
        principal.require_superuser("listing storage drivers")?;
        Ok(self.labels.clone())
    }
}

async fn build_client(
    config: &DriverConfig,
    policy: &RetryPolicy,
    metrics: &Arc<Metrics>,
) -> Result<Arc<dyn ObjectStoreClient>> {
    let client: Arc<dyn ObjectStoreClient> = match &config.kind {
        DriverKind::File { directory } => {
            let local = LocalObjectClient::open(directory).map_err(|e| {
                Error::Configuration(format!(
                    "driver '{}': cannot open {}: {e}",
                    config.id,
                    directory.display()
                ))
            })?;
            Arc::new(RetryingClient::new(local, policy.clone()).with_metrics(metrics.clone()))
        }
        DriverKind::ObjectStore {
            endpoint,
            bucket,
            region,
            path_style_access,
            credentials,
        } => {
            let s3 = S3ObjectClient::new(S3Settings {
                endpoint: endpoint.clone(),
                bucket: bucket.clone(),
                region: region.clone(),
                path_style_access: *path_style_access,
                credentials: credentials.clone(),
                timeout: policy.timeout,
            })
            .await
            .map_err(|e| Error::Configuration(format!("driver '{}': {e}", config.id)))?;
            Arc::new(RetryingClient::new(s3, policy.clone()).with_metrics(metrics.clone()))
        }
        DriverKind::Memory { bucket } => Arc::new(
            RetryingClient::new(MemoryObjectClient::new(bucket.clone()), policy.clone())
                .with_metrics(metrics.clone()),
        ),
    };
    Ok(client)
}
