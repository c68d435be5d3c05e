use std::sync::Arc;

use tokio::sync::RwLock;

use super::auth::{Authenticator, TokenAuthenticator};
use crate::Result;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::drivers::DriverRegistry;
use crate::ingest::IngestService;
use crate::ledger::FileLedger;
use crate::observability::Metrics;
use crate::upload::{SessionTable, UploadCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<DriverRegistry>,
    pub catalog: Arc<RwLock<Catalog>>,
    pub coordinator: Arc<UploadCoordinator>,
    pub ingest: Arc<IngestService>,
    pub authenticator: Arc<dyn Authenticator>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the services around an already built registry and ledger.
    pub fn new(
        config: Config,
        registry: DriverRegistry,
        ledger: FileLedger,
        catalog: Catalog,
        metrics: Arc<Metrics>,
    ) -> Self {
        let registry = Arc::new(registry);
        let sessions = Arc::new(SessionTable::new());
        let coordinator = UploadCoordinator::new(
            registry.clone(),
            config.upload.clone(),
            sessions.clone(),
            metrics.clone(),
        );
        let ingest = IngestService::new(
            registry.clone(),
            ledger,
            sessions,
            config.upload.verify_size,
            metrics.clone(),
        );
        let authenticator = TokenAuthenticator::from_config(&config.auth);

        Self {
            config: Arc::new(config),
            registry,
            catalog: Arc::new(RwLock::new(catalog)),
            coordinator: Arc::new(coordinator),
            ingest: Arc::new(ingest),
            authenticator: Arc::new(authenticator),
            metrics,
        }
    }

    /// Build every collaborator from configuration.
    pub async fn from_config(config: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let registry = DriverRegistry::from_config(&config, metrics.clone()).await?;
        let ledger = FileLedger::open(&config.server.ledger_path)?;
        Ok(Self::new(config, registry, ledger, Catalog::new(), metrics))
    }
}
