use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{services, state::AppState};
use crate::config::Config;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every route of the HTTP boundary over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/admin/dataverse/storageDrivers",
            get(services::list_drivers),
        )
        .route(
            "/api/admin/dataverse/{alias}/storageDriver",
            get(services::get_collection_driver)
                .put(services::set_collection_driver)
                .delete(services::clear_collection_driver),
        )
        .route("/api/dataverses/{alias}", post(services::create_collection))
        .route(
            "/api/dataverses/{alias}/datasets",
            post(services::create_dataset),
        )
        .route(
            "/api/datasets/mpupload",
            put(services::complete_multipart).delete(services::abort_multipart),
        )
        .route(
            "/api/datasets/{id}/storageDriver",
            get(services::get_dataset_driver)
                .put(services::set_dataset_driver)
                .delete(services::clear_dataset_driver),
        )
        .route("/api/datasets/{id}/uploadurls", get(services::upload_urls))
        .route("/api/datasets/{id}/add", post(services::add_file))
        .route("/api/datasets/{id}/upload", post(services::upload_file))
        .route(
            "/api/files/{id}",
            get(services::get_file).delete(services::delete_file),
        )
        .route("/health", get(services::health))
        .with_state(state)
        // Clients may gzip JSON bodies; decompress before extraction
        .layer(ServiceBuilder::new().layer(RequestDecompressionLayer::new()))
}

pub async fn run(config: Config, address: SocketAddr) -> Result<(), AnyError> {
    info!(
        drivers = config.storage.all_drivers().len(),
        default_driver = %config.storage.default_driver,
        ledger = %config.server.ledger_path.display(),
        "Building storage services"
    );
    let state = AppState::from_config(config).await?;
    let ledger = state.ingest.ledger().clone();
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "dvstore API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ledger.persist()?;
    info!("Ledger flushed, exiting");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
