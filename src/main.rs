mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use dvstore::config::Config;
use dvstore::drivers::DriverRegistry;
use dvstore::observability::{Metrics, init_tracing};
use tracing::{error, info};

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone())?,
        None => Config::load()?,
    };
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Server(args) => {
            let address = args.address.unwrap_or(config.server.bind_addr);
            dvstore::api::run(config, address).await?
        }
        Commands::Drivers => {
            let registry = DriverRegistry::from_config(&config, Arc::new(Metrics::new())).await?;
            for driver in registry.drivers() {
                let marker = if driver.id() == config.storage.default_driver {
                    " (default)"
                } else {
                    ""
                };
                println!(
                    "{:<20} {:<16} {}{marker}",
                    driver.label(),
                    driver.id(),
                    driver.config.kind_name()
                );
            }
        }
        Commands::Check => {
            let registry = DriverRegistry::from_config(&config, Arc::new(Metrics::new())).await?;
            let mut failures = 0;
            for driver in registry.drivers() {
                match driver.client.head_bucket().await {
                    Ok(()) => {
                        info!(driver = %driver.id(), backend = driver.client.backend_name(), "Backend reachable");
                        println!("ok    {}", driver.id());
                    }
                    Err(err) => {
                        failures += 1;
                        error!(driver = %driver.id(), error = %err, "Backend unreachable");
                        println!("FAIL  {}: {err}", driver.id());
                    }
                }
            }
            if failures > 0 {
                return Err(format!("{failures} storage driver(s) unreachable").into());
            }
        }
    }

    Ok(())
}
