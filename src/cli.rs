use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dvstore")]
#[command(about = "Storage drivers and direct uploads for a research data repository", long_about = None)]
pub struct Cli {
    /// Configuration file; defaults to $DVSTORE_CONFIG or config/dvstore.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
    /// Print the label → id table of configured drivers
    Drivers,
    /// Check that every driver's backend is reachable
    Check,
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to; defaults to `[server] bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
