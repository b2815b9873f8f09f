//! Main entry point for the AulaChat messaging server.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::error::Error;
use std::path::PathBuf;

mod app_state;
mod handlers;
mod http;
mod middleware;
mod services;
mod ws;

pub mod server;

/// Command-line interface for the AulaChat server.
#[derive(Parser)]
#[command(name = "aulachat")]
#[command(about = "Real-time direct messaging server for the Aula platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the AulaChat CLI.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the messaging server
    Serve {
        /// The port number to bind the server to (overrides config and env)
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Loads environment variables and parses the CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Resolves configuration and starts the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved = Config::load(config, port).map_err(|err| -> Box<dyn Error> { Box::new(err) })?;
    server::run(resolved).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}
