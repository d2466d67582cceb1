//! file-courier: GET/POST file transfer over a line-framed TCP protocol
//!
//! Two roles share one binary:
//! - `server`: serves and stores files under a root directory, one task
//!   per connection, idle connections closed after `idle_base / live`
//! - `client`: runs a commands file of GET/POST requests over a single
//!   connection, retrying unacknowledged uploads a bounded number of times
//!
//! Configuration via CLI arguments or TOML file.

mod client;
mod commands;
mod config;
mod error;
mod protocol;
mod registry;
mod server;
mod session;
mod stream;
mod transfer;

use config::{Config, RunMode};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = match config.mode {
        RunMode::Server(server) => run_server(server),
        RunMode::Client(client) => run_client(client),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

/// Run the server on a multi-threaded runtime
fn run_server(config: config::ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(listen = %config.listen, "Starting file-courier server");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = server::Server::bind(config).await?;
        server.run().await
    })?;
    Ok(())
}

/// Run the client on a single-threaded runtime
fn run_client(config: config::ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(server = %config.addr(), commands = %config.commands.display(), "Starting file-courier client");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(client::run(config))?;
    Ok(())
}
