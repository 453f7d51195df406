//! Command-line entry point for the `relayd` binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on all interfaces, default port
//! relayd
//!
//! # Explicit address and port
//! relayd -a 127.0.0.1 -p 7777
//!
//! # Read settings from a file (command-line flags still win)
//! relayd -c /etc/relay/relayd.toml
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown
//! - Console `exit`: Graceful shutdown

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::{MemoryStorage, Storage};

use crate::config::{Overrides, ServerConfig};
use crate::console::{Console, ConsoleFlow};
use crate::server::RelayServer;

/// Relay daemon - routes messages between named TCP clients
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
pub struct Args {
    /// Address to listen on (empty for all interfaces)
    #[arg(short = 'a', long = "addr")]
    pub address: Option<String>,

    /// Port to listen on (1025-65535)
    #[arg(short = 'p', long, allow_negative_numbers = true)]
    pub port: Option<i64>,

    /// Config file (defaults to <config dir>/relay/relayd.toml if present)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Bounded wait for each accept attempt, in milliseconds
    #[arg(long)]
    pub accept_timeout_ms: Option<u64>,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Do not read console commands from stdin
    #[arg(long)]
    pub no_console: bool,
}

impl Args {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            address: self.address.clone(),
            port: self.port,
            accept_timeout_ms: self.accept_timeout_ms,
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("relayd={level}").parse()?)
        .add_directive(format!("relay_core={level}").parse()?)
        .add_directive(format!("relay_protocol={level}").parse()?);

    // stdout belongs to the console
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

/// Parses arguments, validates configuration and runs the server.
///
/// Invalid configuration exits the process with status 1 before any
/// socket is opened.
pub fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = match ServerConfig::load(args.config.as_deref(), args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            process::exit(1);
        }
    };

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let cancel_token = CancellationToken::new();

    if !args.no_console {
        spawn_console(Arc::clone(&storage), cancel_token.clone())?;
    }

    run_server(config, storage, cancel_token)
}

fn spawn_console(storage: Arc<dyn Storage>, cancel_token: CancellationToken) -> Result<()> {
    thread::Builder::new()
        .name("relay-console".to_string())
        .spawn(move || {
            let console = Console::new(storage);
            match console.run(io::stdin().lock(), io::stdout()) {
                Ok(ConsoleFlow::Exit) => {
                    info!("Shutdown requested from console");
                    cancel_token.cancel();
                }
                Ok(ConsoleFlow::InputClosed) => {
                    info!("Console input closed, server keeps running");
                }
                Err(e) => warn!(error = %e, "Console stopped"),
            }
        })
        .context("Failed to start console thread")?;
    Ok(())
}

/// Runs the dispatch loop on the current thread.
#[tokio::main(flavor = "current_thread")]
async fn run_server(
    config: ServerConfig,
    storage: Arc<dyn Storage>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        listen = %config.listen,
        "Relay daemon starting"
    );

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                }
                info!("Shutdown signal received");
                shutdown_token.cancel();
            }
            _ = shutdown_token.cancelled() => {}
        }
    });

    let server = RelayServer::bind(&config, storage, cancel_token).await?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
