//! # portal-cli
//!
//! CLI tool for exercising Tandem portals.
//!
//! ## Commands
//!
//! - `demo`: run a host and a guest against an in-process relay and report
//!   what the guest ends up with
//! - `check-config`: validate a relay configuration file
//!
//! ## Example
//!
//! ```bash
//! # Share a file with one guest
//! portal-cli demo --file src/main.rs
//!
//! # Same, then let the host fall silent until the relay evicts it
//! portal-cli demo --host-loss --json
//!
//! # Validate a relay config and a client heartbeat against it
//! portal-cli check-config --config relay.toml --heartbeat-ms 5000
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{check, demo};

/// CLI tool for exercising Tandem portals.
#[derive(Parser, Debug)]
#[command(name = "portal-cli")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Share a buffer with a guest over an in-process relay
    Demo {
        /// File to share (a built-in sample otherwise)
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Stop the host's heartbeats and wait for the relay to evict it
        #[arg(long)]
        host_loss: bool,

        /// Relay eviction period in milliseconds
        #[arg(long, default_value = "1500")]
        eviction_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a relay configuration file
    CheckConfig {
        /// Path to the relay TOML file
        #[arg(long, short, default_value = "relay.toml")]
        config: PathBuf,

        /// Also check a client heartbeat interval against the eviction period
        #[arg(long)]
        heartbeat_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            file,
            host_loss,
            eviction_ms,
            json,
        } => {
            let options = demo::DemoOptions {
                file,
                host_loss,
                eviction_ms,
            };
            demo::run(&options, json).await?;
        }
        Commands::CheckConfig {
            config,
            heartbeat_ms,
        } => {
            check::run(&config, heartbeat_ms)?;
        }
    }

    Ok(())
}
