//! Traced Dual-Transport Echo Gateway
//!
//! Accepts WebSocket sessions on a plain and a TLS listener and echoes every
//! message back with a fixed prefix, recording one trace span per message.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client (ws://)  ──▶ ┌───────────────┐
//!                         │ net::listener │──┐
//!     Client (wss://) ──▶ │  + net::tls   │  │
//!                         └───────────────┘  ▼
//!                                      ┌────────────┐    ┌──────────────────┐
//!                                      │ http server│───▶│ websocket handler│
//!                                      │  (upgrade) │    │  echo per message│
//!                                      └────────────┘    └────────┬─────────┘
//!                                                                 │
//!                          ┌──────────────────────────────────────┘
//!                          ▼
//!                   ┌──────────────┐    ┌──────────────┐
//!                   │  telemetry   │───▶│ span exporter│
//!                   │ codec + spans│    │  (log/none)  │
//!                   └──────────────┘    └──────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use echo_gateway::config::{default_config, load_config};
use echo_gateway::lifecycle::{signals, Gateway, Shutdown};
use echo_gateway::observability::{logging, metrics};
use echo_gateway::telemetry::Telemetry;

#[derive(Parser)]
#[command(name = "echo-gateway")]
#[command(about = "Traced WebSocket echo gateway with plain and TLS listeners", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid configuration {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => match default_config() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Invalid built-in configuration: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    if cli.validate {
        println!("Configuration is valid");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {e}");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "echo-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let telemetry = Arc::new(Telemetry::from_config(&config.tracing));
    let shutdown = Shutdown::new();

    let gateway = match Gateway::start(&config, Arc::clone(&telemetry), shutdown.clone()).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed to start");
            telemetry.shutdown();
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(signals::shutdown_on_signal(shutdown));

    if !gateway.run().await {
        tracing::warn!("Exiting with connections still open");
    }
    ExitCode::SUCCESS
}
