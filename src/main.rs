//! Reverse proxy decision core (binary).
//!
//! # Architecture Overview
//!
//! ```text
//!     ProxyRequest ──▶ routing ──▶ transforms ──▶ affinity ──▶ load_balancer
//!                        │                                         │
//!                        ▼                                         ▼
//!                  ┌───────────┐                            ForwardPlan
//!                  │ snapshot  │◀── config (TOML, watcher)       │
//!                  │  store    │                                 ▼
//!                  └───────────┘                      forwarding collaborator
//!                        ▲                                         │
//!                        │                                         ▼
//!                  health (active probes, passive outcomes) ◀── complete()
//!
//!     Cross-cutting: observability (tracing, metrics), admin API, lifecycle
//! ```
//!
//! The binary loads and validates a configuration, then runs the control
//! plane: snapshot publishing, config reload, active health checks and the
//! admin API. Request forwarding is performed by the embedding listener.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use proxy_core::config::loader::load_config;
use proxy_core::lifecycle::signals::shutdown_signal;
use proxy_core::lifecycle::{ProxyRuntime, Shutdown};
use proxy_core::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "proxy-core", version, about = "Reverse proxy decision core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            for error in e.validation_errors() {
                tracing::error!(%error, "Invalid configuration");
            }
            tracing::error!(path = ?cli.config, error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.observability.log_level);

    if cli.check {
        tracing::info!(
            path = ?cli.config,
            routes = config.routes.len(),
            clusters = config.clusters.len(),
            "Configuration is valid"
        );
        return ExitCode::SUCCESS;
    }

    tracing::info!("proxy-core v{} starting", env!("CARGO_PKG_VERSION"));

    let shutdown = Shutdown::new();
    let runtime = match ProxyRuntime::start(config, Some(&cli.config), &shutdown).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    shutdown_signal().await;
    shutdown.trigger();
    runtime.join().await;

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
