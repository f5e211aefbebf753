mod api;
mod config;
mod shutdown;
mod telemetry;
mod wiring;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use aegis_core::wait::cancel_pair;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Aegis daemon: audits tokens before agents trade them and streams the progress.
#[derive(Parser, Debug)]
#[command(name = "aegisd", version, about)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "aegis.toml")]
    config: PathBuf,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Load and validate config
    // -----------------------------------------------------------------------
    let config = config::load_config(&cli.config)?;
    config::validate_config(&config)
        .with_context(|| format!("invalid config: {}", cli.config.display()))?;

    if cli.validate {
        println!("config is valid");
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 2. Initialize tracing / OTEL
    // -----------------------------------------------------------------------
    let telemetry_guard = telemetry::init_telemetry(&config.otel, cli.verbose)?;

    info!(instance_id = %config.global.instance_id, "aegisd starting");

    // -----------------------------------------------------------------------
    // 3. Build the audit pipeline
    // -----------------------------------------------------------------------
    let pipeline = Arc::new(wiring::build_pipeline(&config)?);
    let (audits_handle, audits_signal) = cancel_pair();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // -----------------------------------------------------------------------
    // 4. Serve the API until a shutdown signal arrives
    // -----------------------------------------------------------------------
    let state = api::AppState {
        start_time: Instant::now(),
        pipeline,
        shutdown: audits_signal,
    };

    let listener = TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.api.bind_addr))?;
    info!(bind = %config.api.bind_addr, "audit API listening");

    tokio::spawn(shutdown::signal_listener(shutdown_tx, audits_handle));

    axum::serve(listener, api::api_router(state))
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
        })
        .await
        .context("audit API server")?;

    // -----------------------------------------------------------------------
    // 5. Flush spans
    // -----------------------------------------------------------------------
    info!("graceful shutdown: flushing OTEL spans");
    telemetry_guard.flush();
    info!("aegisd stopped");

    Ok(())
}
