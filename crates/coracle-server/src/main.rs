//! Coracle Server
//!
//! Action host binary.

use clap::Parser;
use coracle_core::{init_telemetry, CoracleConfig, TelemetryConfig};
use coracle_server::{router, AppState};

/// Coracle server CLI
#[derive(Parser, Debug)]
#[command(name = "coracle-server")]
#[command(about = "Single-action host serving /init and /run")]
#[command(version)]
struct Cli {
    /// Bind address (overrides CORACLE_BIND_ADDRESS)
    #[arg(short, long)]
    bind: Option<String>,

    /// Port, replacing the port of the bind address
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    match cli.verbose {
        0 => {}
        1 => telemetry = telemetry.with_log_level("debug"),
        _ => telemetry = telemetry.with_log_level("trace"),
    }
    init_telemetry(&telemetry)?;

    let mut config = CoracleConfig::from_env();
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.set_port(port);
    }
    config.validate()?;

    tracing::info!("Coracle server starting...");
    tracing::info!("Bind: {}", config.server.bind_address);

    let state = AppState::with_wasm_loader(config.clone())?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
