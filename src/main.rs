use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use parley_core::settings::ParleySettings;
use parley_server::{ServerConfig, TopicHub};
use parley_store::{Database, MessageRepo};
use parley_telemetry::{init_telemetry, TelemetryConfig};

/// Live turn-event server for the parley conversation engine.
#[derive(Debug, Parser)]
#[command(name = "parley", version)]
struct Cli {
    /// JSON settings file layered over the built-in defaults.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path. Defaults to ~/.parley/parley.db.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut settings, ignored_env) =
        ParleySettings::load(cli.settings.as_deref()).context("failed to load settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let telemetry = TelemetryConfig::from_settings(&settings.logging)?;
    init_telemetry(&telemetry)?;
    for var in &ignored_env {
        tracing::warn!(key = var.key, value = %var.value, "invalid env var, ignoring");
    }
    tracing::info!("starting parley");

    let db_path = cli.db.unwrap_or_else(|| home_dir().join(".parley").join("parley.db"));
    let db = Database::open(&db_path).context("failed to open database")?;
    let messages = Arc::new(MessageRepo::new(db));

    let hub = Arc::new(TopicHub::new(settings.server.max_send_queue));
    let handle = parley_server::start(ServerConfig::from(&settings.server), hub, messages)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port(), "parley ready");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
