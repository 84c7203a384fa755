use std::path::PathBuf;
use std::time::Duration;

use ama_store::Database;
use ama_telemetry::TelemetryConfig;
use anyhow::Context;
use clap::Parser;

/// Live Q&A rooms with real-time WebSocket updates.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Interface to bind.
    #[arg(long, env = "AMA_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "AMA_PORT", default_value_t = 8080)]
    port: u16,

    /// SQLite database file. Defaults to `$HOME/.ama/ama.db`.
    #[arg(long, env = "AMA_DATABASE")]
    database: Option<PathBuf>,

    /// Give up on a subscriber whose write takes longer than this.
    #[arg(long, env = "AMA_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    write_timeout_secs: u64,

    /// Default log level. `RUST_LOG` takes precedence.
    #[arg(long, env = "AMA_LOG", default_value = "info")]
    log_level: tracing::Level,

    /// Emit logs as JSON lines.
    #[arg(long, env = "AMA_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    ama_telemetry::init_telemetry(&TelemetryConfig {
        log_level: args.log_level,
        json: args.log_json,
        ..TelemetryConfig::default()
    })
    .context("initialize telemetry")?;

    let db_path = args.database.unwrap_or_else(default_db_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("open database at {}", db_path.display()))?;

    let config = ama_server::ServerConfig {
        host: args.host,
        port: args.port,
        write_timeout: Duration::from_secs(args.write_timeout_secs),
    };
    let handle = ama_server::start(config, db)
        .await
        .context("start server")?;

    tracing::info!(port = handle.port, "AMA server ready");

    tokio::signal::ctrl_c()
        .await
        .context("listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;

    Ok(())
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".ama")
        .join("ama.db")
}
