//! OfficeViz hub binary

use anyhow::Result;
use clap::{Parser, Subcommand};
use officeviz_core::{
    ApiServer, ApiServerConfig, BroadcastHub, ServerConfig, SessionStore, SnapshotStore,
    SqliteStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "officeviz")]
#[command(about = "Live office whiteboards for coding-agent sessions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, global = true, default_value = "info", env = "OFFICEVIZ_LOG_LEVEL")]
    log_level: String,

    /// Database path (overrides the config file and default)
    #[arg(long, global = true, env = "OFFICEVIZ_DB_PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion and subscription server
    Serve {
        /// Listen address
        #[arg(long, env = "OFFICEVIZ_ADDR")]
        addr: Option<SocketAddr>,

        /// TOML configuration file
        #[arg(long, env = "OFFICEVIZ_CONFIG")]
        config: Option<PathBuf>,
    },

    /// List persisted sessions
    Sessions,

    /// Delete every persisted session snapshot
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Keep per-request tower spans at the chosen level, quieten the rest
    let filter = EnvFilter::new(format!(
        "officeviz={lvl},officeviz_core={lvl},tower_http={lvl},ractor=warn",
        lvl = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("OfficeViz v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { addr, config } => {
            let mut server_config = match config {
                Some(path) => ServerConfig::from_file(&path)?,
                None => ServerConfig::default(),
            };
            if let Some(addr) = addr {
                server_config.addr = addr;
            }
            if let Some(db_path) = cli.db_path {
                server_config.db_path = db_path;
            }
            serve(server_config).await
        }
        Commands::Sessions => {
            let store = open_store(cli.db_path).await?;
            let records = store.list_snapshots().await?;
            if records.is_empty() {
                println!("No persisted sessions");
                return Ok(());
            }
            println!("{:<40} {:<8} {:>8}  {}", "SESSION", "STATUS", "SEQ", "SAVED");
            for record in records {
                println!(
                    "{:<40} {:<8} {:>8}  {}",
                    record.session_id,
                    format!("{:?}", record.state.status).to_lowercase(),
                    record.last_sequence,
                    record.saved_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Commands::Purge => {
            let store = open_store(cli.db_path).await?;
            let removed = store.delete_all_snapshots().await?;
            println!("Deleted {} persisted sessions", removed);
            Ok(())
        }
    }
}

async fn open_store(db_path: Option<PathBuf>) -> Result<SqliteStore> {
    let path = db_path.unwrap_or_else(officeviz_core::config::default_db_path);
    debug!("Opening database at {}", path.display());
    Ok(SqliteStore::open(&path).await?)
}

async fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;

    let store = Arc::new(SqliteStore::open(&config.db_path).await?);
    let hub = Arc::new(BroadcastHub::new(config.subscriber_buffer));
    let sessions = Arc::new(SessionStore::new(
        store.clone(),
        hub,
        config.session_settings(),
    ));

    let recovered = sessions.recover().await?;
    info!(
        "Database: {} ({} sessions recovered)",
        config.db_path.display(),
        recovered
    );

    let server = ApiServer::new(
        ApiServerConfig { addr: config.addr },
        sessions,
        store,
    );
    server.serve().await
}
