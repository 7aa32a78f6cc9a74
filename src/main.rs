//! # Wasend — multi-tenant WhatsApp bulk-send and lead-nurturing engine
//!
//! One process hosts many tenant sessions (QR-authenticated via the
//! automation host), a durable pending-request queue, and the dispatch
//! worker that fires campaign sends inside their daily windows.
//!
//! Usage:
//!   wasend                         # serve with ~/.wasend/config.toml
//!   wasend --port 8080             # override gateway port
//!   wasend --config ./wasend.toml  # explicit config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wasend_core::WasendConfig;
use wasend_gateway::{AppState, start_server};
use wasend_scheduler::{ScheduleEngine, run_dispatcher};
use wasend_session::{HttpMessengerHost, SessionManager};
use wasend_store::{CampaignLedger, PendingRequestQueue, SessionStore, StoreDb};

#[derive(Parser)]
#[command(name = "wasend", version, about = "📤 Wasend — scheduled WhatsApp campaign engine")]
struct Cli {
    /// Config file path (default: ~/.wasend/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory override
    #[arg(long)]
    data_dir: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "wasend=debug,tower_http=debug" } else { "wasend=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => WasendConfig::load_from(&expand_path(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => WasendConfig::load().context("loading config")?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    let data_dir = expand_path(&config.data_dir);
    let db = Arc::new(StoreDb::open(&config.db_path(&data_dir)).context("opening database")?);
    let session_store = SessionStore::new(db.clone());
    let queue = PendingRequestQueue::new(db.clone());
    let ledger = CampaignLedger::new(db);

    let host = Arc::new(HttpMessengerHost::new(config.host.clone()));
    let sessions = Arc::new(SessionManager::new(
        host,
        session_store,
        config.session.max_sessions,
    ));

    if config.session.replay_on_boot {
        sessions.replay_persisted().await.context("replaying persisted sessions")?;
    }

    let engine = Arc::new(ScheduleEngine::new(
        queue,
        ledger,
        sessions.clone(),
        config.scheduler.clone(),
    ));

    tokio::spawn(run_dispatcher(engine.clone()));

    tracing::info!(
        "🚀 Wasend starting — host {}, {} session slot(s)",
        config.host.base_url,
        config.session.max_sessions
    );

    let state = AppState {
        gateway_config: config.gateway.clone(),
        engine,
        sessions,
        start_time: std::time::Instant::now(),
    };
    start_server(state).await.context("gateway server")?;
    Ok(())
}
