//! Runtime configuration server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Operator / config-cli
//!     ─────────────────────┐
//!                          ▼
//!                   ┌─────────────┐      ┌──────────────────────────────┐
//!                   │ http admin  │─────▶│        ConfigService          │
//!                   │   server    │      │  schema → validation → store  │
//!                   └─────────────┘      └──────────────┬───────────────┘
//!                                                       │ ChangeEvent
//!     overrides.toml ◀── PersistSubscriber ◀────────────┤
//!     overrides.toml ──▶ OverridesWatcher ──▶ reload    │
//!                                                       ▼
//!                                          cache manager, GPU scheduler,
//!                                          HTTP listener, ... (subscribers)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use runtime_config::http::AdminServer;
use runtime_config::lifecycle::{signals, startup, Shutdown};
use runtime_config::observability;
use runtime_config::settings::{self, ServerSettings};

#[derive(Parser)]
#[command(name = "runtime-config")]
#[command(about = "Runtime configuration server", long_about = None)]
struct Args {
    /// Server settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => settings::load(path)?,
        None => ServerSettings::default(),
    };

    observability::logging::init(&settings.logging)?;
    tracing::info!("runtime-config v{} starting", env!("CARGO_PKG_VERSION"));

    if settings.metrics.enabled {
        observability::metrics::init_metrics(settings.metrics_addr()?)?;
    }

    let started = startup::start(&settings)?;
    tracing::info!(
        revision = started.service.revision(),
        overrides = ?settings.overrides.path,
        persist = settings.overrides.persist,
        watch = settings.overrides.watch,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(settings.admin_addr()?).await?;
    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = AdminServer::new(Arc::clone(&started.service), &settings.admin);
    server.run(listener, shutdown.subscribe()).await?;

    drop(started.watcher);
    // Let pending subscribers (overrides persistence) finish.
    let service = started.service;
    let drained = tokio::task::spawn_blocking(move || service.flush_notifications(Duration::from_secs(5))).await?;
    if !drained {
        tracing::warn!("Config subscribers still busy at shutdown");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
