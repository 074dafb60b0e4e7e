//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the host introspector from settings
//! - Create the config service over the built-in schema
//! - Apply the overrides file, then enable persistence and hot reload
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Overrides are applied before persistence is enabled, so startup never
//!   rewrites the file it just read

use std::sync::Arc;

use notify::RecommendedWatcher;
use thiserror::Error;

use crate::config::host::{HostIntrospector, SystemHost};
use crate::config::loader::{LoaderError, OverridesFile, PersistSubscriber};
use crate::config::notifier::EventFilter;
use crate::config::schema::SchemaError;
use crate::config::service::ConfigService;
use crate::config::watcher::OverridesWatcher;
use crate::settings::ServerSettings;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid built-in schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("overrides: {0}")]
    Overrides(#[from] LoaderError),

    #[error("failed to watch overrides file: {0}")]
    Watch(#[from] notify::Error),
}

/// The running configuration subsystem.
pub struct Started {
    pub service: Arc<ConfigService>,
    /// Dropping this stops hot reload.
    pub watcher: Option<RecommendedWatcher>,
}

pub fn system_host(settings: &ServerSettings) -> SystemHost {
    SystemHost::new()
        .gpu_count_override(settings.host.gpu_count)
        .total_memory_override(settings.host.total_memory_bytes)
}

/// Start against the real host.
pub fn start(settings: &ServerSettings) -> Result<Started, StartupError> {
    start_with_host(settings, Arc::new(system_host(settings)))
}

pub fn start_with_host(settings: &ServerSettings, host: Arc<dyn HostIntrospector>) -> Result<Started, StartupError> {
    let service = Arc::new(ConfigService::with_builtin_schema(host)?);

    let Some(path) = settings.overrides.path.as_deref() else {
        return Ok(Started { service, watcher: None });
    };
    let file = Arc::new(OverridesFile::new(path));

    if file.apply(&service)?.is_none() {
        tracing::info!(path = ?path, "No overrides file, starting from defaults");
    }

    if settings.overrides.persist {
        service.subscribe(
            EventFilter::All,
            Arc::new(PersistSubscriber::new(Arc::clone(&file), Arc::downgrade(&service))),
        );
        tracing::info!(path = ?path, "Overrides persistence enabled");
    }

    let watcher = if settings.overrides.watch {
        Some(OverridesWatcher::new(file, Arc::clone(&service)).run()?)
    } else {
        None
    };

    Ok(Started { service, watcher })
}
