//! Overrides file watcher for hot reload.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::OverridesFile;
use crate::config::service::ConfigService;

/// Re-applies the overrides file whenever it changes on disk.
///
/// A file that fails to parse or contains a rejected value is logged and
/// ignored; the running configuration is kept. Content the server wrote
/// itself is not re-applied.
pub struct OverridesWatcher {
    file: Arc<OverridesFile>,
    service: Arc<ConfigService>,
}

impl OverridesWatcher {
    pub fn new(file: Arc<OverridesFile>, service: Arc<ConfigService>) -> Self {
        Self { file, service }
    }

    /// Start watching. The returned handle must be kept alive for as long
    /// as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file = Arc::clone(&self.file);
        let service = self.service;
        let file_name = self.file.path().file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                        return;
                    }
                    tracing::debug!(path = ?file.path(), "Overrides file change detected");
                    if let Err(e) = file.reload(&service) {
                        tracing::error!(error = %e, "Failed to reload overrides. Keeping current configuration.");
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // Watch the directory: editors and `OverridesFile::persist` replace
        // the file by rename, which a watch on the file itself would lose.
        let dir = match self.file.path().parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.file.path(), "Overrides watcher started");
        Ok(watcher)
    }
}
