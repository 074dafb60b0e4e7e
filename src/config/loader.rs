//! Overrides file: a flat `category → key → value` map in TOML.
//!
//! ```toml
//! [cache]
//! cache_size = "8GB"
//!
//! [network]
//! "http.port" = 19121
//! ```
//!
//! Dotted keys may also be written as nested tables (`[network.http]
//! port = 19121`). Arrays of strings are joined with commas. Only values
//! that differ from the schema default are written back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use thiserror::Error;
use toml::{Table, Value};

use crate::config::error::ConfigError;
use crate::config::notifier::{ChangeEvent, ConfigSubscriber, SubscriberError};
use crate::config::schema::SchemaRegistry;
use crate::config::service::{ConfigService, SetOutcome};
use crate::config::value::{ConfigSnapshot, RawValue};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse overrides: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render overrides: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("`{path}`: {reason}")]
    Shape { path: String, reason: &'static str },

    #[error("override rejected: {0}")]
    Apply(#[from] ConfigError),
}

/// One `category.key = value` line of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub category: String,
    pub key: String,
    pub value: RawValue,
}

pub fn parse_overrides(content: &str) -> Result<Vec<Override>, LoaderError> {
    let table: Table = content.parse()?;
    let mut overrides = Vec::new();

    for (category, value) in table {
        let Value::Table(keys) = value else {
            return Err(LoaderError::Shape {
                path: category,
                reason: "top-level entries must be category tables",
            });
        };
        flatten(&category, None, keys, &mut overrides)?;
    }
    Ok(overrides)
}

fn flatten(category: &str, prefix: Option<&str>, table: Table, out: &mut Vec<Override>) -> Result<(), LoaderError> {
    for (name, value) in table {
        let key = match prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name,
        };
        let raw = match value {
            Value::Table(nested) => {
                flatten(category, Some(&key), nested, out)?;
                continue;
            }
            Value::String(s) => RawValue::Str(s),
            Value::Integer(n) => RawValue::Int(n),
            Value::Float(f) => RawValue::Float(f),
            Value::Boolean(b) => RawValue::Bool(b),
            Value::Array(items) => RawValue::Str(join_strings(category, &key, items)?),
            Value::Datetime(_) => {
                return Err(LoaderError::Shape {
                    path: format!("{category}.{key}"),
                    reason: "datetimes are not supported",
                })
            }
        };
        out.push(Override {
            category: category.to_string(),
            key,
            value: raw,
        });
    }
    Ok(())
}

fn join_strings(category: &str, key: &str, items: Vec<Value>) -> Result<String, LoaderError> {
    let parts = items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            _ => Err(LoaderError::Shape {
                path: format!("{category}.{key}"),
                reason: "arrays may only contain strings",
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

/// Apply `overrides` as one batch. Nothing is applied if any value is
/// rejected.
pub fn apply_overrides(service: &ConfigService, overrides: &[Override]) -> Result<SetOutcome, LoaderError> {
    let outcome = service.set_many(
        overrides
            .iter()
            .map(|o| (o.category.as_str(), o.key.as_str(), o.value.clone())),
    )?;
    tracing::info!(
        overrides = overrides.len(),
        changed = outcome.changed,
        revision = outcome.revision,
        "Overrides applied"
    );
    Ok(outcome)
}

/// TOML for every value in `snapshot` that differs from its default.
pub fn render_overrides(registry: &SchemaRegistry, snapshot: &ConfigSnapshot) -> Result<String, LoaderError> {
    let mut root = Table::new();
    for entry in registry.entries() {
        let Some(current) = snapshot.canonical(entry.category, &entry.key) else {
            continue;
        };
        if current == entry.default {
            continue;
        }
        let section = root
            .entry(entry.category.as_str())
            .or_insert_with(|| Value::Table(Table::new()));
        if let Value::Table(section) = section {
            section.insert(entry.key.clone(), Value::String(current.to_string()));
        }
    }
    Ok(toml::to_string(&root)?)
}

/// Replace `path` with `content` through a temporary sibling so readers
/// never see a half-written file.
fn write_atomic(path: &Path, content: &str) -> Result<(), LoaderError> {
    let tmp = path.with_extension("toml.tmp");
    let write_err = |source| LoaderError::Write {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, content).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}

/// The overrides file, shared by persistence and hot reload.
///
/// Remembers the last content it applied or wrote. Reloads of that content
/// are skipped, so the server never re-applies its own writes, and a write
/// never interleaves with a reload's read.
#[derive(Debug)]
pub struct OverridesFile {
    path: PathBuf,
    last_seen: Mutex<Option<String>>,
}

impl OverridesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_seen: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply the file as one batch. A missing file applies nothing.
    pub fn apply(&self, service: &ConfigService) -> Result<Option<SetOutcome>, LoaderError> {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LoaderError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let overrides = parse_overrides(&content)?;
        let outcome = apply_overrides(service, &overrides)?;
        *last_seen = Some(content);
        Ok(Some(outcome))
    }

    /// Re-read the file and apply it, unless it holds what this process
    /// last applied or wrote. Returns `None` when skipped.
    ///
    /// The read happens under the service's writer lock, so it cannot be
    /// staled by a concurrent `set`.
    pub fn reload(&self, service: &ConfigService) -> Result<Option<SetOutcome>, LoaderError> {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mut content = None;

        let outcome = service.set_many_from(|| -> Result<Vec<(String, String, RawValue)>, LoaderError> {
            let current = fs::read_to_string(&self.path).map_err(|source| LoaderError::Read {
                path: self.path.clone(),
                source,
            })?;
            if last_seen.as_deref() == Some(current.as_str()) {
                return Ok(Vec::new());
            }
            let overrides = parse_overrides(&current)?;
            content = Some(current);
            Ok(overrides.into_iter().map(|o| (o.category, o.key, o.value)).collect())
        })?;

        let Some(content) = content else {
            tracing::debug!(path = ?self.path, "Overrides file unchanged since last write, skipping");
            return Ok(None);
        };
        *last_seen = Some(content);
        tracing::info!(
            changed = outcome.changed,
            revision = outcome.revision,
            "Overrides reloaded"
        );
        Ok(Some(outcome))
    }

    /// Write every non-default value in `snapshot`. Skipped when the file
    /// already holds exactly that content.
    pub fn persist(&self, registry: &SchemaRegistry, snapshot: &ConfigSnapshot) -> Result<bool, LoaderError> {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        let content = render_overrides(registry, snapshot)?;
        if last_seen.as_deref() == Some(content.as_str()) {
            return Ok(false);
        }
        write_atomic(&self.path, &content)?;
        *last_seen = Some(content);
        Ok(true)
    }
}

/// Rewrites the overrides file after committed changes.
#[derive(Debug)]
pub struct PersistSubscriber {
    file: Arc<OverridesFile>,
    service: Weak<ConfigService>,
}

impl PersistSubscriber {
    pub fn new(file: Arc<OverridesFile>, service: Weak<ConfigService>) -> Self {
        Self { file, service }
    }
}

impl ConfigSubscriber for PersistSubscriber {
    fn on_config_changed(&self, event: &ChangeEvent) -> Result<(), SubscriberError> {
        let Some(service) = self.service.upgrade() else {
            return Ok(());
        };
        // Always the latest snapshot, so a backlog of events collapses into
        // one write.
        let written = self
            .file
            .persist(service.registry(), &service.snapshot())
            .map_err(|e| SubscriberError::new(e.to_string()))?;
        if written {
            tracing::debug!(path = ?self.file.path(), revision = event.revision, "Overrides persisted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::host::{HostFacts, StaticHost};
    use crate::config::notifier::EventFilter;
    use std::time::Duration;
    use tempfile::TempDir;

    const DRAIN: Duration = Duration::from_secs(5);

    fn service() -> Arc<ConfigService> {
        let host = Arc::new(StaticHost::new(HostFacts::default()));
        Arc::new(ConfigService::with_builtin_schema(host).unwrap())
    }

    fn overrides_file(dir: &TempDir) -> Arc<OverridesFile> {
        Arc::new(OverridesFile::new(dir.path().join("overrides.toml")))
    }

    fn saved(file: &OverridesFile) -> Vec<Override> {
        parse_overrides(&fs::read_to_string(file.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_flattens_keys() {
        let overrides = parse_overrides(
            r#"
            [cache]
            cache_size = "8GB"
            preload_collection = ["a", "b"]

            [network]
            "http.port" = 19200

            [network.bind]
            address = "127.0.0.1"

            [wal]
            enable = false
            "#,
        )
        .unwrap();

        let find = |c: &str, k: &str| {
            overrides
                .iter()
                .find(|o| o.category == c && o.key == k)
                .map(|o| o.value.clone())
        };
        assert_eq!(find("cache", "cache_size"), Some(RawValue::from("8GB")));
        assert_eq!(find("cache", "preload_collection"), Some(RawValue::from("a,b")));
        assert_eq!(find("network", "http.port"), Some(RawValue::Int(19200)));
        assert_eq!(find("network", "bind.address"), Some(RawValue::from("127.0.0.1")));
        assert_eq!(find("wal", "enable"), Some(RawValue::Bool(false)));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(matches!(parse_overrides("cache_size = 1"), Err(LoaderError::Shape { .. })));
        assert!(matches!(
            parse_overrides("[cache]\ncache_size = [1, 2]"),
            Err(LoaderError::Shape { .. })
        ));
        assert!(matches!(parse_overrides("[cache"), Err(LoaderError::Parse(_))));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let service = service();
        let overrides = parse_overrides("[wal]\nenable = \"off\"\n[gpu]\nsearch_devices = \"gpu7\"").unwrap();

        let err = apply_overrides(&service, &overrides).unwrap_err();
        assert!(matches!(err, LoaderError::Apply(_)));
        assert_eq!(service.get("wal", "enable").unwrap(), "true");
    }

    #[test]
    fn test_render_only_changed_values() {
        let service = service();
        assert_eq!(render_overrides(service.registry(), &service.snapshot()).unwrap(), "");

        service.set("network", "http.port", 19200).unwrap();
        service.set("cache", "cache_size", "2GB").unwrap();
        let rendered = render_overrides(service.registry(), &service.snapshot()).unwrap();

        let reparsed = parse_overrides(&rendered).unwrap();
        assert_eq!(reparsed.len(), 2);
        let fresh = self::service();
        apply_overrides(&fresh, &reparsed).unwrap();
        assert_eq!(fresh.get("network", "http.port").unwrap(), "19200");
        assert_eq!(fresh.get("cache", "cache_size").unwrap(), "2GB");
    }

    #[test]
    fn test_apply_missing_file_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let service = service();
        assert_eq!(overrides_file(&dir).apply(&service).unwrap(), None);
        assert_eq!(service.revision(), 0);
    }

    #[test]
    fn test_persist_subscriber_writes_file() {
        let dir = TempDir::new().unwrap();
        let file = overrides_file(&dir);
        let service = service();
        service.subscribe(
            EventFilter::All,
            Arc::new(PersistSubscriber::new(Arc::clone(&file), Arc::downgrade(&service))),
        );

        service.set("metric", "enable", "on").unwrap();
        assert!(service.flush_notifications(DRAIN));

        assert_eq!(
            saved(&file),
            vec![Override {
                category: "metric".into(),
                key: "enable".into(),
                value: RawValue::from("on"),
            }]
        );
        assert!(!dir.path().join("overrides.toml.tmp").exists());
    }

    #[test]
    fn test_reload_skips_own_writes() {
        let dir = TempDir::new().unwrap();
        let file = overrides_file(&dir);
        let service = service();

        service.set("cache", "cache_size", "2GB").unwrap();
        assert!(file.persist(service.registry(), &service.snapshot()).unwrap());
        // Nothing to do when the file already matches.
        assert!(!file.persist(service.registry(), &service.snapshot()).unwrap());

        // A set lands before its persistence has run; the file on disk still
        // holds the earlier write and must not roll the set back.
        service.set("cache", "cache_size", "3GB").unwrap();
        assert_eq!(file.reload(&service).unwrap(), None);
        assert_eq!(service.get("cache", "cache_size").unwrap(), "3GB");
    }

    #[test]
    fn test_reload_applies_external_edits() {
        let dir = TempDir::new().unwrap();
        let file = overrides_file(&dir);
        let service = service();

        fs::write(file.path(), "[cache]\ncache_size = \"6GB\"\n").unwrap();
        let outcome = file.reload(&service).unwrap().unwrap();
        assert!(outcome.changed);
        assert_eq!(service.get("cache", "cache_size").unwrap(), "6GB");

        // The same content again is already applied.
        assert_eq!(file.reload(&service).unwrap(), None);

        fs::write(file.path(), "[cache]\ncache_size = \"64GB\"\n").unwrap();
        assert!(matches!(file.reload(&service), Err(LoaderError::Apply(_))));
        assert_eq!(service.get("cache", "cache_size").unwrap(), "6GB");
    }

    #[test]
    fn test_persisted_file_never_reverts_later_sets() {
        let dir = TempDir::new().unwrap();
        let file = overrides_file(&dir);
        let service = service();
        service.subscribe(
            EventFilter::All,
            Arc::new(PersistSubscriber::new(Arc::clone(&file), Arc::downgrade(&service))),
        );
        file.persist(service.registry(), &service.snapshot()).unwrap();

        for size in ["2GB", "3GB", "2GB", "3GB"] {
            service.set("cache", "cache_size", size).unwrap();
            file.reload(&service).unwrap();
            assert_eq!(service.get("cache", "cache_size").unwrap(), size);
        }
        assert!(service.flush_notifications(DRAIN));
        file.reload(&service).unwrap();
        assert_eq!(service.get("cache", "cache_size").unwrap(), "3GB");
        assert_eq!(saved(&file)[0].value, RawValue::from("3GB"));
    }
}
