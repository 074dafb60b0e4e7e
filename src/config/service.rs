//! The `get`/`set` entry point shared by every transport.
//!
//! # Responsibilities
//! - Resolve `(category, key)` against the schema, exactly as given
//! - Validate candidates against a private snapshot plus live host facts
//! - Commit accepted values and publish one event per changed field
//!
//! # Design Decisions
//! - One writer lock spans validate and commit; `get` never takes it
//! - Events are queued under the lock, in commit order, and delivered by the
//!   notifier after `set` has returned
//! - Re-setting the current canonical value is a successful no-op
//! - Batches are all-or-nothing and commit under a single revision

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::error::ConfigError;
use crate::config::host::HostIntrospector;
use crate::config::notifier::{ChangeEvent, ChangeNotifier, ConfigSubscriber, EventFilter, SubscriptionId};
use crate::config::schema::{Category, SchemaEntry, SchemaError, SchemaRegistry, ValueType};
use crate::config::store::ConfigStore;
use crate::config::validation;
use crate::config::value::{ConfigSnapshot, RawValue, TypedValue};
use crate::observability::metrics;

/// Result of an accepted `set` or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SetOutcome {
    /// False when every value already matched the store.
    pub changed: bool,
    /// Revision of the store after the call.
    pub revision: u64,
}

/// One schema entry with its current value, as listed by the admin API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryView {
    pub category: Category,
    pub key: String,
    pub value_type: ValueType,
    pub value: String,
    pub default: String,
    pub mutable: bool,
    pub description: String,
}

impl EntryView {
    fn new(entry: &SchemaEntry, snapshot: &ConfigSnapshot) -> Self {
        Self {
            category: entry.category,
            key: entry.key.clone(),
            value_type: entry.value_type,
            value: snapshot
                .canonical(entry.category, &entry.key)
                .unwrap_or(&entry.default)
                .to_string(),
            default: entry.default.clone(),
            mutable: entry.mutable,
            description: entry.description.clone(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigService {
    registry: Arc<SchemaRegistry>,
    store: ConfigStore,
    notifier: ChangeNotifier,
    host: Arc<dyn HostIntrospector>,
    writer: Mutex<()>,
}

impl ConfigService {
    /// Service over `registry`, seeded with its defaults.
    pub fn new(registry: Arc<SchemaRegistry>, host: Arc<dyn HostIntrospector>) -> Self {
        let store = ConfigStore::seed(&registry);
        tracing::info!(fields = registry.len(), "Configuration service initialized");
        Self {
            registry,
            store,
            notifier: ChangeNotifier::new(),
            host,
            writer: Mutex::new(()),
        }
    }

    /// Service over the built-in schema.
    pub fn with_builtin_schema(host: Arc<dyn HostIntrospector>) -> Result<Self, SchemaError> {
        Ok(Self::new(Arc::new(SchemaRegistry::builtin()?), host))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Current canonical value of `category.key`.
    pub fn get(&self, category: &str, key: &str) -> Result<String, ConfigError> {
        let result = self.resolve(category, key).map(|entry| {
            self.store
                .get(entry.category, &entry.key)
                .unwrap_or_else(|| entry.default.clone())
        });
        metrics::record_get(category, result.as_ref().err().map(ConfigError::kind));
        result
    }

    /// Current parsed value of `category.key`.
    pub fn get_typed(&self, category: &str, key: &str) -> Result<TypedValue, ConfigError> {
        let entry = self.resolve(category, key)?;
        let snapshot = self.store.load();
        match snapshot.typed(entry.category, &entry.key) {
            Some(typed) => Ok(typed.clone()),
            None => validation::parse_syntax(entry, &RawValue::Str(entry.default.clone()))
                .map(|v| v.typed)
                .map_err(|source| invalid(entry, source)),
        }
    }

    /// Validate and commit one value.
    ///
    /// On any error the store is left exactly as it was and no event is
    /// published.
    pub fn set(&self, category: &str, key: &str, raw: impl Into<RawValue>) -> Result<SetOutcome, ConfigError> {
        let raw = raw.into();
        let started = Instant::now();
        let result = self.apply(category, key, &raw);

        let outcome = match &result {
            Ok(o) if o.changed => "ok",
            Ok(_) => "unchanged",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_set(category, outcome, started.elapsed());

        match &result {
            Ok(o) if o.changed => tracing::info!(
                category,
                key,
                value = %raw.render(),
                revision = o.revision,
                "Configuration updated"
            ),
            Ok(_) => tracing::debug!(category, key, "Configuration unchanged"),
            Err(e) => tracing::info!(category, key, error = %e, "Configuration update rejected"),
        }
        result
    }

    fn apply(&self, category: &str, key: &str, raw: &RawValue) -> Result<SetOutcome, ConfigError> {
        let entry = self.resolve(category, key)?;
        ensure_mutable(entry)?;

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.store.load();
        let stored = validation::validate(entry, raw, &snapshot, self.host.as_ref())
            .map_err(|source| invalid(entry, source))?;

        let old_value = snapshot
            .canonical(entry.category, &entry.key)
            .unwrap_or(&entry.default)
            .to_string();
        if old_value == stored.canonical {
            return Ok(SetOutcome {
                changed: false,
                revision: snapshot.revision(),
            });
        }

        let new_value = stored.canonical.clone();
        let committed = self
            .store
            .commit(snapshot.with_value(entry.category, &entry.key, stored));

        self.notifier.publish(ChangeEvent {
            category: entry.category,
            key: entry.key.clone(),
            old_value,
            new_value,
            revision: committed.revision(),
            timestamp: SystemTime::now(),
        });

        Ok(SetOutcome {
            changed: true,
            revision: committed.revision(),
        })
    }

    /// Validate and commit several values as one unit.
    ///
    /// Each item is checked against the snapshot as updated by the items
    /// before it, so cross-field rules see the batch's own values. If any
    /// item fails nothing is committed.
    ///
    /// A read-only field may appear with its current value; it is skipped.
    pub fn set_many<I, C, K, V>(&self, items: I) -> Result<SetOutcome, ConfigError>
    where
        I: IntoIterator<Item = (C, K, V)>,
        C: AsRef<str>,
        K: AsRef<str>,
        V: Into<RawValue>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.apply_batch(items)
    }

    /// [`set_many`](Self::set_many) over the items produced by `load`, which
    /// runs under the writer lock. No `set` can commit between reading the
    /// items and applying them.
    pub fn set_many_from<F, E, I, C, K, V>(&self, load: F) -> Result<SetOutcome, E>
    where
        F: FnOnce() -> Result<I, E>,
        E: From<ConfigError>,
        I: IntoIterator<Item = (C, K, V)>,
        C: AsRef<str>,
        K: AsRef<str>,
        V: Into<RawValue>,
    {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let items = load()?;
        Ok(self.apply_batch(items)?)
    }

    /// Caller holds the writer lock.
    fn apply_batch<I, C, K, V>(&self, items: I) -> Result<SetOutcome, ConfigError>
    where
        I: IntoIterator<Item = (C, K, V)>,
        C: AsRef<str>,
        K: AsRef<str>,
        V: Into<RawValue>,
    {
        let base = self.store.load();
        let mut working = ConfigSnapshot::clone(&base);
        let mut touched: BTreeSet<(Category, String)> = BTreeSet::new();

        for (category, key, raw) in items {
            let raw = raw.into();
            let entry = self.resolve(category.as_ref(), key.as_ref())?;
            if !entry.mutable {
                let unchanged = validation::parse_syntax(entry, &raw)
                    .is_ok_and(|v| working.canonical(entry.category, &entry.key) == Some(v.canonical.as_str()));
                if unchanged {
                    continue;
                }
                ensure_mutable(entry)?;
            }
            let stored = validation::validate(entry, &raw, &working, self.host.as_ref())
                .map_err(|source| invalid(entry, source))?;
            if working.canonical(entry.category, &entry.key) != Some(stored.canonical.as_str()) {
                working.insert(entry.category, &entry.key, stored);
                touched.insert((entry.category, entry.key.clone()));
            }
        }

        let changes: Vec<(Category, String, String, String)> = touched
            .into_iter()
            .filter_map(|(category, key)| {
                let old = base.canonical(category, &key).unwrap_or_default().to_string();
                let new = working.canonical(category, &key)?.to_string();
                (old != new).then_some((category, key, old, new))
            })
            .collect();

        if changes.is_empty() {
            return Ok(SetOutcome {
                changed: false,
                revision: base.revision(),
            });
        }

        working.advance_revision();
        let committed = self.store.commit(working);
        let timestamp = SystemTime::now();
        tracing::info!(
            fields = changes.len(),
            revision = committed.revision(),
            "Configuration batch applied"
        );

        for (category, key, old_value, new_value) in changes {
            self.notifier.publish(ChangeEvent {
                category,
                key,
                old_value,
                new_value,
                revision: committed.revision(),
                timestamp,
            });
        }

        Ok(SetOutcome {
            changed: true,
            revision: committed.revision(),
        })
    }

    pub fn describe(&self, category: &str, key: &str) -> Result<EntryView, ConfigError> {
        let entry = self.resolve(category, key)?;
        Ok(EntryView::new(entry, &self.store.load()))
    }

    /// Every entry with its current value, ordered by category then key.
    pub fn dump(&self) -> Vec<EntryView> {
        let snapshot = self.store.load();
        self.registry
            .entries()
            .map(|entry| EntryView::new(entry, &snapshot))
            .collect()
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.store.load()
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    /// Register `subscriber` for events matching `filter`.
    ///
    /// Subscribers run on the notifier's dispatcher thread, one event at a
    /// time in commit order, after the writer lock has been released.
    pub fn subscribe(&self, filter: EventFilter, subscriber: Arc<dyn ConfigSubscriber>) -> SubscriptionId {
        self.notifier.subscribe(filter, subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub fn watch_events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notifier.watch_events()
    }

    /// Wait until subscribers have seen every change committed so far.
    /// Returns false if `timeout` elapsed first.
    pub fn flush_notifications(&self, timeout: Duration) -> bool {
        self.notifier.wait_idle(timeout)
    }

    fn resolve(&self, category: &str, key: &str) -> Result<&SchemaEntry, ConfigError> {
        Ok(self.registry.lookup(category, key)?)
    }
}

fn ensure_mutable(entry: &SchemaEntry) -> Result<(), ConfigError> {
    if entry.mutable {
        Ok(())
    } else {
        Err(ConfigError::ReadOnly {
            category: entry.category.to_string(),
            key: entry.key.clone(),
        })
    }
}

fn invalid(entry: &SchemaEntry, source: validation::ValidationError) -> ConfigError {
    ConfigError::InvalidValue {
        category: entry.category.to_string(),
        key: entry.key.clone(),
        source,
    }
}
