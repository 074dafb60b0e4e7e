//! The materialized configuration.
//!
//! Holds the current [`ConfigSnapshot`] behind an `ArcSwap`: readers load the
//! pointer without locking and keep a consistent view for as long as they
//! hold it, writers publish a complete new snapshot in one atomic swap.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::{Category, SchemaRegistry};
use crate::config::validation;
use crate::config::value::{ConfigSnapshot, RawValue};

#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<ConfigSnapshot>,
}

impl ConfigStore {
    /// Store holding every schema default at revision 0.
    pub fn seed(registry: &SchemaRegistry) -> Self {
        let mut snapshot = ConfigSnapshot::default();
        for entry in registry.entries() {
            // The registry only admits entries whose default parses.
            match validation::parse_syntax(entry, &RawValue::Str(entry.default.clone())) {
                Ok(value) => snapshot.insert(entry.category, &entry.key, value),
                Err(e) => tracing::error!(field = %entry.path(), error = %e, "Skipping unparsable default"),
            }
        }
        tracing::debug!(fields = snapshot.len(), "Configuration store seeded from defaults");

        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Current snapshot. Lock-free.
    pub fn load(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn get(&self, category: Category, key: &str) -> Option<String> {
        self.current.load().canonical(category, key).map(str::to_owned)
    }

    pub fn revision(&self) -> u64 {
        self.current.load().revision()
    }

    /// Publish `next`. Callers must hold the service's writer lock.
    pub(crate) fn commit(&self, next: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::value::{StoredValue, TypedValue};

    #[test]
    fn test_seed_covers_every_entry() {
        let registry = SchemaRegistry::builtin().unwrap();
        let store = ConfigStore::seed(&registry);

        for entry in registry.entries() {
            assert_eq!(store.get(entry.category, &entry.key).as_deref(), Some(entry.default.as_str()));
        }
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_loaded_snapshot_survives_commit() {
        let registry = SchemaRegistry::builtin().unwrap();
        let store = ConfigStore::seed(&registry);

        let before = store.load();
        let next = before.with_value(Category::Wal, "enable", StoredValue::new("off", TypedValue::Bool(false)));
        store.commit(next);

        assert_eq!(before.canonical(Category::Wal, "enable"), Some("true"));
        assert_eq!(store.get(Category::Wal, "enable").as_deref(), Some("off"));
        assert_eq!(store.revision(), 1);
    }
}
