//! Schema of every runtime-tunable field.
//!
//! The registry is built once at startup and never mutated afterwards. Each
//! entry names a `(category, key)` pair, the type its values must parse as,
//! the type-specific constraint, the default, and whether `set` may touch it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::validation;
use crate::config::value::RawValue;

/// Top-level configuration namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Cache,
    Gpu,
    Network,
    General,
    Storage,
    Metric,
    Wal,
}

impl Category {
    /// Every category the server knows about.
    pub const ALL: [Category; 7] = [
        Category::Cache,
        Category::Gpu,
        Category::Network,
        Category::General,
        Category::Storage,
        Category::Metric,
        Category::Wal,
    ];

    /// Exact, case-sensitive parse. `"Cache"` and `"cache "` are not categories.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "cache" => Some(Category::Cache),
            "gpu" => Some(Category::Gpu),
            "network" => Some(Category::Network),
            "general" => Some(Category::General),
            "storage" => Some(Category::Storage),
            "metric" => Some(Category::Metric),
            "wal" => Some(Category::Wal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cache => "cache",
            Category::Gpu => "gpu",
            Category::Network => "network",
            Category::General => "general",
            Category::Storage => "storage",
            Category::Metric => "metric",
            Category::Wal => "wal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type a field's values are parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Boolean,
    Integer,
    /// Human-readable byte quantity such as `4GB`.
    SizeBytes,
    Port,
    /// One or more `gpu<N>` tokens.
    DeviceList,
    Path,
    Duration,
    FreeString,
    Timezone,
    IpAddress,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::SizeBytes => "byte size",
            ValueType::Port => "port",
            ValueType::DeviceList => "device list",
            ValueType::Path => "path",
            ValueType::Duration => "duration",
            ValueType::FreeString => "string",
            ValueType::Timezone => "timezone",
            ValueType::IpAddress => "IP address",
        };
        f.write_str(name)
    }
}

/// Byte-size unit. Multiples are binary (1KB = 1024B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
    TB,
}

impl SizeUnit {
    pub const fn multiplier(self) -> u64 {
        match self {
            SizeUnit::B => 1,
            SizeUnit::KB => 1 << 10,
            SizeUnit::MB => 1 << 20,
            SizeUnit::GB => 1 << 30,
            SizeUnit::TB => 1 << 40,
        }
    }

    /// Parse a unit suffix, case-insensitively. The trailing `B` is optional
    /// for everything but plain bytes.
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_uppercase().as_str() {
            "B" => Some(SizeUnit::B),
            "K" | "KB" => Some(SizeUnit::KB),
            "M" | "MB" => Some(SizeUnit::MB),
            "G" | "GB" => Some(SizeUnit::GB),
            "T" | "TB" => Some(SizeUnit::TB),
            _ => None,
        }
    }
}

/// Type-specific constraint attached to a schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    None,
    /// Inclusive bounds.
    Integer { min: i64, max: i64 },
    /// `bare_unit` applies to magnitudes written without a suffix. Bounds are
    /// inclusive and in bytes.
    SizeBytes {
        bare_unit: SizeUnit,
        min: Option<u64>,
        max: Option<u64>,
    },
    /// Always the open interval (1024, 65535). `exclusive` rejects ports some
    /// other socket on the host is already listening on.
    Port { exclusive: bool },
    DeviceList { max_devices: usize },
    /// Inclusive bounds in milliseconds.
    Duration { min_ms: u64, max_ms: u64 },
}

impl Constraint {
    /// The constraint a freshly declared field of `value_type` starts with.
    pub const fn default_for(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Integer => Constraint::Integer { min: 0, max: i64::MAX },
            ValueType::SizeBytes => Constraint::SizeBytes {
                bare_unit: SizeUnit::B,
                min: None,
                max: None,
            },
            ValueType::Port => Constraint::Port { exclusive: false },
            ValueType::DeviceList => Constraint::DeviceList { max_devices: 1 },
            ValueType::Duration => Constraint::Duration { min_ms: 0, max_ms: u64::MAX },
            _ => Constraint::None,
        }
    }

    fn fits(&self, value_type: ValueType) -> bool {
        matches!(
            (self, value_type),
            (Constraint::Integer { .. }, ValueType::Integer)
                | (Constraint::SizeBytes { .. }, ValueType::SizeBytes)
                | (Constraint::Port { .. }, ValueType::Port)
                | (Constraint::DeviceList { .. }, ValueType::DeviceList)
                | (Constraint::Duration { .. }, ValueType::Duration)
                | (
                    Constraint::None,
                    ValueType::Boolean
                        | ValueType::Path
                        | ValueType::FreeString
                        | ValueType::Timezone
                        | ValueType::IpAddress
                )
        )
    }
}

/// Invariants spanning more than one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrossField {
    None,
    /// This field plus `partner` (same category, also a byte size) must fit in
    /// the host's total physical memory.
    MemoryBudget { partner: String },
}

/// One configurable field.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaEntry {
    pub category: Category,
    pub key: String,
    pub value_type: ValueType,
    pub constraint: Constraint,
    pub default: String,
    pub mutable: bool,
    pub cross_field: CrossField,
    pub description: String,
}

impl SchemaEntry {
    pub fn new(category: Category, key: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            category,
            key: key.into(),
            value_type,
            constraint: Constraint::default_for(value_type),
            default: String::new(),
            mutable: true,
            cross_field: CrossField::None,
            description: String::new(),
        }
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = default.into();
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub fn memory_budget_with(mut self, partner: impl Into<String>) -> Self {
        self.cross_field = CrossField::MemoryBudget { partner: partner.into() };
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// `category.key`, used in logs and error messages.
    pub fn path(&self) -> String {
        format!("{}.{}", self.category, self.key)
    }
}

/// Why a lookup missed. Both variants surface identically to callers; they
/// are kept apart for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("unknown config category `{category}`")]
    UnknownCategory { category: String },

    #[error("unknown config key `{key}` in category `{category}`")]
    UnknownKey { category: Category, key: String },
}

/// Errors raised while assembling a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("duplicate schema entry `{0}`")]
    Duplicate(String),

    #[error("constraint of `{0}` does not match its value type")]
    ConstraintMismatch(String),

    #[error("memory budget partner of `{entry}` is not a byte size in the same category: `{partner}`")]
    BadPartner { entry: String, partner: String },

    #[error("default of `{entry}` is invalid: {reason}")]
    InvalidDefault { entry: String, reason: String },
}

/// Immutable table of every recognized `(category, key)` pair.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entries: BTreeMap<Category, BTreeMap<String, SchemaEntry>>,
}

impl SchemaRegistry {
    /// The table the server ships with.
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_entries(builtin_entries())
    }

    /// Build a registry from arbitrary entries.
    ///
    /// Rejects duplicates, constraints that do not fit the value type,
    /// dangling memory-budget partners, and defaults that fail their own
    /// syntactic rules.
    pub fn from_entries(entries: impl IntoIterator<Item = SchemaEntry>) -> Result<Self, SchemaError> {
        let mut table: BTreeMap<Category, BTreeMap<String, SchemaEntry>> = BTreeMap::new();

        for entry in entries {
            if !entry.constraint.fits(entry.value_type) {
                return Err(SchemaError::ConstraintMismatch(entry.path()));
            }
            validation::parse_syntax(&entry, &RawValue::Str(entry.default.clone())).map_err(|e| {
                SchemaError::InvalidDefault {
                    entry: entry.path(),
                    reason: e.to_string(),
                }
            })?;

            let keys = table.entry(entry.category).or_default();
            if keys.contains_key(&entry.key) {
                return Err(SchemaError::Duplicate(entry.path()));
            }
            keys.insert(entry.key.clone(), entry);
        }

        let registry = Self { entries: table };
        for entry in registry.entries() {
            if let CrossField::MemoryBudget { partner } = &entry.cross_field {
                let partner_ok = registry
                    .entries
                    .get(&entry.category)
                    .and_then(|keys| keys.get(partner))
                    .is_some_and(|p| p.value_type == ValueType::SizeBytes && p.key != entry.key);
                if entry.value_type != ValueType::SizeBytes || !partner_ok {
                    return Err(SchemaError::BadPartner {
                        entry: entry.path(),
                        partner: partner.clone(),
                    });
                }
            }
        }

        Ok(registry)
    }

    /// Exact-match lookup. No trimming, no case folding, no prefixes.
    pub fn lookup(&self, category: &str, key: &str) -> Result<&SchemaEntry, LookupError> {
        let keys = Category::parse(category)
            .and_then(|c| self.entries.get(&c).map(|keys| (c, keys)))
            .ok_or_else(|| LookupError::UnknownCategory {
                category: category.to_string(),
            });
        let (category, keys) = keys?;

        keys.get(key).ok_or_else(|| LookupError::UnknownKey {
            category,
            key: key.to_string(),
        })
    }

    /// Categories that have at least one entry.
    pub fn categories(&self) -> BTreeSet<Category> {
        self.entries.keys().copied().collect()
    }

    pub fn keys(&self, category: Category) -> impl Iterator<Item = &str> {
        self.entries
            .get(&category)
            .into_iter()
            .flat_map(|keys| keys.keys().map(String::as_str))
    }

    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.entries.values().flat_map(|keys| keys.values())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub const CACHE_SIZE: &str = "cache_size";
pub const INSERT_BUFFER_SIZE: &str = "insert_buffer_size";

/// Fields recognized by the server, with their shipped defaults.
pub fn builtin_entries() -> Vec<SchemaEntry> {
    use Category::*;

    const MB: u64 = SizeUnit::MB.multiplier();

    vec![
        // general
        SchemaEntry::new(General, "timezone", ValueType::Timezone)
            .default_value("UTC+8")
            .describe("Timezone used for timestamps, UTC or UTC+N / UTC-N"),
        SchemaEntry::new(General, "meta_uri", ValueType::FreeString)
            .default_value("sqlite://:@:/")
            .describe("URI of the metadata backend"),
        // network
        SchemaEntry::new(Network, "bind.address", ValueType::IpAddress)
            .default_value("0.0.0.0")
            .describe("Address the RPC listener binds to"),
        SchemaEntry::new(Network, "bind.port", ValueType::Port)
            .default_value("19530")
            .read_only()
            .describe("Port of the RPC listener; fixed for the process lifetime"),
        SchemaEntry::new(Network, "http.enable", ValueType::Boolean)
            .default_value("true")
            .describe("Serve the HTTP API"),
        SchemaEntry::new(Network, "http.port", ValueType::Port)
            .default_value("19121")
            .describe("Port of the HTTP API"),
        // storage
        SchemaEntry::new(Storage, "path", ValueType::Path)
            .default_value("/var/lib/milvus")
            .describe("Primary data directory"),
        SchemaEntry::new(Storage, "auto_flush_interval", ValueType::Integer)
            .default_value("1")
            .constraint(Constraint::Integer { min: 1, max: i64::from(u32::MAX) })
            .describe("Seconds between automatic flushes"),
        SchemaEntry::new(Storage, "file_cleanup_timeout", ValueType::Duration)
            .default_value("10s")
            .constraint(Constraint::Duration { min_ms: 0, max_ms: 3_600_000 })
            .describe("Grace period before soft-deleted files are removed"),
        // wal
        SchemaEntry::new(Wal, "enable", ValueType::Boolean)
            .default_value("true")
            .describe("Write-ahead log on/off"),
        SchemaEntry::new(Wal, "recovery_error_ignore", ValueType::Boolean)
            .default_value("false")
            .describe("Skip corrupt records during WAL recovery"),
        SchemaEntry::new(Wal, "buffer_size", ValueType::SizeBytes)
            .default_value("256MB")
            .constraint(Constraint::SizeBytes {
                bare_unit: SizeUnit::MB,
                min: Some(64 * MB),
                max: Some(4096 * MB),
            })
            .describe("WAL write buffer"),
        SchemaEntry::new(Wal, "path", ValueType::Path)
            .default_value("/var/lib/milvus/wal")
            .describe("WAL directory"),
        // cache
        SchemaEntry::new(Cache, CACHE_SIZE, ValueType::SizeBytes)
            .default_value("4GB")
            .constraint(Constraint::SizeBytes {
                bare_unit: SizeUnit::GB,
                min: None,
                max: None,
            })
            .memory_budget_with(INSERT_BUFFER_SIZE)
            .describe("CPU cache reservation"),
        SchemaEntry::new(Cache, INSERT_BUFFER_SIZE, ValueType::SizeBytes)
            .default_value("1GB")
            .constraint(Constraint::SizeBytes {
                bare_unit: SizeUnit::GB,
                min: None,
                max: None,
            })
            .memory_budget_with(CACHE_SIZE)
            .describe("Insert buffer reservation"),
        SchemaEntry::new(Cache, "preload_collection", ValueType::FreeString)
            .default_value("")
            .describe("Comma separated collections loaded into cache at startup"),
        // gpu
        SchemaEntry::new(Gpu, "enable", ValueType::Boolean)
            .default_value("true")
            .describe("Use GPU resources"),
        SchemaEntry::new(Gpu, "cache.enable", ValueType::Boolean)
            .default_value("true")
            .describe("Cache index data in GPU memory"),
        SchemaEntry::new(Gpu, CACHE_SIZE, ValueType::SizeBytes)
            .default_value("1GB")
            .constraint(Constraint::SizeBytes {
                bare_unit: SizeUnit::GB,
                min: None,
                max: None,
            })
            .describe("GPU cache reservation per device"),
        SchemaEntry::new(Gpu, "gpu_search_threshold", ValueType::Integer)
            .default_value("1000")
            .describe("Batch size from which searches run on GPU"),
        SchemaEntry::new(Gpu, "search_devices", ValueType::DeviceList)
            .default_value("gpu0")
            .describe("Device used for searches"),
        SchemaEntry::new(Gpu, "build_index_devices", ValueType::DeviceList)
            .default_value("gpu0")
            .describe("Device used for index builds"),
        // metric
        SchemaEntry::new(Metric, "enable", ValueType::Boolean)
            .default_value("false")
            .describe("Expose Prometheus metrics"),
        SchemaEntry::new(Metric, "address", ValueType::IpAddress)
            .default_value("127.0.0.1")
            .describe("Metrics endpoint address"),
        SchemaEntry::new(Metric, "port", ValueType::Port)
            .default_value("9091")
            .describe("Metrics endpoint port"),
    ]
}
