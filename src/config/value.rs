//! Raw inputs, parsed values and the immutable configuration snapshot.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::Category;

/// A value as handed to `set` by a transport: string, number or boolean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl RawValue {
    /// The caller's literal, the way it would be echoed back.
    pub fn render(&self) -> String {
        match self {
            RawValue::Bool(b) => b.to_string(),
            RawValue::Int(n) => n.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Str(s) => s.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Bool(_) => "boolean",
            RawValue::Int(_) => "integer",
            RawValue::Float(_) => "float",
            RawValue::Str(_) => "string",
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::Str(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Str(s)
    }
}

impl From<i64> for RawValue {
    fn from(n: i64) -> Self {
        RawValue::Int(n)
    }
}

impl From<i32> for RawValue {
    fn from(n: i32) -> Self {
        RawValue::Int(i64::from(n))
    }
}

impl From<u16> for RawValue {
    fn from(n: u16) -> Self {
        RawValue::Int(i64::from(n))
    }
}

impl From<f64> for RawValue {
    fn from(f: f64) -> Self {
        RawValue::Float(f)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

/// Parsed form of an accepted value, for consumers that need more than the
/// canonical string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedValue {
    Bool(bool),
    Integer(i64),
    Bytes(u64),
    Port(u16),
    /// GPU indices, in the order given.
    Devices(Vec<u32>),
    Path(PathBuf),
    Duration(Duration),
    Text(String),
    /// Offset from UTC in whole hours.
    Timezone(i8),
    Ip(IpAddr),
}

impl TypedValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            TypedValue::Bytes(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<u16> {
        match self {
            TypedValue::Port(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_devices(&self) -> Option<&[u32]> {
        match self {
            TypedValue::Devices(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            TypedValue::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

/// Canonical string plus parsed form of one stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub canonical: String,
    pub typed: TypedValue,
}

impl StoredValue {
    pub fn new(canonical: impl Into<String>, typed: TypedValue) -> Self {
        Self {
            canonical: canonical.into(),
            typed,
        }
    }
}

/// Immutable view of every stored value at one revision.
///
/// Writers never mutate a published snapshot; they clone it, apply their
/// change and publish the copy under the next revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: BTreeMap<Category, BTreeMap<String, StoredValue>>,
    revision: u64,
}

impl ConfigSnapshot {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn get(&self, category: Category, key: &str) -> Option<&StoredValue> {
        self.values.get(&category).and_then(|keys| keys.get(key))
    }

    pub fn canonical(&self, category: Category, key: &str) -> Option<&str> {
        self.get(category, key).map(|v| v.canonical.as_str())
    }

    pub fn typed(&self, category: Category, key: &str) -> Option<&TypedValue> {
        self.get(category, key).map(|v| &v.typed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &str, &StoredValue)> {
        self.values
            .iter()
            .flat_map(|(c, keys)| keys.iter().map(move |(k, v)| (*c, k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.values.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of this snapshot with one value replaced, one revision later.
    pub fn with_value(&self, category: Category, key: &str, value: StoredValue) -> Self {
        let mut next = self.clone();
        next.insert(category, key, value);
        next.revision += 1;
        next
    }

    pub(crate) fn insert(&mut self, category: Category, key: &str, value: StoredValue) {
        self.values
            .entry(category)
            .or_default()
            .insert(key.to_string(), value);
    }

    pub(crate) fn advance_revision(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_echoes_literal() {
        assert_eq!(RawValue::from("yES").render(), "yES");
        assert_eq!(RawValue::from(1).render(), "1");
        assert_eq!(RawValue::from(false).render(), "false");
        assert_eq!(RawValue::from(1000.35).render(), "1000.35");
    }

    #[test]
    fn test_raw_value_from_json() {
        let values: Vec<RawValue> = serde_json::from_str(r#"["4GB", 19530, 1.5, true]"#).unwrap();
        assert_eq!(
            values,
            vec![
                RawValue::Str("4GB".into()),
                RawValue::Int(19530),
                RawValue::Float(1.5),
                RawValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_with_value_leaves_original_untouched() {
        let mut base = ConfigSnapshot::default();
        base.insert(Category::Cache, "cache_size", StoredValue::new("4GB", TypedValue::Bytes(4 << 30)));

        let next = base.with_value(
            Category::Cache,
            "cache_size",
            StoredValue::new("2GB", TypedValue::Bytes(2 << 30)),
        );

        assert_eq!(base.canonical(Category::Cache, "cache_size"), Some("4GB"));
        assert_eq!(next.canonical(Category::Cache, "cache_size"), Some("2GB"));
        assert_eq!(next.revision(), base.revision() + 1);
        assert_eq!(next.typed(Category::Cache, "cache_size").and_then(TypedValue::as_bytes), Some(2 << 30));
    }
}
