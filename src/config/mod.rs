//! Runtime configuration subsystem.
//!
//! # Data Flow
//! ```text
//! get(category, key)
//!     → schema.rs (exact-match lookup)
//!     → store.rs (lock-free snapshot read)
//!
//! set(category, key, raw)
//!     → schema.rs (lookup, mutability)
//!     → service.rs (writer lock, private snapshot)
//!     → validation.rs (syntax, host.rs facts, cross-field rules)
//!     → store.rs (atomic swap of the next snapshot)
//!     → notifier.rs (one ChangeEvent per changed field, queued)
//!     ⇢ subscribers, on the notifier thread after `set` returns
//!
//! Overrides file (loader.rs, OverridesFile):
//!     startup applies it as one batch
//!     watcher.rs detects edits → reload under the writer lock
//!     PersistSubscriber writes committed values back; reloads skip them
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; readers keep a consistent view while a
//!   writer publishes the next one
//! - No normalization of category or key names, ever
//! - The schema is built once at startup and never changes

pub mod error;
pub mod host;
pub mod loader;
pub mod notifier;
pub mod schema;
pub mod service;
pub mod store;
pub mod validation;
pub mod value;
pub mod watcher;

pub use error::{ConfigError, ConfigReply, ErrorKind};
pub use host::{HostFacts, HostIntrospector, StaticHost, SystemHost};
pub use notifier::{ChangeEvent, ConfigSubscriber, EventFilter, SubscriberError, SubscriptionId};
pub use schema::{Category, SchemaEntry, SchemaRegistry, ValueType};
pub use service::{ConfigService, EntryView, SetOutcome};
pub use value::{ConfigSnapshot, RawValue, TypedValue};
