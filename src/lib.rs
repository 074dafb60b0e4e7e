//! Runtime configuration service.
//!
//! Lets operators inspect and change a running server's tunables (cache
//! sizes, GPU assignment, ports, storage paths, WAL and metrics settings)
//! without a restart. Every change is validated against the schema, host
//! facts and related fields before it is committed, and committed changes
//! are pushed to subscribers.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod settings;

pub use config::{ConfigError, ConfigReply, ConfigService, ErrorKind, RawValue};
pub use http::AdminServer;
pub use lifecycle::Shutdown;
