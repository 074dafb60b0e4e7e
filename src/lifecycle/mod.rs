//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Settings → Host → ConfigService → overrides file → persistence, watcher
//!
//! Shutdown (shutdown.rs):
//!     Signal received → admin server stops accepting → watcher dropped → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: a bad overrides file at startup is fatal, unlike on reload
//! - The admin listener starts last, once the service holds its final values

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
