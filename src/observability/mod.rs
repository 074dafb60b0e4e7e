//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! config service, notifier, admin API
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and histograms via `metrics`)
//!
//! Consumers:
//!     → stdout (plain or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("logging init failed: {0}")]
    Logging(String),

    #[error("metrics init failed: {0}")]
    Metrics(String),
}
