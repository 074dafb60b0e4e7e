//! Structured logging.
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - JSON output for production, the plain `fmt` format otherwise
//! - `try_init` so tests and embedders that already installed a subscriber
//!   get an error instead of a panic

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::observability::ObservabilityError;
use crate::settings::LoggingSettings;

/// Filter used when `RUST_LOG` is unset.
fn default_directives(level: &str) -> String {
    format!("runtime_config={level},tower_http={level}")
}

pub fn init(settings: &LoggingSettings) -> Result<(), ObservabilityError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&settings.level))
            .map_err(|e| ObservabilityError::Logging(format!("invalid log level `{}`: {e}", settings.level)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ObservabilityError::Logging(e.to_string()))
}
