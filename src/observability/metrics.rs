//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_get_total` (counter): reads by category, outcome
//! - `config_set_total` (counter): writes by category, outcome
//! - `config_set_duration_seconds` (histogram): validate + commit latency
//! - `config_change_events_total` (counter): published events by category
//! - `config_subscriber_failures_total` (counter): failed deliveries by category
//!
//! # Design Decisions
//! - Category labels come from the closed category set; anything else is
//!   reported as `unknown` so callers cannot blow up label cardinality
//! - Without an installed recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::error::ErrorKind;
use crate::config::schema::Category;
use crate::observability::ObservabilityError;

const GETS_TOTAL: &str = "config_get_total";
const SETS_TOTAL: &str = "config_set_total";
const SET_DURATION: &str = "config_set_duration_seconds";
const CHANGE_EVENTS_TOTAL: &str = "config_change_events_total";
const SUBSCRIBER_FAILURES_TOTAL: &str = "config_subscriber_failures_total";

/// Start the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), ObservabilityError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Metrics(e.to_string()))?;

    tracing::info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

fn category_label(category: &str) -> &'static str {
    Category::parse(category).map_or("unknown", |c| c.as_str())
}

pub fn record_get(category: &str, error: Option<ErrorKind>) {
    let outcome = error.map_or("ok", |kind| kind.as_str());
    counter!(GETS_TOTAL, "category" => category_label(category), "outcome" => outcome).increment(1);
}

pub fn record_set(category: &str, outcome: &'static str, elapsed: Duration) {
    let category = category_label(category);
    counter!(SETS_TOTAL, "category" => category, "outcome" => outcome).increment(1);
    histogram!(SET_DURATION, "category" => category).record(elapsed.as_secs_f64());
}

pub fn record_change_event(category: Category) {
    counter!(CHANGE_EVENTS_TOTAL, "category" => category.as_str()).increment(1);
}

pub fn record_subscriber_failure(category: Category) {
    counter!(SUBSCRIBER_FAILURES_TOTAL, "category" => category.as_str()).increment(1);
}
