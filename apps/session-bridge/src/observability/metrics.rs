//! Prometheus metrics for the session bridge.
//!
//! Counters are recorded through the `metrics` facade and are no-ops until
//! a recorder is installed with [`init_metrics`].
//!
//! # Example
//!
//! ```ignore
//! use session_bridge::observability::{init_metrics, render_metrics};
//!
//! init_metrics()?;
//! // ... run the session
//! println!("{}", render_metrics().unwrap_or_default());
//! ```

use std::sync::OnceLock;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::OrderType;
use crate::engine::ErrorClass;
use crate::session::EventKind;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe every counter.
///
/// Calling it again after a successful install is a no-op.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<(), MetricsError> {
    if HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;
    let _ = HANDLE.set(handle);

    describe_counter!("session_events_total", "Broker events dispatched, by kind");
    describe_counter!("session_broker_errors_total", "Broker error notices, by class");
    describe_counter!("session_orders_placed_total", "Orders transmitted, by type");
    describe_counter!("session_fills_accepted_total", "Fill merges that advanced an order");
    describe_counter!(
        "session_duplicates_suppressed_total",
        "Duplicate or stale order notifications dropped"
    );
    describe_counter!("session_bars_emitted_total", "Bars delivered to bar handlers");
    describe_counter!("session_resolution_failures_total", "Failed instrument resolutions");
    describe_counter!("session_request_timeouts_total", "Blocking requests that timed out");

    tracing::info!("Prometheus metrics recorder installed");
    Ok(())
}

/// Render the current metrics snapshot in Prometheus text format.
///
/// Returns `None` if [`init_metrics`] has not run.
#[must_use]
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(PrometheusHandle::render)
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to install the recorder.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Record one dispatched broker event.
pub fn record_event(kind: EventKind) {
    counter!("session_events_total", "kind" => kind.as_str()).increment(1);
}

/// Record one broker error notice.
pub fn record_broker_error(class: ErrorClass) {
    counter!("session_broker_errors_total", "class" => class.as_str()).increment(1);
}

// ============================================================================
// Order Metrics
// ============================================================================

/// Record an order transmitted to the broker.
pub fn record_order_placed(order_type: OrderType) {
    counter!("session_orders_placed_total", "order_type" => order_type.code()).increment(1);
}

/// Record a fill that advanced an order.
pub fn record_fill_accepted() {
    counter!("session_fills_accepted_total").increment(1);
}

/// Record a dropped duplicate notification.
///
/// * `kind` - What was duplicated (`fill`, `cancel`)
pub fn record_duplicate_suppressed(kind: &'static str) {
    counter!("session_duplicates_suppressed_total", "kind" => kind).increment(1);
}

// ============================================================================
// Market Data and Request Metrics
// ============================================================================

/// Record a bar delivered to handlers.
pub fn record_bar_emitted() {
    counter!("session_bars_emitted_total").increment(1);
}

/// Record a failed instrument resolution.
pub fn record_resolution_failure() {
    counter!("session_resolution_failures_total").increment(1);
}

/// Record a blocking request that hit its deadline.
pub fn record_request_timeout(operation: &'static str) {
    counter!("session_request_timeouts_total", "operation" => operation).increment(1);
}
