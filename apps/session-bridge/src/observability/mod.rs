//! Observability: Prometheus metrics and log setup.

mod metrics;

pub use self::metrics::{
    MetricsError, init_metrics, record_bar_emitted, record_broker_error,
    record_duplicate_suppressed, record_event, record_fill_accepted, record_order_placed,
    record_request_timeout, record_resolution_failure, render_metrics,
};
