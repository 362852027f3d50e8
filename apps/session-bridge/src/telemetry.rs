//! Tracing Setup
//!
//! Installs a console `tracing` subscriber filtered through `RUST_LOG`.
//!
//! # Configuration
//!
//! - `RUST_LOG`: Filter directives (default: `session_bridge=info`)
//! - `LOG_ANSI`: Set to `false` to disable colored output
//!
//! # Usage
//!
//! ```rust,ignore
//! use session_bridge::telemetry::init_telemetry;
//!
//! fn main() {
//!     let _guard = init_telemetry();
//!     // ... application code
//! }
//! ```

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "session_bridge=info";

/// Guard returned by [`init_telemetry`]; logs shutdown when dropped.
#[derive(Debug)]
pub struct TelemetryGuard {
    installed: bool,
}

impl TelemetryGuard {
    /// Returns true if this call installed the global subscriber.
    #[must_use]
    pub const fn installed(&self) -> bool {
        self.installed
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.installed {
            tracing::debug!("Telemetry shutting down");
        }
    }
}

/// Initialize console tracing.
///
/// Safe to call more than once; only the first call installs a subscriber.
#[must_use]
pub fn init_telemetry() -> TelemetryGuard {
    let ansi = std::env::var("LOG_ANSI")
        .map(|v| v != "false")
        .unwrap_or(true);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(ansi)
        .try_init()
        .is_ok();

    TelemetryGuard { installed }
}
