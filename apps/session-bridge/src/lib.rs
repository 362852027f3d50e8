// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Session Bridge - Synchronous Broker Session Layer
//!
//! Turns a broker's serialized, asynchronous callback stream into a
//! thread-safe blocking trading API.
//!
//! # Architecture
//!
//! ```text
//! BrokerSession ──events──> EventPump ──> Dispatcher ──> SessionState
//!       ^                                                   │
//!       └────────────── commands ── TradingSession <────────┘
//! ```
//!
//! - **Dispatcher**: the single writer of session state; routes each event
//!   by kind to the order ledger, position book, tick accumulators, and
//!   pending request slots, then invokes user handlers.
//! - **Bridge**: request id → slot correlation for blocking calls
//!   (instrument resolution, market data handshake, snapshots).
//! - **Order ledger**: monotonic, idempotent merge of order status,
//!   executions, commissions, and broker errors.
//! - **Positions**: broker-reported positions and reconciliation.
//! - **Ticks**: quote and OHLCV+VWAP accumulation per instrument.
//! - **Scheduler**: drift-compensated recurring bar tasks.
//! - **Classifier**: broker error code → handling class.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Modules
// =============================================================================

/// Blocking trading API.
pub mod client;

/// Environment-driven configuration.
pub mod config;

/// Instruments, orders, and market data values.
pub mod domain;

/// Event dispatch, correlation, ledger, positions, ticks, and scheduling.
pub mod engine;

/// Crate error types.
pub mod error;

/// Prometheus counters.
pub mod observability;

/// Broker session port and the paper implementation.
pub mod session;

/// Tracing setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::TradingSession;
pub use config::{SessionConfig, TimeoutSettings};
pub use domain::{
    Alert, Bar, ContractDetails, ContractSpec, Instrument, InstrumentId, InstrumentRef, Order,
    OrderId, OrderState, Quote,
};
pub use engine::{
    ConnectionStatus, ErrorClass, Handlers, Position, Registration, ReconciliationReport,
    RecurringTask, classify,
};
pub use error::{ErrorCode, SessionError, SessionResult};
pub use session::{
    BrokerEvent, BrokerSession, EventReceiver, EventSender, PaperConfig, PaperSession,
    SessionCommand, event_channel,
};
