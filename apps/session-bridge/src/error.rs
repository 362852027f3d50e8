//! Error handling for the session bridge.
//!
//! Errors raised synchronously to callers of the blocking API. Broker
//! rejections of orders are *not* surfaced here: those land on the order
//! itself (cancelled, with a message) and reach callers through order
//! handlers.
//!
//! | Code | Raised by |
//! |------|-----------|
//! | `INSTRUMENT_NOT_FOUND` | Resolution returned zero candidates |
//! | `AMBIGUOUS_INSTRUMENT` | Resolution returned several non-future candidates |
//! | `REQUEST_TIMEOUT` | A blocking request exceeded its deadline |
//! | `BROKER_ERROR` | The broker answered a request with an error |
//! | `INVALID_ARGUMENT` | Caller passed an unusable argument |
//! | `DISCONNECTED` | The session is not connected |
//! | `TRANSPORT_ERROR` | The transport refused a command |
//! | `INTERNAL_ERROR` | Thread spawn or channel failure |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::RequestId;

/// Stable error codes for the session bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No contract matched a lookup.
    InstrumentNotFound,
    /// Several contracts matched and none could be preferred.
    AmbiguousInstrument,
    /// A blocking request timed out.
    RequestTimeout,
    /// The broker reported an error for a request.
    BrokerError,
    /// Invalid caller argument.
    InvalidArgument,
    /// Session is not connected.
    Disconnected,
    /// Transport refused a command.
    TransportError,
    /// Internal failure.
    InternalError,
}

impl ErrorCode {
    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InstrumentNotFound => "INSTRUMENT_NOT_FOUND",
            Self::AmbiguousInstrument => "AMBIGUOUS_INSTRUMENT",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::BrokerError => "BROKER_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Disconnected => "DISCONNECTED",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Errors returned by the session bridge.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Resolution found no matching contract.
    #[error("no contract matches {query}")]
    NotFound {
        /// Description of the lookup.
        query: String,
    },

    /// Resolution found several contracts with no preferred choice.
    #[error("{candidates} contracts match {query}")]
    Ambiguous {
        /// Description of the lookup.
        query: String,
        /// Number of candidates returned.
        candidates: usize,
    },

    /// A blocking request did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The broker answered with an error.
    #[error("broker error {code}: {message}")]
    Broker {
        /// Broker error code.
        code: i32,
        /// Broker error text.
        message: String,
    },

    /// Caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A slot already exists for this request id.
    #[error("request {0} is already outstanding")]
    DuplicateRequest(RequestId),

    /// The session is not connected.
    #[error("session is disconnected")]
    Disconnected,

    /// The transport refused a command.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internal failure (thread spawn, closed channel).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Build a timeout error.
    #[must_use]
    pub const fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Build a broker error from a code and message.
    #[must_use]
    pub fn broker(code: i32, message: impl Into<String>) -> Self {
        Self::Broker {
            code,
            message: message.into(),
        }
    }

    /// Get the stable error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::InstrumentNotFound,
            Self::Ambiguous { .. } => ErrorCode::AmbiguousInstrument,
            Self::Timeout { .. } => ErrorCode::RequestTimeout,
            Self::Broker { .. } => ErrorCode::BrokerError,
            Self::InvalidArgument(_) | Self::Config(_) => ErrorCode::InvalidArgument,
            Self::Disconnected => ErrorCode::Disconnected,
            Self::Transport(_) => ErrorCode::TransportError,
            Self::DuplicateRequest(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns true if the error is a request timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
