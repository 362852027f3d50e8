//! Typed broker events consumed by the dispatcher.
//!
//! Market data events carry the ticker id the subscription was made with,
//! which is always the instrument's contract id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Contract, ContractDetails, InstrumentId, OrderId, RequestId};

/// Discriminant of a [`BrokerEvent`], used as the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Session handshake completed.
    ConnectionEstablished,
    /// Accounts reachable through the session.
    ManagedAccounts,
    /// One account summary value.
    AccountSummary,
    /// Price tick.
    TickPrice,
    /// Size tick.
    TickSize,
    /// String tick.
    TickString,
    /// Generic numeric tick.
    TickGeneric,
    /// Next usable order id.
    NextValidId,
    /// One contract resolution candidate.
    ContractDetails,
    /// End of resolution candidates.
    ContractDetailsEnd,
    /// Order progress.
    OrderStatus,
    /// Open-order acknowledgement or snapshot entry.
    OpenOrder,
    /// End of an open-orders snapshot.
    OpenOrderEnd,
    /// One execution.
    ExecutionDetails,
    /// Commission for one execution.
    CommissionReport,
    /// One position.
    Position,
    /// End of a positions snapshot.
    PositionEnd,
    /// The connection was closed.
    ConnectionClosed,
    /// Error or informational notice.
    Error,
    /// Event the session layer does not model.
    Unrecognized,
}

impl EventKind {
    /// Label used for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::ManagedAccounts => "managed_accounts",
            Self::AccountSummary => "account_summary",
            Self::TickPrice => "tick_price",
            Self::TickSize => "tick_size",
            Self::TickString => "tick_string",
            Self::TickGeneric => "tick_generic",
            Self::NextValidId => "next_valid_id",
            Self::ContractDetails => "contract_details",
            Self::ContractDetailsEnd => "contract_details_end",
            Self::OrderStatus => "order_status",
            Self::OpenOrder => "open_order",
            Self::OpenOrderEnd => "open_order_end",
            Self::ExecutionDetails => "execution_details",
            Self::CommissionReport => "commission_report",
            Self::Position => "position",
            Self::PositionEnd => "position_end",
            Self::ConnectionClosed => "connection_closed",
            Self::Error => "error",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// Order progress notification. Duplicates are common.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Order id.
    pub order_id: OrderId,
    /// Broker status text (`Submitted`, `Filled`, `Cancelled`, ...).
    pub status: String,
    /// Cumulative filled magnitude.
    pub filled: i64,
    /// Remaining magnitude.
    pub remaining: i64,
    /// Average fill price.
    pub avg_fill_price: Option<Decimal>,
}

impl OrderStatusReport {
    /// Returns true if the status reports a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.status.as_str(), "Cancelled" | "ApiCanceled")
    }
}

/// Open-order acknowledgement, also sent for every order in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrderReport {
    /// Order id.
    pub order_id: OrderId,
    /// Contract the order trades.
    pub contract: Contract,
    /// Signed total quantity.
    pub quantity: i64,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Broker status text.
    pub status: String,
    /// Warning attached by the broker.
    pub warning: Option<String>,
}

/// One execution of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Broker execution id; commission reports refer to it.
    pub exec_id: String,
    /// Order id.
    pub order_id: OrderId,
    /// Size of this execution.
    pub shares: i64,
    /// Price of this execution.
    pub price: Decimal,
    /// Cumulative filled magnitude of the order.
    pub cumulative: i64,
    /// Average price over all executions of the order.
    pub avg_price: Decimal,
    /// Execution time.
    pub time: DateTime<Utc>,
}

/// Commission and realized P&L for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionReport {
    /// Execution id.
    pub exec_id: String,
    /// Commission charged.
    pub commission: Decimal,
    /// Realized P&L, when the execution closed a position.
    pub realized_pnl: Option<Decimal>,
}

/// One broker-reported position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Account the position belongs to.
    pub account: String,
    /// Contract held.
    pub contract: Contract,
    /// Signed quantity.
    pub quantity: i64,
    /// Average cost, including the contract multiplier.
    pub avg_cost: Decimal,
}

/// Typed broker callback.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Session handshake completed.
    ConnectionEstablished,
    /// Comma-separated account list, already split.
    ManagedAccounts {
        /// Account codes.
        accounts: Vec<String>,
    },
    /// One account summary value.
    AccountSummary {
        /// Request that asked for it.
        request_id: RequestId,
        /// Account code.
        account: String,
        /// Summary tag (e.g. `AccountType`).
        tag: String,
        /// Tag value.
        value: String,
    },
    /// Price tick.
    TickPrice {
        /// Ticker id.
        instrument: InstrumentId,
        /// Raw tick type code.
        tick_type: i32,
        /// Price.
        price: f64,
    },
    /// Size tick.
    TickSize {
        /// Ticker id.
        instrument: InstrumentId,
        /// Raw tick type code.
        tick_type: i32,
        /// Size.
        size: f64,
    },
    /// String tick.
    TickString {
        /// Ticker id.
        instrument: InstrumentId,
        /// Raw tick type code.
        tick_type: i32,
        /// Raw value.
        value: String,
    },
    /// Generic numeric tick.
    TickGeneric {
        /// Ticker id.
        instrument: InstrumentId,
        /// Raw tick type code.
        tick_type: i32,
        /// Value.
        value: f64,
    },
    /// Next usable order id.
    NextValidId {
        /// The id.
        order_id: OrderId,
    },
    /// One contract resolution candidate.
    ContractDetails {
        /// Resolution request id.
        request_id: RequestId,
        /// Candidate.
        details: ContractDetails,
    },
    /// End of resolution candidates.
    ContractDetailsEnd {
        /// Resolution request id.
        request_id: RequestId,
    },
    /// Order progress.
    OrderStatus(OrderStatusReport),
    /// Open-order acknowledgement or snapshot entry.
    OpenOrder(OpenOrderReport),
    /// End of an open-orders snapshot.
    OpenOrderEnd,
    /// One execution.
    ExecutionDetails(ExecutionReport),
    /// Commission for one execution.
    CommissionReport(CommissionReport),
    /// One position.
    Position(PositionReport),
    /// End of a positions snapshot.
    PositionEnd,
    /// The connection was closed.
    ConnectionClosed,
    /// Error or informational notice.
    Error {
        /// Request, ticker, or order id the notice refers to; -1 when none.
        id: i64,
        /// Broker error code.
        code: i32,
        /// Broker error text.
        message: String,
    },
    /// Event the session layer does not model.
    Unrecognized {
        /// Name of the underlying message type.
        type_name: String,
    },
}

impl BrokerEvent {
    /// The event's kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionEstablished => EventKind::ConnectionEstablished,
            Self::ManagedAccounts { .. } => EventKind::ManagedAccounts,
            Self::AccountSummary { .. } => EventKind::AccountSummary,
            Self::TickPrice { .. } => EventKind::TickPrice,
            Self::TickSize { .. } => EventKind::TickSize,
            Self::TickString { .. } => EventKind::TickString,
            Self::TickGeneric { .. } => EventKind::TickGeneric,
            Self::NextValidId { .. } => EventKind::NextValidId,
            Self::ContractDetails { .. } => EventKind::ContractDetails,
            Self::ContractDetailsEnd { .. } => EventKind::ContractDetailsEnd,
            Self::OrderStatus(_) => EventKind::OrderStatus,
            Self::OpenOrder(_) => EventKind::OpenOrder,
            Self::OpenOrderEnd => EventKind::OpenOrderEnd,
            Self::ExecutionDetails(_) => EventKind::ExecutionDetails,
            Self::CommissionReport(_) => EventKind::CommissionReport,
            Self::Position(_) => EventKind::Position,
            Self::PositionEnd => EventKind::PositionEnd,
            Self::ConnectionClosed => EventKind::ConnectionClosed,
            Self::Error { .. } => EventKind::Error,
            Self::Unrecognized { .. } => EventKind::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind() {
        assert_eq!(BrokerEvent::PositionEnd.kind(), EventKind::PositionEnd);
        let event = BrokerEvent::Error {
            id: -1,
            code: 2104,
            message: "Market data farm connection is OK".to_string(),
        };
        assert_eq!(event.kind(), EventKind::Error);
        assert_eq!(event.kind().as_str(), "error");
    }

    #[test]
    fn test_order_status_cancel_spellings() {
        let mut report = OrderStatusReport {
            order_id: OrderId::new(3),
            status: "ApiCanceled".to_string(),
            filled: 0,
            remaining: 10,
            avg_fill_price: None,
        };
        assert!(report.is_cancelled());
        report.status = "Cancelled".to_string();
        assert!(report.is_cancelled());
        report.status = "Inactive".to_string();
        assert!(!report.is_cancelled());
    }
}
