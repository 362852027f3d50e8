//! Typed commands issued to the broker session.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Action, Contract, ContractSpec, InstrumentId, Order, OrderId, OrderType, RequestId,
};

/// Time in force for every order placed through the session.
pub const TIME_IN_FORCE: &str = "DAY";

/// Account summary tags requested at connect.
pub const ACCOUNT_SUMMARY_TAGS: &str = "AccountType";

/// Everything needed to transmit an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    /// Order id.
    pub order_id: OrderId,
    /// Contract to trade.
    pub contract: Contract,
    /// Buy or sell.
    pub action: Action,
    /// Unsigned quantity.
    pub quantity: u64,
    /// Market, limit, stop, or stop-limit.
    pub order_type: OrderType,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop (aux) price.
    pub stop_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: String,
}

impl From<&Order> for OrderTicket {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            contract: order.instrument.contract().clone(),
            action: order.action(),
            quantity: order.quantity.unsigned_abs(),
            order_type: order.order_type(),
            limit_price: order.limit_price,
            stop_price: order.stop_price,
            time_in_force: TIME_IN_FORCE.to_string(),
        }
    }
}

/// Command sent to the broker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    /// Open the session.
    Connect {
        /// Gateway host.
        host: String,
        /// Gateway port.
        port: u16,
        /// Client id.
        client_id: i32,
    },
    /// Close the session.
    Disconnect,
    /// Subscribe to account summary values.
    RequestAccountSummary {
        /// Correlation id.
        request_id: RequestId,
        /// Comma-separated tags.
        tags: String,
    },
    /// Resolve a contract.
    RequestContractDetails {
        /// Correlation id.
        request_id: RequestId,
        /// Lookup parameters.
        spec: ContractSpec,
    },
    /// Start streaming ticks for a contract.
    RequestMarketData {
        /// Ticker id (the contract id).
        ticker_id: InstrumentId,
        /// Contract to stream.
        contract: Contract,
        /// Generic tick list.
        generic_ticks: String,
    },
    /// Stop streaming ticks.
    CancelMarketData {
        /// Ticker id.
        ticker_id: InstrumentId,
    },
    /// Transmit an order.
    PlaceOrder(OrderTicket),
    /// Cancel one order.
    CancelOrder {
        /// Order id.
        order_id: OrderId,
    },
    /// Cancel every open order of the account, from any client.
    GlobalCancel,
    /// Request a positions snapshot.
    RequestPositions,
    /// Request an open-orders snapshot across all clients.
    RequestAllOpenOrders,
    /// Request a fresh next valid order id.
    RequestNextValidId,
}
