//! Session engine.
//!
//! Everything between the broker event stream and the public trading API:
//! event dispatch, request/response correlation, the order ledger, the
//! position book, tick aggregation, and recurring bar tasks.

pub mod bridge;
pub mod classifier;
pub mod dispatcher;
pub mod handlers;
pub mod ledger;
pub mod positions;
pub mod reconciliation;
pub mod scheduler;
pub mod state;
pub mod ticks;

pub use bridge::{Notifier, PendingRequests, RequestIds, Slot, SlotMessage, request_and_wait};
pub use classifier::{ErrorClass, classify};
pub use dispatcher::{Dispatcher, EventPump};
pub use handlers::{
    AlertHandler, BarHandler, HandlerId, HandlerRegistry, Handlers, OrderHandler, QuoteHandler,
    Registration,
};
pub use ledger::{OpenOrderMerge, OrderLedger};
pub use positions::{Position, PositionBook};
pub use reconciliation::{ReconcileQueue, ReconciliationReport, reconcile};
pub use scheduler::RecurringTask;
pub use state::{AccountInfo, ConnectionStatus, SessionState};
pub use ticks::{QuoteField, RtVolume, TickAccumulator, TickError};
