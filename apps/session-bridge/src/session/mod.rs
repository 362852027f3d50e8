//! Broker session port.
//!
//! The transport is opaque to the rest of the crate: it accepts typed
//! [`SessionCommand`]s and produces typed [`BrokerEvent`]s on a channel,
//! in the order the broker delivered them.

mod commands;
mod events;
mod paper;

use crossbeam_channel::{Receiver, Sender};

pub use commands::{ACCOUNT_SUMMARY_TAGS, OrderTicket, SessionCommand, TIME_IN_FORCE};
pub use events::{
    BrokerEvent, CommissionReport, EventKind, ExecutionReport, OpenOrderReport,
    OrderStatusReport, PositionReport,
};
pub use paper::{PaperConfig, PaperSession};

use crate::error::SessionResult;

/// Sink for commands to the broker.
///
/// Implementations must not deliver events synchronously from inside
/// [`send`](BrokerSession::send); replies go out on the event channel.
pub trait BrokerSession: Send + Sync {
    /// Transmit one command.
    fn send(&self, command: SessionCommand) -> SessionResult<()>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// Producer half of a session's event stream.
pub type EventSender = Sender<BrokerEvent>;

/// Consumer half of a session's event stream.
pub type EventReceiver = Receiver<BrokerEvent>;

/// Create an unbounded event channel.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
