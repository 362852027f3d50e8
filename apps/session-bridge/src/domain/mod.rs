//! Domain types shared by the engine and the public API.

mod identifiers;
mod instrument;
mod market_data;
mod order;

pub use identifiers::{InstrumentId, OrderId, RequestId};
pub use instrument::{
    Contract, ContractDetails, ContractSpec, Instrument, InstrumentRef, OptionRight,
    SecurityType, select_contract,
};
pub use market_data::{Alert, Bar, BarKey, BarType, GENERIC_TICKS, Quote, TickField};
pub use order::{Action, FillOutcome, IMPLAUSIBLE_AMOUNT, Order, OrderState, OrderType};
