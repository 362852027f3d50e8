//! Order record and its merge rules.
//!
//! Broker notifications are merged into an [`Order`] idempotently:
//!
//! ```text
//! Open ──fill (cumulative == quantity)──► Filled
//!   │
//!   └──cancel / order error─────────────► Cancelled
//! ```
//!
//! `Filled` and `Cancelled` are terminal and mutually exclusive; whichever
//! is reached first wins. `filled` carries the sign of `quantity` and its
//! magnitude never decreases.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Instrument, OrderId};

/// Commission or realized P&L at or above this magnitude is treated as the
/// broker's "unset" marker and ignored.
pub const IMPLAUSIBLE_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// Working at the broker.
    Open,
    /// Completely filled.
    Filled,
    /// Cancelled or rejected.
    Cancelled,
}

impl OrderState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }
}

/// Buy or sell, derived from the sign of the quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Positive quantity.
    Buy,
    /// Negative quantity.
    Sell,
}

impl Action {
    /// Wire code for the action.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Order type, chosen by which prices are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// No prices.
    Market,
    /// Limit price only.
    Limit,
    /// Stop price only.
    Stop,
    /// Both prices.
    StopLimit,
}

impl OrderType {
    /// Pick the order type from the optional prices.
    #[must_use]
    pub const fn from_prices(limit: Option<Decimal>, stop: Option<Decimal>) -> Self {
        match (limit.is_some(), stop.is_some()) {
            (false, false) => Self::Market,
            (true, false) => Self::Limit,
            (false, true) => Self::Stop,
            (true, true) => Self::StopLimit,
        }
    }

    /// Wire code for the order type.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Market => "MKT",
            Self::Limit => "LMT",
            Self::Stop => "STP",
            Self::StopLimit => "STP LMT",
        }
    }
}

/// Result of merging a fill notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Not an advance over the current fill; nothing changed.
    Ignored,
    /// Fill advanced, order still open.
    Partial,
    /// Fill advanced and completed the order.
    Completed,
}

impl FillOutcome {
    /// Returns true if the order changed.
    #[must_use]
    pub const fn accepted(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// A local order record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Locally assigned id.
    pub id: OrderId,
    /// Traded instrument.
    pub instrument: Instrument,
    /// Signed quantity: positive buys, negative sells.
    pub quantity: i64,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Signed filled quantity, same sign as `quantity`.
    pub filled: i64,
    /// Average fill price.
    pub avg_fill_price: Option<Decimal>,
    /// Accumulated commission.
    pub commission: Decimal,
    /// Accumulated realized P&L.
    pub realized_pnl: Decimal,
    /// Working at the broker.
    pub open: bool,
    /// Cancelled or rejected.
    pub cancelled: bool,
    /// When the order was placed or first seen.
    pub opened_at: DateTime<Utc>,
    /// Last fill time.
    pub filled_at: Option<DateTime<Utc>>,
    /// Last broker message (rejection reason or warning).
    pub message: Option<String>,
}

impl Order {
    /// Create an open order with nothing filled.
    #[must_use]
    pub fn new(
        id: OrderId,
        instrument: Instrument,
        quantity: i64,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Self {
        Self {
            id,
            instrument,
            quantity,
            limit_price,
            stop_price,
            filled: 0,
            avg_fill_price: None,
            commission: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            open: true,
            cancelled: false,
            opened_at: Utc::now(),
            filled_at: None,
            message: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> OrderState {
        if self.cancelled {
            OrderState::Cancelled
        } else if self.open {
            OrderState::Open
        } else {
            OrderState::Filled
        }
    }

    /// Buy or sell.
    #[must_use]
    pub const fn action(&self) -> Action {
        if self.quantity < 0 {
            Action::Sell
        } else {
            Action::Buy
        }
    }

    /// Order type from the prices.
    #[must_use]
    pub const fn order_type(&self) -> OrderType {
        OrderType::from_prices(self.limit_price, self.stop_price)
    }

    /// Signed quantity still unfilled.
    #[must_use]
    pub const fn remaining(&self) -> i64 {
        self.quantity - self.filled
    }

    /// Merge a cumulative fill.
    ///
    /// `cumulative` is a magnitude; it is accepted only when it strictly
    /// exceeds the current filled magnitude and the order is not cancelled.
    /// Values beyond the order size are clamped.
    pub fn apply_fill(
        &mut self,
        cumulative: i64,
        avg_price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> FillOutcome {
        let cumulative = cumulative.abs();
        if self.cancelled || cumulative <= self.filled.abs() {
            return FillOutcome::Ignored;
        }

        let size = self.quantity.abs();
        let magnitude = if cumulative > size {
            tracing::warn!(
                order_id = %self.id,
                cumulative,
                quantity = self.quantity,
                "Fill exceeds order size, clamping"
            );
            size
        } else {
            cumulative
        };
        if magnitude <= self.filled.abs() {
            return FillOutcome::Ignored;
        }

        self.filled = if self.quantity < 0 {
            -magnitude
        } else {
            magnitude
        };
        if avg_price.is_some() {
            self.avg_fill_price = avg_price;
        }
        self.filled_at = Some(at);

        if self.filled == self.quantity {
            self.open = false;
            FillOutcome::Completed
        } else {
            FillOutcome::Partial
        }
    }

    /// Merge a cancel. Returns true only on the first transition.
    pub fn apply_cancel(&mut self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.cancelled = true;
        self.open = false;
        true
    }

    /// Merge an order-related broker error.
    ///
    /// An order that already filled keeps its state and only records the
    /// message. Returns true if the order moved to `Cancelled`.
    pub fn apply_error(&mut self, message: impl Into<String>) -> bool {
        self.message = Some(message.into());
        if self.state() == OrderState::Filled {
            return false;
        }
        self.cancelled = true;
        self.open = false;
        true
    }

    /// Accrue commission and realized P&L from one execution.
    ///
    /// Each amount is accrued only when plausible: commission in
    /// `[0, 1_000_000)` and P&L with magnitude below `1_000_000`. Returns
    /// true if either amount was accrued.
    pub fn accrue(&mut self, commission: Decimal, realized_pnl: Option<Decimal>) -> bool {
        let mut accrued = false;
        if commission >= Decimal::ZERO && commission < IMPLAUSIBLE_AMOUNT {
            self.commission += commission;
            accrued = true;
        }
        if let Some(pnl) = realized_pnl.filter(|p| p.abs() < IMPLAUSIBLE_AMOUNT) {
            self.realized_pnl += pnl;
            accrued = true;
        }
        accrued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Contract, InstrumentId, SecurityType};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn instrument() -> Instrument {
        Instrument::new(Contract {
            id: InstrumentId::new(265_598),
            symbol: "AAPL".to_string(),
            security_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            expiry: None,
            strike: None,
            right: None,
            multiplier: None,
        })
        .unwrap()
    }

    fn order(quantity: i64) -> Order {
        Order::new(OrderId::new(1), instrument(), quantity, None, None)
    }

    #[test_case(None, None, OrderType::Market ; "market")]
    #[test_case(Some(dec!(10)), None, OrderType::Limit ; "limit")]
    #[test_case(None, Some(dec!(9)), OrderType::Stop ; "stop")]
    #[test_case(Some(dec!(10)), Some(dec!(9)), OrderType::StopLimit ; "stop limit")]
    fn test_order_type_from_prices(
        limit: Option<Decimal>,
        stop: Option<Decimal>,
        expected: OrderType,
    ) {
        assert_eq!(OrderType::from_prices(limit, stop), expected);
    }

    #[test]
    fn test_sell_fill_is_sign_corrected() {
        let mut o = order(-100);
        assert_eq!(o.action(), Action::Sell);
        assert_eq!(
            o.apply_fill(40, Some(dec!(10)), Utc::now()),
            FillOutcome::Partial
        );
        assert_eq!(o.filled, -40);
        assert_eq!(o.remaining(), -60);
        assert_eq!(
            o.apply_fill(100, Some(dec!(10.5)), Utc::now()),
            FillOutcome::Completed
        );
        assert_eq!(o.state(), OrderState::Filled);
        assert_eq!(o.avg_fill_price, Some(dec!(10.5)));
    }

    #[test]
    fn test_duplicate_fill_is_ignored() {
        let mut o = order(100);
        assert!(o.apply_fill(50, Some(dec!(10)), Utc::now()).accepted());
        let snapshot = o.clone();
        assert_eq!(
            o.apply_fill(50, Some(dec!(10)), Utc::now()),
            FillOutcome::Ignored
        );
        assert_eq!(o, snapshot);
    }

    #[test]
    fn test_overfill_is_clamped() {
        let mut o = order(10);
        assert_eq!(o.apply_fill(12, None, Utc::now()), FillOutcome::Completed);
        assert_eq!(o.filled, 10);
    }

    #[test]
    fn test_cancel_is_reported_once() {
        let mut o = order(10);
        assert!(o.apply_cancel());
        assert!(!o.apply_cancel());
        assert_eq!(o.state(), OrderState::Cancelled);
        assert!(!o.apply_fill(5, None, Utc::now()).accepted());
    }

    #[test]
    fn test_cancel_after_fill_keeps_filled() {
        let mut o = order(10);
        o.apply_fill(10, None, Utc::now());
        assert!(!o.apply_cancel());
        assert_eq!(o.state(), OrderState::Filled);
    }

    #[test]
    fn test_error_cancels_open_order() {
        let mut o = order(10);
        assert!(o.apply_error("Order rejected"));
        assert_eq!(o.state(), OrderState::Cancelled);
        assert_eq!(o.message.as_deref(), Some("Order rejected"));
    }

    #[test]
    fn test_error_on_filled_order_only_records_message() {
        let mut o = order(10);
        o.apply_fill(10, None, Utc::now());
        assert!(!o.apply_error("late warning"));
        assert_eq!(o.state(), OrderState::Filled);
        assert_eq!(o.message.as_deref(), Some("late warning"));
    }

    #[test]
    fn test_accrue_bounds() {
        let mut o = order(10);
        assert!(o.accrue(dec!(1.25), Some(dec!(30))));
        assert!(!o.accrue(dec!(-1), None));
        assert!(!o.accrue(IMPLAUSIBLE_AMOUNT, Some(dec!(10000000))));
        assert!(o.accrue(IMPLAUSIBLE_AMOUNT, Some(dec!(-5))));
        assert!(o.accrue(dec!(0.75), None));
        assert_eq!(o.commission, dec!(2.00));
        assert_eq!(o.realized_pnl, dec!(25));
    }

    proptest! {
        #[test]
        fn prop_filled_is_monotonic_and_bounded(
            quantity in prop_oneof![1i64..500, -500i64..-1],
            mut steps in proptest::collection::vec(0i64..600, 1..20),
        ) {
            steps.sort_unstable();
            let mut o = order(quantity);
            let mut last = 0;
            for cumulative in steps {
                o.apply_fill(cumulative, None, Utc::now());
                prop_assert!(o.filled.abs() >= last);
                prop_assert!(o.filled.abs() <= quantity.abs());
                prop_assert!(o.filled == 0 || o.filled.signum() == quantity.signum());
                last = o.filled.abs();
            }
        }
    }
}
