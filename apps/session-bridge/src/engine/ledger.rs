//! Order ledger.
//!
//! Holds every order the session knows about and merges broker
//! notifications into them. Merge methods return a snapshot when the
//! change should be reported to order handlers; the caller invokes the
//! handlers after the ledger lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::domain::{Instrument, InstrumentId, Order, OrderId};
use crate::observability;
use crate::session::{CommissionReport, ExecutionReport, OpenOrderReport, OrderStatusReport};

/// Result of merging an open-order report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrderMerge {
    /// Order after the merge.
    pub order: Order,
    /// The order was unknown and has been created from the report.
    pub materialized: bool,
    /// The merge moved the order to a terminal state.
    pub notify: bool,
}

/// Local order records and the order id counter.
#[derive(Debug)]
pub struct OrderLedger {
    orders: RwLock<HashMap<OrderId, Order>>,
    executions: RwLock<HashMap<String, OrderId>>,
    next_id: Mutex<i64>,
    materialized: AtomicU64,
}

impl Default for OrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderLedger {
    /// Empty ledger; ids start at 1 until the broker reports otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            next_id: Mutex::new(1),
            materialized: AtomicU64::new(0),
        }
    }

    /// Take the next order id.
    pub fn allocate_id(&self) -> OrderId {
        let mut next = self.next_id.lock();
        let id = OrderId::new(*next);
        *next += 1;
        id
    }

    /// Next id that [`allocate_id`](Self::allocate_id) would return.
    #[must_use]
    pub fn peek_next_id(&self) -> OrderId {
        OrderId::new(*self.next_id.lock())
    }

    /// Advance the counter to the broker's next valid id.
    ///
    /// The counter never moves backwards; a lower id is logged and ignored.
    pub fn observe_next_valid_id(&self, id: OrderId) -> bool {
        let mut next = self.next_id.lock();
        if id.value() >= *next {
            *next = id.value();
            true
        } else {
            tracing::warn!(
                reported = %id,
                current = *next,
                "Next valid id is below the local counter"
            );
            false
        }
    }

    /// Insert a freshly placed order.
    pub fn insert(&self, order: Order) {
        self.orders.write().insert(order.id, order);
    }

    /// Snapshot of one order.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.read().get(&id).cloned()
    }

    /// Number of orders tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    /// Returns true if no orders are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// Number of orders created from open-order reports so far.
    #[must_use]
    pub fn materialized(&self) -> u64 {
        self.materialized.load(Ordering::Relaxed)
    }

    /// Open orders, optionally for one instrument, in id order.
    #[must_use]
    pub fn open_orders(&self, instrument: Option<InstrumentId>) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| o.open && instrument.is_none_or(|id| o.instrument.id() == id))
            .cloned()
            .collect();
        open.sort_by_key(|o| o.id);
        open
    }

    /// Merge an order status notification.
    pub fn apply_status(&self, report: &OrderStatusReport) -> Option<Order> {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(&report.order_id) else {
            tracing::error!(order_id = %report.order_id, "Order status for unknown order");
            return None;
        };

        if report.is_cancelled() {
            if order.apply_cancel() {
                tracing::info!(order_id = %order.id, instrument = %order.instrument, "Order cancelled");
                return Some(order.clone());
            }
            observability::record_duplicate_suppressed("cancel");
            return None;
        }

        let outcome = order.apply_fill(report.filled, report.avg_fill_price, chrono::Utc::now());
        if outcome.accepted() {
            observability::record_fill_accepted();
            tracing::debug!(
                order_id = %order.id,
                filled = order.filled,
                quantity = order.quantity,
                "Fill merged from status"
            );
            Some(order.clone())
        } else {
            if report.filled > 0 {
                observability::record_duplicate_suppressed("fill");
            }
            None
        }
    }

    /// Merge an execution. Records the execution id for commission
    /// correlation; never reports to handlers itself.
    pub fn apply_execution(&self, report: &ExecutionReport) {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(&report.order_id) else {
            tracing::error!(order_id = %report.order_id, exec_id = %report.exec_id, "Execution for unknown order");
            return;
        };

        self.executions
            .write()
            .insert(report.exec_id.clone(), report.order_id);

        tracing::info!(
            order_id = %order.id,
            symbol = order.instrument.symbol(),
            shares = report.shares,
            price = %report.price,
            cumulative = report.cumulative,
            "Execution"
        );

        if order
            .apply_fill(report.cumulative, Some(report.avg_price), report.time)
            .accepted()
        {
            observability::record_fill_accepted();
        }
    }

    /// Merge a commission report into the order of its execution.
    pub fn apply_commission(&self, report: &CommissionReport) -> Option<Order> {
        let order_id = self.executions.read().get(&report.exec_id).copied();
        let Some(order_id) = order_id else {
            tracing::error!(exec_id = %report.exec_id, "Commission for unknown execution");
            return None;
        };

        let mut orders = self.orders.write();
        let order = orders.get_mut(&order_id)?;
        if !order.accrue(report.commission, report.realized_pnl) {
            tracing::debug!(
                order_id = %order.id,
                commission = %report.commission,
                "Ignoring implausible commission report"
            );
        }
        Some(order.clone())
    }

    /// Merge an open-order report, creating the order if it is unknown.
    ///
    /// `instrument` is used only when the order has to be created.
    pub fn apply_open_order(
        &self,
        report: &OpenOrderReport,
        instrument: Instrument,
    ) -> OpenOrderMerge {
        let mut orders = self.orders.write();
        let materialized = !orders.contains_key(&report.order_id);
        let order = orders.entry(report.order_id).or_insert_with(|| {
            self.materialized.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                order_id = %report.order_id,
                instrument = %instrument,
                quantity = report.quantity,
                "Materializing order placed elsewhere"
            );
            Order::new(
                report.order_id,
                instrument,
                report.quantity,
                report.limit_price,
                report.stop_price,
            )
        });

        let notify = match report.status.as_str() {
            "Cancelled" | "ApiCanceled" => order.apply_cancel(),
            "Filled" => {
                let complete = order.open && !order.cancelled;
                if complete {
                    order.apply_fill(order.quantity.abs(), None, chrono::Utc::now());
                    tracing::info!(order_id = %order.id, avg_price = ?order.avg_fill_price, "Order complete");
                }
                complete
            }
            _ => false,
        };

        if let Some(warning) = report.warning.as_deref().filter(|w| !w.is_empty()) {
            tracing::warn!(order_id = %order.id, warning, "Order warning");
            order.message = Some(warning.to_string());
        }

        OpenOrderMerge {
            order: order.clone(),
            materialized,
            notify,
        }
    }

    /// Merge an order-related broker error. Reports whenever the order is
    /// known.
    pub fn apply_error(&self, order_id: OrderId, code: i32, message: &str) -> Option<Order> {
        let mut orders = self.orders.write();
        let order = orders.get_mut(&order_id)?;
        order.apply_error(message);
        tracing::error!(order_id = %order.id, code, message, state = ?order.state(), "Order error");
        Some(order.clone())
    }
}
