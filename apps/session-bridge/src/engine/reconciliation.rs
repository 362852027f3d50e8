//! Position and order reconciliation.
//!
//! The dispatch thread cannot block on resolutions it would have to
//! deliver itself, so positions for unknown instruments only *start* a
//! resolution there and queue its slot. The reconciling thread drains the
//! queue up to the "positions end" sentinel and finishes each resolution.
//!
//! Position reports that arrive while a reconciliation runs overwrite the
//! book like any other; the result is eventually consistent.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::bridge::Slot;
use super::state::SessionState;
use crate::domain::{ContractDetails, InstrumentId, OrderId};
use crate::error::{SessionError, SessionResult};
use crate::observability;
use crate::session::SessionCommand;

/// Entry of the reconciliation queue.
#[derive(Debug)]
pub(crate) enum ReconcileItem {
    /// A resolution started for a position's unknown instrument.
    Pending {
        instrument: InstrumentId,
        query: String,
        slot: Slot<ContractDetails>,
    },
    /// The positions snapshot is complete.
    End,
}

/// Ordered hand-off from the dispatch thread to the reconciling thread.
#[derive(Debug)]
pub struct ReconcileQueue {
    tx: Sender<ReconcileItem>,
    rx: Receiver<ReconcileItem>,
    in_flight: Mutex<HashSet<InstrumentId>>,
    running: Mutex<()>,
}

impl Default for ReconcileQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            in_flight: Mutex::new(HashSet::new()),
            running: Mutex::new(()),
        }
    }

    /// Claim an instrument for resolution. Returns false if one is already
    /// in flight for it.
    pub fn claim(&self, instrument: InstrumentId) -> bool {
        self.in_flight.lock().insert(instrument)
    }

    /// Release a claim.
    pub fn release(&self, instrument: InstrumentId) {
        self.in_flight.lock().remove(&instrument);
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub(crate) fn push_pending(
        &self,
        instrument: InstrumentId,
        query: String,
        slot: Slot<ContractDetails>,
    ) {
        let _ = self.tx.send(ReconcileItem::Pending {
            instrument,
            query,
            slot,
        });
    }

    pub(crate) fn push_end(&self) {
        let _ = self.tx.send(ReconcileItem::End);
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Position reports merged while reconciling.
    pub positions_reported: u64,
    /// Instruments newly resolved from positions.
    pub instruments_resolved: usize,
    /// Position instruments that could not be resolved.
    pub resolution_failures: usize,
    /// Orders placed elsewhere that are now tracked locally.
    pub orders_materialized: u64,
    /// Order id counter after resynchronization.
    pub next_order_id: OrderId,
    /// Wall time spent.
    pub duration: Duration,
}

#[derive(Default)]
struct Tally {
    resolved: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, resolved: bool) {
        if resolved {
            self.resolved += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Bring positions, instruments, open orders, and the order id counter in
/// line with the broker.
///
/// Only one reconciliation runs at a time; a second caller waits for the
/// first to finish. Must not be called from the dispatch thread.
pub fn reconcile(state: &SessionState) -> SessionResult<ReconciliationReport> {
    let queue = &state.reconcile;
    let _running = queue.running.lock();
    let start = Instant::now();
    let positions_before = state.position_updates();
    let materialized_before = state.ledger.materialized();
    let timeouts = state.config.timeouts;
    let mut tally = Tally::default();

    // Entries left over from position updates outside a reconciliation, or
    // from an earlier run that gave up before its sentinel.
    while let Ok(item) = queue.rx.try_recv() {
        if let ReconcileItem::Pending {
            instrument,
            query,
            slot,
        } = item
        {
            tally.record(finish_resolution(state, instrument, &query, &slot));
        }
    }

    tracing::info!("Reconciling positions");
    state.send(SessionCommand::RequestPositions)?;
    loop {
        match queue.rx.recv_timeout(timeouts.request) {
            Ok(ReconcileItem::Pending {
                instrument,
                query,
                slot,
            }) => tally.record(finish_resolution(state, instrument, &query, &slot)),
            Ok(ReconcileItem::End) => break,
            Err(RecvTimeoutError::Timeout) => {
                observability::record_request_timeout("positions snapshot");
                return Err(SessionError::timeout("positions snapshot", timeouts.request));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(SessionError::Disconnected),
        }
    }

    tracing::info!("Reconciling open orders");
    let armed = state.open_orders_end.arm();
    if let Err(error) = state.send(SessionCommand::RequestAllOpenOrders) {
        state.open_orders_end.disarm();
        return Err(error);
    }
    if let Err(error) = armed.wait(timeouts.open_orders, "open orders snapshot") {
        state.open_orders_end.disarm();
        return Err(error);
    }

    let armed = state.next_valid_id.arm();
    state.send(SessionCommand::RequestNextValidId)?;
    if let Err(error) = armed.wait(timeouts.request, "next valid id") {
        state.next_valid_id.disarm();
        tracing::warn!(error = %error, "Order id counter not resynchronized");
    }

    let report = ReconciliationReport {
        positions_reported: state.position_updates() - positions_before,
        instruments_resolved: tally.resolved,
        resolution_failures: tally.failed,
        orders_materialized: state.ledger.materialized() - materialized_before,
        next_order_id: state.ledger.peek_next_id(),
        duration: start.elapsed(),
    };
    tracing::info!(
        positions = report.positions_reported,
        resolved = report.instruments_resolved,
        failures = report.resolution_failures,
        materialized = report.orders_materialized,
        next_order_id = %report.next_order_id,
        duration_ms = report.duration.as_millis(),
        "Reconciliation complete"
    );
    Ok(report)
}

fn finish_resolution(
    state: &SessionState,
    instrument: InstrumentId,
    query: &str,
    slot: &Slot<ContractDetails>,
) -> bool {
    let candidates = slot.collect(state.config.timeouts.request, "resolve position instrument");
    if candidates.is_err() {
        state.resolutions.cancel(slot.id());
    }
    let resolved = state.accept_resolution(query, candidates).is_ok();
    state.reconcile.release(instrument);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RequestId;
    use crate::engine::bridge::PendingRequests;

    #[test]
    fn test_claim_is_exclusive() {
        let queue = ReconcileQueue::new();
        let id = InstrumentId::new(11);
        assert!(queue.claim(id));
        assert!(!queue.claim(id));
        queue.release(id);
        assert!(queue.claim(id));
    }

    #[test]
    fn test_queue_preserves_order() {
        let queue = ReconcileQueue::new();
        let pending = PendingRequests::<ContractDetails>::new("test");
        let slot = pending.open(RequestId::new(1)).unwrap();
        queue.push_pending(InstrumentId::new(1), "contract 1".to_string(), slot);
        queue.push_end();
        assert_eq!(queue.len(), 2);
        assert!(matches!(
            queue.rx.try_recv(),
            Ok(ReconcileItem::Pending { .. })
        ));
        assert!(matches!(queue.rx.try_recv(), Ok(ReconcileItem::End)));
        assert!(queue.is_empty());
    }
}
