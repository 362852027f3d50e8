//! Session state shared by the dispatch thread, bar threads, and callers.
//!
//! Created on connect and torn down on disconnect. Every field sits behind
//! its own lock; callers only ever receive clones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::bridge::{Notifier, PendingRequests, RequestIds, request_and_wait};
use super::handlers::HandlerRegistry;
use super::ledger::OrderLedger;
use super::positions::PositionBook;
use super::reconciliation::ReconcileQueue;
use super::scheduler::RecurringTask;
use super::ticks::TickAccumulator;
use crate::config::SessionConfig;
use crate::domain::{
    Alert, Bar, BarKey, ContractDetails, Instrument, InstrumentId, InstrumentRef,
    Order, OrderId, select_contract,
};
use crate::error::SessionResult;
use crate::observability;
use crate::session::{BrokerSession, SessionCommand};

/// Connection status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No event has been received yet.
    NeverConnected,
    /// The broker is reachable.
    Connected,
    /// Connectivity was lost after having been established.
    Disconnected,
}

/// Account the session trades.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account code.
    pub account: Option<String>,
    /// Account type from the account summary (e.g. `INDIVIDUAL`).
    pub account_type: Option<String>,
}

/// Shared session state.
pub struct SessionState {
    pub(crate) config: SessionConfig,
    transport: Arc<dyn BrokerSession>,
    status: RwLock<ConnectionStatus>,
    account: RwLock<AccountInfo>,
    instruments: RwLock<HashMap<InstrumentId, Instrument>>,
    ticks: Mutex<HashMap<InstrumentId, TickAccumulator>>,
    subscription_gates: Mutex<HashMap<InstrumentId, Arc<Mutex<()>>>>,
    bar_tasks: Mutex<HashMap<BarKey, RecurringTask>>,
    position_updates: AtomicU64,
    pub(crate) ledger: OrderLedger,
    pub(crate) positions: PositionBook,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) request_ids: RequestIds,
    pub(crate) resolutions: PendingRequests<ContractDetails>,
    pub(crate) subscriptions: PendingRequests<()>,
    pub(crate) reconcile: ReconcileQueue,
    pub(crate) connected: Notifier<()>,
    pub(crate) open_orders_end: Notifier<()>,
    pub(crate) next_valid_id: Notifier<OrderId>,
}

impl SessionState {
    /// Fresh state over a transport.
    #[must_use]
    pub fn new(config: SessionConfig, transport: Arc<dyn BrokerSession>) -> Self {
        Self {
            config,
            transport,
            status: RwLock::new(ConnectionStatus::NeverConnected),
            account: RwLock::new(AccountInfo::default()),
            instruments: RwLock::new(HashMap::new()),
            ticks: Mutex::new(HashMap::new()),
            subscription_gates: Mutex::new(HashMap::new()),
            bar_tasks: Mutex::new(HashMap::new()),
            position_updates: AtomicU64::new(0),
            ledger: OrderLedger::new(),
            positions: PositionBook::new(),
            handlers: HandlerRegistry::new(),
            request_ids: RequestIds::new(),
            resolutions: PendingRequests::new("resolution"),
            subscriptions: PendingRequests::new("subscription"),
            reconcile: ReconcileQueue::new(),
            connected: Notifier::new(),
            open_orders_end: Notifier::new(),
            next_valid_id: Notifier::new(),
        }
    }

    /// Transmit a command.
    pub fn send(&self, command: SessionCommand) -> SessionResult<()> {
        tracing::trace!(transport = self.transport.name(), ?command, "Sending command");
        self.transport.send(command)
    }

    // ------------------------------------------------------------------
    // Connection and account
    // ------------------------------------------------------------------

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Returns true if the broker is reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Mark the session connected. Returns true on a transition.
    pub fn mark_connected(&self) -> bool {
        {
            let mut status = self.status.write();
            if *status == ConnectionStatus::Connected {
                return false;
            }
            *status = ConnectionStatus::Connected;
        }
        tracing::info!("Session connected");
        self.connected.notify(());
        true
    }

    /// Mark the session disconnected. Returns true on a transition.
    pub fn mark_disconnected(&self) -> bool {
        let mut status = self.status.write();
        if *status == ConnectionStatus::Connected {
            *status = ConnectionStatus::Disconnected;
            tracing::warn!("Session disconnected");
            true
        } else {
            false
        }
    }

    /// Account details.
    #[must_use]
    pub fn account(&self) -> AccountInfo {
        self.account.read().clone()
    }

    pub(crate) fn set_account(&self, account: String) {
        self.account.write().account = Some(account);
    }

    pub(crate) fn set_account_type(&self, account_type: String) {
        self.account.write().account_type = Some(account_type);
    }

    // ------------------------------------------------------------------
    // Instruments
    // ------------------------------------------------------------------

    /// Cached instrument by id.
    #[must_use]
    pub fn instrument(&self, id: InstrumentId) -> Option<Instrument> {
        self.instruments.read().get(&id).cloned()
    }

    /// Every cached instrument, ordered by id.
    #[must_use]
    pub fn instruments(&self) -> Vec<Instrument> {
        let mut instruments: Vec<Instrument> = self.instruments.read().values().cloned().collect();
        instruments.sort_by_key(Instrument::id);
        instruments
    }

    /// Returns true if the instrument is cached.
    #[must_use]
    pub fn knows_instrument(&self, id: InstrumentId) -> bool {
        self.instruments.read().contains_key(&id)
    }

    /// Cache an instrument and seed its position. Returns the cached copy,
    /// which is the earlier one if the id was already known.
    pub fn insert_instrument(&self, instrument: Instrument) -> Instrument {
        let cached = self
            .instruments
            .write()
            .entry(instrument.id())
            .or_insert(instrument)
            .clone();
        self.positions.seed(cached.id());
        cached
    }

    /// Resolve an instrument reference, querying the broker when needed.
    pub fn resolve(&self, instrument: InstrumentRef) -> SessionResult<Instrument> {
        let spec = match instrument {
            InstrumentRef::Resolved(instrument) => return Ok(self.insert_instrument(instrument)),
            InstrumentRef::Lookup(spec) => spec,
        };
        if let Some(cached) = spec.id.and_then(|id| self.instrument(id)) {
            return Ok(cached);
        }

        let request_id = self.request_ids.next();
        let query = spec.to_string();
        tracing::debug!(request_id = %request_id, query = %query, "Resolving instrument");

        let candidates = request_and_wait(
            &self.resolutions,
            request_id,
            self.config.timeouts.request,
            "resolve instrument",
            || {
                self.send(SessionCommand::RequestContractDetails {
                    request_id,
                    spec: spec.clone(),
                })
            },
        );
        self.accept_resolution(&query, candidates)
    }

    /// Turn collected candidates into a cached instrument.
    pub(crate) fn accept_resolution(
        &self,
        query: &str,
        candidates: SessionResult<Vec<ContractDetails>>,
    ) -> SessionResult<Instrument> {
        let result = candidates
            .and_then(|candidates| select_contract(query, candidates))
            .and_then(|details| Instrument::new(details.contract));
        match result {
            Ok(instrument) => {
                let instrument = self.insert_instrument(instrument);
                tracing::info!(query, instrument = %instrument, "Instrument resolved");
                Ok(instrument)
            }
            Err(error) => {
                observability::record_resolution_failure();
                tracing::warn!(query, error = %error, "Instrument resolution failed");
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Market data
    // ------------------------------------------------------------------

    /// Gate serializing market data handshakes for one instrument. Held
    /// across the handshake so concurrent subscribers see its outcome.
    pub(crate) fn subscription_gate(&self, id: InstrumentId) -> Arc<Mutex<()>> {
        Arc::clone(self.subscription_gates.lock().entry(id).or_default())
    }

    /// Create the instrument's accumulator. Returns false if it existed.
    pub fn ensure_accumulator(&self, id: InstrumentId) -> bool {
        let mut ticks = self.ticks.lock();
        if ticks.contains_key(&id) {
            return false;
        }
        ticks.insert(id, TickAccumulator::new(id));
        true
    }

    /// Drop the instrument's accumulator.
    pub fn remove_accumulator(&self, id: InstrumentId) -> bool {
        self.ticks.lock().remove(&id).is_some()
    }

    /// Returns true if the instrument is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, id: InstrumentId) -> bool {
        self.ticks.lock().contains_key(&id)
    }

    /// Run `f` against the instrument's accumulator, if it exists.
    pub fn with_accumulator<R>(
        &self,
        id: InstrumentId,
        f: impl FnOnce(&mut TickAccumulator) -> R,
    ) -> Option<R> {
        self.ticks.lock().get_mut(&id).map(f)
    }

    /// Current bar without resetting it.
    #[must_use]
    pub fn peek_bar(&self, id: InstrumentId) -> Option<Bar> {
        self.ticks.lock().get(&id).map(TickAccumulator::peek)
    }

    /// Take a bar and deliver it to the key's handlers.
    pub fn emit_bar(&self, key: &BarKey) {
        let handlers = self.handlers.bar_handlers(key);
        if handlers.is_empty() {
            return;
        }
        let Some(instrument) = self.instrument(key.instrument) else {
            return;
        };
        let Some(bar) = self.with_accumulator(key.instrument, TickAccumulator::bar) else {
            return;
        };
        tracing::trace!(bar_key = %key, close = ?bar.close, vwap = bar.vwap, "Bar");
        observability::record_bar_emitted();
        for handler in handlers {
            handler(&instrument, &bar);
        }
    }

    /// Start the bar task for `key` unless it is running.
    pub fn start_bar_task(self: &Arc<Self>, key: BarKey) -> SessionResult<()> {
        let mut tasks = self.bar_tasks.lock();
        if tasks.contains_key(&key) {
            return Ok(());
        }
        let state = Arc::downgrade(self);
        let task = RecurringTask::spawn(
            format!("bars-{}", key.instrument),
            key.size,
            self.config.bar_initial_delay,
            move || {
                if let Some(state) = state.upgrade() {
                    state.emit_bar(&key);
                }
            },
        )?;
        tasks.insert(key, task);
        Ok(())
    }

    /// Stop the bar task for `key`.
    pub fn stop_bar_task(&self, key: &BarKey) -> bool {
        self.bar_tasks
            .lock()
            .remove(key)
            .map(|task| task.stop())
            .is_some()
    }

    /// Stop every bar task.
    pub fn stop_bar_tasks(&self) -> usize {
        let tasks: Vec<_> = self.bar_tasks.lock().drain().collect();
        for (_, task) in &tasks {
            task.stop();
        }
        tasks.len()
    }

    // ------------------------------------------------------------------
    // Positions and handlers
    // ------------------------------------------------------------------

    pub(crate) fn record_position_update(&self) {
        self.position_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of position reports merged since the session started.
    #[must_use]
    pub fn position_updates(&self) -> u64 {
        self.position_updates.load(Ordering::Relaxed)
    }

    /// Invoke the order handlers of the order's instrument.
    pub fn notify_order(&self, order: &Order) {
        for handler in self.handlers.order_handlers(order.instrument.id()) {
            handler(order);
        }
    }

    /// Deliver an alert to one instrument's handlers.
    pub fn alert_instrument(&self, id: InstrumentId, alert: Alert) {
        let handlers = self.handlers.alert_handlers(id);
        if handlers.is_empty() {
            return;
        }
        let Some(instrument) = self.instrument(id) else {
            return;
        };
        for handler in handlers {
            handler(&instrument, alert);
        }
    }

    /// Deliver a session-wide alert to every alert handler.
    pub fn alert_all(&self, alert: Alert) {
        for (id, handler) in self.handlers.all_alert_handlers() {
            if let Some(instrument) = self.instrument(id) {
                handler(&instrument, alert);
            }
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("transport", &self.transport.name())
            .field("status", &self.status())
            .field("instruments", &self.instruments.read().len())
            .field("orders", &self.ledger.len())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Contract, SecurityType};
    use crate::session::PaperSession;
    use std::time::Duration;

    fn state() -> SessionState {
        let (events, _rx) = crate::session::event_channel();
        let transport = Arc::new(PaperSession::new(events));
        SessionState::new(
            SessionConfig::default().with_timeouts(Duration::from_millis(100)),
            transport,
        )
    }

    fn instrument(id: i64) -> Instrument {
        Instrument::new(Contract {
            id: InstrumentId::new(id),
            symbol: "ES".to_string(),
            security_type: SecurityType::Future,
            exchange: "CME".to_string(),
            currency: "USD".to_string(),
            expiry: Some("20270319".to_string()),
            strike: None,
            right: None,
            multiplier: None,
        })
        .unwrap()
    }

    #[test]
    fn test_status_transitions() {
        let state = state();
        assert_eq!(state.status(), ConnectionStatus::NeverConnected);
        assert!(!state.mark_disconnected());
        assert!(state.mark_connected());
        assert!(!state.mark_connected());
        assert!(state.mark_disconnected());
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_insert_instrument_seeds_position() {
        let state = state();
        let cached = state.insert_instrument(instrument(5));
        assert!(state.knows_instrument(cached.id()));
        assert!(state.positions.contains(cached.id()));
        assert_eq!(state.positions.cost(cached.id()), None);
    }

    #[test]
    fn test_resolved_ref_skips_lookup() {
        let state = state();
        let resolved = state.resolve(InstrumentRef::from(instrument(6))).unwrap();
        assert_eq!(resolved.id(), InstrumentId::new(6));
        let by_id = state.resolve(InstrumentRef::from(InstrumentId::new(6))).unwrap();
        assert_eq!(by_id, resolved);
    }

    #[test]
    fn test_accumulator_lifecycle() {
        let state = state();
        let id = InstrumentId::new(9);
        assert!(state.peek_bar(id).is_none());
        assert!(state.ensure_accumulator(id));
        assert!(!state.ensure_accumulator(id));
        assert!(state.is_subscribed(id));
        assert!(state.peek_bar(id).is_some());
        assert!(state.remove_accumulator(id));
        assert!(!state.is_subscribed(id));
    }
}
