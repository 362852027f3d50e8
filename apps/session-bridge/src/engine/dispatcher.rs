//! Broker event dispatcher.
//!
//! Consumes the session's event stream on a single thread and merges it
//! into [`SessionState`]:
//!
//! ```text
//! BrokerSession ──> EventReceiver ──> EventPump ──> Dispatcher ──> SessionState
//!                                                       └──> user handlers
//! ```
//!
//! Events are handled strictly in delivery order. User handlers run on the
//! pump thread and must not block on the session.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::classifier::{ErrorClass, classify};
use super::state::SessionState;
use super::ticks::{QuoteField, RtVolume, TickAccumulator, TickError};
use crate::domain::{
    Alert, ContractSpec, Instrument, InstrumentId, OrderId, RequestId, TickField,
};
use crate::error::{SessionError, SessionResult};
use crate::observability;
use crate::session::{BrokerEvent, EventKind, EventReceiver, PositionReport, SessionCommand};

type Handler = fn(&Dispatcher, BrokerEvent);

/// Routes each broker event to its handler.
pub struct Dispatcher {
    state: Arc<SessionState>,
    table: HashMap<EventKind, Handler>,
    counts: Mutex<BTreeMap<EventKind, u64>>,
}

impl Dispatcher {
    /// Dispatcher over a session state.
    #[must_use]
    pub fn new(state: Arc<SessionState>) -> Self {
        let entries: [(EventKind, Handler); 19] = [
            (EventKind::ConnectionEstablished, Self::on_connection_established),
            (EventKind::ManagedAccounts, Self::on_managed_accounts),
            (EventKind::AccountSummary, Self::on_account_summary),
            (EventKind::TickPrice, Self::on_tick_price),
            (EventKind::TickSize, Self::on_tick_size),
            (EventKind::TickString, Self::on_tick_string),
            (EventKind::TickGeneric, Self::on_tick_generic),
            (EventKind::NextValidId, Self::on_next_valid_id),
            (EventKind::ContractDetails, Self::on_contract_details),
            (EventKind::ContractDetailsEnd, Self::on_contract_details_end),
            (EventKind::OrderStatus, Self::on_order_status),
            (EventKind::OpenOrder, Self::on_open_order),
            (EventKind::OpenOrderEnd, Self::on_open_order_end),
            (EventKind::ExecutionDetails, Self::on_execution),
            (EventKind::CommissionReport, Self::on_commission),
            (EventKind::Position, Self::on_position),
            (EventKind::PositionEnd, Self::on_position_end),
            (EventKind::ConnectionClosed, Self::on_connection_closed),
            (EventKind::Error, Self::on_error),
        ];
        Self {
            state,
            table: entries.into_iter().collect(),
            counts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Shared state this dispatcher writes to.
    #[must_use]
    pub const fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Handle one event.
    pub fn dispatch(&self, event: BrokerEvent) {
        let kind = event.kind();
        trace!(kind = kind.as_str(), ?event, "Event");
        observability::record_event(kind);
        *self.counts.lock().entry(kind).or_default() += 1;

        if !matches!(kind, EventKind::Error | EventKind::ConnectionClosed) {
            self.state.mark_connected();
        }

        let handler = self.table.get(&kind).copied().unwrap_or(Self::on_unhandled);
        handler(self, event);
    }

    /// Events handled so far, by kind.
    #[must_use]
    pub fn event_counts(&self) -> BTreeMap<EventKind, u64> {
        self.counts.lock().clone()
    }

    fn on_unhandled(&self, event: BrokerEvent) {
        debug!(kind = event.kind().as_str(), ?event, "Unhandled event");
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn on_connection_established(&self, _event: BrokerEvent) {
        info!("Broker session established");
    }

    fn on_managed_accounts(&self, event: BrokerEvent) {
        let BrokerEvent::ManagedAccounts { accounts } = event else {
            return;
        };
        let Some(first) = accounts.first() else {
            warn!("Managed accounts list is empty");
            return;
        };
        if accounts.len() > 1 {
            error!(?accounts, "Multiple accounts are not supported, using the first");
        }
        self.state.set_account(first.clone());
        self.log_account();
    }

    fn on_account_summary(&self, event: BrokerEvent) {
        let BrokerEvent::AccountSummary { tag, value, .. } = event else {
            return;
        };
        if tag == "AccountType" {
            self.state.set_account_type(value);
            self.log_account();
        } else {
            debug!(tag = %tag, value = %value, "Account summary value");
        }
    }

    fn log_account(&self) {
        let account = self.state.account();
        if let (Some(code), Some(kind)) = (&account.account, &account.account_type) {
            info!(account = %code, account_type = %kind, "Account");
        }
    }

    fn on_connection_closed(&self, _event: BrokerEvent) {
        self.state.mark_disconnected();
        warn!("Broker connection closed");
        self.state.alert_all(Alert::ConnectionClosed);
    }

    fn on_next_valid_id(&self, event: BrokerEvent) {
        let BrokerEvent::NextValidId { order_id } = event else {
            return;
        };
        debug!(order_id = %order_id, "Next valid order id");
        self.state.ledger.observe_next_valid_id(order_id);
        self.state.next_valid_id.notify(order_id);
    }

    // ========================================================================
    // Market Data
    // ========================================================================

    fn on_tick_price(&self, event: BrokerEvent) {
        let BrokerEvent::TickPrice {
            instrument,
            tick_type,
            price,
        } = event
        else {
            return;
        };
        let field = match TickField::from_code(tick_type) {
            Some(TickField::Bid) => QuoteField::Bid,
            Some(TickField::Ask) => QuoteField::Ask,
            Some(TickField::Last) => QuoteField::Last,
            _ => {
                trace!(instrument = %instrument, tick_type, "Ignoring price tick");
                return;
            }
        };
        self.apply_tick(instrument, |acc| acc.add(field, price));
    }

    fn on_tick_size(&self, event: BrokerEvent) {
        let BrokerEvent::TickSize {
            instrument,
            tick_type,
            size,
        } = event
        else {
            return;
        };
        // Daily volume comes from real-time volume ticks; the size tick
        // prints rarely and lags.
        let field = match TickField::from_code(tick_type) {
            Some(TickField::BidSize) => QuoteField::BidSize,
            Some(TickField::AskSize) => QuoteField::AskSize,
            Some(TickField::LastSize) => QuoteField::LastSize,
            Some(TickField::FuturesOpenInterest) => QuoteField::OpenInterest,
            _ => {
                trace!(instrument = %instrument, tick_type, "Ignoring size tick");
                return;
            }
        };
        self.apply_tick(instrument, |acc| acc.add(field, size));
    }

    fn on_tick_string(&self, event: BrokerEvent) {
        let BrokerEvent::TickString {
            instrument,
            tick_type,
            value,
        } = event
        else {
            return;
        };
        match TickField::from_code(tick_type) {
            Some(TickField::LastTimestamp) => {
                let Ok(seconds) = value.trim().parse::<f64>() else {
                    warn!(instrument = %instrument, value = %value, "Unparsable last trade time");
                    return;
                };
                self.apply_tick(instrument, |acc| acc.add(QuoteField::LastTime, seconds));
            }
            Some(TickField::RtVolume) => {
                let rt = match value.parse::<RtVolume>() {
                    Ok(rt) => rt,
                    Err(err) => {
                        warn!(instrument = %instrument, error = %err, "Dropping tick");
                        return;
                    }
                };
                self.apply_tick(instrument, |acc| apply_rt_volume(acc, &rt));
            }
            _ => trace!(instrument = %instrument, tick_type, "Ignoring string tick"),
        }
    }

    fn on_tick_generic(&self, event: BrokerEvent) {
        let BrokerEvent::TickGeneric {
            instrument,
            tick_type,
            value,
        } = event
        else {
            return;
        };
        if TickField::from_code(tick_type) != Some(TickField::Halted) {
            trace!(instrument = %instrument, tick_type, "Ignoring generic tick");
            return;
        }
        let alert = if value == 0.0 { Alert::Unhalt } else { Alert::Halt };
        info!(instrument = %instrument, %alert, "Trading status");
        self.state.alert_instrument(instrument, alert);
    }

    /// Feed the instrument's accumulator, complete a pending subscription
    /// handshake, and publish the quote.
    fn apply_tick<F>(&self, instrument: InstrumentId, update: F)
    where
        F: FnOnce(&mut TickAccumulator) -> Result<(), TickError>,
    {
        let applied = self.state.with_accumulator(instrument, |acc| {
            update(acc).map(|()| acc.quote())
        });
        let quote = match applied {
            None => {
                warn!(instrument = %instrument, "Tick for instrument without subscription");
                return;
            }
            Some(Err(err)) => {
                warn!(instrument = %instrument, error = %err, "Dropping tick");
                return;
            }
            Some(Ok(quote)) => quote,
        };

        self.state
            .subscriptions
            .finish(RequestId::new(instrument.value()));

        let handlers = self.state.handlers.quote_handlers(instrument);
        if handlers.is_empty() {
            return;
        }
        let Some(resolved) = self.state.instrument(instrument) else {
            return;
        };
        for handler in handlers {
            handler(&resolved, &quote);
        }
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    fn on_contract_details(&self, event: BrokerEvent) {
        let BrokerEvent::ContractDetails {
            request_id,
            details,
        } = event
        else {
            return;
        };
        debug!(request_id = %request_id, contract = %details.contract.id, "Contract details");
        if !self.state.resolutions.deliver(request_id, details) {
            error!(request_id = %request_id, "Contract details for unknown request");
        }
    }

    fn on_contract_details_end(&self, event: BrokerEvent) {
        let BrokerEvent::ContractDetailsEnd { request_id } = event else {
            return;
        };
        if !self.state.resolutions.finish(request_id) {
            debug!(request_id = %request_id, "Contract details end for closed request");
        }
    }

    // ========================================================================
    // Orders
    // ========================================================================

    fn on_order_status(&self, event: BrokerEvent) {
        let BrokerEvent::OrderStatus(report) = event else {
            return;
        };
        debug!(
            order_id = %report.order_id,
            status = %report.status,
            filled = report.filled,
            remaining = report.remaining,
            "Order status"
        );
        if let Some(order) = self.state.ledger.apply_status(&report) {
            self.state.notify_order(&order);
        }
    }

    fn on_open_order(&self, event: BrokerEvent) {
        let BrokerEvent::OpenOrder(report) = event else {
            return;
        };
        debug!(order_id = %report.order_id, status = %report.status, "Open order");

        let instrument = match self.state.instrument(report.contract.id) {
            Some(instrument) => instrument,
            None => match Instrument::new(report.contract.clone()) {
                Ok(instrument) => instrument,
                Err(err) => {
                    error!(order_id = %report.order_id, error = %err, "Open order without contract id");
                    return;
                }
            },
        };

        let merge = self.state.ledger.apply_open_order(&report, instrument.clone());
        if merge.materialized {
            self.state.insert_instrument(instrument);
        }
        if merge.notify {
            self.state.notify_order(&merge.order);
        }
    }

    fn on_open_order_end(&self, _event: BrokerEvent) {
        debug!("Open orders snapshot complete");
        self.state.open_orders_end.notify(());
    }

    fn on_execution(&self, event: BrokerEvent) {
        let BrokerEvent::ExecutionDetails(report) = event else {
            return;
        };
        self.state.ledger.apply_execution(&report);
    }

    fn on_commission(&self, event: BrokerEvent) {
        let BrokerEvent::CommissionReport(report) = event else {
            return;
        };
        debug!(exec_id = %report.exec_id, commission = %report.commission, "Commission");
        if let Some(order) = self.state.ledger.apply_commission(&report) {
            self.state.notify_order(&order);
        }
    }

    // ========================================================================
    // Positions
    // ========================================================================

    fn on_position(&self, event: BrokerEvent) {
        let BrokerEvent::Position(report) = event else {
            return;
        };
        let id = report.contract.id;
        if id.value() == 0 {
            warn!(symbol = %report.contract.symbol, "Position without contract id");
            return;
        }
        self.state.positions.update(
            id,
            report.quantity,
            report.avg_cost,
            report.contract.multiplier(),
        );
        self.state.record_position_update();

        if !self.state.knows_instrument(id) && self.state.reconcile.claim(id) {
            self.start_position_resolution(&report);
        }
    }

    /// Ask the broker for the details of a position's unknown instrument.
    /// The reconciling thread collects the answer.
    fn start_position_resolution(&self, report: &PositionReport) {
        let id = report.contract.id;
        let request_id = self.state.request_ids.next();
        let slot = match self.state.resolutions.open(request_id) {
            Ok(slot) => slot,
            Err(err) => {
                self.state.reconcile.release(id);
                warn!(instrument = %id, error = %err, "Cannot resolve position instrument");
                return;
            }
        };

        let spec = ContractSpec::from(&report.contract);
        let query = spec.to_string();
        if let Err(err) = self
            .state
            .send(SessionCommand::RequestContractDetails { request_id, spec })
        {
            self.state.resolutions.cancel(request_id);
            self.state.reconcile.release(id);
            warn!(instrument = %id, error = %err, "Cannot resolve position instrument");
            return;
        }
        debug!(instrument = %id, request_id = %request_id, "Resolving position instrument");
        self.state.reconcile.push_pending(id, query, slot);
    }

    fn on_position_end(&self, _event: BrokerEvent) {
        debug!("Positions snapshot complete");
        self.state.reconcile.push_end();
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn on_error(&self, event: BrokerEvent) {
        let BrokerEvent::Error { id, code, message } = event else {
            return;
        };
        let class = classify(code);
        observability::record_broker_error(class);

        match class {
            ErrorClass::Benign => trace!(code, message = %message, "Broker notice"),
            ErrorClass::Disconnect => {
                self.state.mark_disconnected();
                warn!(code, message = %message, "Broker connectivity lost");
                self.state.alert_all(Alert::Disconnect);
            }
            ErrorClass::Reconnect => {
                self.state.mark_connected();
                info!(code, message = %message, "Broker connectivity restored");
                self.state.alert_all(Alert::Reconnect);
            }
            ErrorClass::Warning => warn!(id, code, message = %message, "Broker warning"),
            ErrorClass::OrderRelated => {
                match self.state.ledger.apply_error(OrderId::new(id), code, &message) {
                    Some(order) => self.state.notify_order(&order),
                    None => error!(id, code, message = %message, "Order error for unknown order"),
                }
            }
            ErrorClass::TickerRelated => {
                error!(id, code, message = %message, "Market data error");
                let failed = self
                    .state
                    .subscriptions
                    .fail(RequestId::new(id), SessionError::broker(code, &message));
                if !failed {
                    warn!(id, code, "Market data error for no pending subscription");
                }
            }
            ErrorClass::ContractRequest => {
                error!(id, code, message = %message, "Contract request error");
                let failed = self
                    .state
                    .resolutions
                    .fail(RequestId::new(id), SessionError::broker(code, &message));
                if !failed {
                    warn!(id, code, "Contract request error for no pending request");
                }
            }
            ErrorClass::Other => error!(id, code, message = %message, "Broker error"),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("handlers", &self.table.len())
            .finish_non_exhaustive()
    }
}

fn apply_rt_volume(acc: &mut TickAccumulator, rt: &RtVolume) -> Result<(), TickError> {
    match (rt.price, rt.size) {
        (Some(price), Some(size)) => acc.add_trade(price, size, rt.time)?,
        (Some(price), None) => acc.add(QuoteField::Last, price)?,
        _ => {}
    }
    if let Some(volume) = rt.volume {
        acc.add(QuoteField::Volume, volume)?;
    }
    Ok(())
}

// ============================================================================
// Event Pump
// ============================================================================

/// Thread that drains the event channel into a [`Dispatcher`].
#[derive(Debug)]
pub struct EventPump {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EventPump {
    /// Start pumping `events` into `dispatcher`.
    pub fn spawn(dispatcher: Dispatcher, events: EventReceiver) -> SessionResult<Self> {
        let (shutdown, stop) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("session-events".to_string())
            .spawn(move || {
                info!("Event pump started");
                loop {
                    select! {
                        recv(events) -> event => match event {
                            Ok(event) => dispatcher.dispatch(event),
                            Err(_) => {
                                debug!("Event channel closed");
                                break;
                            }
                        },
                        recv(stop) -> _ => break,
                    }
                }
                let counts = dispatcher.event_counts();
                info!(
                    total = counts.values().sum::<u64>(),
                    kinds = counts.len(),
                    "Event pump stopped"
                );
            })?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Ask the pump to stop after the event in flight.
    pub fn stop(&self) {
        let _ = self.shutdown.try_send(());
    }

    /// Stop and wait for the pump thread. Must not be called from a user
    /// handler.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Event pump panicked");
            }
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}
