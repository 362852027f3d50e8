//! Trading Session
//!
//! The blocking, thread-safe API over a broker session. Every method may be
//! called from any thread except the event pump thread (that is, not from
//! inside a registered handler), since the blocking calls wait on replies
//! only the pump can deliver.
//!
//! # Usage
//!
//! ```rust,ignore
//! use session_bridge::{Handlers, SessionConfig, TradingSession};
//!
//! let session = TradingSession::connect(transport, events, SessionConfig::from_env()?)?;
//! let aapl = session.resolve("AAPL")?;
//! session.register(&aapl, Handlers::new().on_bar(Duration::from_secs(1), |inst, bar| {
//!     println!("{inst}: {:?}", bar.close);
//! }))?;
//! session.order_target(&aapl, 100, None, None)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::domain::{
    Bar, BarKey, BarType, GENERIC_TICKS, Instrument, InstrumentId, InstrumentRef, Order, OrderId,
    RequestId,
};
use crate::engine::{
    AccountInfo, ConnectionStatus, Dispatcher, EventPump, Handlers, Position, Registration,
    ReconciliationReport, SessionState, reconcile,
};
use crate::error::{SessionError, SessionResult};
use crate::observability;
use crate::session::{
    ACCOUNT_SUMMARY_TAGS, BrokerSession, EventReceiver, OrderTicket, SessionCommand,
};

/// Poll interval while `flatten` waits for cancels to land.
const FLATTEN_POLL: Duration = Duration::from_millis(20);

/// A connected trading session.
#[derive(Debug)]
pub struct TradingSession {
    state: Arc<SessionState>,
    pump: Mutex<Option<EventPump>>,
}

impl TradingSession {
    /// Connect over `transport`, whose replies arrive on `events`.
    ///
    /// Blocks until the broker answers or the connect timeout elapses, then
    /// requests the account summary and, when configured, reconciles.
    pub fn connect(
        transport: Arc<dyn BrokerSession>,
        events: EventReceiver,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        let transport_name = transport.name();
        let state = Arc::new(SessionState::new(config.clone(), transport));
        let pump = EventPump::spawn(Dispatcher::new(Arc::clone(&state)), events)?;
        let session = Self {
            state,
            pump: Mutex::new(Some(pump)),
        };

        // 1. Handshake
        let connection = &config.connection;
        let armed = session.state.connected.arm();
        session.state.send(SessionCommand::Connect {
            host: connection.host.clone(),
            port: connection.port,
            client_id: connection.client_id,
        })?;
        armed.wait(config.timeouts.connect, "connect")?;
        info!(
            transport = transport_name,
            host = %connection.host,
            port = connection.port,
            client_id = connection.client_id,
            "Trading session connected"
        );

        // 2. Account summary
        session.state.send(SessionCommand::RequestAccountSummary {
            request_id: session.state.request_ids.next(),
            tags: ACCOUNT_SUMMARY_TAGS.to_string(),
        })?;

        // 3. Startup reconciliation
        if config.reconcile_on_connect {
            if let Err(error) = session.reconcile() {
                warn!(error = %error, "Startup reconciliation failed");
            }
        }

        Ok(session)
    }

    /// Shared session state.
    #[must_use]
    pub const fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    // ========================================================================
    // Instruments and Handlers
    // ========================================================================

    /// Resolve an instrument, querying the broker when it is not cached.
    pub fn resolve(&self, instrument: impl Into<InstrumentRef>) -> SessionResult<Instrument> {
        self.state.resolve(instrument.into())
    }

    /// Register handlers for an instrument.
    ///
    /// Bar and quote handlers subscribe to market data on first use; the
    /// call blocks until the first tick or a market data error arrives.
    pub fn register(
        &self,
        instrument: impl Into<InstrumentRef>,
        handlers: Handlers,
    ) -> SessionResult<Registration> {
        let instrument = self.resolve(instrument)?;
        let id = instrument.id();

        if let Some((size, _)) = &handlers.bar {
            if size.is_zero() {
                return Err(SessionError::InvalidArgument(
                    "bar size must be positive".to_string(),
                ));
            }
            if let Some(existing) = self.state.handlers.bar_size(id) {
                if existing != *size {
                    return Err(SessionError::InvalidArgument(format!(
                        "{instrument} already has {existing:?} bars; cannot add {size:?} bars"
                    )));
                }
            }
        }

        if handlers.needs_market_data() {
            self.subscribe(&instrument)?;
        }

        let registry = &self.state.handlers;
        let mut ids = Vec::new();
        let mut bar_key = None;
        // Bars go first: a concurrent registration may have claimed another
        // size since the check above.
        if let Some((size, handler)) = handlers.bar {
            let key = BarKey {
                bar_type: BarType::Time,
                size,
                instrument: id,
            };
            let handler_id = registry.add_bar(key, handler).map_err(|existing| {
                SessionError::InvalidArgument(format!(
                    "{instrument} already has {existing:?} bars; cannot add {size:?} bars"
                ))
            })?;
            if let Err(err) = self.state.start_bar_task(key) {
                registry.remove(handler_id);
                return Err(err);
            }
            ids.push(handler_id);
            bar_key = Some(key);
        }
        if let Some(handler) = handlers.quote {
            ids.push(registry.add_quote(id, handler));
        }
        if let Some(handler) = handlers.order {
            ids.push(registry.add_order(id, handler));
        }
        if let Some(handler) = handlers.alert {
            ids.push(registry.add_alert(id, handler));
        }

        debug!(instrument = %instrument, handlers = ids.len(), "Registered handlers");
        Ok(Registration {
            instrument,
            bar_key,
            ids,
        })
    }

    /// Remove a registration's handlers. Stops the bar task once its last
    /// handler is gone; the market data subscription stays open. Returns
    /// the number of handlers removed.
    pub fn unregister(&self, registration: &Registration) -> usize {
        let removed = registration
            .ids
            .iter()
            .filter(|id| self.state.handlers.remove(**id))
            .count();
        if let Some(key) = &registration.bar_key {
            if !self.state.handlers.has_bar_handlers(key) {
                self.state.stop_bar_task(key);
            }
        }
        debug!(instrument = %registration.instrument, removed, "Unregistered handlers");
        removed
    }

    /// Subscribe to market data and wait for the handshake: the first
    /// tick completes it, a ticker error fails it.
    ///
    /// A caller arriving while another handshake for the instrument is in
    /// flight waits for it; if that handshake failed, it tries its own.
    fn subscribe(&self, instrument: &Instrument) -> SessionResult<()> {
        let id = instrument.id();
        let gate = self.state.subscription_gate(id);
        let _handshake = gate.lock();
        if !self.state.ensure_accumulator(id) {
            return Ok(());
        }

        let request_id = RequestId::new(id.value());
        let slot = match self.state.subscriptions.open(request_id) {
            Ok(slot) => slot,
            Err(error) => {
                self.state.remove_accumulator(id);
                return Err(error);
            }
        };

        let result = self
            .state
            .send(SessionCommand::RequestMarketData {
                ticker_id: id,
                contract: instrument.contract().clone(),
                generic_ticks: GENERIC_TICKS.to_string(),
            })
            .and_then(|()| {
                slot.collect(
                    self.state.config.timeouts.subscribe,
                    "market data subscription",
                )
            });

        if let Err(error) = result {
            self.state.subscriptions.cancel(request_id);
            self.state.remove_accumulator(id);
            let _ = self
                .state
                .send(SessionCommand::CancelMarketData { ticker_id: id });
            warn!(instrument = %instrument, error = %error, "Market data subscription failed");
            return Err(error);
        }

        info!(instrument = %instrument, "Market data subscribed");
        Ok(())
    }

    // ========================================================================
    // Orders
    // ========================================================================

    /// Place an order. The type follows from the prices given: neither is
    /// a market order, a limit makes it a limit order, a stop a stop order,
    /// both a stop-limit order.
    ///
    /// Returns `None` for a zero quantity. The returned order is a snapshot;
    /// query [`order`](Self::order) or register an order handler for
    /// updates.
    pub fn place_order(
        &self,
        instrument: &Instrument,
        quantity: i64,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> SessionResult<Option<Order>> {
        if quantity == 0 {
            return Ok(None);
        }
        for (name, price) in [("limit", limit_price), ("stop", stop_price)] {
            if price.is_some_and(|p| p <= Decimal::ZERO) {
                return Err(SessionError::InvalidArgument(format!(
                    "{name} price must be positive"
                )));
            }
        }

        let instrument = self.state.insert_instrument(instrument.clone());
        let order_id = self.state.ledger.allocate_id();
        let order = Order::new(order_id, instrument, quantity, limit_price, stop_price);
        // Recorded before sending so replies always find it.
        self.state.ledger.insert(order.clone());

        info!(
            order_id = %order_id,
            instrument = %order.instrument,
            quantity,
            order_type = order.order_type().code(),
            limit = ?limit_price,
            stop = ?stop_price,
            "Placing order"
        );
        if let Err(error) = self
            .state
            .send(SessionCommand::PlaceOrder(OrderTicket::from(&order)))
        {
            self.state.ledger.apply_error(order_id, 0, &error.to_string());
            return Err(error);
        }
        observability::record_order_placed(order.order_type());
        Ok(Some(order))
    }

    /// Place whatever order brings the position in `instrument` to `target`.
    pub fn order_target(
        &self,
        instrument: &Instrument,
        target: i64,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> SessionResult<Option<Order>> {
        let quantity = target - self.position(instrument);
        self.place_order(instrument, quantity, limit_price, stop_price)
    }

    /// Ask the broker to cancel an order.
    pub fn cancel(&self, order_id: OrderId) -> SessionResult<()> {
        info!(order_id = %order_id, "Cancelling order");
        self.state.send(SessionCommand::CancelOrder { order_id })
    }

    /// Cancel every open order, or only those for `instrument`. Returns the
    /// number of cancels sent.
    pub fn cancel_all(&self, instrument: Option<&Instrument>) -> SessionResult<usize> {
        let open = self.open_orders(instrument);
        for order in &open {
            self.cancel(order.id)?;
        }
        Ok(open.len())
    }

    /// Cancel every open order of the account, including those placed by
    /// other clients.
    pub fn global_cancel(&self) -> SessionResult<()> {
        info!("Global cancel");
        self.state.send(SessionCommand::GlobalCancel)
    }

    /// Cancel open orders, wait briefly for the cancels to land, then trade
    /// every position (or only `instrument`'s) to zero. Returns the
    /// closing orders placed.
    pub fn flatten(&self, instrument: Option<&Instrument>) -> SessionResult<Vec<Order>> {
        let cancelled = self.cancel_all(instrument)?;
        if cancelled > 0 {
            let deadline = Instant::now() + self.state.config.flatten_settle;
            while !self.open_orders(instrument).is_empty() && Instant::now() < deadline {
                thread::sleep(FLATTEN_POLL);
            }
        }

        let targets = instrument.map_or_else(|| self.state.instruments(), |i| vec![i.clone()]);
        let mut placed = Vec::new();
        for target in &targets {
            if let Some(order) = self.order_target(target, 0, None, None)? {
                placed.push(order);
            }
        }
        info!(cancelled, closing = placed.len(), "Flattened");
        Ok(placed)
    }

    /// Open orders ordered by id, optionally for one instrument.
    #[must_use]
    pub fn open_orders(&self, instrument: Option<&Instrument>) -> Vec<Order> {
        self.state.ledger.open_orders(instrument.map(Instrument::id))
    }

    /// Snapshot of one order.
    #[must_use]
    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.state.ledger.get(order_id)
    }

    // ========================================================================
    // Positions and Status
    // ========================================================================

    /// Signed position in `instrument`; 0 when unknown.
    #[must_use]
    pub fn position(&self, instrument: &Instrument) -> i64 {
        self.state.positions.get(instrument.id()).quantity
    }

    /// Per-unit average cost of the position in `instrument`.
    #[must_use]
    pub fn cost(&self, instrument: &Instrument) -> Option<Decimal> {
        self.state.positions.cost(instrument.id())
    }

    /// Every known position.
    #[must_use]
    pub fn positions(&self) -> HashMap<InstrumentId, Position> {
        self.state.positions.snapshot()
    }

    /// Current bar for an instrument without resetting it.
    #[must_use]
    pub fn peek_bar(&self, instrument: &Instrument) -> Option<Bar> {
        self.state.peek_bar(instrument.id())
    }

    /// Bring positions, instruments, open orders, and the order id counter
    /// in line with the broker.
    pub fn reconcile(&self) -> SessionResult<ReconciliationReport> {
        reconcile(&self.state)
    }

    /// Returns true if the broker is reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Account the session trades.
    #[must_use]
    pub fn account(&self) -> AccountInfo {
        self.state.account()
    }

    /// Stop bar tasks, drop every handler, and close the session. Waiting
    /// callers fail with [`SessionError::Disconnected`].
    pub fn disconnect(&self) -> SessionResult<()> {
        let Some(pump) = self.pump.lock().take() else {
            return Ok(());
        };
        let bar_tasks = self.state.stop_bar_tasks();
        self.state.handlers.clear();
        let sent = self.state.send(SessionCommand::Disconnect);
        pump.join();

        self.state.subscriptions.fail_all(&SessionError::Disconnected);
        self.state.resolutions.fail_all(&SessionError::Disconnected);
        self.state.mark_disconnected();
        info!(bar_tasks, "Trading session disconnected");
        sent
    }
}

impl Drop for TradingSession {
    fn drop(&mut self) {
        self.state.stop_bar_tasks();
        if let Some(pump) = self.pump.lock().take() {
            pump.stop();
        }
    }
}
