//! User callback registry.
//!
//! Handlers are grouped by scope (instrument, or bar key for bars) and kept
//! in registration order. Every handler gets a [`HandlerId`] so it can be
//! removed explicitly; lookups never insert.
//!
//! Dispatch clones the handler list out of the lock before invoking, so a
//! callback may register or unregister handlers without deadlocking.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::domain::{Alert, Bar, BarKey, BarType, Instrument, InstrumentId, Order, Quote};

/// Called with a snapshot of an order after each merged change.
pub type OrderHandler = Arc<dyn Fn(&Order) + Send + Sync>;
/// Called after every tick update of an instrument.
pub type QuoteHandler = Arc<dyn Fn(&Instrument, &Quote) + Send + Sync>;
/// Called with each completed bar.
pub type BarHandler = Arc<dyn Fn(&Instrument, &Bar) + Send + Sync>;
/// Called with session and instrument alerts.
pub type AlertHandler = Arc<dyn Fn(&Instrument, Alert) + Send + Sync>;

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Set of handlers to register for one instrument.
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) bar: Option<(Duration, BarHandler)>,
    pub(crate) order: Option<OrderHandler>,
    pub(crate) quote: Option<QuoteHandler>,
    pub(crate) alert: Option<AlertHandler>,
}

impl Handlers {
    /// Empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive a time bar every `size`.
    #[must_use]
    pub fn on_bar<F>(mut self, size: Duration, handler: F) -> Self
    where
        F: Fn(&Instrument, &Bar) + Send + Sync + 'static,
    {
        self.bar = Some((size, Arc::new(handler)));
        self
    }

    /// Receive order updates for the instrument.
    #[must_use]
    pub fn on_order<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Order) + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(handler));
        self
    }

    /// Receive every quote update for the instrument.
    #[must_use]
    pub fn on_quote<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Instrument, &Quote) + Send + Sync + 'static,
    {
        self.quote = Some(Arc::new(handler));
        self
    }

    /// Receive alerts for the instrument and the session.
    #[must_use]
    pub fn on_alert<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Instrument, Alert) + Send + Sync + 'static,
    {
        self.alert = Some(Arc::new(handler));
        self
    }

    /// Returns true if the set needs a market data subscription.
    #[must_use]
    pub const fn needs_market_data(&self) -> bool {
        self.bar.is_some() || self.quote.is_some()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("bar", &self.bar.as_ref().map(|(size, _)| size))
            .field("order", &self.order.is_some())
            .field("quote", &self.quote.is_some())
            .field("alert", &self.alert.is_some())
            .finish()
    }
}

/// Handles returned by a registration, needed to unregister it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Instrument the handlers were registered for.
    pub instrument: Instrument,
    /// Bar key, when a bar handler was registered.
    pub bar_key: Option<BarKey>,
    pub(crate) ids: Vec<HandlerId>,
}

struct Scoped<K, H> {
    entries: HashMap<K, Vec<(HandlerId, H)>>,
}

impl<K, H> Default for Scoped<K, H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy, H: Clone> Scoped<K, H> {
    fn add(&mut self, key: K, id: HandlerId, handler: H) {
        self.entries.entry(key).or_default().push((id, handler));
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let mut emptied = None;
        let mut found = false;
        for (key, list) in &mut self.entries {
            if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
                list.remove(pos);
                found = true;
                if list.is_empty() {
                    emptied = Some(*key);
                }
                break;
            }
        }
        if let Some(key) = emptied {
            self.entries.remove(&key);
        }
        found
    }

    fn get(&self, key: &K) -> Vec<H> {
        self.entries
            .get(key)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn keys(&self) -> Vec<K> {
        self.entries.keys().copied().collect()
    }
}

/// All registered user callbacks of a session.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    orders: RwLock<Scoped<InstrumentId, OrderHandler>>,
    quotes: RwLock<Scoped<InstrumentId, QuoteHandler>>,
    bars: RwLock<Scoped<BarKey, BarHandler>>,
    alerts: RwLock<Scoped<InstrumentId, AlertHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register an order handler.
    pub fn add_order(&self, instrument: InstrumentId, handler: OrderHandler) -> HandlerId {
        let id = self.allocate();
        self.orders.write().add(instrument, id, handler);
        id
    }

    /// Register a quote handler.
    pub fn add_quote(&self, instrument: InstrumentId, handler: QuoteHandler) -> HandlerId {
        let id = self.allocate();
        self.quotes.write().add(instrument, id, handler);
        id
    }

    /// Register a bar handler unless the instrument already streams bars of
    /// another size. The check and the insert happen under one lock; on
    /// conflict the size in use is returned.
    pub fn add_bar(
        &self,
        key: BarKey,
        handler: BarHandler,
    ) -> Result<HandlerId, Duration> {
        let mut bars = self.bars.write();
        if let Some(existing) = bars.keys().into_iter().find(|other| {
            other.instrument == key.instrument
                && other.bar_type == BarType::Time
                && other.size != key.size
        }) {
            return Err(existing.size);
        }
        let id = self.allocate();
        bars.add(key, id, handler);
        Ok(id)
    }

    /// Register an alert handler.
    pub fn add_alert(&self, instrument: InstrumentId, handler: AlertHandler) -> HandlerId {
        let id = self.allocate();
        self.alerts.write().add(instrument, id, handler);
        id
    }

    /// Remove a handler of any kind. Returns false if it was not registered.
    pub fn remove(&self, id: HandlerId) -> bool {
        self.orders.write().remove(id)
            || self.quotes.write().remove(id)
            || self.bars.write().remove(id)
            || self.alerts.write().remove(id)
    }

    /// Order handlers for an instrument.
    #[must_use]
    pub fn order_handlers(&self, instrument: InstrumentId) -> Vec<OrderHandler> {
        self.orders.read().get(&instrument)
    }

    /// Quote handlers for an instrument.
    #[must_use]
    pub fn quote_handlers(&self, instrument: InstrumentId) -> Vec<QuoteHandler> {
        self.quotes.read().get(&instrument)
    }

    /// Bar handlers for a bar key.
    #[must_use]
    pub fn bar_handlers(&self, key: &BarKey) -> Vec<BarHandler> {
        self.bars.read().get(key)
    }

    /// Returns true if any bar handler is registered under `key`.
    #[must_use]
    pub fn has_bar_handlers(&self, key: &BarKey) -> bool {
        self.bars.read().contains(key)
    }

    /// Bar size already in use for an instrument, if any.
    #[must_use]
    pub fn bar_size(&self, instrument: InstrumentId) -> Option<Duration> {
        self.bars
            .read()
            .keys()
            .into_iter()
            .find(|key| key.instrument == instrument && key.bar_type == BarType::Time)
            .map(|key| key.size)
    }

    /// Alert handlers for an instrument.
    #[must_use]
    pub fn alert_handlers(&self, instrument: InstrumentId) -> Vec<AlertHandler> {
        self.alerts.read().get(&instrument)
    }

    /// Every alert handler, with the instrument it was registered for.
    #[must_use]
    pub fn all_alert_handlers(&self) -> Vec<(InstrumentId, AlertHandler)> {
        let alerts = self.alerts.read();
        alerts
            .keys()
            .into_iter()
            .flat_map(|key| alerts.get(&key).into_iter().map(move |h| (key, h)))
            .collect()
    }

    /// Drop every handler.
    pub fn clear(&self) {
        *self.orders.write() = Scoped::default();
        *self.quotes.write() = Scoped::default();
        *self.bars.write() = Scoped::default();
        *self.alerts.write() = Scoped::default();
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("orders", &self.orders.read().entries.len())
            .field("quotes", &self.quotes.read().entries.len())
            .field("bars", &self.bars.read().entries.len())
            .field("alerts", &self.alerts.read().entries.len())
            .finish()
    }
}
