//! In-process paper broker.
//!
//! Answers every [`SessionCommand`] from a contract catalog and a simulated
//! book. Replies are queued on the event channel, never dispatched from
//! inside [`send`](BrokerSession::send), so ordering matches a real broker
//! session: status first, then execution, commission, and position.
//!
//! Market orders fill immediately at the instrument's reference price.
//! Limit and stop orders rest until [`PaperSession::trade`] moves the
//! price through them.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::commands::OrderTicket;
use super::events::{
    BrokerEvent, CommissionReport, ExecutionReport, OpenOrderReport, OrderStatusReport,
    PositionReport,
};
use super::{BrokerSession, EventSender, SessionCommand};
use crate::domain::{
    Action, Contract, ContractDetails, ContractSpec, InstrumentId, OrderId, OrderType, RequestId,
    TickField,
};
use crate::error::{SessionError, SessionResult};

/// Spread quoted around the reference price.
const HALF_SPREAD: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Size quoted on both sides and printed by subscriptions.
const QUOTE_SIZE: f64 = 100.0;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperListing {
    /// Details returned for matching lookups.
    pub details: ContractDetails,
    /// Reference price; orders without one are rejected.
    pub price: Option<Decimal>,
}

/// A position held before the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperPosition {
    /// Contract held.
    pub contract: Contract,
    /// Signed quantity.
    pub quantity: i64,
    /// Average cost including the multiplier.
    pub avg_cost: Decimal,
}

/// Paper broker setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperConfig {
    /// Account code reported on connect.
    pub account: String,
    /// Account type reported in the account summary.
    pub account_type: String,
    /// First order id the broker hands out.
    pub first_order_id: OrderId,
    /// Commission charged per execution.
    pub commission: Decimal,
    /// Contracts the broker knows.
    pub listings: Vec<PaperListing>,
    /// Positions present at connect.
    pub positions: Vec<PaperPosition>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            account: "DU000000".to_string(),
            account_type: "INDIVIDUAL".to_string(),
            first_order_id: OrderId::new(1),
            commission: Decimal::ONE,
            listings: Vec::new(),
            positions: Vec::new(),
        }
    }
}

impl PaperConfig {
    /// Add a catalog entry with a reference price.
    #[must_use]
    pub fn with_listing(mut self, details: ContractDetails, price: Decimal) -> Self {
        self.listings.push(PaperListing {
            details,
            price: Some(price),
        });
        self
    }

    /// Add a catalog entry that cannot be traded.
    #[must_use]
    pub fn with_unpriced_listing(mut self, details: ContractDetails) -> Self {
        self.listings.push(PaperListing {
            details,
            price: None,
        });
        self
    }

    /// Add a starting position.
    #[must_use]
    pub fn with_position(mut self, contract: Contract, quantity: i64, avg_cost: Decimal) -> Self {
        self.positions.push(PaperPosition {
            contract,
            quantity,
            avg_cost,
        });
        self
    }

    /// Set the first order id.
    #[must_use]
    pub fn with_first_order_id(mut self, id: i64) -> Self {
        self.first_order_id = OrderId::new(id);
        self
    }
}

#[derive(Debug)]
struct PaperBook {
    next_order_id: i64,
    prices: HashMap<InstrumentId, Decimal>,
    volume: HashMap<InstrumentId, f64>,
    positions: BTreeMap<InstrumentId, PaperPosition>,
    resting: BTreeMap<OrderId, OrderTicket>,
    subscriptions: HashSet<InstrumentId>,
    executions: u64,
}

/// Paper broker session.
#[derive(Debug)]
pub struct PaperSession {
    events: EventSender,
    config: PaperConfig,
    book: Mutex<PaperBook>,
    sent: Mutex<Vec<SessionCommand>>,
}

impl PaperSession {
    /// Paper session with an empty catalog.
    #[must_use]
    pub fn new(events: EventSender) -> Self {
        Self::with_config(events, PaperConfig::default())
    }

    /// Paper session over a configured catalog and book.
    #[must_use]
    pub fn with_config(events: EventSender, config: PaperConfig) -> Self {
        let prices = config
            .listings
            .iter()
            .filter_map(|l| l.price.map(|p| (l.details.contract.id, p)))
            .collect();
        let positions = config
            .positions
            .iter()
            .map(|p| (p.contract.id, p.clone()))
            .collect();
        let book = PaperBook {
            next_order_id: config.first_order_id.value(),
            prices,
            volume: HashMap::new(),
            positions,
            resting: BTreeMap::new(),
            subscriptions: HashSet::new(),
            executions: 0,
        };
        Self {
            events,
            config,
            book: Mutex::new(book),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every command received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<SessionCommand> {
        self.sent.lock().clone()
    }

    /// Queue an arbitrary event, as if the broker had sent it.
    pub fn inject(&self, event: BrokerEvent) -> SessionResult<()> {
        self.emit(vec![event])
    }

    /// Returns true if market data is streaming for the instrument.
    #[must_use]
    pub fn is_subscribed(&self, instrument: InstrumentId) -> bool {
        self.book.lock().subscriptions.contains(&instrument)
    }

    /// Orders resting at the broker.
    #[must_use]
    pub fn resting_orders(&self) -> Vec<OrderId> {
        self.book.lock().resting.keys().copied().collect()
    }

    /// Move the reference price without printing a trade, filling any
    /// resting order the new price reaches.
    pub fn set_price(&self, instrument: InstrumentId, price: Decimal) -> SessionResult<()> {
        let events = {
            let mut book = self.book.lock();
            book.prices.insert(instrument, price);
            self.sweep(&mut book, instrument, price)
        };
        self.emit(events)
    }

    /// Print a trade: streams a real-time volume tick when subscribed, then
    /// moves the reference price.
    pub fn trade(&self, instrument: InstrumentId, price: Decimal, size: u32) -> SessionResult<()> {
        let mut events = Vec::new();
        {
            let mut book = self.book.lock();
            if book.subscriptions.contains(&instrument) {
                let volume = book.volume.entry(instrument).or_default();
                *volume += f64::from(size);
                events.push(BrokerEvent::TickString {
                    instrument,
                    tick_type: TickField::RtVolume.code(),
                    value: format!(
                        "{price};{size};{};{volume};{price};false",
                        Utc::now().timestamp_millis()
                    ),
                });
            }
            book.prices.insert(instrument, price);
            events.extend(self.sweep(&mut book, instrument, price));
        }
        self.emit(events)
    }

    /// Rest an order that another client placed. It is visible only
    /// through open-order snapshots. Returns its id.
    pub fn submit_external(&self, contract: Contract, quantity: i64, limit_price: Decimal) -> OrderId {
        let mut book = self.book.lock();
        let order_id = OrderId::new(book.next_order_id);
        book.next_order_id += 1;
        book.resting.insert(
            order_id,
            OrderTicket {
                order_id,
                contract,
                action: if quantity < 0 { Action::Sell } else { Action::Buy },
                quantity: quantity.unsigned_abs(),
                order_type: OrderType::Limit,
                limit_price: Some(limit_price),
                stop_price: None,
                time_in_force: super::TIME_IN_FORCE.to_string(),
            },
        );
        tracing::debug!(order_id = %order_id, "External order resting");
        order_id
    }

    fn emit(&self, events: Vec<BrokerEvent>) -> SessionResult<()> {
        for event in events {
            self.events
                .send(event)
                .map_err(|_| SessionError::Disconnected)?;
        }
        Ok(())
    }

    fn listings(&self, spec: &ContractSpec) -> Vec<ContractDetails> {
        self.config
            .listings
            .iter()
            .filter(|l| listing_matches(spec, &l.details.contract))
            .map(|l| l.details.clone())
            .collect()
    }

    fn handle(&self, command: SessionCommand) -> Vec<BrokerEvent> {
        match command {
            SessionCommand::Connect { .. } => {
                let book = self.book.lock();
                vec![
                    BrokerEvent::ConnectionEstablished,
                    BrokerEvent::ManagedAccounts {
                        accounts: vec![self.config.account.clone()],
                    },
                    BrokerEvent::NextValidId {
                        order_id: OrderId::new(book.next_order_id),
                    },
                ]
            }
            SessionCommand::Disconnect => {
                self.book.lock().subscriptions.clear();
                vec![BrokerEvent::ConnectionClosed]
            }
            SessionCommand::RequestAccountSummary { request_id, tags } => tags
                .split(',')
                .filter(|tag| tag.trim() == "AccountType")
                .map(|_| BrokerEvent::AccountSummary {
                    request_id,
                    account: self.config.account.clone(),
                    tag: "AccountType".to_string(),
                    value: self.config.account_type.clone(),
                })
                .collect(),
            SessionCommand::RequestContractDetails { request_id, spec } => {
                self.contract_details(request_id, &spec)
            }
            SessionCommand::RequestMarketData { ticker_id, .. } => self.subscribe(ticker_id),
            SessionCommand::CancelMarketData { ticker_id } => {
                self.book.lock().subscriptions.remove(&ticker_id);
                Vec::new()
            }
            SessionCommand::PlaceOrder(ticket) => self.place(ticket),
            SessionCommand::CancelOrder { order_id } => self.cancel(order_id),
            SessionCommand::GlobalCancel => {
                let ids: Vec<OrderId> = self.book.lock().resting.keys().copied().collect();
                ids.into_iter().flat_map(|id| self.cancel(id)).collect()
            }
            SessionCommand::RequestPositions => {
                let book = self.book.lock();
                let mut events: Vec<BrokerEvent> = book
                    .positions
                    .values()
                    .map(|p| {
                        BrokerEvent::Position(PositionReport {
                            account: self.config.account.clone(),
                            contract: p.contract.clone(),
                            quantity: p.quantity,
                            avg_cost: p.avg_cost,
                        })
                    })
                    .collect();
                events.push(BrokerEvent::PositionEnd);
                events
            }
            SessionCommand::RequestAllOpenOrders => {
                let book = self.book.lock();
                let mut events: Vec<BrokerEvent> = book
                    .resting
                    .values()
                    .map(|ticket| open_order(ticket, "Submitted"))
                    .collect();
                events.push(BrokerEvent::OpenOrderEnd);
                events
            }
            SessionCommand::RequestNextValidId => vec![BrokerEvent::NextValidId {
                order_id: OrderId::new(self.book.lock().next_order_id),
            }],
        }
    }

    fn contract_details(&self, request_id: RequestId, spec: &ContractSpec) -> Vec<BrokerEvent> {
        let mut events: Vec<BrokerEvent> = self
            .listings(spec)
            .into_iter()
            .map(|details| BrokerEvent::ContractDetails {
                request_id,
                details,
            })
            .collect();
        events.push(BrokerEvent::ContractDetailsEnd { request_id });
        events
    }

    fn subscribe(&self, ticker_id: InstrumentId) -> Vec<BrokerEvent> {
        let mut book = self.book.lock();
        let Some(price) = book.prices.get(&ticker_id).copied() else {
            return vec![BrokerEvent::Error {
                id: ticker_id.value(),
                code: 354,
                message: "Requested market data is not subscribed".to_string(),
            }];
        };
        book.subscriptions.insert(ticker_id);
        let quote = |tick: TickField, price: Decimal| BrokerEvent::TickPrice {
            instrument: ticker_id,
            tick_type: tick.code(),
            price: price.to_f64().unwrap_or_default(),
        };
        let size = |tick: TickField| BrokerEvent::TickSize {
            instrument: ticker_id,
            tick_type: tick.code(),
            size: QUOTE_SIZE,
        };
        vec![
            quote(TickField::Bid, price - HALF_SPREAD),
            size(TickField::BidSize),
            quote(TickField::Ask, price + HALF_SPREAD),
            size(TickField::AskSize),
        ]
    }

    fn place(&self, ticket: OrderTicket) -> Vec<BrokerEvent> {
        let mut book = self.book.lock();
        book.next_order_id = book.next_order_id.max(ticket.order_id.value() + 1);

        let Some(price) = book.prices.get(&ticket.contract.id).copied() else {
            return vec![BrokerEvent::Error {
                id: ticket.order_id.value(),
                code: 201,
                message: format!(
                    "Order rejected - reason: no market for {}",
                    ticket.contract.symbol
                ),
            }];
        };

        let mut events = vec![open_order(&ticket, "Submitted")];
        if executable(&ticket, price) {
            events.extend(self.fill(&mut book, &ticket, price));
        } else {
            events.push(BrokerEvent::OrderStatus(OrderStatusReport {
                order_id: ticket.order_id,
                status: "Submitted".to_string(),
                filled: 0,
                remaining: quantity(&ticket),
                avg_fill_price: None,
            }));
            book.resting.insert(ticket.order_id, ticket);
        }
        events
    }

    fn cancel(&self, order_id: OrderId) -> Vec<BrokerEvent> {
        let Some(ticket) = self.book.lock().resting.remove(&order_id) else {
            return vec![BrokerEvent::Error {
                id: order_id.value(),
                code: 135,
                message: format!("Can't find order with id = {order_id}"),
            }];
        };
        vec![BrokerEvent::OrderStatus(OrderStatusReport {
            order_id,
            status: "Cancelled".to_string(),
            filled: 0,
            remaining: quantity(&ticket),
            avg_fill_price: None,
        })]
    }

    /// Fill every resting order on `instrument` that `price` reaches.
    fn sweep(
        &self,
        book: &mut PaperBook,
        instrument: InstrumentId,
        price: Decimal,
    ) -> Vec<BrokerEvent> {
        let ready: Vec<OrderId> = book
            .resting
            .values()
            .filter(|t| t.contract.id == instrument && executable(t, price))
            .map(|t| t.order_id)
            .collect();
        let mut events = Vec::new();
        for id in ready {
            if let Some(ticket) = book.resting.remove(&id) {
                events.extend(self.fill(book, &ticket, price));
            }
        }
        events
    }

    fn fill(&self, book: &mut PaperBook, ticket: &OrderTicket, price: Decimal) -> Vec<BrokerEvent> {
        book.executions += 1;
        let exec_id = format!("paper.{:08}.01", book.executions);
        let shares = quantity(ticket);
        let signed = match ticket.action {
            Action::Buy => shares,
            Action::Sell => -shares,
        };

        let position = book
            .positions
            .entry(ticket.contract.id)
            .or_insert_with(|| PaperPosition {
                contract: ticket.contract.clone(),
                quantity: 0,
                avg_cost: Decimal::ZERO,
            });
        let realized_pnl = apply_to_position(position, signed, price * ticket.contract.multiplier());
        let report = PositionReport {
            account: self.config.account.clone(),
            contract: position.contract.clone(),
            quantity: position.quantity,
            avg_cost: position.avg_cost,
        };

        tracing::debug!(
            order_id = %ticket.order_id,
            shares = signed,
            price = %price,
            "Paper fill"
        );

        vec![
            BrokerEvent::OrderStatus(OrderStatusReport {
                order_id: ticket.order_id,
                status: "Filled".to_string(),
                filled: shares,
                remaining: 0,
                avg_fill_price: Some(price),
            }),
            BrokerEvent::ExecutionDetails(ExecutionReport {
                exec_id: exec_id.clone(),
                order_id: ticket.order_id,
                shares,
                price,
                cumulative: shares,
                avg_price: price,
                time: Utc::now(),
            }),
            BrokerEvent::CommissionReport(CommissionReport {
                exec_id,
                commission: self.config.commission,
                realized_pnl,
            }),
            BrokerEvent::Position(report),
        ]
    }
}

impl BrokerSession for PaperSession {
    fn send(&self, command: SessionCommand) -> SessionResult<()> {
        self.sent.lock().push(command.clone());
        let events = self.handle(command);
        self.emit(events)
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

fn quantity(ticket: &OrderTicket) -> i64 {
    i64::try_from(ticket.quantity).unwrap_or(i64::MAX)
}

fn open_order(ticket: &OrderTicket, status: &str) -> BrokerEvent {
    let shares = quantity(ticket);
    BrokerEvent::OpenOrder(OpenOrderReport {
        order_id: ticket.order_id,
        contract: ticket.contract.clone(),
        quantity: match ticket.action {
            Action::Buy => shares,
            Action::Sell => -shares,
        },
        limit_price: ticket.limit_price,
        stop_price: ticket.stop_price,
        status: status.to_string(),
        warning: None,
    })
}

/// Returns true if the ticket trades at `price`. A stop-limit order
/// needs both its stop and its limit reached.
fn executable(ticket: &OrderTicket, price: Decimal) -> bool {
    let buy = ticket.action == Action::Buy;
    let limit_ok = |limit: Decimal| if buy { price <= limit } else { price >= limit };
    let stop_hit = |stop: Decimal| if buy { price >= stop } else { price <= stop };
    match (ticket.order_type, ticket.limit_price, ticket.stop_price) {
        (OrderType::Market, _, _) => true,
        (OrderType::Limit, Some(limit), _) => limit_ok(limit),
        (OrderType::Stop, _, Some(stop)) => stop_hit(stop),
        (OrderType::StopLimit, Some(limit), Some(stop)) => stop_hit(stop) && limit_ok(limit),
        _ => false,
    }
}

/// Merge a signed fill into a position. Returns the realized P&L when the
/// fill reduces the position.
fn apply_to_position(position: &mut PaperPosition, signed: i64, unit_cost: Decimal) -> Option<Decimal> {
    let before = position.quantity;
    let after = before + signed;
    let mut realized = None;

    if before == 0 || before.signum() == signed.signum() {
        let held = Decimal::from(before.abs());
        let added = Decimal::from(signed.abs());
        position.avg_cost = (position.avg_cost * held + unit_cost * added) / (held + added);
    } else {
        let closed = Decimal::from(before.abs().min(signed.abs()));
        let direction = Decimal::from(before.signum());
        realized = Some((unit_cost - position.avg_cost) * closed * direction);
        if after == 0 {
            position.avg_cost = Decimal::ZERO;
        } else if after.signum() != before.signum() {
            position.avg_cost = unit_cost;
        }
    }
    position.quantity = after;
    realized
}

fn listing_matches(spec: &ContractSpec, contract: &Contract) -> bool {
    if let Some(id) = spec.id {
        return contract.id == id;
    }
    let exchange_ok =
        spec.exchange.is_empty() || spec.exchange == "SMART" || spec.exchange == contract.exchange;
    let expiry_ok = spec.expiry.as_deref().is_none_or(|wanted| {
        contract
            .expiry
            .as_deref()
            .is_some_and(|expiry| expiry.starts_with(wanted))
    });
    contract.symbol.eq_ignore_ascii_case(&spec.symbol)
        && contract.security_type == spec.security_type
        && contract.currency == spec.currency
        && exchange_ok
        && expiry_ok
}
