//! Trading Session Integration Tests
//!
//! Drives the full stack (paper broker → event pump → dispatcher → session
//! state → handlers) through the public `TradingSession` API.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::float_cmp)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use session_bridge::domain::{Contract, RequestId, SecurityType, TickField};
use session_bridge::session::OrderStatusReport;
use session_bridge::{
    Alert, BrokerEvent, BrokerSession, ConnectionStatus, ContractDetails, ContractSpec, Handlers,
    InstrumentId, OrderState, PaperConfig, PaperSession, SessionCommand, SessionConfig,
    SessionError, SessionResult, TradingSession, event_channel,
};

const AAPL: i64 = 265_598;
const MSFT: i64 = 272_093;
const HALTED: i64 = 4_391;

// =============================================================================
// Fixtures
// =============================================================================

fn stock(id: i64, symbol: &str) -> Contract {
    Contract {
        id: InstrumentId::new(id),
        symbol: symbol.to_string(),
        security_type: SecurityType::Stock,
        exchange: "NASDAQ".to_string(),
        currency: "USD".to_string(),
        expiry: None,
        strike: None,
        right: None,
        multiplier: None,
    }
}

fn es(id: i64, month: &str) -> ContractDetails {
    let contract = Contract {
        id: InstrumentId::new(id),
        symbol: "ES".to_string(),
        security_type: SecurityType::Future,
        exchange: "CME".to_string(),
        currency: "USD".to_string(),
        expiry: Some(format!("{month}19")),
        strike: None,
        right: None,
        multiplier: Some(dec!(50)),
    };
    ContractDetails {
        contract_month: Some(month.to_string()),
        ..ContractDetails::new(contract)
    }
}

fn catalog() -> PaperConfig {
    PaperConfig::default()
        .with_listing(ContractDetails::new(stock(AAPL, "AAPL")), dec!(150))
        .with_listing(ContractDetails::new(stock(MSFT, "MSFT")), dec!(410))
        .with_unpriced_listing(ContractDetails::new(stock(HALTED, "HALT")))
        .with_listing(es(495_512_563, "202703"), dec!(5800))
        .with_listing(es(551_601_561, "202612"), dec!(5790))
        .with_listing(es(620_731_015, "202706"), dec!(5810))
}

fn config() -> SessionConfig {
    let mut config = SessionConfig::default()
        .with_client_id(7)
        .with_timeouts(Duration::from_millis(500));
    config.reconcile_on_connect = false;
    config.bar_initial_delay = Duration::from_millis(20);
    config.flatten_settle = Duration::from_millis(300);
    config
}

fn connect_with(paper: PaperConfig, config: SessionConfig) -> (TradingSession, Arc<PaperSession>) {
    let (events, receiver) = event_channel();
    let paper = Arc::new(PaperSession::with_config(events, paper));
    let session = TradingSession::connect(paper.clone(), receiver, config).unwrap();
    (session, paper)
}

fn connect() -> (TradingSession, Arc<PaperSession>) {
    connect_with(catalog(), config())
}

/// Poll `condition` for up to two seconds.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Wait until every event queued so far has been dispatched.
fn settle(paper: &PaperSession, session: &TradingSession) {
    static MARKERS: AtomicU64 = AtomicU64::new(0);
    let marker = format!("settle-{}", MARKERS.fetch_add(1, Ordering::Relaxed));
    paper
        .inject(BrokerEvent::AccountSummary {
            request_id: RequestId::new(0),
            account: "DU000000".to_string(),
            tag: "AccountType".to_string(),
            value: marker.clone(),
        })
        .unwrap();
    assert!(eventually(|| {
        session.account().account_type.as_deref() == Some(marker.as_str())
    }));
}

fn counting_orders(counter: &Arc<AtomicUsize>) -> Handlers {
    let counter = Arc::clone(counter);
    Handlers::new().on_order(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

/// Transport that never answers.
struct Silent;

impl BrokerSession for Silent {
    fn send(&self, _command: SessionCommand) -> SessionResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "silent"
    }
}

// =============================================================================
// Connection
// =============================================================================

#[test]
fn test_connect_records_account() {
    let (session, _paper) = connect();
    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert!(eventually(|| session.account().account_type.is_some()));
    let account = session.account();
    assert_eq!(account.account.as_deref(), Some("DU000000"));
    assert_eq!(account.account_type.as_deref(), Some("INDIVIDUAL"));
}

#[test]
fn test_connect_times_out_without_reply() {
    let (_events, receiver) = event_channel();
    let started = Instant::now();
    let result = TradingSession::connect(
        Arc::new(Silent),
        receiver,
        SessionConfig::default().with_timeouts(Duration::from_millis(100)),
    );
    assert!(matches!(result, Err(SessionError::Timeout { operation: "connect", .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_connectivity_alerts() {
    let (session, paper) = connect();
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&alerts);
    session
        .register("AAPL", Handlers::new().on_alert(move |_, alert| sink.lock().push(alert)))
        .unwrap();

    paper
        .inject(BrokerEvent::Error {
            id: -1,
            code: 1100,
            message: "Connectivity between IB and TWS has been lost.".to_string(),
        })
        .unwrap();
    assert!(eventually(|| !session.is_connected()));
    assert_eq!(session.status(), ConnectionStatus::Disconnected);

    paper
        .inject(BrokerEvent::Error {
            id: -1,
            code: 1102,
            message: "Connectivity between IB and TWS has been restored.".to_string(),
        })
        .unwrap();
    assert!(eventually(|| session.is_connected()));
    assert_eq!(*alerts.lock(), vec![Alert::Disconnect, Alert::Reconnect]);
}

#[test]
fn test_disconnect_is_idempotent() {
    let (session, paper) = connect();
    session
        .register(
            "AAPL",
            Handlers::new().on_bar(Duration::from_secs(60), |_, _| {}),
        )
        .unwrap();
    session.disconnect().unwrap();
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(paper.commands().contains(&SessionCommand::Disconnect));
    session.disconnect().unwrap();
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_resolve_caches_by_id() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    assert_eq!(aapl.id(), InstrumentId::new(AAPL));
    assert_eq!(session.resolve(InstrumentId::new(AAPL)).unwrap(), aapl);

    let lookups = paper
        .commands()
        .iter()
        .filter(|c| matches!(c, SessionCommand::RequestContractDetails { .. }))
        .count();
    assert_eq!(lookups, 1);
    assert_eq!(session.position(&aapl), 0);
}

#[test]
fn test_zero_results_is_not_found_within_timeout() {
    let (session, _paper) = connect();
    let started = Instant::now();
    let result = session.resolve("NOPE");
    assert!(matches!(result, Err(SessionError::NotFound { .. })));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_futures_resolve_to_nearest_month() {
    let (session, _paper) = connect();
    let es = session.resolve(ContractSpec::future("ES", "CME")).unwrap();
    assert_eq!(es.id(), InstrumentId::new(551_601_561));
    assert_eq!(es.multiplier(), dec!(50));
}

#[test]
fn test_several_stocks_are_ambiguous() {
    let mut duplicate = stock(999_001, "AAPL");
    duplicate.exchange = "ARCA".to_string();
    let paper = catalog().with_listing(ContractDetails::new(duplicate), dec!(150));
    let (session, _paper) = connect_with(paper, config());
    assert!(matches!(
        session.resolve("AAPL"),
        Err(SessionError::Ambiguous { candidates: 2, .. })
    ));
}

// =============================================================================
// Orders
// =============================================================================

#[test]
fn test_market_order_fills_and_updates_position() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    session.register(&aapl, counting_orders(&calls)).unwrap();

    let order = session.order_target(&aapl, 100, None, None).unwrap().unwrap();
    assert_eq!(order.quantity, 100);
    assert!(eventually(|| session.position(&aapl) == 100));
    settle(&paper, &session);

    let filled = session.order(order.id).unwrap();
    assert_eq!(filled.state(), OrderState::Filled);
    assert_eq!(filled.filled, 100);
    assert_eq!(filled.avg_fill_price, Some(dec!(150)));
    assert_eq!(filled.commission, Decimal::ONE);
    assert_eq!(session.cost(&aapl), Some(dec!(150)));
    // Fill, then commission.
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Already at target.
    assert!(session.order_target(&aapl, 100, None, None).unwrap().is_none());
}

#[test]
fn test_duplicate_notifications_fire_once() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    session.register(&aapl, counting_orders(&calls)).unwrap();

    let order = session.place_order(&aapl, 10, None, None).unwrap().unwrap();
    settle(&paper, &session);
    let after_fill = calls.load(Ordering::SeqCst);

    let duplicate = |status: &str, filled| {
        BrokerEvent::OrderStatus(OrderStatusReport {
            order_id: order.id,
            status: status.to_string(),
            filled,
            remaining: 10 - filled,
            avg_fill_price: Some(dec!(150)),
        })
    };
    paper.inject(duplicate("Filled", 10)).unwrap();
    paper.inject(duplicate("Submitted", 4)).unwrap();
    paper.inject(duplicate("Cancelled", 10)).unwrap();
    settle(&paper, &session);

    assert_eq!(calls.load(Ordering::SeqCst), after_fill);
    let order = session.order(order.id).unwrap();
    assert_eq!(order.state(), OrderState::Filled);
    assert_eq!(order.filled, 10);
}

#[test]
fn test_limit_order_rests_until_cancelled() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    session.register(&aapl, counting_orders(&calls)).unwrap();

    let order = session
        .place_order(&aapl, 20, Some(dec!(140)), None)
        .unwrap()
        .unwrap();
    settle(&paper, &session);
    assert_eq!(session.open_orders(Some(&aapl)).len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    session.cancel(order.id).unwrap();
    assert!(eventually(|| {
        session.order(order.id).map(|o| o.state()) == Some(OrderState::Cancelled)
    }));
    paper
        .inject(BrokerEvent::OrderStatus(OrderStatusReport {
            order_id: order.id,
            status: "Cancelled".to_string(),
            filled: 0,
            remaining: 20,
            avg_fill_price: None,
        }))
        .unwrap();
    settle(&paper, &session);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(session.open_orders(None).is_empty());
}

#[test]
fn test_resting_limit_fills_when_trade_reaches_it() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let order = session
        .place_order(&aapl, -30, Some(dec!(151)), None)
        .unwrap()
        .unwrap();
    paper.trade(aapl.id(), dec!(151.25), 100).unwrap();
    assert!(eventually(|| session.position(&aapl) == -30));
    settle(&paper, &session);
    let order = session.order(order.id).unwrap();
    assert_eq!(order.state(), OrderState::Filled);
    assert_eq!(order.filled, -30);
    assert_eq!(order.avg_fill_price, Some(dec!(151.25)));
}

#[test]
fn test_rejected_order_is_cancelled_with_message() {
    let (session, paper) = connect();
    let halted = session.resolve("HALT").unwrap();
    let order = session.place_order(&halted, 5, None, None).unwrap().unwrap();
    settle(&paper, &session);
    let order = session.order(order.id).unwrap();
    assert_eq!(order.state(), OrderState::Cancelled);
    assert!(order.message.unwrap().contains("rejected"));
}

#[test]
fn test_invalid_prices_are_rejected_locally() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let result = session.place_order(&aapl, 5, Some(dec!(-1)), None);
    assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
    assert!(session.place_order(&aapl, 0, None, None).unwrap().is_none());
    assert!(
        !paper
            .commands()
            .iter()
            .any(|c| matches!(c, SessionCommand::PlaceOrder(_)))
    );
}

#[test]
fn test_global_cancel_cancels_everything() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let first = session.place_order(&aapl, 5, Some(dec!(100)), None).unwrap().unwrap();
    let second = session.place_order(&aapl, -5, Some(dec!(200)), None).unwrap().unwrap();
    settle(&paper, &session);
    session.global_cancel().unwrap();
    assert!(eventually(|| session.open_orders(None).is_empty()));
    for id in [first.id, second.id] {
        assert_eq!(session.order(id).unwrap().state(), OrderState::Cancelled);
    }
    assert!(paper.resting_orders().is_empty());
}

#[test]
fn test_flatten_cancels_then_closes() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    session.place_order(&aapl, 40, None, None).unwrap();
    session.place_order(&aapl, 10, Some(dec!(120)), None).unwrap();
    assert!(eventually(|| session.position(&aapl) == 40));
    settle(&paper, &session);

    let closing = session.flatten(Some(&aapl)).unwrap();
    assert_eq!(closing.len(), 1);
    assert_eq!(closing[0].quantity, -40);
    assert!(eventually(|| session.position(&aapl) == 0));
    assert!(session.open_orders(Some(&aapl)).is_empty());
}

// =============================================================================
// Market Data
// =============================================================================

#[test]
fn test_bar_peek_reports_vwap() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    session
        .register(&aapl, Handlers::new().on_bar(Duration::from_secs(60), |_, _| {}))
        .unwrap();
    assert!(paper.is_subscribed(aapl.id()));

    paper.trade(aapl.id(), dec!(10), 100).unwrap();
    paper.trade(aapl.id(), dec!(12), 100).unwrap();
    settle(&paper, &session);

    let bar = session.peek_bar(&aapl).unwrap();
    assert_eq!(bar.vwap, 11.0);
    assert_eq!(bar.open, Some(10.0));
    assert_eq!(bar.high, Some(12.0));
    assert_eq!(bar.low, Some(10.0));
    assert_eq!(bar.close, Some(12.0));
    assert_eq!(bar.bar_volume, 200.0);
    assert_eq!(bar.volume, Some(200.0));
    assert_eq!(bar.bid, Some(149.99));
}

#[test]
fn test_bars_are_emitted_on_schedule() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    session
        .register(
            &aapl,
            Handlers::new().on_bar(Duration::from_millis(50), move |_, bar| {
                let _ = tx.send(bar.clone());
            }),
        )
        .unwrap();

    paper.trade(aapl.id(), dec!(10), 100).unwrap();
    paper.trade(aapl.id(), dec!(12), 100).unwrap();

    let mut traded = 0.0;
    let mut notional = 0.0;
    let deadline = Instant::now() + Duration::from_secs(2);
    while traded < 200.0 && Instant::now() < deadline {
        if let Ok(bar) = rx.recv_timeout(Duration::from_millis(200)) {
            traded += bar.bar_volume;
            notional += bar.vwap * bar.bar_volume;
        }
    }
    assert_eq!(traded, 200.0);
    assert_eq!(notional / traded, 11.0);

    // A bar with no trades opens at the previous close.
    let quiet = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(quiet.open, Some(12.0));
    assert_eq!(quiet.bar_volume, 0.0);
    assert_eq!(quiet.vwap, 0.0);
}

#[test]
fn test_second_bar_size_is_rejected() {
    let (session, _paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    session
        .register(&aapl, Handlers::new().on_bar(Duration::from_secs(1), |_, _| {}))
        .unwrap();
    let result = session.register(&aapl, Handlers::new().on_bar(Duration::from_secs(2), |_, _| {}));
    assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
    session
        .register(&aapl, Handlers::new().on_bar(Duration::from_secs(1), |_, _| {}))
        .unwrap();
}

#[test]
fn test_subscription_error_tears_down() {
    let (session, paper) = connect();
    let halted = session.resolve("HALT").unwrap();
    let result = session.register(&halted, Handlers::new().on_quote(|_, _| {}));
    assert!(matches!(result, Err(SessionError::Broker { code: 354, .. })));
    assert!(session.peek_bar(&halted).is_none());
    assert!(
        paper
            .commands()
            .contains(&SessionCommand::CancelMarketData {
                ticker_id: halted.id()
            })
    );
}

#[test]
fn test_concurrent_subscribers_share_failed_handshake() {
    let (session, _paper) = connect();
    let halted = session.resolve("HALT").unwrap();
    let barrier = std::sync::Barrier::new(2);

    let results: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let (session, halted, barrier) = (&session, &halted, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    session.register(halted, Handlers::new().on_quote(|_, _| {}))
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    for result in &results {
        assert!(matches!(result, Err(SessionError::Broker { code: 354, .. })));
    }
    assert!(session.peek_bar(&halted).is_none());
}

#[test]
fn test_concurrent_subscribers_send_one_request() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let barrier = std::sync::Barrier::new(3);

    thread::scope(|scope| {
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let (session, aapl, barrier) = (&session, &aapl, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    session.register(aapl, Handlers::new().on_quote(|_, _| {}))
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }
    });

    let requests = paper
        .commands()
        .iter()
        .filter(|command| matches!(command, SessionCommand::RequestMarketData { .. }))
        .count();
    assert_eq!(requests, 1);
    assert!(session.peek_bar(&aapl).is_some());
}

#[test]
fn test_racing_bar_sizes_admit_one() {
    let (session, _paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let barrier = std::sync::Barrier::new(3);

    let admitted = thread::scope(|scope| {
        let workers: Vec<_> = (1..=3)
            .map(|secs| {
                let (session, aapl, barrier) = (&session, &aapl, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    let handlers = Handlers::new().on_bar(Duration::from_secs(secs), |_, _| {});
                    session.register(aapl, handlers)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(Result::is_ok)
            .count()
    });

    assert_eq!(admitted, 1);
}

#[test]
fn test_quotes_and_halts_reach_handlers() {
    let (session, paper) = connect();
    let aapl = session.resolve("AAPL").unwrap();
    let quotes = Arc::new(Mutex::new(Vec::new()));
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let quote_sink = Arc::clone(&quotes);
    let alert_sink = Arc::clone(&alerts);
    let registration = session
        .register(
            &aapl,
            Handlers::new()
                .on_quote(move |_, quote| quote_sink.lock().push(quote.clone()))
                .on_alert(move |_, alert| alert_sink.lock().push(alert)),
        )
        .unwrap();

    paper.trade(aapl.id(), dec!(150.5), 300).unwrap();
    for value in [1.0, 0.0] {
        paper
            .inject(BrokerEvent::TickGeneric {
                instrument: aapl.id(),
                tick_type: TickField::Halted.code(),
                value,
            })
            .unwrap();
    }
    settle(&paper, &session);

    assert_eq!(quotes.lock().last().unwrap().last, Some(150.5));
    assert_eq!(*alerts.lock(), vec![Alert::Halt, Alert::Unhalt]);

    assert_eq!(session.unregister(&registration), 2);
    paper.trade(aapl.id(), dec!(151), 100).unwrap();
    let seen = quotes.lock().len();
    settle(&paper, &session);
    assert_eq!(quotes.lock().len(), seen);
}

// =============================================================================
// Reconciliation
// =============================================================================

fn reconcile_catalog() -> PaperConfig {
    catalog()
        .with_position(stock(AAPL, "AAPL"), 10, dec!(148))
        .with_position(stock(MSFT, "MSFT"), 25, dec!(405.50))
}

#[test]
fn test_reconcile_resolves_unknown_positions() {
    let (session, paper) = connect_with(reconcile_catalog(), config());
    let aapl = session.resolve("AAPL").unwrap();
    let external = paper.submit_external(stock(MSFT, "MSFT"), -5, dec!(420));

    let report = session.reconcile().unwrap();
    assert_eq!(report.positions_reported, 2);
    assert_eq!(report.instruments_resolved, 1);
    assert_eq!(report.resolution_failures, 0);
    assert_eq!(report.orders_materialized, 1);
    assert!(report.next_order_id > external);

    let msft = session.resolve(InstrumentId::new(MSFT)).unwrap();
    assert_eq!(session.position(&aapl), 10);
    assert_eq!(session.position(&msft), 25);
    assert_eq!(session.cost(&msft), Some(dec!(405.50)));

    let materialized = session.order(external).unwrap();
    assert_eq!(materialized.quantity, -5);
    assert_eq!(materialized.instrument, msft);
    assert_eq!(session.open_orders(Some(&msft)).len(), 1);

    // New orders never reuse the materialized id.
    let placed = session.place_order(&aapl, 1, None, None).unwrap().unwrap();
    assert!(placed.id > external);
}

#[test]
fn test_unknown_position_contract_counts_as_failure() {
    let orphan = stock(777_777, "GONE");
    let paper = reconcile_catalog().with_position(orphan, 3, dec!(12));
    let (session, _paper) = connect_with(paper, config());
    let report = session.reconcile().unwrap();
    assert_eq!(report.positions_reported, 3);
    assert_eq!(report.instruments_resolved, 2);
    assert_eq!(report.resolution_failures, 1);
    assert_eq!(session.positions()[&InstrumentId::new(777_777)].quantity, 3);
}

#[test]
fn test_reconcile_on_connect() {
    let mut config = config();
    config.reconcile_on_connect = true;
    let (session, _paper) = connect_with(reconcile_catalog(), config);
    let msft = session.resolve(InstrumentId::new(MSFT)).unwrap();
    assert_eq!(session.position(&msft), 25);
}

#[test]
fn test_later_position_report_wins() {
    let (session, paper) = connect_with(reconcile_catalog(), config());
    let aapl = session.resolve("AAPL").unwrap();
    let report = |quantity| {
        BrokerEvent::Position(session_bridge::session::PositionReport {
            account: "DU000000".to_string(),
            contract: stock(AAPL, "AAPL"),
            quantity,
            avg_cost: dec!(148),
        })
    };

    // A stale report queued ahead of the snapshot is overwritten by it.
    paper.inject(report(99)).unwrap();
    session.reconcile().unwrap();
    assert_eq!(session.position(&aapl), 10);

    // A report arriving after the snapshot overwrites it in turn.
    paper.inject(report(42)).unwrap();
    assert!(eventually(|| session.position(&aapl) == 42));
}
