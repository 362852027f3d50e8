//! Session Bridge Demo
//!
//! Runs a short trading session against the in-process paper broker:
//! resolves instruments, streams one-second bars, trades, reconciles, and
//! flattens, then prints the Prometheus counters.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p session-bridge
//! ```
//!
//! # Environment Variables
//!
//! See [`SessionConfig::from_env`]; additionally `RUST_LOG` (default:
//! `session_bridge=info`) and `LOG_ANSI`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use session_bridge::domain::{Contract, SecurityType};
use session_bridge::observability::{init_metrics, render_metrics};
use session_bridge::telemetry::init_telemetry;
use session_bridge::{
    ContractDetails, ContractSpec, Handlers, InstrumentId, PaperConfig, PaperSession,
    SessionConfig, TradingSession, event_channel,
};

/// Bar period streamed during the demo.
const BAR_SIZE: Duration = Duration::from_secs(1);

/// Pause between simulated trades.
const TRADE_INTERVAL: Duration = Duration::from_millis(150);

fn main() -> anyhow::Result<()> {
    load_dotenv();
    let _telemetry = init_telemetry();
    if let Err(error) = init_metrics() {
        tracing::warn!(error = %error, "Metrics recorder not installed");
    }

    let config = SessionConfig::from_env().context("loading session config")?;
    tracing::info!(
        host = %config.connection.host,
        port = config.connection.port,
        client_id = config.connection.client_id,
        reconcile_on_connect = config.reconcile_on_connect,
        "Configuration loaded"
    );

    let (events, receiver) = event_channel();
    let paper = Arc::new(PaperSession::with_config(events, paper_catalog()));
    let session = TradingSession::connect(paper.clone(), receiver, config)
        .context("connecting to paper broker")?;

    let aapl = session.resolve("AAPL").context("resolving AAPL")?;
    let es = session
        .resolve(ContractSpec::future("ES", "CME"))
        .context("resolving ES")?;
    tracing::info!(stock = %aapl, future = %es, "Instruments resolved");

    session.register(
        &aapl,
        Handlers::new()
            .on_bar(BAR_SIZE, |instrument, bar| {
                tracing::info!(
                    instrument = %instrument,
                    open = ?bar.open,
                    high = ?bar.high,
                    low = ?bar.low,
                    close = ?bar.close,
                    vwap = bar.vwap,
                    volume = bar.bar_volume,
                    "Bar"
                );
            })
            .on_order(|order| {
                tracing::info!(
                    order_id = %order.id,
                    state = ?order.state(),
                    filled = order.filled,
                    avg_price = ?order.avg_fill_price,
                    commission = %order.commission,
                    "Order update"
                );
            })
            .on_alert(|instrument, alert| {
                tracing::warn!(instrument = %instrument, %alert, "Alert");
            }),
    )?;

    session.order_target(&aapl, 100, None, None)?;
    let resting = session.place_order(&aapl, 50, Some(Decimal::new(14_950, 2)), None)?;

    let prices = [150.10, 150.05, 149.80, 149.40, 149.60, 150.20, 150.35, 150.00];
    for (i, price) in prices.iter().cycle().take(20).enumerate() {
        let price = Decimal::try_from(*price).context("trade price")?;
        let size = 100 + u32::try_from(i % 4).unwrap_or(0) * 50;
        paper.trade(aapl.id(), price, size)?;
        thread::sleep(TRADE_INTERVAL);
    }

    if let Some(order) = resting.and_then(|o| session.order(o.id)) {
        tracing::info!(order_id = %order.id, state = ?order.state(), "Limit order");
    }
    tracing::info!(
        position = session.position(&aapl),
        cost = ?session.cost(&aapl),
        "AAPL position"
    );

    let report = session.reconcile()?;
    tracing::info!(?report, "Reconciled");

    let closing = session.flatten(None)?;
    thread::sleep(TRADE_INTERVAL);
    tracing::info!(
        closing = closing.len(),
        positions = ?session.positions(),
        "Flattened"
    );

    session.disconnect()?;
    if let Some(rendered) = render_metrics() {
        println!("{rendered}");
    }
    Ok(())
}

fn contract(id: i64, symbol: &str, security_type: SecurityType, exchange: &str) -> Contract {
    Contract {
        id: InstrumentId::new(id),
        symbol: symbol.to_string(),
        security_type,
        exchange: exchange.to_string(),
        currency: "USD".to_string(),
        expiry: None,
        strike: None,
        right: None,
        multiplier: None,
    }
}

fn future(id: i64, month: &str) -> ContractDetails {
    let mut contract = contract(id, "ES", SecurityType::Future, "CME");
    contract.expiry = Some(format!("{month}19"));
    contract.multiplier = Some(Decimal::from(50));
    ContractDetails {
        contract_month: Some(month.to_string()),
        ..ContractDetails::new(contract)
    }
}

/// A stock, three ES contract months, and a position held from an
/// earlier session.
fn paper_catalog() -> PaperConfig {
    let msft = contract(272_093, "MSFT", SecurityType::Stock, "NASDAQ");
    PaperConfig::default()
        .with_listing(
            ContractDetails::new(contract(265_598, "AAPL", SecurityType::Stock, "NASDAQ")),
            Decimal::new(150, 0),
        )
        .with_listing(ContractDetails::new(msft.clone()), Decimal::new(410, 0))
        .with_listing(future(495_512_563, "202703"), Decimal::new(5_800, 0))
        .with_listing(future(551_601_561, "202612"), Decimal::new(5_790, 0))
        .with_listing(future(620_731_015, "202706"), Decimal::new(5_810, 0))
        .with_position(msft, 25, Decimal::new(40_500, 2))
}

/// Load `.env` from the working directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}
