//! Tick accumulation into quotes and bars.
//!
//! One [`TickAccumulator`] exists per subscribed instrument. The dispatch
//! thread feeds it ticks; bar tasks snapshot it with [`TickAccumulator::bar`].
//!
//! Only trade prices move OHLC. VWAP is built from real-time volume trades,
//! which carry both price and size.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::domain::{Bar, InstrumentId, Quote};

/// Errors from feeding an accumulator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    /// Unknown quote field name.
    #[error("invalid quote field: {0}")]
    InvalidField(String),

    /// Negative, NaN, or infinite value.
    #[error("invalid value {value} for {field}")]
    InvalidValue {
        /// Field being set.
        field: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// Malformed real-time volume string.
    #[error("malformed real-time volume: {0}")]
    MalformedRtVolume(String),
}

/// Input fields of an accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteField {
    /// Best bid.
    Bid,
    /// Best bid size.
    BidSize,
    /// Best ask.
    Ask,
    /// Best ask size.
    AskSize,
    /// Last trade price.
    Last,
    /// Last trade size.
    LastSize,
    /// Last trade time, epoch seconds.
    LastTime,
    /// Cumulative daily volume.
    Volume,
    /// Open interest.
    OpenInterest,
}

impl QuoteField {
    /// Field name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::BidSize => "bidsize",
            Self::Ask => "ask",
            Self::AskSize => "asksize",
            Self::Last => "last",
            Self::LastSize => "lastsize",
            Self::LastTime => "lasttime",
            Self::Volume => "volume",
            Self::OpenInterest => "open_interest",
        }
    }
}

impl FromStr for QuoteField {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bid" => Ok(Self::Bid),
            "bidsize" => Ok(Self::BidSize),
            "ask" => Ok(Self::Ask),
            "asksize" => Ok(Self::AskSize),
            "last" => Ok(Self::Last),
            "lastsize" => Ok(Self::LastSize),
            "lasttime" => Ok(Self::LastTime),
            "volume" => Ok(Self::Volume),
            "open_interest" => Ok(Self::OpenInterest),
            other => Err(TickError::InvalidField(other.to_string())),
        }
    }
}

/// Parsed real-time volume tick: `price;size;epoch-ms;volume;vwap;flag`.
///
/// Empty fields are common and parse to `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtVolume {
    /// Trade price.
    pub price: Option<f64>,
    /// Trade size.
    pub size: Option<f64>,
    /// Trade time.
    pub time: Option<DateTime<Utc>>,
    /// Cumulative daily volume.
    pub volume: Option<f64>,
    /// Broker's daily VWAP.
    pub vwap: Option<f64>,
    /// Filled by a single market maker.
    pub single_trade: bool,
}

impl FromStr for RtVolume {
    type Err = TickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(';').collect();
        if parts.len() < 5 {
            return Err(TickError::MalformedRtVolume(s.to_string()));
        }
        let number = |raw: &str| raw.trim().parse::<f64>().ok().filter(|v| v.is_finite());
        let time = parts[2]
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(Self {
            price: number(parts[0]),
            size: number(parts[1]),
            time,
            volume: number(parts[3]),
            vwap: number(parts[4]),
            single_trade: parts
                .get(5)
                .is_some_and(|flag| flag.trim().eq_ignore_ascii_case("true")),
        })
    }
}

/// Running quote and bar state for one instrument.
#[derive(Debug, Clone)]
pub struct TickAccumulator {
    instrument: InstrumentId,
    timestamp: DateTime<Utc>,
    bid: Option<f64>,
    bid_size: Option<f64>,
    ask: Option<f64>,
    ask_size: Option<f64>,
    last: Option<f64>,
    last_size: Option<f64>,
    last_time: Option<DateTime<Utc>>,
    volume: Option<f64>,
    open_interest: Option<f64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    price_volume: f64,
    traded_size: f64,
}

impl TickAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            timestamp: Utc::now(),
            bid: None,
            bid_size: None,
            ask: None,
            ask_size: None,
            last: None,
            last_size: None,
            last_time: None,
            volume: None,
            open_interest: None,
            open: None,
            high: None,
            low: None,
            close: None,
            price_volume: 0.0,
            traded_size: 0.0,
        }
    }

    /// Instrument this accumulator belongs to.
    #[must_use]
    pub const fn instrument(&self) -> InstrumentId {
        self.instrument
    }

    /// Set one input field. Last-price updates extend OHLC.
    pub fn add(&mut self, field: QuoteField, value: f64) -> Result<(), TickError> {
        check(field.as_str(), value)?;
        self.timestamp = Utc::now();
        match field {
            QuoteField::Bid => self.bid = Some(value),
            QuoteField::BidSize => self.bid_size = Some(value),
            QuoteField::Ask => self.ask = Some(value),
            QuoteField::AskSize => self.ask_size = Some(value),
            QuoteField::Last => {
                self.last = Some(value);
                self.extend_ohlc(value);
            }
            QuoteField::LastSize => self.last_size = Some(value),
            QuoteField::LastTime => {
                self.last_time = Utc.timestamp_opt(value as i64, 0).single();
            }
            QuoteField::Volume => self.volume = Some(value),
            QuoteField::OpenInterest => self.open_interest = Some(value),
        }
        Ok(())
    }

    /// Record one trade with its size. Feeds OHLC, VWAP, and bar volume.
    pub fn add_trade(
        &mut self,
        price: f64,
        size: f64,
        time: Option<DateTime<Utc>>,
    ) -> Result<(), TickError> {
        check("price", price)?;
        check("size", size)?;
        self.timestamp = Utc::now();
        self.last = Some(price);
        self.last_size = Some(size);
        if time.is_some() {
            self.last_time = time;
        }
        self.extend_ohlc(price);
        self.price_volume += price * size;
        self.traded_size += size;
        Ok(())
    }

    fn extend_ohlc(&mut self, price: f64) {
        if self.open.is_none() {
            self.open = Some(price);
        }
        self.high = Some(self.high.map_or(price, |h| h.max(price)));
        self.low = Some(self.low.map_or(price, |l| l.min(price)));
        self.close = Some(price);
    }

    /// VWAP of trades since the last bar; 0 without volume.
    #[must_use]
    pub fn vwap(&self) -> f64 {
        if self.traded_size > 0.0 {
            self.price_volume / self.traded_size
        } else {
            0.0
        }
    }

    /// Current quote snapshot.
    #[must_use]
    pub const fn quote(&self) -> Quote {
        Quote {
            instrument: self.instrument,
            timestamp: self.timestamp,
            bid: self.bid,
            bid_size: self.bid_size,
            ask: self.ask,
            ask_size: self.ask_size,
            last: self.last,
            last_size: self.last_size,
            last_time: self.last_time,
            volume: self.volume,
            open_interest: self.open_interest,
        }
    }

    /// Snapshot the current bar without resetting anything.
    #[must_use]
    pub fn peek(&self) -> Bar {
        Bar {
            instrument: self.instrument,
            timestamp: self.timestamp,
            bid: self.bid,
            bid_size: self.bid_size,
            ask: self.ask,
            ask_size: self.ask_size,
            last: self.last,
            last_size: self.last_size,
            last_time: self.last_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            vwap: self.vwap(),
            volume: self.volume,
            open_interest: self.open_interest,
            bar_volume: self.traded_size,
        }
    }

    /// Snapshot the current bar, then start the next one at the close.
    pub fn bar(&mut self) -> Bar {
        let bar = self.peek();
        self.open = self.close;
        self.high = self.close;
        self.low = self.close;
        self.price_volume = 0.0;
        self.traded_size = 0.0;
        bar
    }
}

fn check(field: &'static str, value: f64) -> Result<(), TickError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TickError::InvalidValue { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn acc() -> TickAccumulator {
        TickAccumulator::new(InstrumentId::new(1))
    }

    #[test]
    fn test_first_trade_seeds_ohlc() {
        let mut a = acc();
        a.add(QuoteField::Last, 10.0).unwrap();
        let bar = a.peek();
        assert_eq!(bar.open, Some(10.0));
        assert_eq!(bar.high, Some(10.0));
        assert_eq!(bar.low, Some(10.0));
        assert_eq!(bar.close, Some(10.0));
    }

    #[test]
    fn test_quotes_do_not_move_ohlc() {
        let mut a = acc();
        a.add(QuoteField::Bid, 9.0).unwrap();
        a.add(QuoteField::Ask, 11.0).unwrap();
        let bar = a.peek();
        assert_eq!(bar.open, None);
        assert_eq!(bar.bid, Some(9.0));
        assert_eq!(bar.ask, Some(11.0));
    }

    #[test]
    fn test_trades_widen_range() {
        let mut a = acc();
        for price in [10.0, 12.0, 8.0, 11.0] {
            a.add(QuoteField::Last, price).unwrap();
        }
        let bar = a.peek();
        assert_eq!(bar.open, Some(10.0));
        assert_eq!(bar.high, Some(12.0));
        assert_eq!(bar.low, Some(8.0));
        assert_eq!(bar.close, Some(11.0));
    }

    #[test]
    fn test_vwap() {
        let mut a = acc();
        a.add_trade(10.0, 2.0, None).unwrap();
        a.add_trade(12.0, 2.0, None).unwrap();
        let bar = a.peek();
        assert!((bar.vwap - 11.0).abs() < 1e-12);
        assert_eq!(bar.bar_volume, 4.0);
    }

    #[test]
    fn test_vwap_zero_without_volume() {
        let mut a = acc();
        a.add(QuoteField::Last, 10.0).unwrap();
        assert_eq!(a.peek().vwap, 0.0);
    }

    #[test]
    fn test_bar_resets_to_close() {
        let mut a = acc();
        a.add_trade(10.0, 2.0, None).unwrap();
        a.add_trade(12.0, 2.0, None).unwrap();
        a.add_trade(11.5, 1.0, None).unwrap();
        let first = a.bar();
        assert_eq!(first.high, Some(12.0));

        let next = a.peek();
        assert_eq!(next.open, Some(11.5));
        assert_eq!(next.high, Some(11.5));
        assert_eq!(next.low, Some(11.5));
        assert_eq!(next.close, Some(11.5));
        assert_eq!(next.vwap, 0.0);
        assert_eq!(next.bar_volume, 0.0);
    }

    #[test]
    fn test_peek_does_not_reset() {
        let mut a = acc();
        a.add_trade(10.0, 1.0, None).unwrap();
        a.add_trade(14.0, 1.0, None).unwrap();
        assert_eq!(a.peek(), a.peek());
        assert_eq!(a.peek().open, Some(10.0));
    }

    #[test_case(-1.0 ; "negative")]
    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    fn test_add_rejects_bad_values(value: f64) {
        let mut a = acc();
        assert!(matches!(
            a.add(QuoteField::Bid, value),
            Err(TickError::InvalidValue { field: "bid", .. })
        ));
        assert!(a.add_trade(value, 1.0, None).is_err());
    }

    #[test]
    fn test_quote_field_parse() {
        assert_eq!("asksize".parse::<QuoteField>().unwrap(), QuoteField::AskSize);
        assert_eq!(
            "vwap".parse::<QuoteField>(),
            Err(TickError::InvalidField("vwap".to_string()))
        );
    }

    #[test]
    fn test_rt_volume_parse() {
        let rt: RtVolume = "701.28;1;1348075471534;67854;701.46918464;true".parse().unwrap();
        assert_eq!(rt.price, Some(701.28));
        assert_eq!(rt.size, Some(1.0));
        assert_eq!(rt.volume, Some(67854.0));
        assert!(rt.single_trade);
        assert_eq!(
            rt.time.map(|t| t.timestamp_millis()),
            Some(1_348_075_471_534)
        );
    }

    #[test]
    fn test_rt_volume_missing_price() {
        let rt: RtVolume = ";0;1348075471534;67854;701.46918464;false".parse().unwrap();
        assert_eq!(rt.price, None);
        assert_eq!(rt.volume, Some(67854.0));
        assert!("1;2".parse::<RtVolume>().is_err());
    }

    #[test]
    fn test_last_time_from_epoch_seconds() {
        let mut a = acc();
        a.add(QuoteField::LastTime, 1_700_000_000.0).unwrap();
        assert_eq!(
            a.quote().last_time.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }
}
