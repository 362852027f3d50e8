//! Market data value types: tick fields, quotes, bars, and alerts.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::InstrumentId;

/// Broker tick type, decoded from its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickField {
    /// Bid size (0).
    BidSize,
    /// Bid price (1).
    Bid,
    /// Ask price (2).
    Ask,
    /// Ask size (3).
    AskSize,
    /// Last trade price (4).
    Last,
    /// Last trade size (5).
    LastSize,
    /// Cumulative daily volume (8).
    Volume,
    /// Last trade timestamp, epoch seconds (45).
    LastTimestamp,
    /// Real-time volume string (48).
    RtVolume,
    /// Trading halted flag (49).
    Halted,
    /// Futures open interest (86).
    FuturesOpenInterest,
}

impl TickField {
    /// Decode a broker tick type. Unused codes return `None`.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::BidSize),
            1 => Some(Self::Bid),
            2 => Some(Self::Ask),
            3 => Some(Self::AskSize),
            4 => Some(Self::Last),
            5 => Some(Self::LastSize),
            8 => Some(Self::Volume),
            45 => Some(Self::LastTimestamp),
            48 => Some(Self::RtVolume),
            49 => Some(Self::Halted),
            86 => Some(Self::FuturesOpenInterest),
            _ => None,
        }
    }

    /// Numeric broker code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::BidSize => 0,
            Self::Bid => 1,
            Self::Ask => 2,
            Self::AskSize => 3,
            Self::Last => 4,
            Self::LastSize => 5,
            Self::Volume => 8,
            Self::LastTimestamp => 45,
            Self::RtVolume => 48,
            Self::Halted => 49,
            Self::FuturesOpenInterest => 86,
        }
    }
}

/// Generic tick list requested with every market data subscription
/// (real-time volume).
pub const GENERIC_TICKS: &str = "233";

/// Bar aggregation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarType {
    /// Fixed wall-clock interval.
    Time,
}

/// Registry key for bar handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarKey {
    /// Aggregation type.
    pub bar_type: BarType,
    /// Bar period.
    pub size: Duration,
    /// Instrument the bars are built from.
    pub instrument: InstrumentId,
}

impl fmt::Display for BarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}:{}ms:{}",
            self.bar_type,
            self.size.as_millis(),
            self.instrument
        )
    }
}

/// Latest top-of-book and trade state for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument id.
    pub instrument: InstrumentId,
    /// Time of the last update.
    pub timestamp: DateTime<Utc>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best bid size.
    pub bid_size: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Best ask size.
    pub ask_size: Option<f64>,
    /// Last trade price.
    pub last: Option<f64>,
    /// Last trade size.
    pub last_size: Option<f64>,
    /// Last trade time.
    pub last_time: Option<DateTime<Utc>>,
    /// Cumulative daily volume.
    pub volume: Option<f64>,
    /// Open interest.
    pub open_interest: Option<f64>,
}

/// An immutable OHLCV+VWAP snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument id.
    pub instrument: InstrumentId,
    /// Time of the last tick folded into this bar.
    pub timestamp: DateTime<Utc>,
    /// Best bid.
    pub bid: Option<f64>,
    /// Best bid size.
    pub bid_size: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Best ask size.
    pub ask_size: Option<f64>,
    /// Last trade price.
    pub last: Option<f64>,
    /// Last trade size.
    pub last_size: Option<f64>,
    /// Last trade time.
    pub last_time: Option<DateTime<Utc>>,
    /// First trade price of the bar.
    pub open: Option<f64>,
    /// Highest trade price of the bar.
    pub high: Option<f64>,
    /// Lowest trade price of the bar.
    pub low: Option<f64>,
    /// Last trade price of the bar.
    pub close: Option<f64>,
    /// Volume-weighted trade price of the bar; 0 without volume.
    pub vwap: f64,
    /// Cumulative daily volume.
    pub volume: Option<f64>,
    /// Open interest.
    pub open_interest: Option<f64>,
    /// Traded size within the bar.
    pub bar_volume: f64,
}

/// Session and instrument alerts delivered to alert handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Alert {
    /// Connectivity to the broker was lost.
    Disconnect,
    /// Connectivity to the broker was restored.
    Reconnect,
    /// The session connection was closed.
    ConnectionClosed,
    /// Trading in the instrument was halted.
    Halt,
    /// Trading in the instrument resumed.
    Unhalt,
}

impl Alert {
    /// Returns true if the alert concerns the whole session rather than
    /// one instrument.
    #[must_use]
    pub const fn is_session_wide(self) -> bool {
        matches!(self, Self::Disconnect | Self::Reconnect | Self::ConnectionClosed)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnect => "Disconnect",
            Self::Reconnect => "Reconnect",
            Self::ConnectionClosed => "Connection Closed",
            Self::Halt => "Halt",
            Self::Unhalt => "Unhalt",
        };
        f.write_str(label)
    }
}
