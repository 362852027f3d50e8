//! Broker-reported positions.
//!
//! The broker is the source of truth: every report overwrites the local
//! entry. Reads never fail; an instrument the book has never seen reads
//! as flat with an unknown cost.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::InstrumentId;

/// One position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Signed quantity.
    pub quantity: i64,
    /// Average cost per unit, multiplier removed; unknown until reported.
    pub avg_cost: Option<Decimal>,
}

impl Position {
    /// Returns true if nothing is held.
    #[must_use]
    pub const fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

/// Positions keyed by instrument.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: RwLock<HashMap<InstrumentId, Position>>,
}

impl PositionBook {
    /// Empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an instrument as flat with unknown cost, unless it is
    /// already tracked.
    pub fn seed(&self, instrument: InstrumentId) {
        self.positions.write().entry(instrument).or_default();
    }

    /// Overwrite a position with a broker report.
    ///
    /// `avg_cost` as reported includes the contract multiplier; it is
    /// stored per unit.
    pub fn update(
        &self,
        instrument: InstrumentId,
        quantity: i64,
        avg_cost: Decimal,
        multiplier: Decimal,
    ) -> Position {
        let avg_cost = if multiplier.is_zero() {
            avg_cost
        } else {
            avg_cost / multiplier
        };
        let position = Position {
            quantity,
            avg_cost: Some(avg_cost),
        };
        self.positions.write().insert(instrument, position);
        tracing::debug!(instrument = %instrument, quantity, avg_cost = %avg_cost, "Position updated");
        position
    }

    /// Position for an instrument.
    #[must_use]
    pub fn get(&self, instrument: InstrumentId) -> Position {
        if let Some(position) = self.positions.read().get(&instrument) {
            return *position;
        }
        tracing::warn!(instrument = %instrument, "No position tracked for instrument");
        Position::default()
    }

    /// Signed quantity held.
    #[must_use]
    pub fn quantity(&self, instrument: InstrumentId) -> i64 {
        self.get(instrument).quantity
    }

    /// Average cost per unit, when known.
    #[must_use]
    pub fn cost(&self, instrument: InstrumentId) -> Option<Decimal> {
        self.get(instrument).avg_cost
    }

    /// Returns true if the instrument is tracked.
    #[must_use]
    pub fn contains(&self, instrument: InstrumentId) -> bool {
        self.positions.read().contains_key(&instrument)
    }

    /// Every tracked position.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<InstrumentId, Position> {
        self.positions.read().clone()
    }

    /// Forget every position.
    pub fn clear(&self) {
        self.positions.write().clear();
    }
}
