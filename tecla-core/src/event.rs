//! Photon event types.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single photon event from an event list.
///
/// Events carry no identity of their own; the row index in the owning
/// [`EventTable`] is what ties a cleaning decision back to the source.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Arrival time (mission elapsed seconds).
    pub time: f64,
    /// Raw detector column.
    pub raw_x: i32,
    /// Raw detector row.
    pub raw_y: i32,
    /// Pulse-invariant energy channel.
    pub energy: f64,
}

impl Event {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(time: f64, raw_x: i32, raw_y: i32, energy: f64) -> Self {
        Self {
            time,
            raw_x,
            raw_y,
            energy,
        }
    }
}

/// Energy band used when scoring a candidate subsample.
///
/// Bounds are open below and closed above. The reference statistics use
/// open bounds on both ends; see [`EnergyBand::contains_open`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnergyBand {
    /// Exclusive lower bound.
    pub low: f64,
    /// Upper bound (inclusive for scoring, exclusive for reference).
    pub high: f64,
}

impl EnergyBand {
    /// Soft band, PI channels 500-2000.
    pub const SOFT: Self = Self::new(500.0, 2000.0);
    /// Hard band, PI channels 2000-10000.
    pub const HARD: Self = Self::new(2000.0, 10000.0);

    /// Creates a new energy band.
    #[must_use]
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// `low < energy <= high`, the rule used for trial scoring.
    #[inline]
    #[must_use]
    pub fn contains(&self, energy: f64) -> bool {
        self.low < energy && energy <= self.high
    }

    /// `low < energy < high`, the rule used for reference statistics.
    #[inline]
    #[must_use]
    pub fn contains_open(&self, energy: f64) -> bool {
        self.low < energy && energy < self.high
    }
}
