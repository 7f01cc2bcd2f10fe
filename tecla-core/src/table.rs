//! Structure of Arrays (`SoA`) event table.
//!
//! This module defines the `EventTable` structure which stores the raw
//! event list in parallel columns, mirroring the column layout of a FITS
//! event extension (`TIME`, `RAWX`, `RAWY`, `PI`). Rows are identified by
//! their position; nothing downstream reorders the table.

use crate::error::{Error, Result};
use crate::event::Event;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An event list stored in Structure of Arrays (`SoA`) format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventTable {
    time: Vec<f64>,
    raw_x: Vec<i32>,
    raw_y: Vec<i32>,
    energy: Vec<f64>,
}

impl EventTable {
    /// Creates a new empty table with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            time: Vec::with_capacity(capacity),
            raw_x: Vec::with_capacity(capacity),
            raw_y: Vec::with_capacity(capacity),
            energy: Vec::with_capacity(capacity),
        }
    }

    /// Builds a table from equal-length columns.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the column lengths differ.
    pub fn from_columns(
        time: Vec<f64>,
        raw_x: Vec<i32>,
        raw_y: Vec<i32>,
        energy: Vec<f64>,
    ) -> Result<Self> {
        let n = time.len();
        if raw_x.len() != n || raw_y.len() != n || energy.len() != n {
            return Err(Error::InvalidConfiguration(format!(
                "column length mismatch: TIME={n}, RAWX={}, RAWY={}, PI={}",
                raw_x.len(),
                raw_y.len(),
                energy.len()
            )));
        }
        Ok(Self {
            time,
            raw_x,
            raw_y,
            energy,
        })
    }

    /// Returns the number of events in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Appends a single event.
    pub fn push(&mut self, event: Event) {
        self.time.push(event.time);
        self.raw_x.push(event.raw_x);
        self.raw_y.push(event.raw_y);
        self.energy.push(event.energy);
    }

    /// Returns the event at `row`, if any.
    #[inline]
    #[must_use]
    pub fn get(&self, row: usize) -> Option<Event> {
        Some(Event {
            time: *self.time.get(row)?,
            raw_x: self.raw_x[row],
            raw_y: self.raw_y[row],
            energy: self.energy[row],
        })
    }

    /// Iterates over the events in row order.
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len()).filter_map(|row| self.get(row))
    }

    /// Arrival time column.
    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.time
    }

    /// Raw X column.
    #[must_use]
    pub fn raw_x(&self) -> &[i32] {
        &self.raw_x
    }

    /// Raw Y column.
    #[must_use]
    pub fn raw_y(&self) -> &[i32] {
        &self.raw_y
    }

    /// Energy (PI) column.
    #[must_use]
    pub fn energies(&self) -> &[f64] {
        &self.energy
    }

    /// Returns `(min, max)` of the finite arrival times, or `None` if there are none.
    #[must_use]
    pub fn time_range(&self) -> Option<(f64, f64)> {
        min_max(&self.time)
    }

    /// Returns `(min, max)` of the finite energies, or `None` if there are none.
    #[must_use]
    pub fn energy_range(&self) -> Option<(f64, f64)> {
        min_max(&self.energy)
    }
}

impl FromIterator<Event> for EventTable {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut table = Self::with_capacity(iter.size_hint().0);
        for event in iter {
            table.push(event);
        }
        table
    }
}

/// Range of the finite entries of `values`.
fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let mut finite = values.iter().copied().filter(|v| v.is_finite());
    let first = finite.next()?;
    Some(finite.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}
