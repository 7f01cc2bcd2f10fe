//! Fixed-width time binning of an event table.
//!
//! The observation span `[min(time), max(time)]` is split into `n_bins`
//! equal-width intervals. Only bins holding more than [`MIN_BIN_EVENTS`]
//! events survive compaction; survivors receive dense indices starting at 0.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::cmp::Ordering;
use tecla_core::stats::padded_gaps;
use tecla_core::{Error, Event, EventTable, ProgressSink, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Bins with this many events or fewer are dropped during compaction.
pub const MIN_BIN_EVENTS: usize = 2;

const PROGRESS_STRIDE: usize = 1024;

/// Configuration for light-curve binning.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinningConfig {
    /// Number of equal-width bins over the observation span.
    pub n_bins: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self { n_bins: 1024 }
    }
}

impl BinningConfig {
    /// Creates a new binning configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of bins.
    #[must_use]
    pub fn with_n_bins(mut self, n_bins: usize) -> Self {
        self.n_bins = n_bins;
        self
    }
}

/// A compacted time bin.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bin {
    /// Dense index among surviving bins.
    pub index: usize,
    /// Index among all `n_bins` intervals.
    pub source_index: usize,
    /// Left edge of the interval.
    pub start_time: f64,
    /// Source-table rows, in table scan order.
    pub rows: Vec<usize>,
    /// Events matching `rows`.
    pub events: Vec<Event>,
    /// Sorted inter-arrival gaps, left-padded with zeros to `count()` entries.
    pub intert: Vec<f64>,
}

impl Bin {
    /// Number of events in the bin.
    #[must_use]
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Arrival times in scan order.
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.events.iter().map(|e| e.time)
    }

    /// Energies in scan order.
    pub fn energies(&self) -> impl Iterator<Item = f64> + '_ {
        self.events.iter().map(|e| e.energy)
    }
}

/// Output of the binner: compacted bins plus the full bin grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LightCurve {
    bins: Vec<Bin>,
    grid: Vec<f64>,
    n_events: usize,
}

impl LightCurve {
    /// Compacted bins, ordered by source index.
    #[must_use]
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Bin edges, `n_bins + 1` entries.
    #[must_use]
    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    /// Number of intervals before compaction.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.grid.len().saturating_sub(1)
    }

    /// Number of events in the source table.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Number of compacted bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// True if no bin survived compaction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Maps a source bin index to its compacted index, if the bin survived.
    #[must_use]
    pub fn compacted_index(&self, source_index: usize) -> Option<usize> {
        self.bins
            .binary_search_by_key(&source_index, |bin| bin.source_index)
            .ok()
    }

    /// First compacted bin whose source index is `>= source_index`.
    #[must_use]
    pub fn first_at_or_after(&self, source_index: usize) -> Option<usize> {
        let idx = self
            .bins
            .partition_point(|bin| bin.source_index < source_index);
        (idx < self.bins.len()).then_some(idx)
    }

    /// Last compacted bin whose source index is `<= source_index`.
    #[must_use]
    pub fn last_at_or_before(&self, source_index: usize) -> Option<usize> {
        self.bins
            .partition_point(|bin| bin.source_index <= source_index)
            .checked_sub(1)
    }

    /// Number of events that fell into dropped bins.
    #[must_use]
    pub fn dropped_events(&self) -> usize {
        self.n_events - self.bins.iter().map(Bin::count).sum::<usize>()
    }
}

/// Bins `table` into `config.n_bins` intervals and compacts sparse bins.
///
/// Reports binning progress per scanned event block.
///
/// # Errors
/// Returns `InvalidConfiguration` if `n_bins` is zero or the table spans
/// fewer than two distinct arrival times.
pub fn bin_events<P: ProgressSink + ?Sized>(
    table: &EventTable,
    config: &BinningConfig,
    progress: &mut P,
) -> Result<LightCurve> {
    let n_bins = config.n_bins;
    if n_bins == 0 {
        return Err(Error::InvalidConfiguration(
            "number of bins must be positive".to_string(),
        ));
    }
    let (min_t, max_t) = table.time_range().ok_or_else(|| {
        Error::InvalidConfiguration("event table is empty".to_string())
    })?;
    // Also rejects a NaN span.
    if max_t.partial_cmp(&min_t) != Some(Ordering::Greater) {
        return Err(Error::InvalidConfiguration(format!(
            "event times span a single value ({min_t}); need at least two distinct times"
        )));
    }

    let step = (max_t - min_t) / n_bins as f64;
    let grid: Vec<f64> = (0..=n_bins).map(|i| min_t + step * i as f64).collect();

    let times = table.times();
    let total = times.len();
    let mut slots: Vec<Vec<usize>> = vec![Vec::new(); n_bins];
    let mut skipped = 0usize;

    for (row, &time) in times.iter().enumerate() {
        if time.is_finite() {
            // The event at max(time) lands on the right edge; fold it into
            // the last bin along with any rounding overflow.
            let slot = (((time - min_t) / step).floor() as usize).min(n_bins - 1);
            slots[slot].push(row);
        } else {
            skipped += 1;
        }
        if (row + 1) % PROGRESS_STRIDE == 0 {
            progress.report((row + 1) as f64 / total as f64);
        }
    }
    progress.report(1.0);

    if skipped > 0 {
        log::warn!("skipped {skipped} events with non-finite arrival times");
    }

    let mut bins = Vec::new();
    for (source_index, rows) in slots.into_iter().enumerate() {
        if rows.len() <= MIN_BIN_EVENTS {
            continue;
        }
        let events: Vec<Event> = rows.iter().filter_map(|&row| table.get(row)).collect();
        let bin_times: Vec<f64> = events.iter().map(|e| e.time).collect();
        bins.push(Bin {
            index: bins.len(),
            source_index,
            start_time: grid[source_index],
            intert: padded_gaps(&bin_times),
            rows,
            events,
        });
    }

    log::info!(
        "binned {} events into {} intervals of {:.6} s, {} kept after compaction",
        total,
        n_bins,
        step,
        bins.len()
    );

    Ok(LightCurve {
        bins,
        grid,
        n_events: total,
    })
}
