//! Target statistics from a reference ("good") segment of the light curve.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::binner::{Bin, LightCurve};
use tecla_core::stats::{median, median_in_place, sorted_gaps, std_dev};
use tecla_core::{EnergyBand, Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the caller designates the reference segment.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReferenceSelection {
    /// Inclusive range of compacted bin indices.
    Indices {
        /// First compacted index.
        start: usize,
        /// Last compacted index.
        end: usize,
    },
    /// Inclusive range of source bin indices, snapped inward to surviving bins.
    SourceIndices {
        /// First source index.
        start: usize,
        /// Last source index.
        end: usize,
    },
    /// Compacted bins whose left edge lies in `[start, end]`.
    TimeRange {
        /// Earliest bin start time.
        start: f64,
        /// Latest bin start time.
        end: f64,
    },
}

impl ReferenceSelection {
    /// Resolves the selection to an inclusive compacted index range.
    ///
    /// Compacted ranges are passed through untouched, even when they extend
    /// past the last bin; missing bins simply contribute no events.
    ///
    /// # Errors
    /// Returns `InvalidSelection` for inverted ranges or ranges that cover no
    /// surviving bin.
    pub fn resolve(&self, curve: &LightCurve) -> Result<(usize, usize)> {
        match *self {
            Self::Indices { start, end } => {
                if start > end {
                    return Err(Error::InvalidSelection(format!(
                        "start bin {start} is after end bin {end}"
                    )));
                }
                Ok((start, end))
            }
            Self::SourceIndices { start, end } => {
                if start > end {
                    return Err(Error::InvalidSelection(format!(
                        "start source bin {start} is after end source bin {end}"
                    )));
                }
                match (curve.first_at_or_after(start), curve.last_at_or_before(end)) {
                    (Some(first), Some(last)) if first <= last => Ok((first, last)),
                    _ => Err(Error::InvalidSelection(format!(
                        "source bins {start}..={end} contain no bin with more than two events"
                    ))),
                }
            }
            Self::TimeRange { start, end } => {
                if start.is_nan() || end.is_nan() || start > end {
                    return Err(Error::InvalidSelection(format!(
                        "invalid time range [{start}, {end}]"
                    )));
                }
                let bins = curve.bins();
                let first = bins.partition_point(|bin| bin.start_time < start);
                let past_last = bins.partition_point(|bin| bin.start_time <= end);
                if first >= past_last {
                    return Err(Error::InvalidSelection(format!(
                        "no bin starts within [{start}, {end}]"
                    )));
                }
                Ok((first, past_last - 1))
            }
        }
    }
}

/// Target statistics derived from the reference window.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferenceWindow {
    /// First compacted index of the window.
    pub start: usize,
    /// Last compacted index of the window (inclusive).
    pub end: usize,
    /// Median inter-arrival gap of the pooled, time-sorted window events.
    pub target_gap: f64,
    /// Median energy in the soft band.
    pub target_energy_low: f64,
    /// Median energy in the hard band.
    pub target_energy_high: f64,
    /// Median count of the window bins.
    pub rate_median: f64,
    /// Population standard deviation of the window bin counts.
    pub rate_sd: f64,
    /// `floor(rate_median - rate_sd)`.
    pub accept_low: f64,
    /// `floor(rate_median + 2 * rate_sd)`.
    pub accept_high: f64,
    /// Bins with more events than this are cleaned.
    pub noise_threshold: f64,
    /// Number of pooled events.
    pub n_events: usize,
    /// Number of window bins that exist in the compacted sequence.
    pub n_bins: usize,
}

impl ReferenceWindow {
    /// Builds a window from rate statistics alone, with the target gap and
    /// energies supplied directly.
    #[must_use]
    pub fn from_rate(
        rate_median: f64,
        rate_sd: f64,
        target_gap: f64,
        target_energy_low: f64,
        target_energy_high: f64,
    ) -> Self {
        Self {
            start: 0,
            end: 0,
            target_gap,
            target_energy_low,
            target_energy_high,
            rate_median,
            rate_sd,
            accept_low: (rate_median - rate_sd).floor(),
            accept_high: (rate_median + 2.0 * rate_sd).floor(),
            noise_threshold: rate_median + 2.0 * rate_sd,
            n_events: 0,
            n_bins: 0,
        }
    }

    /// True if a bin with `count` events must be cleaned.
    #[inline]
    #[must_use]
    pub fn is_noisy(&self, count: usize) -> bool {
        count as f64 > self.noise_threshold
    }

    /// Inclusive subsample-size range `[max(1, accept_low), min(count, accept_high)]`,
    /// or `None` when it is empty.
    #[must_use]
    pub fn sampling_range(&self, count: usize) -> Option<(usize, usize)> {
        let low = self.accept_low.floor().max(1.0);
        let high = self.accept_high.floor().min(count as f64);
        (high >= low).then(|| (low as usize, high as usize))
    }

    /// Checks that the sampling bounds are usable.
    ///
    /// # Errors
    /// Returns `InvalidWindow` if either bound is not finite.
    pub fn validate(&self) -> Result<()> {
        if self.accept_low.is_finite() && self.accept_high.is_finite() {
            Ok(())
        } else {
            Err(Error::InvalidWindow {
                accept_low: self.accept_low,
                accept_high: self.accept_high,
            })
        }
    }
}

/// Computes reference statistics over compacted bins `start..=end`.
///
/// Indices past the last bin contribute nothing.
///
/// # Errors
/// Returns `EmptyReference` if the window holds no events.
pub fn compute_reference(bins: &[Bin], start: usize, end: usize) -> Result<ReferenceWindow> {
    let window: Vec<&Bin> = bins
        .iter()
        .skip(start)
        .take(end.saturating_add(1).saturating_sub(start))
        .collect();

    let n_events: usize = window.iter().map(|bin| bin.count()).sum();
    if n_events == 0 {
        return Err(Error::EmptyReference { start, end });
    }

    let pooled_times: Vec<f64> = window.iter().flat_map(|bin| bin.times()).collect();
    let mut gaps = sorted_gaps(&pooled_times);
    let target_gap = median_in_place(&mut gaps);

    let mut soft = Vec::new();
    let mut hard = Vec::new();
    for energy in window.iter().flat_map(|bin| bin.energies()) {
        if EnergyBand::SOFT.contains_open(energy) {
            soft.push(energy);
        } else if EnergyBand::HARD.contains_open(energy) {
            hard.push(energy);
        }
    }
    if soft.is_empty() || hard.is_empty() {
        log::warn!(
            "reference window [{start}, {end}] has no events in the {} band; \
             noisy bins will be kept unchanged",
            if soft.is_empty() { "soft" } else { "hard" }
        );
    }
    let target_energy_low = median_in_place(&mut soft);
    let target_energy_high = median_in_place(&mut hard);

    let counts: Vec<f64> = window.iter().map(|bin| bin.count() as f64).collect();
    let rate_median = median(&counts);
    let rate_sd = std_dev(&counts);

    let reference = ReferenceWindow {
        start,
        end,
        target_gap,
        target_energy_low,
        target_energy_high,
        n_events,
        n_bins: window.len(),
        ..ReferenceWindow::from_rate(rate_median, rate_sd, 0.0, 0.0, 0.0)
    };

    log::info!(
        "reference [{start}, {end}]: {} bins, {} events, rate {:.3} +/- {:.3}, \
         accept [{}, {}], threshold {:.3}",
        reference.n_bins,
        n_events,
        rate_median,
        rate_sd,
        reference.accept_low,
        reference.accept_high,
        reference.noise_threshold
    );

    Ok(reference)
}
