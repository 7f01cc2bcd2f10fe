//! High-level processing helpers that combine binning, reference statistics
//! and cleaning.
#![allow(clippy::cast_precision_loss)]

use crate::binner::{bin_events, BinningConfig, LightCurve};
use crate::cleaner::{clean_bins, CleaningConfig, CleaningResult};
use crate::reference::{compute_reference, ReferenceSelection, ReferenceWindow};
use tecla_core::{EventTable, ProgressSink, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Share of the progress range spent on binning.
const BINNING_SHARE: f64 = 0.1;

/// Everything needed for one cleaning run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PipelineConfig {
    /// Light-curve binning.
    pub binning: BinningConfig,
    /// Monte Carlo search settings.
    pub cleaning: CleaningConfig,
    /// Reference segment.
    pub reference: ReferenceSelection,
}

impl PipelineConfig {
    /// Creates a configuration with default binning and cleaning settings.
    #[must_use]
    pub fn new(reference: ReferenceSelection) -> Self {
        Self {
            binning: BinningConfig::default(),
            cleaning: CleaningConfig::default(),
            reference,
        }
    }

    /// Sets the binning configuration.
    #[must_use]
    pub fn with_binning(mut self, binning: BinningConfig) -> Self {
        self.binning = binning;
        self
    }

    /// Sets the cleaning configuration.
    #[must_use]
    pub fn with_cleaning(mut self, cleaning: CleaningConfig) -> Self {
        self.cleaning = cleaning;
        self
    }
}

/// One point of the original-vs-cleaned light curve.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComparisonPoint {
    /// Compacted bin index.
    pub index: usize,
    /// Left edge of the bin.
    pub start_time: f64,
    /// Count before cleaning.
    pub original_count: usize,
    /// Count after cleaning.
    pub kept_count: usize,
}

/// Aggregate counts of a run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CleaningSummary {
    /// Events in the source table.
    pub n_events: usize,
    /// Intervals before compaction.
    pub n_bins: usize,
    /// Bins with more than two events.
    pub compacted_bins: usize,
    /// Bins above the noise threshold.
    pub noisy_bins: usize,
    /// Bins replaced by a subsample.
    pub resampled_bins: usize,
    /// Events flagged as kept.
    pub kept_events: usize,
    /// Events flagged as noisy, including those in dropped bins.
    pub noisy_events: usize,
    /// Reference statistics used for the run.
    pub reference: ReferenceWindow,
}

/// Result of [`run_pipeline`].
#[derive(Clone, Debug)]
pub struct CleaningReport {
    /// Binned input.
    pub light_curve: LightCurve,
    /// Reference statistics.
    pub reference: ReferenceWindow,
    /// One result per compacted bin.
    pub results: Vec<CleaningResult>,
}

impl CleaningReport {
    /// Per-row kept flag for a table of `n_rows` events.
    #[must_use]
    pub fn kept_mask(&self, n_rows: usize) -> Vec<bool> {
        kept_mask(&self.results, n_rows)
    }

    /// Per-row `IS_NOISY` flags (1 = dropped).
    #[must_use]
    pub fn noisy_flags(&self, n_rows: usize) -> Vec<u8> {
        self.kept_mask(n_rows)
            .into_iter()
            .map(|kept| u8::from(!kept))
            .collect()
    }

    /// Original and kept count per compacted bin.
    #[must_use]
    pub fn comparison_series(&self) -> Vec<ComparisonPoint> {
        comparison_series(&self.light_curve, &self.results)
    }

    /// Aggregate counts.
    #[must_use]
    pub fn summary(&self) -> CleaningSummary {
        let kept_events: usize = self.results.iter().map(|r| r.kept_count).sum();
        let n_events = self.light_curve.n_events();
        CleaningSummary {
            n_events,
            n_bins: self.light_curve.n_bins(),
            compacted_bins: self.light_curve.len(),
            noisy_bins: self
                .results
                .iter()
                .filter(|r| self.reference.is_noisy(r.original_count))
                .count(),
            resampled_bins: self.results.iter().filter(|r| r.is_resampled()).count(),
            kept_events,
            noisy_events: n_events - kept_events,
            reference: self.reference.clone(),
        }
    }
}

/// Marks every row that belongs to some kept event set.
///
/// Rows from bins dropped by compaction are never kept.
#[must_use]
pub fn kept_mask(results: &[CleaningResult], n_rows: usize) -> Vec<bool> {
    let mut mask = vec![false; n_rows];
    for row in results.iter().flat_map(|r| r.kept_rows.iter().copied()) {
        if let Some(flag) = mask.get_mut(row) {
            *flag = true;
        }
    }
    mask
}

/// Pairs each compacted bin with its cleaning result.
#[must_use]
pub fn comparison_series(curve: &LightCurve, results: &[CleaningResult]) -> Vec<ComparisonPoint> {
    curve
        .bins()
        .iter()
        .zip(results)
        .map(|(bin, result)| ComparisonPoint {
            index: bin.index,
            start_time: bin.start_time,
            original_count: bin.count(),
            kept_count: result.kept_count,
        })
        .collect()
}

/// Bins the table, derives the reference window and cleans every bin.
///
/// Progress covers the whole run: binning first, then one step per bin.
///
/// # Errors
/// Propagates the first failing stage: `InvalidConfiguration` from binning or
/// cleaning setup, `InvalidSelection`/`EmptyReference` from the reference
/// window, `InvalidWindow` from cleaning setup.
pub fn run_pipeline<P: ProgressSink + ?Sized>(
    table: &EventTable,
    config: &PipelineConfig,
    progress: &mut P,
) -> Result<CleaningReport> {
    let light_curve = {
        let mut binning_progress = |f: f64| progress.report(f * BINNING_SHARE);
        bin_events(table, &config.binning, &mut binning_progress)?
    };

    let (start, end) = config.reference.resolve(&light_curve)?;
    let reference = compute_reference(light_curve.bins(), start, end)?;

    let results = {
        let mut cleaning_progress =
            |f: f64| progress.report(BINNING_SHARE + f * (1.0 - BINNING_SHARE));
        clean_bins(
            light_curve.bins(),
            &reference,
            &config.cleaning,
            &mut cleaning_progress,
        )?
    };

    Ok(CleaningReport {
        light_curve,
        reference,
        results,
    })
}
