//! Monte Carlo subsampling of noisy bins.
//!
//! Bins are visited in compacted order. A bin whose count exceeds the
//! reference noise threshold is replaced by the best of `n_iterations`
//! random subsamples, scored against the reference window:
//!
//! 1. `metric_gap`: mean of the zero-padded sorted inter-arrival gaps
//! 2. `metric_elow` / `metric_ehigh`: band-limited energy medians
//! 3. `metric_time`: mean of the accepted counts so far plus the candidate
//!    size, compared with the variance of that same sequence
//!
//! The last term couples consecutive bins, so the accepted counts are
//! threaded through the run as a [`RunningMoments`] accumulator.
//!
//! Every trial draws from its own `ChaCha8Rng` stream keyed by the bin seed
//! and the trial number. Trial outcomes are independent of execution order,
//! so the parallel search returns exactly what the serial one does.
#![allow(clippy::cast_precision_loss)]

use crate::binner::Bin;
use crate::reference::ReferenceWindow;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::cmp::Ordering;
use tecla_core::stats::{mean_padded_gap, median_in_place};
use tecla_core::{EnergyBand, Event, ProgressSink, Result, RunningMoments};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Energy median used when a subsample has no event in a band.
pub const EMPTY_BAND_SENTINEL: f64 = 999_999.0;

/// Configuration for the bin cleaner.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CleaningConfig {
    /// Random subsamples drawn per noisy bin.
    pub n_iterations: usize,
    /// Seed for reproducible runs (`None` seeds from the OS).
    pub seed: Option<u64>,
    /// Score trials of one bin on the rayon pool.
    pub parallel: bool,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            n_iterations: 10_000,
            seed: None,
            parallel: true,
        }
    }
}

impl CleaningConfig {
    /// Creates a new cleaning configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of trials per noisy bin.
    #[must_use]
    pub fn with_n_iterations(mut self, n_iterations: usize) -> Self {
        self.n_iterations = n_iterations;
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets whether trials are scored in parallel.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// What happened to a bin.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinOutcome {
    /// Count at or under the noise threshold; passed through.
    BelowThreshold,
    /// Replaced by the best trial.
    Resampled {
        /// Winning trial number.
        trial: usize,
        /// Its score.
        score: f64,
    },
    /// Noisy, but `[accept_low, accept_high] ∩ [1, count]` is empty; kept.
    DegenerateRange,
    /// Noisy, but no trial produced a finite score; kept.
    NoCandidate,
}

/// Cleaning decision for one compacted bin.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CleaningResult {
    /// Compacted bin index.
    pub index: usize,
    /// Event count before cleaning.
    pub original_count: usize,
    /// Event count after cleaning.
    pub kept_count: usize,
    /// Source-table rows of the kept events.
    pub kept_rows: Vec<usize>,
    /// Kept events, matching `kept_rows`.
    pub kept_events: Vec<Event>,
    /// How the bin was handled.
    pub outcome: BinOutcome,
}

impl CleaningResult {
    fn unchanged(bin: &Bin, outcome: BinOutcome) -> Self {
        Self {
            index: bin.index,
            original_count: bin.count(),
            kept_count: bin.count(),
            kept_rows: bin.rows.clone(),
            kept_events: bin.events.clone(),
            outcome,
        }
    }

    /// True if events were removed from this bin.
    #[must_use]
    pub fn is_resampled(&self) -> bool {
        matches!(self.outcome, BinOutcome::Resampled { .. })
    }
}

/// A scored trial.
#[derive(Clone, Debug)]
struct Trial {
    trial: usize,
    score: f64,
    picks: Vec<usize>,
}

/// Lower score wins; equal scores go to the earlier trial.
fn better(a: Trial, b: Trial) -> Trial {
    match b
        .score
        .total_cmp(&a.score)
        .then_with(|| b.trial.cmp(&a.trial))
    {
        Ordering::Less => b,
        _ => a,
    }
}

/// Median of a band, or the sentinel when the band is empty.
fn band_median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        EMPTY_BAND_SENTINEL
    } else {
        median_in_place(values)
    }
}

/// Scores the subsample `picks` of `bin` given the accepted-count history.
#[must_use]
pub fn score_subsample(
    bin: &Bin,
    picks: &[usize],
    window: &ReferenceWindow,
    history: &RunningMoments,
) -> f64 {
    let times: Vec<f64> = picks.iter().map(|&j| bin.events[j].time).collect();
    let metric_gap = mean_padded_gap(&times);

    let mut soft = Vec::new();
    let mut hard = Vec::new();
    for &j in picks {
        let energy = bin.events[j].energy;
        if EnergyBand::SOFT.contains(energy) {
            soft.push(energy);
        } else if EnergyBand::HARD.contains(energy) {
            hard.push(energy);
        }
    }
    let metric_elow = band_median(&mut soft);
    let metric_ehigh = band_median(&mut hard);

    let curve = history.with(picks.len() as f64);
    let metric_time = curve.mean();
    let target_time = if curve.len() > 1 {
        curve.variance()
    } else {
        0.0
    };

    ((metric_gap - window.target_gap).powi(2)
        + (metric_elow - window.target_energy_low).powi(2)
        + (metric_ehigh - window.target_energy_high).powi(2)
        + (metric_time - target_time).powi(2))
    .sqrt()
}

/// Draws and scores trial `trial` of a bin.
///
/// Returns `None` when the score does not beat the initial infinite score
/// (for example, a NaN reference target).
fn run_trial(
    bin: &Bin,
    window: &ReferenceWindow,
    history: &RunningMoments,
    bin_seed: u64,
    trial: usize,
    (low, high): (usize, usize),
) -> Option<Trial> {
    let mut rng = ChaCha8Rng::seed_from_u64(bin_seed);
    rng.set_stream(trial as u64);

    let n_g = rng.random_range(low..=high);
    let picks = index::sample(&mut rng, bin.count(), n_g).into_vec();
    let score = score_subsample(bin, &picks, window, history);

    (score < f64::INFINITY).then_some(Trial {
        trial,
        score,
        picks,
    })
}

/// Sequential cleaning run over compacted bins.
///
/// Yields one [`CleaningResult`] per bin in compacted order. Stopping early
/// leaves the results already yielded valid.
pub struct CleaningRun<'a> {
    bins: &'a [Bin],
    window: &'a ReferenceWindow,
    config: CleaningConfig,
    rng: ChaCha8Rng,
    history: RunningMoments,
    next: usize,
}

impl<'a> CleaningRun<'a> {
    /// Starts a run.
    ///
    /// # Errors
    /// Returns `InvalidWindow` if the window's sampling bounds are not finite.
    pub fn new(
        bins: &'a [Bin],
        window: &'a ReferenceWindow,
        config: &CleaningConfig,
    ) -> Result<Self> {
        window.validate()?;
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        Ok(Self {
            bins,
            window,
            config: config.clone(),
            rng,
            history: RunningMoments::new(),
            next: 0,
        })
    }

    /// Accepted counts so far.
    #[must_use]
    pub fn history(&self) -> &RunningMoments {
        &self.history
    }

    /// Number of bins already processed.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.next
    }

    /// Total number of bins in the run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.bins.len()
    }

    fn clean_bin(&mut self, bin: &Bin) -> CleaningResult {
        if !self.window.is_noisy(bin.count()) {
            return CleaningResult::unchanged(bin, BinOutcome::BelowThreshold);
        }

        // Drawn for every noisy bin so later bins do not depend on whether
        // earlier ranges were degenerate.
        let bin_seed: u64 = self.rng.random();

        let Some(range) = self.window.sampling_range(bin.count()) else {
            log::debug!(
                "bin {}: {} events, empty sampling range, kept unchanged",
                bin.index,
                bin.count()
            );
            return CleaningResult::unchanged(bin, BinOutcome::DegenerateRange);
        };

        let window = self.window;
        let history = &self.history;
        let best = if self.config.parallel {
            (0..self.config.n_iterations)
                .into_par_iter()
                .filter_map(|trial| run_trial(bin, window, history, bin_seed, trial, range))
                .reduce_with(better)
        } else {
            (0..self.config.n_iterations)
                .filter_map(|trial| run_trial(bin, window, history, bin_seed, trial, range))
                .reduce(better)
        };

        let Some(best) = best else {
            log::debug!(
                "bin {}: {} events, no finite-score trial, kept unchanged",
                bin.index,
                bin.count()
            );
            return CleaningResult::unchanged(bin, BinOutcome::NoCandidate);
        };

        log::debug!(
            "bin {}: {} -> {} events (trial {}, score {:.6})",
            bin.index,
            bin.count(),
            best.picks.len(),
            best.trial,
            best.score
        );

        CleaningResult {
            index: bin.index,
            original_count: bin.count(),
            kept_count: best.picks.len(),
            kept_rows: best.picks.iter().map(|&j| bin.rows[j]).collect(),
            kept_events: best.picks.iter().map(|&j| bin.events[j]).collect(),
            outcome: BinOutcome::Resampled {
                trial: best.trial,
                score: best.score,
            },
        }
    }
}

impl Iterator for CleaningRun<'_> {
    type Item = CleaningResult;

    fn next(&mut self) -> Option<Self::Item> {
        let bins = self.bins;
        let bin = bins.get(self.next)?;
        let result = self.clean_bin(bin);
        self.history.push(result.kept_count as f64);
        self.next += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bins.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CleaningRun<'_> {}

/// Cleans every bin, reporting progress after each one.
///
/// # Errors
/// Returns `InvalidWindow` before any bin is processed; see
/// [`CleaningRun::new`].
pub fn clean_bins<P: ProgressSink + ?Sized>(
    bins: &[Bin],
    window: &ReferenceWindow,
    config: &CleaningConfig,
    progress: &mut P,
) -> Result<Vec<CleaningResult>> {
    let run = CleaningRun::new(bins, window, config)?;
    let total = run.total();
    let mut results = Vec::with_capacity(total);
    for result in run {
        results.push(result);
        progress.report(results.len() as f64 / total as f64);
    }

    let resampled = results.iter().filter(|r| r.is_resampled()).count();
    let noisy = results
        .iter()
        .filter(|r| r.outcome != BinOutcome::BelowThreshold)
        .count();
    log::info!(
        "cleaned {total} bins: {noisy} above threshold, {resampled} resampled, {} iterations each",
        config.n_iterations
    );

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashSet;
    use tecla_core::Error;

    fn make_bin(index: usize, count: usize) -> Bin {
        let events: Vec<Event> = (0..count)
            .map(|i| {
                let energy = if i % 2 == 0 { 1000.0 } else { 3000.0 };
                Event::new(index as f64 + i as f64 / count as f64, 0, 0, energy)
            })
            .collect();
        let times: Vec<f64> = events.iter().map(|e| e.time).collect();
        Bin {
            index,
            source_index: index,
            start_time: index as f64,
            rows: (0..count).map(|i| index * 1000 + i).collect(),
            intert: tecla_core::stats::padded_gaps(&times),
            events,
        }
    }

    fn window() -> ReferenceWindow {
        ReferenceWindow::from_rate(10.0, 1.04_f64.sqrt(), 0.1, 1000.0, 3000.0)
    }

    #[test]
    fn test_better_prefers_lower_then_earlier() {
        let a = Trial {
            trial: 3,
            score: 1.0,
            picks: vec![],
        };
        let b = Trial {
            trial: 1,
            score: 1.0,
            picks: vec![],
        };
        let c = Trial {
            trial: 0,
            score: 2.0,
            picks: vec![],
        };
        assert_eq!(better(a.clone(), b.clone()).trial, 1);
        assert_eq!(better(b, a.clone()).trial, 1);
        assert_eq!(better(a, c).trial, 3);
    }

    #[test]
    fn test_score_first_bin_has_zero_target_time() {
        let bin = make_bin(0, 4);
        let picks = [0, 1, 2, 3];
        // Gaps 0.25 each: padded mean 0.75 / 4. Soft median 1000, hard 3000.
        // Time term: mean([4]) = 4 against target 0.
        let score = score_subsample(&bin, &picks, &window(), &RunningMoments::new());
        let expected = ((0.1875_f64 - 0.1).powi(2) + 16.0).sqrt();
        assert_relative_eq!(score, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_score_time_term_uses_history() {
        let bin = make_bin(0, 4);
        let picks = [0, 1, 2, 3];
        let times: Vec<f64> = bin.events.iter().map(|e| e.time).collect();
        // Gap and energy targets match the subsample, leaving only the time term.
        let w = ReferenceWindow::from_rate(
            10.0,
            1.0,
            tecla_core::stats::mean_padded_gap(&times),
            1000.0,
            3000.0,
        );
        let mut history = RunningMoments::new();
        history.push(10.0);
        history.push(12.0);

        // Counts [10, 12, 4]: mean 26/3, population variance 104/9.
        let score = score_subsample(&bin, &picks, &w, &history);
        assert_relative_eq!(score, (26.0_f64 / 3.0 - 104.0 / 9.0).abs(), epsilon = 1e-12);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_score_uses_sentinel_for_empty_band() {
        let bin = make_bin(0, 4);
        // Only soft-band events picked.
        let score = score_subsample(&bin, &[0, 2], &window(), &RunningMoments::new());
        assert!(score > EMPTY_BAND_SENTINEL - 3000.0);
    }

    #[test]
    fn test_below_threshold_passes_through() {
        let bins = vec![make_bin(0, 11), make_bin(1, 12)];
        let config = CleaningConfig::new().with_n_iterations(50).with_seed(1);
        let results = clean_bins(&bins, &window(), &config, &mut tecla_core::NoProgress).unwrap();

        for (bin, result) in bins.iter().zip(&results) {
            assert_eq!(result.outcome, BinOutcome::BelowThreshold);
            assert_eq!(result.kept_count, bin.count());
            assert_eq!(result.kept_rows, bin.rows);
            assert_eq!(result.kept_events, bin.events);
        }
    }

    #[test]
    fn test_noisy_bin_is_resampled_within_bounds() {
        let bins = vec![make_bin(0, 10), make_bin(1, 50), make_bin(2, 9)];
        let w = window();
        let config = CleaningConfig::new().with_n_iterations(500).with_seed(7);
        let results = clean_bins(&bins, &w, &config, &mut tecla_core::NoProgress).unwrap();

        let noisy = &results[1];
        assert!(noisy.is_resampled());
        assert!(noisy.kept_count >= 8 && noisy.kept_count <= 12);
        assert_eq!(noisy.kept_rows.len(), noisy.kept_count);
        assert_eq!(noisy.kept_events.len(), noisy.kept_count);
        let unique: HashSet<usize> = noisy.kept_rows.iter().copied().collect();
        assert_eq!(unique.len(), noisy.kept_count);
        assert!(noisy.kept_rows.iter().all(|r| bins[1].rows.contains(r)));

        assert_eq!(results[0].outcome, BinOutcome::BelowThreshold);
        assert_eq!(results[2].outcome, BinOutcome::BelowThreshold);
    }

    #[test]
    fn test_degenerate_range_keeps_bin() {
        let bins = vec![make_bin(0, 5)];
        let mut w = window();
        w.noise_threshold = 3.0;
        w.accept_low = 9.0;
        w.accept_high = 4.0;
        let config = CleaningConfig::new().with_n_iterations(20).with_seed(3);
        let results = clean_bins(&bins, &w, &config, &mut tecla_core::NoProgress).unwrap();

        assert_eq!(results[0].outcome, BinOutcome::DegenerateRange);
        assert_eq!(results[0].kept_count, 5);
        assert_eq!(results[0].kept_rows, bins[0].rows);
    }

    #[test]
    fn test_nan_target_yields_no_candidate() {
        let bins = vec![make_bin(0, 40)];
        let w = ReferenceWindow::from_rate(10.0, 1.0, 0.1, f64::NAN, 3000.0);
        let config = CleaningConfig::new().with_n_iterations(20).with_seed(3);
        let results = clean_bins(&bins, &w, &config, &mut tecla_core::NoProgress).unwrap();
        assert_eq!(results[0].outcome, BinOutcome::NoCandidate);
        assert_eq!(results[0].kept_count, 40);
    }

    #[test]
    fn test_invalid_window_is_rejected() {
        let bins = vec![make_bin(0, 5)];
        let mut w = window();
        w.accept_high = f64::INFINITY;
        let err = clean_bins(&bins, &w, &CleaningConfig::new(), &mut tecla_core::NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidWindow { .. }));
    }

    #[test]
    fn test_zero_iterations_keeps_noisy_bins() {
        let bins = vec![make_bin(0, 10), make_bin(1, 50)];
        let config = CleaningConfig::new().with_n_iterations(0).with_seed(5);
        let results = clean_bins(&bins, &window(), &config, &mut tecla_core::NoProgress).unwrap();

        assert_eq!(results[0].outcome, BinOutcome::BelowThreshold);
        assert_eq!(results[1].outcome, BinOutcome::NoCandidate);
        assert_eq!(results[1].kept_count, 50);
        assert_eq!(results[1].kept_rows, bins[1].rows);
    }

    #[test]
    fn test_history_tracks_kept_counts() {
        let bins = vec![make_bin(0, 10), make_bin(1, 60), make_bin(2, 11)];
        let config = CleaningConfig::new().with_n_iterations(100).with_seed(11);
        let w = window();
        let mut run = CleaningRun::new(&bins, &w, &config).unwrap();
        assert_eq!(run.len(), 3);

        let first = run.next().unwrap();
        let second = run.next().unwrap();
        assert_eq!(run.processed(), 2);
        assert_eq!(run.history().len(), 2);
        assert_relative_eq!(
            run.history().mean(),
            (first.kept_count + second.kept_count) as f64 / 2.0
        );
    }
}
