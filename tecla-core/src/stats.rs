//! Small numeric helpers shared by the binning and cleaning stages.
//!
//! Empty inputs yield `NaN` rather than an error, so callers decide whether
//! an undefined statistic is fatal.
#![allow(clippy::cast_precision_loss)]

/// Median of `values`, averaging the two middle elements for even lengths.
///
/// Sorts `values` in place.
#[must_use]
pub fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = n / 2;
    if n % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Median of `values` without modifying the input.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    let mut scratch = values.to_vec();
    median_in_place(&mut scratch)
}

/// Arithmetic mean.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by `n`).
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Consecutive differences of the time-sorted `times`.
#[must_use]
pub fn sorted_gaps(times: &[f64]) -> Vec<f64> {
    let mut sorted = times.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Sorted gaps left-padded with zeros to `times.len()` entries.
///
/// `k` events give `k - 1` gaps; the array is indexable by event position.
#[must_use]
pub fn padded_gaps(times: &[f64]) -> Vec<f64> {
    let gaps = sorted_gaps(times);
    let mut padded = vec![0.0; times.len().saturating_sub(gaps.len())];
    padded.extend(gaps);
    padded
}

/// Mean of [`padded_gaps`] without building the array.
///
/// The sorted gaps telescope to `max - min`, and the padding contributes
/// zeros, so the mean is `(max - min) / n`.
#[must_use]
pub fn mean_padded_gap(times: &[f64]) -> f64 {
    let Some(&first) = times.first() else {
        return f64::NAN;
    };
    let (lo, hi) = times
        .iter()
        .fold((first, first), |(lo, hi), &t| (lo.min(t), hi.max(t)));
    (hi - lo) / times.len() as f64
}

/// Running mean and population variance of a growing sequence (Welford).
///
/// Holds the accepted per-bin counts of a cleaning run so that the mean and
/// variance of `history + [candidate]` can be evaluated in O(1) per trial.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    len: usize,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values pushed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if nothing has been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds a value.
    pub fn push(&mut self, value: f64) {
        *self = self.with(value);
    }

    /// Mean of the values pushed so far.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.len == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Population variance of the values pushed so far.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.len == 0 {
            f64::NAN
        } else {
            self.m2 / self.len as f64
        }
    }

    /// The accumulator that would result from pushing `value`, leaving `self`
    /// untouched.
    #[must_use]
    pub fn with(&self, value: f64) -> Self {
        let len = self.len + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / len as f64;
        let m2 = self.m2 + delta * (value - mean);
        Self { len, mean, m2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_median_odd_even() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_population_std() {
        let counts = [10.0, 12.0, 11.0, 9.0, 10.0];
        assert_relative_eq!(mean(&counts), 10.4);
        assert_relative_eq!(variance(&counts), 1.04, epsilon = 1e-12);
        assert_relative_eq!(std_dev(&counts), 1.04_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(variance(&[7.0]), 0.0);
    }

    #[test]
    fn test_padded_gaps_length_matches_input() {
        let times = [3.0, 1.0, 2.5, 1.5];
        let padded = padded_gaps(&times);
        assert_eq!(padded.len(), 4);
        assert_relative_eq!(padded[0], 0.0);
        assert_relative_eq!(padded[1], 0.5);
        assert_relative_eq!(padded[2], 1.0);
        assert_relative_eq!(padded[3], 0.5);

        assert_eq!(padded_gaps(&[5.0]), vec![0.0]);
        assert!(padded_gaps(&[]).is_empty());
    }

    #[test]
    fn test_mean_padded_gap_matches_array() {
        let times = [10.4, 10.0, 10.7, 10.1, 10.2];
        assert_relative_eq!(
            mean_padded_gap(&times),
            mean(&padded_gaps(&times)),
            epsilon = 1e-12
        );
        assert_relative_eq!(mean_padded_gap(&[42.0]), 0.0);
    }

    #[test]
    fn test_running_moments_match_batch() {
        let values = [4.0, 7.0, 13.0, 16.0];
        let mut moments = RunningMoments::new();
        for &v in &values[..3] {
            moments.push(v);
        }
        let candidate = moments.with(values[3]);
        assert_eq!(moments.len(), 3);
        assert_eq!(candidate.len(), 4);
        assert_relative_eq!(candidate.mean(), mean(&values), epsilon = 1e-12);
        assert_relative_eq!(candidate.variance(), variance(&values), epsilon = 1e-12);
    }

    #[test]
    fn test_running_moments_single_value_has_zero_variance() {
        let single = RunningMoments::new().with(9.0);
        assert_relative_eq!(single.mean(), 9.0);
        assert_relative_eq!(single.variance(), 0.0);
    }
}
