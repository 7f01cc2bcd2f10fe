//! Progress reporting.

/// Observer notified with a completion fraction in `[0, 1]`.
///
/// Purely observational; implementations must not influence results.
/// Any `FnMut(f64)` closure is a sink.
pub trait ProgressSink {
    /// Reports the fraction of work completed.
    fn report(&mut self, fraction: f64);
}

impl<F: FnMut(f64)> ProgressSink for F {
    #[inline]
    fn report(&mut self, fraction: f64) {
        self(fraction);
    }
}

/// Sink that discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    #[inline]
    fn report(&mut self, _fraction: f64) {}
}
