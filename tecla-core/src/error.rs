//! Error types for tecla-core.

use thiserror::Error;

/// Result type alias for tecla operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tecla operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid binning or cleaning parameters, or a degenerate time range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The reference window contains no events.
    #[error("reference window [{start}, {end}] contains no events")]
    EmptyReference { start: usize, end: usize },

    /// The sampling bounds derived from the reference window are not finite.
    #[error(
        "invalid reference window: sampling bounds [{accept_low}, {accept_high}] are not finite"
    )]
    InvalidWindow { accept_low: f64, accept_high: f64 },

    /// A reference selection that cannot be mapped onto the light curve.
    #[error("invalid reference selection: {0}")]
    InvalidSelection(String),
}
