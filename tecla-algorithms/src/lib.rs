//! tecla-algorithms: Light-curve cleaning for photon event lists.
//!
//! This crate provides the three pipeline stages:
//! - **Binning** - fixed-width time bins, compacted to bins with more than two events
//! - **Reference statistics** - target gap, energy and rate statistics of a good segment
//! - **Cleaning** - per-bin Monte Carlo subsampling of noisy bins
//!
#![warn(missing_docs)]

mod binner;
mod cleaner;
mod processing;
mod reference;

pub use binner::{bin_events, Bin, BinningConfig, LightCurve, MIN_BIN_EVENTS};
pub use cleaner::{
    clean_bins, score_subsample, BinOutcome, CleaningConfig, CleaningResult, CleaningRun,
    EMPTY_BAND_SENTINEL,
};
pub use processing::{
    comparison_series, kept_mask, run_pipeline, CleaningReport, CleaningSummary, ComparisonPoint,
    PipelineConfig,
};
pub use reference::{compute_reference, ReferenceSelection, ReferenceWindow};
