//! tecla-core: Core types for photon event-list cleaning.
//!
//! This crate provides the event table, the error taxonomy shared by the
//! pipeline stages, numeric helpers and the progress observer trait.
//!

pub mod error;
pub mod event;
pub mod progress;
pub mod stats;
pub mod table;

pub use error::{Error, Result};
pub use event::{EnergyBand, Event};
pub use progress::{NoProgress, ProgressSink};
pub use stats::RunningMoments;
pub use table::EventTable;
