//! tecla-io: event-table file I/O for TECLA.
//!
//! FITS (through cfitsio) and CSV readers, and writers for the annotated
//! event table, the light curve and the cleaning comparison series.
//!

mod error;
pub mod fits;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{
    parse_csv_event_table, read_event_table, MappedFileReader, TableFormat, REQUIRED_COLUMNS,
};
pub use fits::NOISY_COLUMN;
pub use writer::{
    cleaned_table_path, export_annotated, series_path, write_annotated, DataFileWriter,
    SeriesKind,
};

#[cfg(feature = "hdf5")]
pub use crate::hdf5::{read_annotated_hdf5, write_annotated_hdf5, AnnotatedEvents};
