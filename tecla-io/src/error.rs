//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// A required event column is absent.
    #[error("missing column: {0}")]
    MissingColumn(String),

    /// File extension not recognised as an event table.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// cfitsio error.
    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Malformed CSV record.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] tecla_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
