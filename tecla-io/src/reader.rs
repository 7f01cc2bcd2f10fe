//! Memory-mapped event-table readers.
//!

use crate::fits::read_fits_events;
use crate::{Error, Result};
use csv::{Position, StringRecord};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tecla_core::{Event, EventTable};

/// Column names every event table must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = ["TIME", "RAWX", "RAWY", "PI"];

/// A memory-mapped file reader.
///
/// Uses memmap2 to efficiently access file contents without
/// loading the entire file into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Returns the path the file was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// On-disk event-table formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    /// FITS table extension read through cfitsio.
    Fits,
    /// Comma-separated text with a header row.
    Csv,
}

impl TableFormat {
    /// Guesses the format from the file extension.
    ///
    /// # Errors
    /// Returns `UnsupportedFormat` for unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "fits" | "fit" | "fts" | "evt" => Ok(Self::Fits),
            "csv" => Ok(Self::Csv),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Reads an event table, choosing the parser from the file extension.
///
/// # Errors
/// Returns an error if the file cannot be read, its format is unknown, or a
/// required column is missing.
pub fn read_event_table<P: AsRef<Path>>(path: P) -> Result<EventTable> {
    let path = path.as_ref();
    let table = match TableFormat::from_path(path)? {
        TableFormat::Fits => read_fits_events(path)?,
        TableFormat::Csv => {
            let reader = MappedFileReader::open(path)?;
            parse_csv_event_table(reader.as_bytes())?
        }
    };
    log::info!("read {} events from {}", table.len(), path.display());
    Ok(table)
}

/// CSV reader shared by the event parser and the annotated copy.
///
/// Expects a header row, trims fields and skips `#` comment lines.
pub(crate) fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(source)
}

/// Parses a CSV event list with a `TIME,RAWX,RAWY,PI` header.
///
/// Column order is free and extra columns are ignored.
///
/// # Errors
/// Returns `MissingColumn` if a required column is absent, `Csv` for
/// malformed records and `InvalidFormat` for unparsable values.
pub fn parse_csv_event_table(data: &[u8]) -> Result<EventTable> {
    let mut reader = csv_reader(data);
    let headers = reader.headers()?;
    let mut columns = [0usize; 4];
    for (slot, required) in columns.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|name| name.eq_ignore_ascii_case(required))
            .ok_or_else(|| Error::MissingColumn(required.to_string()))?;
    }

    let mut table = EventTable::default();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let line = record.position().map_or(0, Position::line);
        let [time, raw_x, raw_y, energy] = columns.map(|col| record.get(col).unwrap_or_default());
        table.push(Event::new(
            parse_value(time, line)?,
            parse_value(raw_x, line)?,
            parse_value(raw_y, line)?,
            parse_value(energy, line)?,
        ));
    }
    Ok(table)
}

fn parse_value<T: FromStr>(value: &str, line: u64) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidFormat(format!("line {line}: invalid value '{value}'")))
}
