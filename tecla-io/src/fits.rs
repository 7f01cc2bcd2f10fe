//! FITS event tables through cfitsio.
//!
//! Reading takes the first table HDU that carries `TIME`, `RAWX`, `RAWY` and
//! `PI`. Annotation either copies the source file and adds `IS_NOISY` to its
//! event HDU, or writes a fresh `EVENTS` table.

use crate::reader::REQUIRED_COLUMNS;
use crate::{Error, Result};
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::tables::{
    ColumnDataType, ColumnDescription, ConcreteColumnDescription, ReadsCol, WritesCol,
};
use fitsio::FitsFile;
use std::path::Path;
use tecla_core::EventTable;

/// Name of the annotation column.
pub const NOISY_COLUMN: &str = "IS_NOISY";

const EVENTS_EXTNAME: &str = "EVENTS";

/// A table HDU and the names of its columns.
struct TableHdu {
    index: usize,
    hdu: FitsHdu,
    num_rows: usize,
    columns: Vec<String>,
}

impl TableHdu {
    /// Stored name of `name`, matched case-insensitively.
    fn column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|column| column.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    fn missing_column(&self) -> Option<&'static str> {
        REQUIRED_COLUMNS
            .into_iter()
            .find(|name| self.column(name).is_none())
    }

    fn read<T: ReadsCol>(&self, fptr: &mut FitsFile, name: &str) -> Result<Vec<T>> {
        let column = self
            .column(name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))?;
        Ok(self.hdu.read_col(fptr, column)?)
    }
}

fn table_hdu(fptr: &mut FitsFile, index: usize) -> Result<Option<TableHdu>> {
    let hdu = fptr.hdu(index)?;
    let (columns, num_rows) = match &hdu.info {
        HduInfo::TableInfo {
            column_descriptions,
            num_rows,
        } => (
            column_descriptions
                .iter()
                .map(|description| description.name.clone())
                .collect(),
            *num_rows,
        ),
        _ => return Ok(None),
    };
    Ok(Some(TableHdu {
        index,
        hdu,
        num_rows,
        columns,
    }))
}

/// Finds the first table HDU holding the event columns.
fn locate_events(fptr: &mut FitsFile) -> Result<TableHdu> {
    let n_hdus = fptr.num_hdus()?;
    let mut first_table = None;
    for index in 1..n_hdus {
        if let Some(table) = table_hdu(fptr, index)? {
            if table.missing_column().is_none() {
                log::debug!("event table in HDU {index}, {} rows", table.num_rows);
                return Ok(table);
            }
            first_table.get_or_insert(table);
        }
    }
    match first_table.as_ref().and_then(TableHdu::missing_column) {
        Some(name) => Err(Error::MissingColumn(name.to_string())),
        None => Err(Error::InvalidFormat(
            "no binary table extension".to_string(),
        )),
    }
}

/// Reads the event columns of a FITS file.
///
/// Scaling keywords and column types are resolved by cfitsio.
///
/// # Errors
/// Returns `InvalidFormat` if the file has no table extension,
/// `MissingColumn` if no table holds every event column, or a cfitsio error.
pub fn read_fits_events<P: AsRef<Path>>(path: P) -> Result<EventTable> {
    let mut fptr = FitsFile::open(path.as_ref())?;
    let events = locate_events(&mut fptr)?;
    if events.num_rows == 0 {
        return Ok(EventTable::default());
    }
    let table = EventTable::from_columns(
        events.read::<f64>(&mut fptr, "TIME")?,
        events.read::<i32>(&mut fptr, "RAWX")?,
        events.read::<i32>(&mut fptr, "RAWY")?,
        events.read::<f64>(&mut fptr, "PI")?,
    )?;
    Ok(table)
}

/// Copies `input` to `output` and stores `flags` in the event HDU.
///
/// Every HDU, header card and column of the source survives. An existing
/// `IS_NOISY` column is overwritten, otherwise one is appended. `input` and
/// `output` may name the same file.
///
/// # Errors
/// Returns `InvalidFormat` when the flag count differs from the event rows,
/// or an I/O or cfitsio error.
pub fn write_annotated_copy<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    flags: &[u8],
) -> Result<()> {
    let (input, output) = (input.as_ref(), output.as_ref());
    if input != output {
        std::fs::copy(input, output)?;
    }
    let mut fptr = FitsFile::edit(output)?;
    let events = locate_events(&mut fptr)?;
    if flags.len() != events.num_rows {
        return Err(Error::InvalidFormat(format!(
            "{} IS_NOISY flags for {} rows in HDU {}",
            flags.len(),
            events.num_rows,
            events.index
        )));
    }
    let existing = events.column(NOISY_COLUMN).map(str::to_string);
    let (hdu, name) = match existing {
        Some(name) => (events.hdu, name),
        None => {
            let description = column(NOISY_COLUMN, ColumnDataType::Byte)?;
            let hdu = events.hdu.append_column(&mut fptr, &description)?;
            (hdu, NOISY_COLUMN.to_string())
        }
    };
    write_flags(&hdu, &mut fptr, &name, flags)
}

/// Writes a fresh `EVENTS` table with the event columns and `IS_NOISY`.
///
/// `PI` is stored as `J` when every energy is an integral channel, `D`
/// otherwise. An existing file at `path` is replaced.
///
/// # Errors
/// Returns `InvalidFormat` on a flag/row count mismatch, or an I/O or
/// cfitsio error.
pub fn write_fits_events<P: AsRef<Path>>(
    path: P,
    table: &EventTable,
    flags: &[u8],
) -> Result<()> {
    let path = path.as_ref();
    if flags.len() != table.len() {
        return Err(Error::InvalidFormat(format!(
            "{} IS_NOISY flags for {} events",
            flags.len(),
            table.len()
        )));
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let channels = integral_channels(table.energies());
    let pi_type = if channels.is_some() {
        ColumnDataType::Int
    } else {
        ColumnDataType::Double
    };
    let descriptions = [
        column("TIME", ColumnDataType::Double)?,
        column("RAWX", ColumnDataType::Int)?,
        column("RAWY", ColumnDataType::Int)?,
        column("PI", pi_type)?,
        column(NOISY_COLUMN, ColumnDataType::Byte)?,
    ];

    let mut fptr = FitsFile::create(path).open()?;
    let hdu = fptr.create_table(EVENTS_EXTNAME, &descriptions)?;
    write_column(&hdu, &mut fptr, "TIME", table.times())?;
    write_column(&hdu, &mut fptr, "RAWX", table.raw_x())?;
    write_column(&hdu, &mut fptr, "RAWY", table.raw_y())?;
    match channels {
        Some(pi) => write_column(&hdu, &mut fptr, "PI", &pi)?,
        None => write_column(&hdu, &mut fptr, "PI", table.energies())?,
    }
    write_flags(&hdu, &mut fptr, NOISY_COLUMN, flags)
}

fn column(name: &str, data_type: ColumnDataType) -> Result<ConcreteColumnDescription> {
    Ok(ColumnDescription::new(name).with_type(data_type).create()?)
}

fn write_column<T: WritesCol>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    name: &str,
    data: &[T],
) -> Result<()> {
    if !data.is_empty() {
        hdu.write_col(fptr, name, data)?;
    }
    Ok(())
}

// cfitsio narrows TINT to the byte column.
fn write_flags(hdu: &FitsHdu, fptr: &mut FitsFile, name: &str, flags: &[u8]) -> Result<()> {
    let values: Vec<i32> = flags.iter().copied().map(i32::from).collect();
    write_column(hdu, fptr, name, &values)
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integral_channels(energies: &[f64]) -> Option<Vec<i32>> {
    let range = f64::from(i32::MIN)..=f64::from(i32::MAX);
    energies
        .iter()
        .map(|&e| (e.fract() == 0.0 && range.contains(&e)).then_some(e as i32))
        .collect()
}
