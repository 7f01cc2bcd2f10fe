//! HDF5 export of annotated event tables (`entry/events`).

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::{s, ArrayView1};
use std::path::Path;
use std::str::FromStr;
use tecla_core::EventTable;

const MAX_CHUNK_EVENTS: usize = 65_536;

/// Columns read back from an annotated HDF5 file.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedEvents {
    /// Event table columns.
    pub table: EventTable,
    /// `IS_NOISY` flag per row.
    pub is_noisy: Vec<u8>,
}

/// Writes `table` and its `IS_NOISY` flags to `entry/events`.
///
/// # Errors
/// Returns `InvalidFormat` on a flag/row count mismatch, or an HDF5 error.
pub fn write_annotated_hdf5<P: AsRef<Path>>(
    path: P,
    table: &EventTable,
    noisy: &[u8],
) -> Result<()> {
    if noisy.len() != table.len() {
        return Err(Error::InvalidFormat(format!(
            "{} IS_NOISY flags for {} events",
            noisy.len(),
            table.len()
        )));
    }
    let file = File::create(path)?;
    set_attr_str_file(&file, "tecla_format_version", "0.1")?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;
    let events = entry.create_group("events")?;
    set_attr_str_group(&events, "NX_class", "NXevent_data")?;

    let chunk = table.len().clamp(1, MAX_CHUNK_EVENTS);
    write_column(&events, "time", chunk, table.times(), Some("s"))?;
    write_column(&events, "raw_x", chunk, table.raw_x(), None)?;
    write_column(&events, "raw_y", chunk, table.raw_y(), None)?;
    write_column(&events, "pi", chunk, table.energies(), None)?;
    write_column(&events, "is_noisy", chunk, noisy, None)?;
    Ok(())
}

/// Reads `entry/events` back into a table and flag column.
///
/// # Errors
/// Returns an error if HDF5 I/O fails or columns disagree in length.
pub fn read_annotated_hdf5<P: AsRef<Path>>(path: P) -> Result<AnnotatedEvents> {
    let file = File::open(path)?;
    let events = file.group("entry")?.group("events")?;
    let table = EventTable::from_columns(
        read_dataset_vec::<f64>(&events, "time")?,
        read_dataset_vec::<i32>(&events, "raw_x")?,
        read_dataset_vec::<i32>(&events, "raw_y")?,
        read_dataset_vec::<f64>(&events, "pi")?,
    )?;
    let is_noisy = read_dataset_vec::<u8>(&events, "is_noisy")?;
    if is_noisy.len() != table.len() {
        return Err(Error::InvalidFormat(
            "is_noisy length differs from event columns".to_string(),
        ));
    }
    Ok(AnnotatedEvents { table, is_noisy })
}

fn write_column<T: H5Type>(
    group: &Group,
    name: &str,
    chunk: usize,
    data: &[T],
    units: Option<&str>,
) -> Result<()> {
    let dataset = create_extendable_dataset::<T>(group, name, chunk)?;
    for (i, part) in data.chunks(chunk).enumerate() {
        append_slice(&dataset, i * chunk, part)?;
    }
    if let Some(units) = units {
        set_dataset_units(&dataset, units)?;
    }
    Ok(())
}

fn create_extendable_dataset<T: H5Type>(
    group: &Group,
    name: &str,
    chunk_events: usize,
) -> Result<Dataset> {
    Ok(group
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((chunk_events,))
        .create(name)?)
}

fn append_slice<T: H5Type>(dataset: &Dataset, offset: usize, data: &[T]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let new_len = offset + data.len();
    dataset.resize((new_len,))?;
    let view = ArrayView1::from(data);
    dataset.write_slice(view, s![offset..new_len])?;
    Ok(())
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_dataset_vec<T: H5Type>(group: &Group, name: &str) -> Result<Vec<T>> {
    let dataset = group.dataset(name)?;
    Ok(dataset.read_raw::<T>()?)
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tecla_core::Event;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hdf5_annotated_roundtrip() {
        let table: EventTable = vec![
            Event::new(0.25, 10, 11, 800.0),
            Event::new(0.75, 12, 13, 4500.0),
        ]
        .into_iter()
        .collect();
        let file = NamedTempFile::new().unwrap();
        write_annotated_hdf5(file.path(), &table, &[1, 0]).unwrap();

        let back = read_annotated_hdf5(file.path()).unwrap();
        assert_eq!(back.table, table);
        assert_eq!(back.is_noisy, vec![1, 0]);

        let h5 = File::open(file.path()).unwrap();
        let events = h5.group("entry").unwrap().group("events").unwrap();
        let class: VarLenUnicode = events.attr("NX_class").unwrap().read_scalar().unwrap();
        assert_eq!(class.as_str(), "NXevent_data");
        // PI is a channel number.
        assert!(events.dataset("pi").unwrap().attr("units").is_err());
        assert!(events.dataset("time").unwrap().attr("units").is_ok());
    }

    #[test]
    fn test_hdf5_empty_table() {
        let file = NamedTempFile::new().unwrap();
        write_annotated_hdf5(file.path(), &EventTable::default(), &[]).unwrap();
        let back = read_annotated_hdf5(file.path()).unwrap();
        assert!(back.table.is_empty());
    }

    #[test]
    fn test_hdf5_flag_mismatch() {
        let file = NamedTempFile::new().unwrap();
        let err = write_annotated_hdf5(file.path(), &EventTable::default(), &[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
