//! Writers for annotated event tables and light-curve series.

use crate::fits::{self, NOISY_COLUMN};
use crate::reader::{csv_reader, MappedFileReader, TableFormat};
use crate::{Error, Result};
use csv::StringRecord;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tecla_algorithms::{ComparisonPoint, LightCurve};
use tecla_core::EventTable;

/// Which light curve a series file holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesKind {
    /// Counts before cleaning.
    Noisy,
    /// Original and kept counts after cleaning.
    Cleaned,
}

impl SeriesKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Noisy => "NOISY",
            Self::Cleaned => "TECLA",
        }
    }
}

fn stem(input: &Path) -> &str {
    input
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("events")
}

/// `<stem>_TECLA.<ext>` next to the input file.
#[must_use]
pub fn cleaned_table_path(input: &Path) -> PathBuf {
    let name = match input.extension().and_then(OsStr::to_str) {
        Some(ext) => format!("{}_TECLA.{ext}", stem(input)),
        None => format!("{}_TECLA", stem(input)),
    };
    input.with_file_name(name)
}

/// `<stem>_<n_bins>_NOISY.csv` or `<stem>_<n_bins>_TECLA.csv` next to the input.
#[must_use]
pub fn series_path(input: &Path, n_bins: usize, kind: SeriesKind) -> PathBuf {
    input.with_file_name(format!("{}_{n_bins}_{}.csv", stem(input), kind.tag()))
}

/// Buffered writer for cleaning outputs.
pub struct DataFileWriter {
    writer: BufWriter<File>,
}

impl DataFileWriter {
    /// Creates a new file writer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes the events with their `IS_NOISY` flag as CSV.
    ///
    /// # Errors
    /// Returns `InvalidFormat` on a flag/row count mismatch, or an I/O error.
    pub fn write_annotated_csv(&mut self, table: &EventTable, noisy: &[u8]) -> Result<()> {
        check_flags(table, noisy)?;
        writeln!(self.writer, "TIME,RAWX,RAWY,PI,IS_NOISY")?;
        for (event, flag) in table.iter().zip(noisy) {
            writeln!(
                self.writer,
                "{},{},{},{},{}",
                event.time, event.raw_x, event.raw_y, event.energy, flag
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes `index,start_time,count` for every compacted bin.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_light_curve_csv(&mut self, curve: &LightCurve) -> Result<()> {
        writeln!(self.writer, "index,start_time,count")?;
        for bin in curve.bins() {
            writeln!(
                self.writer,
                "{},{},{}",
                bin.index,
                bin.start_time,
                bin.count()
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Writes the original-vs-kept comparison series.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_comparison_csv(&mut self, series: &[ComparisonPoint]) -> Result<()> {
        writeln!(self.writer, "index,start_time,original_count,kept_count")?;
        for point in series {
            writeln!(
                self.writer,
                "{},{},{},{}",
                point.index, point.start_time, point.original_count, point.kept_count
            )?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if flushing fails.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn check_flags(table: &EventTable, noisy: &[u8]) -> Result<()> {
    if noisy.len() == table.len() {
        Ok(())
    } else {
        Err(Error::InvalidFormat(format!(
            "{} IS_NOISY flags for {} events",
            noisy.len(),
            table.len()
        )))
    }
}

/// Writes an annotated table, choosing the format from the output extension.
///
/// `.h5`/`.hdf5`/`.nxs` need the `hdf5` feature.
///
/// # Errors
/// Returns `UnsupportedFormat` for unknown extensions, otherwise any write
/// error.
pub fn write_annotated<P: AsRef<Path>>(path: P, table: &EventTable, noisy: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if matches!(ext.as_str(), "h5" | "hdf5" | "nxs") {
        #[cfg(feature = "hdf5")]
        {
            crate::hdf5::write_annotated_hdf5(path, table, noisy)?;
            log::info!("wrote {} annotated events to {}", table.len(), path.display());
            return Ok(());
        }
        #[cfg(not(feature = "hdf5"))]
        return Err(Error::UnsupportedFormat(format!(
            "{} (built without HDF5 support)",
            path.display()
        )));
    }

    match TableFormat::from_path(path)? {
        TableFormat::Fits => fits::write_fits_events(path, table, noisy)?,
        TableFormat::Csv => DataFileWriter::create(path)?.write_annotated_csv(table, noisy)?,
    }
    log::info!("wrote {} annotated events to {}", table.len(), path.display());
    Ok(())
}

/// Writes the annotated table read from `input` to `output`.
///
/// When both paths share a table format the source is copied with all of
/// its columns and headers, and `IS_NOISY` is added or overwritten. Other
/// outputs get a fresh table through [`write_annotated`].
///
/// # Errors
/// Returns `InvalidFormat` if the flags do not match the table or the source
/// rows, otherwise any read or write error.
pub fn export_annotated<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    table: &EventTable,
    noisy: &[u8],
) -> Result<()> {
    let (input, output) = (input.as_ref(), output.as_ref());
    check_flags(table, noisy)?;
    match (TableFormat::from_path(input), TableFormat::from_path(output)) {
        (Ok(TableFormat::Fits), Ok(TableFormat::Fits)) => {
            fits::write_annotated_copy(input, output, noisy)?;
        }
        (Ok(TableFormat::Csv), Ok(TableFormat::Csv)) => {
            write_annotated_csv_copy(input, output, noisy)?;
        }
        _ => return write_annotated(output, table, noisy),
    }
    log::info!(
        "copied {} with {} IS_NOISY flags to {}",
        input.display(),
        noisy.len(),
        output.display()
    );
    Ok(())
}

/// Rewrites a CSV event list with every source column plus `IS_NOISY`.
fn write_annotated_csv_copy(input: &Path, output: &Path, noisy: &[u8]) -> Result<()> {
    let (mut header, records) = {
        let source = MappedFileReader::open(input)?;
        let mut reader = csv_reader(source.as_bytes());
        let header = reader.headers()?.clone();
        let records = reader
            .records()
            .collect::<std::result::Result<Vec<StringRecord>, csv::Error>>()?;
        (header, records)
    };
    if records.len() != noisy.len() {
        return Err(Error::InvalidFormat(format!(
            "{} IS_NOISY flags for {} rows in {}",
            noisy.len(),
            records.len(),
            input.display()
        )));
    }

    let existing = header
        .iter()
        .position(|name| name.eq_ignore_ascii_case(NOISY_COLUMN));
    if existing.is_none() {
        header.push_field(NOISY_COLUMN);
    }
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(&header)?;
    for (record, flag) in records.iter().zip(noisy) {
        let flag = flag.to_string();
        match existing {
            Some(col) => writer.write_record(
                record
                    .iter()
                    .enumerate()
                    .map(|(i, field)| if i == col { flag.as_str() } else { field }),
            )?,
            None => writer.write_record(record.iter().chain([flag.as_str()]))?,
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_event_table;
    use tecla_algorithms::{bin_events, BinningConfig};
    use tecla_core::{Event, NoProgress};
    use tempfile::{tempdir, NamedTempFile};

    fn sample_table() -> EventTable {
        vec![
            Event::new(0.0, 1, 1, 800.0),
            Event::new(0.5, 2, 2, 1200.0),
            Event::new(1.5, 3, 3, 3000.0),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_output_names() {
        let input = Path::new("/data/obs/P0123_EVT.fits");
        assert_eq!(
            cleaned_table_path(input),
            PathBuf::from("/data/obs/P0123_EVT_TECLA.fits")
        );
        assert_eq!(
            series_path(input, 1024, SeriesKind::Noisy),
            PathBuf::from("/data/obs/P0123_EVT_1024_NOISY.csv")
        );
        assert_eq!(
            series_path(input, 64, SeriesKind::Cleaned),
            PathBuf::from("/data/obs/P0123_EVT_64_TECLA.csv")
        );
        assert_eq!(
            cleaned_table_path(Path::new("events")),
            PathBuf::from("events_TECLA")
        );
    }

    #[test]
    fn test_write_annotated_csv() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = DataFileWriter::create(file.path()).unwrap();
        writer
            .write_annotated_csv(&sample_table(), &[0, 1, 0])
            .unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "TIME,RAWX,RAWY,PI,IS_NOISY");
        assert_eq!(lines[1], "0,1,1,800,0");
        assert_eq!(lines[2], "0.5,2,2,1200,1");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_write_light_curve_csv() {
        let table: EventTable = (0..9)
            .map(|i| Event::new(f64::from(i), 0, 0, 1000.0))
            .collect();
        let curve = bin_events(&table, &BinningConfig::new().with_n_bins(2), &mut NoProgress)
            .unwrap();
        let file = NamedTempFile::new().unwrap();
        DataFileWriter::create(file.path())
            .unwrap()
            .write_light_curve_csv(&curve)
            .unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "index,start_time,count\n0,0,4\n1,4,5\n");
    }

    #[test]
    fn test_write_comparison_csv() {
        let file = NamedTempFile::new().unwrap();
        let series = [ComparisonPoint {
            index: 3,
            start_time: 1.5,
            original_count: 40,
            kept_count: 11,
        }];
        DataFileWriter::create(file.path())
            .unwrap()
            .write_comparison_csv(&series)
            .unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.ends_with("3,1.5,40,11\n"));
    }

    #[test]
    fn test_export_csv_keeps_source_columns() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("events.csv");
        let output = dir.path().join("events_TECLA.csv");
        std::fs::write(
            &input,
            "# observation 42\nNOTE,TIME,RAWX,RAWY,PI,PATTERN\n\
             \"flare, ccd 3\",0,1,1,800,0\nquiet,0.5,2,2,1200,4\nquiet,1.5,3,3,3000,12\n",
        )
        .unwrap();
        let table = read_event_table(&input).unwrap();

        export_annotated(&input, &output, &table, &[0, 1, 0]).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "NOTE,TIME,RAWX,RAWY,PI,PATTERN,IS_NOISY");
        assert_eq!(lines[1], "\"flare, ccd 3\",0,1,1,800,0,0");
        assert_eq!(lines[2], "quiet,0.5,2,2,1200,4,1");
        assert_eq!(read_event_table(&output).unwrap(), table);

        // Annotating the annotated file replaces the flag column.
        let again = dir.path().join("again.csv");
        export_annotated(&output, &again, &table, &[1, 1, 1]).unwrap();
        let content = std::fs::read_to_string(&again).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            "NOTE,TIME,RAWX,RAWY,PI,PATTERN,IS_NOISY"
        );
        assert!(content.lines().skip(1).all(|line| line.ends_with(",1")));
    }

    #[test]
    fn test_export_fits_keeps_source_columns() {
        use fitsio::tables::{ColumnDataType, ColumnDescription};
        use fitsio::FitsFile;

        let dir = tempdir().unwrap();
        let input = dir.path().join("events.fits");
        let output = dir.path().join("events_TECLA.fits");
        let descriptions: Vec<_> = ["TIME", "RAWX", "RAWY", "PI", "PATTERN"]
            .iter()
            .map(|name| {
                let data_type = if *name == "TIME" {
                    ColumnDataType::Double
                } else {
                    ColumnDataType::Int
                };
                ColumnDescription::new(*name)
                    .with_type(data_type)
                    .create()
                    .unwrap()
            })
            .collect();
        {
            let mut fptr = FitsFile::create(&input).open().unwrap();
            let hdu = fptr.create_table("EVENTS", &descriptions).unwrap();
            hdu.write_col(&mut fptr, "TIME", &[0.0_f64, 0.5, 1.5]).unwrap();
            hdu.write_col(&mut fptr, "RAWX", &[1_i32, 2, 3]).unwrap();
            hdu.write_col(&mut fptr, "RAWY", &[1_i32, 2, 3]).unwrap();
            hdu.write_col(&mut fptr, "PI", &[800_i32, 1200, 3000]).unwrap();
            hdu.write_col(&mut fptr, "PATTERN", &[0_i32, 4, 12]).unwrap();
        }
        let table = read_event_table(&input).unwrap();
        assert_eq!(table, sample_table());

        export_annotated(&input, &output, &table, &[1, 0, 0]).unwrap();

        let mut fptr = FitsFile::open(&output).unwrap();
        let hdu = fptr.hdu("EVENTS").unwrap();
        let pattern: Vec<i32> = hdu.read_col(&mut fptr, "PATTERN").unwrap();
        let noisy: Vec<i32> = hdu.read_col(&mut fptr, "IS_NOISY").unwrap();
        assert_eq!(pattern, vec![0, 4, 12]);
        assert_eq!(noisy, vec![1, 0, 0]);
    }

    #[test]
    fn test_export_across_formats_writes_fresh_table() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("events.csv");
        std::fs::write(&input, "TIME,RAWX,RAWY,PI,PATTERN\n0,1,1,800,7\n").unwrap();
        let table = read_event_table(&input).unwrap();

        let output = dir.path().join("events_TECLA.fits");
        export_annotated(&input, &output, &table, &[0]).unwrap();
        assert_eq!(read_event_table(&output).unwrap(), table);

        let err = export_annotated(&input, &output, &table, &[0, 0]).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_write_annotated_dispatch() {
        let dir = tempdir().unwrap();
        let table = sample_table();

        let fits = dir.path().join("out.fits");
        write_annotated(&fits, &table, &[1, 0, 0]).unwrap();
        assert_eq!(read_event_table(&fits).unwrap(), table);

        let csv = dir.path().join("out.csv");
        write_annotated(&csv, &table, &[1, 0, 0]).unwrap();
        assert_eq!(read_event_table(&csv).unwrap(), table);

        let err = write_annotated(dir.path().join("out.txt"), &table, &[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        let err = write_annotated(&csv, &table, &[0]).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
