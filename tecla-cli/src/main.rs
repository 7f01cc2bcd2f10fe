//! tecla: photon event-list cleaner.
//!
//! Bins an event table into a light curve, derives reference statistics from
//! a quiet segment and replaces noisy bins with Monte Carlo subsamples.
#![allow(clippy::cast_precision_loss)]

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tecla_algorithms::{
    bin_events, run_pipeline, BinningConfig, CleaningConfig, CleaningSummary, PipelineConfig,
    ReferenceSelection,
};
use tecla_core::{EventTable, NoProgress};
use tecla_io::{
    cleaned_table_path, export_annotated, read_event_table, series_path, DataFileWriter,
    SeriesKind,
};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TeclaIo(#[from] tecla_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tecla_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Monte Carlo cleaning of photon event lists.
#[derive(Parser)]
#[command(name = "tecla")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about an event table
    Info {
        /// Input FITS or CSV event file
        input: PathBuf,
    },

    /// Write the light curve before cleaning
    Curve {
        /// Input FITS or CSV event file
        input: PathBuf,

        /// Number of time intervals
        #[arg(long, default_value_t = 1024)]
        bins: usize,

        /// Output CSV (default: <stem>_<bins>_NOISY.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Clean an event table and write the annotated copy
    Clean(CleanArgs),
}

#[derive(Args)]
struct CleanArgs {
    /// Input FITS or CSV event file
    input: PathBuf,

    /// Number of time intervals
    #[arg(long, default_value_t = 1024)]
    bins: usize,

    #[command(flatten)]
    window: WindowArgs,

    /// Monte Carlo trials per noisy bin
    #[arg(long, default_value_t = 10_000)]
    iterations: usize,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Run trials on one thread
    #[arg(long)]
    serial: bool,

    /// Annotated output table (default: <stem>_TECLA.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Comparison series CSV (default: <stem>_<bins>_TECLA.csv)
    #[arg(long)]
    series: Option<PathBuf>,

    /// Write a JSON run summary
    #[arg(long)]
    summary: Option<PathBuf>,
}

/// Reference segment, given in exactly one way.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct WindowArgs {
    /// Compacted bin indices A:B (inclusive)
    #[arg(long, value_parser = parse_range::<usize>)]
    window: Option<(usize, usize)>,

    /// Bins whose left edge lies in T0:T1
    #[arg(long, value_parser = parse_range::<f64>)]
    window_time: Option<(f64, f64)>,

    /// Bin indices A:B before sparse bins are dropped
    #[arg(long, value_parser = parse_range::<usize>)]
    window_source: Option<(usize, usize)>,
}

impl WindowArgs {
    fn selection(&self) -> Option<ReferenceSelection> {
        if let Some((start, end)) = self.window {
            Some(ReferenceSelection::Indices { start, end })
        } else if let Some((start, end)) = self.window_time {
            Some(ReferenceSelection::TimeRange { start, end })
        } else {
            self.window_source
                .map(|(start, end)| ReferenceSelection::SourceIndices { start, end })
        }
    }
}

fn parse_range<T: FromStr>(value: &str) -> std::result::Result<(T, T), String> {
    let (a, b) = value
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got '{value}'"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<T>()
            .map_err(|_| format!("invalid bound '{s}' in '{value}'"))
    };
    Ok((parse(a)?, parse(b)?))
}

/// Everything written to `--summary`.
#[derive(Serialize)]
struct RunSummary<'a> {
    input: &'a Path,
    output: &'a Path,
    series: &'a Path,
    config: &'a PipelineConfig,
    elapsed_s: f64,
    #[serde(flatten)]
    summary: CleaningSummary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Info { input } => info(&input),
        Commands::Curve {
            input,
            bins,
            output,
        } => {
            let output = output.unwrap_or_else(|| series_path(&input, bins, SeriesKind::Noisy));
            curve(&input, bins, &output)
        }
        Commands::Clean(args) => clean(&args).map(|_| ()),
    }
}

fn info(input: &Path) -> Result<()> {
    let table = read_event_table(input)?;
    println!("File: {}", input.display());
    println!("Events: {}", table.len());
    if let Some((t0, t1)) = table.time_range() {
        println!("Time range: {t0} - {t1} ({:.3} s)", t1 - t0);
        if t1 > t0 {
            println!("Mean rate: {:.3} events/s", table.len() as f64 / (t1 - t0));
        }
    }
    if let Some((e0, e1)) = table.energy_range() {
        println!("PI range: {e0} - {e1}");
    }
    if let (Some(x0), Some(x1)) = (table.raw_x().iter().min(), table.raw_x().iter().max()) {
        println!("RAWX range: {x0} - {x1}");
    }
    if let (Some(y0), Some(y1)) = (table.raw_y().iter().min(), table.raw_y().iter().max()) {
        println!("RAWY range: {y0} - {y1}");
    }
    Ok(())
}

fn curve(input: &Path, bins: usize, output: &Path) -> Result<()> {
    let table = read_event_table(input)?;
    let light_curve = bin_events(
        &table,
        &BinningConfig::new().with_n_bins(bins),
        &mut NoProgress,
    )?;
    DataFileWriter::create(output)?.write_light_curve_csv(&light_curve)?;
    println!(
        "Wrote {} of {} bins ({} events in sparse bins) to {}",
        light_curve.len(),
        light_curve.n_bins(),
        light_curve.dropped_events(),
        output.display()
    );
    Ok(())
}

/// Logs progress at every tenth of the run.
fn progress_logger() -> impl FnMut(f64) {
    let mut next_decile = 1u32;
    move |fraction: f64| {
        while next_decile <= 10 && fraction * 10.0 >= f64::from(next_decile) {
            log::info!("progress {}%", next_decile * 10);
            next_decile += 1;
        }
    }
}

fn clean(args: &CleanArgs) -> Result<CleaningSummary> {
    let selection = args.window.selection().ok_or_else(|| {
        tecla_core::Error::InvalidSelection("no reference window given".to_string())
    })?;
    let mut cleaning = CleaningConfig::new()
        .with_n_iterations(args.iterations)
        .with_parallel(!args.serial);
    if let Some(seed) = args.seed {
        cleaning = cleaning.with_seed(seed);
    }
    let config = PipelineConfig::new(selection)
        .with_binning(BinningConfig::new().with_n_bins(args.bins))
        .with_cleaning(cleaning);

    let table: EventTable = read_event_table(&args.input)?;
    let start = Instant::now();
    let report = run_pipeline(&table, &config, &mut progress_logger())?;
    let elapsed = start.elapsed();

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| cleaned_table_path(&args.input));
    export_annotated(
        &args.input,
        &output,
        &table,
        &report.noisy_flags(table.len()),
    )?;

    let series = args
        .series
        .clone()
        .unwrap_or_else(|| series_path(&args.input, args.bins, SeriesKind::Cleaned));
    DataFileWriter::create(&series)?.write_comparison_csv(&report.comparison_series())?;

    let summary = report.summary();
    println!(
        "Cleaned {} events in {:.2}s",
        summary.n_events,
        elapsed.as_secs_f64()
    );
    println!(
        "Reference bins {}-{}: median rate {:.2}, accepted counts [{:.2}, {:.2}]",
        summary.reference.start,
        summary.reference.end,
        summary.reference.rate_median,
        summary.reference.accept_low,
        summary.reference.accept_high
    );
    println!(
        "Noisy bins: {} of {} ({} resampled)",
        summary.noisy_bins, summary.compacted_bins, summary.resampled_bins
    );
    println!(
        "Events kept: {}, flagged noisy: {}",
        summary.kept_events, summary.noisy_events
    );
    println!("Annotated table: {}", output.display());
    println!("Comparison series: {}", series.display());

    if let Some(path) = &args.summary {
        let record = RunSummary {
            input: &args.input,
            output: &output,
            series: &series,
            config: &config,
            elapsed_s: elapsed.as_secs_f64(),
            summary: summary.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&record)?)?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use tempfile::tempdir;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range::<usize>("3:9").unwrap(), (3, 9));
        assert_eq!(parse_range::<f64>("0.5: 12").unwrap(), (0.5, 12.0));
        assert!(parse_range::<usize>("3-9").is_err());
        assert!(parse_range::<usize>("a:9").is_err());
    }

    #[test]
    fn test_window_group_is_exclusive() {
        let cli = Cli::try_parse_from(["tecla", "clean", "ev.fits", "--window-time", "0:40"])
            .unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(
            args.window.selection(),
            Some(ReferenceSelection::TimeRange {
                start: 0.0,
                end: 40.0
            })
        );
        assert_eq!(args.bins, 1024);
        assert_eq!(args.iterations, 10_000);

        assert!(Cli::try_parse_from(["tecla", "clean", "ev.fits"]).is_err());
        assert!(Cli::try_parse_from([
            "tecla", "clean", "ev.fits", "--window", "0:4", "--window-source", "0:4"
        ])
        .is_err());
    }

    #[test]
    fn test_progress_logger_handles_jumps() {
        let mut report = progress_logger();
        report(0.05);
        report(0.55);
        report(1.0);
        report(1.0);
    }

    #[test]
    fn test_clean_writes_outputs() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("obs.csv");
        let mut csv = String::from("TIME,RAWX,RAWY,PI\n");
        for b in 0..10u32 {
            let count = match b {
                7 => 40,
                9 => 9,
                _ => 10,
            };
            for i in 0..count {
                let t = f64::from(b) + f64::from(i) / f64::from(count);
                let pi = if i % 2 == 0 { 900 } else { 4000 };
                writeln!(csv, "{t},{},{},{pi}", i % 3, i % 4).unwrap();
            }
        }
        writeln!(csv, "10.0,0,0,900").unwrap();
        std::fs::write(&input, csv).unwrap();

        let summary_path = dir.path().join("run.json");
        let cli = Cli::try_parse_from([
            "tecla",
            "clean",
            input.to_str().unwrap(),
            "--bins",
            "10",
            "--window",
            "0:4",
            "--iterations",
            "200",
            "--seed",
            "11",
            "--summary",
            summary_path.to_str().unwrap(),
        ])
        .unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        let summary = clean(&args).unwrap();

        assert_eq!(summary.noisy_bins, 1);
        assert!(summary.noisy_events >= 30);

        let cleaned_path = dir.path().join("obs_TECLA.csv");
        let cleaned = read_event_table(&cleaned_path).unwrap();
        assert_eq!(cleaned.len(), summary.n_events);
        let annotated = std::fs::read_to_string(&cleaned_path).unwrap();
        assert!(annotated.starts_with("TIME,RAWX,RAWY,PI,IS_NOISY\n"));
        let flagged = annotated
            .lines()
            .skip(1)
            .filter(|line| line.ends_with(",1"))
            .count();
        assert_eq!(flagged, summary.noisy_events);
        assert!(dir.path().join("obs_10_TECLA.csv").exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(json["noisy_bins"], 1);
        assert_eq!(json["config"]["binning"]["n_bins"], 10);
    }
}
