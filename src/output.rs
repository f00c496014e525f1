//! Output formatting and persistence for pipeline results.
//!
//! Splits annotated samples and 15-minute windows into valid and invalid CSV
//! files, optionally gzip-compressed, and logs the run summary.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use crate::analyzers::report::{partition_reports, partition_samples};
use crate::analyzers::types::{PipelineSummary, WindowReport};
use crate::config::SiteConfig;
use crate::pipeline::PipelineOutput;
use crate::sample::{Readings, Record, Sample};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const REASON_SEPARATOR: &str = "; ";

pub const THREE_SEC_VALID: &str = "3_sec_valid_data";
pub const THREE_SEC_NON_VALID: &str = "3_sec_non_valid_data";
pub const ONE_MINUTE: &str = "one_minute_data";
pub const GOOD_FIFTEEN_MIN: &str = "good_15_min_data";
pub const BAD_FIFTEEN_MIN: &str = "bad_15_min_data";

/// Logs the run summary using Rust's debug pretty-print format.
pub fn print_pretty(summary: &PipelineSummary) {
    debug!("{:#?}", summary);
}

/// Logs the run summary as pretty-printed JSON.
pub fn print_json(summary: &PipelineSummary) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Where and how exported files are written.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub output_dir: PathBuf,
    pub gzip: bool,
}

impl ExportOptions {
    pub fn path_for(&self, stem: &str) -> PathBuf {
        let ext = if self.gzip { "csv.gz" } else { "csv" };
        self.output_dir.join(format!("{stem}.{ext}"))
    }
}

/// A file sink that is either plain or gzip-compressed.
enum Sink {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl Sink {
    fn create(path: &Path, gzip: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(if gzip {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        })
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut file) => file.flush(),
            Sink::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(file) => file.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Writes a header row followed by `rows`.
fn write_table<I>(path: &Path, gzip: bool, header: Vec<String>, rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let sink =
        Sink::create(path, gzip).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(sink);

    writer.write_record(&header)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;

    let sink = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush {}: {}", path.display(), e.error()))?;
    sink.finish()?;
    Ok(())
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn reading_cells<'a>(readings: &'a Readings, columns: &'a [String]) -> impl Iterator<Item = String> + 'a {
    columns.iter().map(|c| {
        readings
            .get(c)
            .map(|v| v.to_string())
            .unwrap_or_default()
    })
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// Writes 3-second samples.
///
/// With `annotated` set, validity, reasons, constraint and stow flags are
/// appended; otherwise only the timestamp and readings are written.
pub fn write_samples(
    path: &Path,
    gzip: bool,
    samples: &[&Sample],
    columns: &[String],
    inverter_ids: &[String],
    annotated: bool,
) -> Result<()> {
    let mut header = vec!["Date".to_string()];
    header.extend(columns.iter().cloned());
    if annotated {
        header.push("is_valid".to_string());
        header.push("rejection_reason".to_string());
        header.extend(inverter_ids.iter().map(|id| format!("is_constrained_{id}")));
        header.push("is_wind_stowed".to_string());
    }

    let rows = samples.iter().map(|s| {
        let mut row = vec![format_ts(s.timestamp)];
        row.extend(reading_cells(&s.readings, columns));
        if annotated {
            row.push(flag(s.validity.is_valid()));
            row.push(s.validity.reasons().join(REASON_SEPARATOR));
            row.extend(
                inverter_ids
                    .iter()
                    .map(|id| flag(s.constrained_inverters.contains(id))),
            );
            row.push(flag(s.is_wind_stowed));
        }
        row
    });

    write_table(path, gzip, header, rows)
}

/// Writes minute-level averages.
pub fn write_minutes(path: &Path, gzip: bool, minutes: &[Record]) -> Result<()> {
    let columns = union_columns(minutes.iter().map(|r| &r.readings));
    let mut header = vec!["Minute".to_string()];
    header.extend(columns.iter().cloned());

    let rows = minutes.iter().map(|r| {
        let mut row = vec![format_ts(r.timestamp)];
        row.extend(reading_cells(&r.readings, &columns));
        row
    });

    write_table(path, gzip, header, rows)
}

/// Writes 15-minute windows with their validity and every rejection reason.
pub fn write_windows(path: &Path, gzip: bool, windows: &[&WindowReport]) -> Result<()> {
    let columns = union_columns(windows.iter().map(|w| &w.aggregates));
    let mut header = vec!["15 Minute".to_string()];
    header.extend(columns.iter().cloned());
    header.push("is_valid".to_string());
    header.push("rejection_reason".to_string());

    let rows = windows.iter().map(|w| {
        let mut row = vec![format_ts(w.start)];
        row.extend(reading_cells(&w.aggregates, &columns));
        row.push(flag(w.is_valid));
        row.push(w.rejection_reasons.join(REASON_SEPARATOR));
        row
    });

    write_table(path, gzip, header, rows)
}

fn union_columns<'a>(readings: impl Iterator<Item = &'a Readings>) -> Vec<String> {
    let set: BTreeSet<&String> = readings.flat_map(|r| r.keys()).collect();
    set.into_iter().cloned().collect()
}

/// Writes every partition of a pipeline run into `options.output_dir`.
///
/// Empty partitions are skipped. Returns the paths that were written.
#[tracing::instrument(skip_all, fields(output_dir = %options.output_dir.display(), gzip = options.gzip))]
pub fn export_all(
    output: &PipelineOutput,
    config: &SiteConfig,
    options: &ExportOptions,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            options.output_dir.display()
        )
    })?;

    let columns: Vec<String> = output.columns.iter().cloned().collect();
    let inverter_ids: Vec<String> = config.inverters.iter().map(|i| i.id.clone()).collect();
    let mut written = Vec::new();

    let samples = partition_samples(&output.samples);
    if samples.valid.is_empty() {
        warn!("No valid 3-second data to save. Check filtering criteria.");
    } else {
        let path = options.path_for(THREE_SEC_VALID);
        write_samples(&path, options.gzip, &samples.valid, &columns, &inverter_ids, false)?;
        info!(path = %path.display(), rows = samples.valid.len(), "Valid 3-second data saved");
        written.push(path);
    }
    if samples.invalid.is_empty() {
        warn!("No non-valid 3-second data to save. Check filtering criteria.");
    } else {
        let path = options.path_for(THREE_SEC_NON_VALID);
        write_samples(&path, options.gzip, &samples.invalid, &columns, &inverter_ids, true)?;
        info!(path = %path.display(), rows = samples.invalid.len(), "Non-valid 3-second data saved");
        written.push(path);
    }

    if output.minutes.is_empty() {
        warn!("No 1-minute data to save");
    } else {
        let path = options.path_for(ONE_MINUTE);
        write_minutes(&path, options.gzip, &output.minutes)?;
        info!(path = %path.display(), rows = output.minutes.len(), "1-minute averaged data saved");
        written.push(path);
    }

    let windows = partition_reports(&output.windows);
    for (stem, rows) in [
        (GOOD_FIFTEEN_MIN, &windows.valid),
        (BAD_FIFTEEN_MIN, &windows.invalid),
    ] {
        if rows.is_empty() {
            warn!(partition = stem, "No 15-minute data to save");
            continue;
        }
        let path = options.path_for(stem);
        write_windows(&path, options.gzip, rows)?;
        info!(path = %path.display(), rows = rows.len(), "15-minute data saved");
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Validity;
    use chrono::NaiveDate;
    use flate2::read::GzDecoder;
    use std::env;
    use std::io::Read;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&PipelineSummary::default());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&PipelineSummary::default()).unwrap();
    }

    #[test]
    fn test_write_samples_annotated_columns() {
        let path = temp_path("pv_scada_filter_test_samples.csv");
        let _ = fs::remove_file(&path);

        let mut sample = sample();
        sample.validity.reject("Point of Connection Limitation");
        sample.validity.reject("inverter_1 is constrained");
        sample.constrained_inverters.insert("inverter_1".to_string());

        write_samples(
            &path,
            false,
            &[&sample],
            &["P".to_string(), "S".to_string()],
            &["inverter_1".to_string(), "inverter_2".to_string()],
            true,
        )
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(
            lines[0],
            "Date,P,S,is_valid,rejection_reason,is_constrained_inverter_1,is_constrained_inverter_2,is_wind_stowed"
        );
        assert_eq!(
            lines[1],
            "2024-01-15 12:00:03,24,,0,Point of Connection Limitation; inverter_1 is constrained,1,0,0"
        );

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_windows_gzip() {
        let path = temp_path("pv_scada_filter_test_windows.csv.gz");
        let _ = fs::remove_file(&path);

        let report = WindowReport {
            start: ts(),
            aggregates: [("P".to_string(), 12.5)].into_iter().collect(),
            is_valid: true,
            rejection_reasons: vec![],
        };
        write_windows(&path, true, &[&report]).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(File::open(&path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(
            decoded,
            "15 Minute,P,is_valid,rejection_reason\n2024-01-15 12:00:03,12.5,1,\n"
        );

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_minutes_header() {
        let path = temp_path("pv_scada_filter_test_minutes.csv");
        let _ = fs::remove_file(&path);

        let record = Record {
            timestamp: ts(),
            readings: [("B".to_string(), 2.0), ("A".to_string(), 1.0)]
                .into_iter()
                .collect(),
            validity: Validity::default(),
        };
        write_minutes(&path, false, &[record]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Minute,A,B\n"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_path_for_gzip() {
        let options = ExportOptions {
            output_dir: PathBuf::from("out"),
            gzip: true,
        };
        assert_eq!(options.path_for(ONE_MINUTE), PathBuf::from("out/one_minute_data.csv.gz"));
    }

    // Helper functions for tests
    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 3)
            .unwrap()
    }

    fn sample() -> Sample {
        Sample::new(ts(), [("P".to_string(), 24.0)].into_iter().collect())
    }
}
