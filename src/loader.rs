//! Reader for raw SCADA exports.
//!
//! The historian writes a short preamble, then a header row whose first
//! column is the timestamp and whose remaining columns are SCADA tags.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::error::{LoadError, PipelineError};
use crate::sample::{Readings, Sample, SampleStream};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%d/%m/%Y %I:%M:%S %p",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Cell contents the historian writes for a reading it does not have.
const MISSING_TOKENS: &[&str] = &["nan", "#n/a", "n/a", "na", "null", "none", "-"];

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Lines to skip before the header row.
    pub skip_rows: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self { skip_rows: 5 }
    }
}

/// Loads a SCADA export from `path` into an ordered [`SampleStream`].
///
/// # Errors
///
/// Returns an error if the file cannot be read, a cell cannot be parsed, or
/// the timestamps are not strictly increasing.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_samples(
    path: impl AsRef<Path>,
    options: &LoaderOptions,
) -> Result<SampleStream, PipelineError> {
    let file = File::open(path.as_ref()).map_err(LoadError::from)?;
    let stream = read_samples(file, options)?;
    info!(rows = stream.len(), columns = stream.columns().len(), "Loaded samples");
    Ok(stream)
}

/// Parses a SCADA export from any reader.
pub fn read_samples<R: Read>(
    reader: R,
    options: &LoaderOptions,
) -> Result<SampleStream, PipelineError> {
    let mut reader = BufReader::new(reader);
    let mut skipped = String::new();
    for _ in 0..options.skip_rows {
        skipped.clear();
        if reader.read_line(&mut skipped).map_err(LoadError::from)? == 0 {
            break;
        }
    }
    debug!(skip_rows = options.skip_rows, "Preamble skipped");

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers().map_err(LoadError::from)?.clone();
    if headers.is_empty() {
        return Err(LoadError::MissingHeader.into());
    }
    let tags: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

    let mut samples = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(LoadError::from)?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let Some(raw_ts) = record.get(0).map(str::trim).filter(|s| !s.is_empty()) else {
            warn!(line, "Row without timestamp skipped");
            continue;
        };
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| LoadError::Timestamp {
            line,
            value: raw_ts.to_string(),
        })?;

        let mut readings = Readings::new();
        for (tag, cell) in tags.iter().zip(record.iter().skip(1)) {
            let value = parse_reading(cell).map_err(|_| LoadError::Numeric {
                line,
                column: tag.clone(),
                value: cell.trim().to_string(),
            })?;
            if let Some(value) = value {
                readings.insert(tag.clone(), value);
            }
        }

        samples.push(Sample::new(timestamp, readings));
    }

    Ok(SampleStream::new(tags, samples)?)
}

/// Parses one reading cell. Blank cells, missing-value markers and
/// non-finite numbers are `None`.
pub fn parse_reading(cell: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let cell = cell.trim();
    if cell.is_empty()
        || MISSING_TOKENS
            .iter()
            .any(|token| cell.eq_ignore_ascii_case(token))
    {
        return Ok(None);
    }
    let value: f64 = cell.parse()?;
    Ok(value.is_finite().then_some(value))
}

/// Tries each known historian timestamp format in turn.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}
