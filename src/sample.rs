//! Time-stamped SCADA records and their validity annotations.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::StreamError;

/// Numeric readings keyed by SCADA tag.
pub type Readings = BTreeMap<String, f64>;

/// Validity flag plus every reason that cleared it.
///
/// The flag only ever moves from `true` to `false`, and reasons are only appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validity {
    is_valid: bool,
    rejection_reasons: Vec<String>,
}

impl Default for Validity {
    fn default() -> Self {
        Self {
            is_valid: true,
            rejection_reasons: Vec::new(),
        }
    }
}

impl Validity {
    /// Starts valid but carries reasons already accumulated upstream.
    pub fn carrying(reasons: Vec<String>) -> Self {
        Self {
            is_valid: true,
            rejection_reasons: reasons,
        }
    }

    /// Marks the record invalid. A reason already on the list is not repeated.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.is_valid = false;
        let reason = reason.into();
        if !self.rejection_reasons.contains(&reason) {
            self.rejection_reasons.push(reason);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn reasons(&self) -> &[String] {
        &self.rejection_reasons
    }
}

/// Anything the aggregator can group: a time-stamped set of readings.
pub trait Observation {
    fn timestamp(&self) -> NaiveDateTime;
    fn readings(&self) -> &Readings;
    fn validity(&self) -> &Validity;

    fn reading(&self, tag: &str) -> Option<f64> {
        self.readings().get(tag).copied()
    }
}

/// One fine-grained SCADA tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub readings: Readings,
    pub validity: Validity,
    /// Inverter ids whose constrained-output check fired on this tick.
    pub constrained_inverters: BTreeSet<String>,
    pub is_wind_stowed: bool,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, readings: Readings) -> Self {
        Self {
            timestamp,
            readings,
            validity: Validity::default(),
            constrained_inverters: BTreeSet::new(),
            is_wind_stowed: false,
        }
    }
}

impl Observation for Sample {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }

    fn validity(&self) -> &Validity {
        &self.validity
    }
}

/// A window collapsed to its mean readings, ready to be grouped again.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub readings: Readings,
    pub validity: Validity,
}

impl Observation for Record {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    fn readings(&self) -> &Readings {
        &self.readings
    }

    fn validity(&self) -> &Validity {
        &self.validity
    }
}

/// Samples in strictly increasing timestamp order, plus the table's columns.
#[derive(Debug, Clone)]
pub struct SampleStream {
    /// Reading columns in input header order.
    header: Vec<String>,
    columns: BTreeSet<String>,
    samples: Vec<Sample>,
}

impl SampleStream {
    /// Builds a stream, rejecting duplicate or out-of-order timestamps.
    pub fn new(header: Vec<String>, samples: Vec<Sample>) -> Result<Self, StreamError> {
        for pair in samples.windows(2) {
            let (previous, current) = (pair[0].timestamp, pair[1].timestamp);
            if current == previous {
                return Err(StreamError::DuplicateTimestamp(current));
            }
            if current < previous {
                return Err(StreamError::OutOfOrder { previous, current });
            }
        }
        let columns = header.iter().cloned().collect();
        Ok(Self {
            header,
            columns,
            samples,
        })
    }

    /// Column set for membership checks.
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.validity.is_valid())
            .count()
    }

    /// Applies a per-sample transformation. Order and timestamps are untouched,
    /// so the ordering invariant still holds.
    pub fn map_samples(self, f: impl FnMut(Sample) -> Sample) -> Self {
        Self {
            header: self.header,
            columns: self.columns,
            samples: self.samples.into_iter().map(f).collect(),
        }
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}
