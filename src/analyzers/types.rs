//! Data types used by the aggregation pipeline.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::sample::{Observation, Readings, Record, Validity};

/// Observations sharing a floored timestamp, and their mean readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Window<T> {
    pub start: NaiveDateTime,
    pub members: Vec<T>,
    pub aggregate: Readings,
    pub validity: Validity,
}

impl<T: Observation> Window<T> {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Readings for `tag` across members, in timestamp order. Members missing
    /// the tag are skipped.
    pub fn series(&self, tag: &str) -> Vec<f64> {
        self.members.iter().filter_map(|m| m.reading(tag)).collect()
    }

    /// Drops the members, keeping the window as a single record.
    pub fn into_record(self) -> Record {
        Record {
            timestamp: self.start,
            readings: self.aggregate,
            validity: self.validity,
        }
    }
}

/// Final per-window row handed to the export collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowReport {
    pub start: NaiveDateTime,
    pub aggregates: Readings,
    pub is_valid: bool,
    pub rejection_reasons: Vec<String>,
}

/// Outcome of one sufficiency-gated grouping pass.
#[derive(Debug, Clone)]
pub struct Aggregation<T> {
    pub windows: Vec<Window<T>>,
    /// Windows that fell below the member threshold, dropped or flagged.
    pub insufficient: usize,
}

/// Counts gathered while running the pipeline.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub site: String,
    pub samples_total: usize,
    pub point_of_connection_invalidated: usize,
    pub constrained_inverter_invalidated: usize,
    pub wind_stow_invalidated: usize,
    pub samples_valid: usize,
    pub minutes_kept: usize,
    pub minutes_dropped: usize,
    pub windows_total: usize,
    pub windows_insufficient: usize,
    pub windows_valid: usize,
    pub windows_invalid: usize,
}
