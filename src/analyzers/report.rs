//! Result assembly: per-window rows and the valid/invalid split for export.

use crate::analyzers::types::{Window, WindowReport};
use crate::sample::{Observation, Sample};

impl<T: Observation> From<Window<T>> for WindowReport {
    fn from(window: Window<T>) -> Self {
        WindowReport {
            start: window.start,
            is_valid: window.validity.is_valid(),
            rejection_reasons: window.validity.reasons().to_vec(),
            aggregates: window.aggregate,
        }
    }
}

/// Rows split by validity, order preserved within each side.
#[derive(Debug, Clone, PartialEq)]
pub struct Partitioned<T> {
    pub valid: Vec<T>,
    pub invalid: Vec<T>,
}

pub fn assemble<T: Observation>(windows: Vec<Window<T>>) -> Vec<WindowReport> {
    windows.into_iter().map(WindowReport::from).collect()
}

pub fn partition_reports(reports: &[WindowReport]) -> Partitioned<&WindowReport> {
    let (valid, invalid) = reports.iter().partition(|r| r.is_valid);
    Partitioned { valid, invalid }
}

pub fn partition_samples(samples: &[Sample]) -> Partitioned<&Sample> {
    let (valid, invalid) = samples.iter().partition(|s| s.validity.is_valid());
    Partitioned { valid, invalid }
}
