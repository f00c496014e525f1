//! Runs the stages in order: per-sample rejection, minute aggregation,
//! 15-minute aggregation, window validation and result assembly.

use tracing::info;

use crate::analyzers::report::assemble;
use crate::analyzers::types::{PipelineSummary, WindowReport};
use crate::analyzers::{
    INSUFFICIENT_QUARTER_HOUR_REASON, InsufficientPolicy, aggregate, validate_window,
};
use crate::config::SiteConfig;
use crate::error::Result;
use crate::filters::point::{POINT_OF_CONNECTION_REASON, apply_point_rejections};
use crate::filters::wind_stow::apply_wind_stow;
use crate::sample::{Record, Sample, SampleStream};

/// Everything the export collaborator needs.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Reading columns in input header order.
    pub columns: Vec<String>,
    /// Every input sample with its validity, flags and reasons.
    pub samples: Vec<Sample>,
    pub minutes: Vec<Record>,
    pub windows: Vec<WindowReport>,
    pub summary: PipelineSummary,
}

/// Runs the full filtering pipeline over an ordered sample stream.
///
/// # Errors
///
/// Fails with a configuration error if a configured tag is absent from the
/// stream's columns. Data-quality failures never produce an error.
#[tracing::instrument(skip_all, fields(site = %config.site, samples = stream.len()))]
pub fn run_pipeline(stream: SampleStream, config: &SiteConfig) -> Result<PipelineOutput> {
    config.verify_columns(stream.columns())?;

    let mut summary = PipelineSummary {
        site: config.site.clone(),
        samples_total: stream.len(),
        ..Default::default()
    };

    let before = stream.valid_count();
    let stream = apply_point_rejections(stream, config)?;
    // The connection check runs first, so it leads the reasons of samples it invalidated.
    let poc_hits = stream
        .samples()
        .iter()
        .filter(|s| {
            s.validity.reasons().first().map(String::as_str) == Some(POINT_OF_CONNECTION_REASON)
        })
        .count();
    summary.point_of_connection_invalidated = poc_hits;
    summary.constrained_inverter_invalidated = before - stream.valid_count() - poc_hits;

    let before = stream.valid_count();
    let stream = apply_wind_stow(stream, config)?;
    summary.wind_stow_invalidated = before - stream.valid_count();
    summary.samples_valid = stream.valid_count();

    info!(
        valid = summary.samples_valid,
        invalid = summary.samples_total - summary.samples_valid,
        "Per-sample filtering complete"
    );

    let columns = stream.header().to_vec();
    let samples = stream.into_samples();
    let valid: Vec<Sample> = samples
        .iter()
        .filter(|s| s.validity.is_valid())
        .cloned()
        .collect();

    let minutes = aggregate(
        valid,
        config.minute()?,
        config.aggregation.minute_min_members,
        InsufficientPolicy::Drop,
    )?;
    summary.minutes_kept = minutes.windows.len();
    summary.minutes_dropped = minutes.insufficient;
    info!(
        kept = summary.minutes_kept,
        excluded = summary.minutes_dropped,
        "Excluded 1-minute periods due to insufficient data"
    );

    let minutes: Vec<Record> = minutes
        .windows
        .into_iter()
        .map(|w| w.into_record())
        .collect();

    let quarter_hours = aggregate(
        minutes.clone(),
        config.quarter_hour()?,
        config.aggregation.quarter_hour_members,
        InsufficientPolicy::Flag(INSUFFICIENT_QUARTER_HOUR_REASON),
    )?;
    summary.windows_insufficient = quarter_hours.insufficient;

    let validated: Vec<_> = quarter_hours
        .windows
        .into_iter()
        .map(|w| validate_window(w, config))
        .collect();
    let windows = assemble(validated);

    summary.windows_total = windows.len();
    summary.windows_valid = windows.iter().filter(|w| w.is_valid).count();
    summary.windows_invalid = summary.windows_total - summary.windows_valid;
    info!(
        total = summary.windows_total,
        valid = summary.windows_valid,
        invalid = summary.windows_invalid,
        "Finished 15-minute filtering"
    );

    Ok(PipelineOutput {
        columns,
        samples,
        minutes,
        windows,
        summary,
    })
}
