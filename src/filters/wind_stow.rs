//! Wind-stow hysteresis detector.
//!
//! Trackers stow flat when both redundant anemometers read above the start
//! threshold for `debounce_count` consecutive ticks. Stow is held until both
//! read below the end threshold for an uninterrupted `release_secs`.

use std::collections::BTreeSet;

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info};

use crate::config::{SiteConfig, WindStowConfig};
use crate::error::ConfigurationError;
use crate::sample::{Observation, SampleStream};

pub const WIND_STOW_REASON: &str = "Wind Stow Active";

/// State carried from one tick to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindStowState {
    pub active: bool,
    pub consecutive_high_count: u32,
    pub deactivation_timer_start: Option<NaiveDateTime>,
}

impl WindStowState {
    /// Advances the state by one tick and reports whether that tick is stowed.
    ///
    /// A missing reading counts as neither high nor low.
    pub fn step(
        self,
        params: &WindStowConfig,
        at: NaiveDateTime,
        speeds: [Option<f64>; 2],
    ) -> (Self, bool) {
        let both_high = speeds
            .iter()
            .all(|s| s.is_some_and(|v| v > params.start_threshold));
        let both_low = speeds
            .iter()
            .all(|s| s.is_some_and(|v| v < params.end_threshold));

        let mut next = self;
        let mut stowed = false;

        next.consecutive_high_count = if both_high {
            next.consecutive_high_count + 1
        } else {
            0
        };

        if next.consecutive_high_count >= params.debounce_count && !next.active {
            debug!(%at, "Wind stow activated");
            next.active = true;
            next.deactivation_timer_start = None;
        }

        if next.active {
            stowed = true;
            if both_low {
                match next.deactivation_timer_start {
                    None => next.deactivation_timer_start = Some(at),
                    Some(start)
                        if TimeDelta::try_seconds(params.release_secs)
                            .is_some_and(|release| at - start >= release) =>
                    {
                        debug!(%at, "Wind stow released");
                        next.active = false;
                        next.deactivation_timer_start = None;
                    }
                    Some(_) => {}
                }
            } else {
                next.deactivation_timer_start = None;
            }
        }

        (next, stowed)
    }
}

/// Folds the detector over an ordered series of `(timestamp, [sensor_1, sensor_2])`
/// and returns one stow flag per tick.
pub fn detect_wind_stow<I>(params: &WindStowConfig, ticks: I) -> Vec<bool>
where
    I: IntoIterator<Item = (NaiveDateTime, [Option<f64>; 2])>,
{
    ticks
        .into_iter()
        .scan(WindStowState::default(), |state, (at, speeds)| {
            let (next, stowed) = state.step(params, at, speeds);
            *state = next;
            Some(stowed)
        })
        .collect()
}

/// Marks every stowed tick and invalidates it.
///
/// # Errors
///
/// Returns [`ConfigurationError::MissingTag`] if either wind sensor is not a
/// column of the stream.
#[tracing::instrument(skip_all, fields(samples = stream.len()))]
pub fn apply_wind_stow(
    stream: SampleStream,
    config: &SiteConfig,
) -> Result<SampleStream, ConfigurationError> {
    let params = &config.wind_stow;
    params.release()?;
    ensure_sensors(stream.columns(), params)?;

    let [first, second] = &params.sensor_tags;
    let flags = detect_wind_stow(
        params,
        stream
            .samples()
            .iter()
            .map(|s| (s.timestamp(), [s.reading(first), s.reading(second)])),
    );

    let before = stream.valid_count();
    let mut flags = flags.into_iter();
    let stream = stream.map_samples(|mut sample| {
        if flags.next().unwrap_or(false) {
            sample.is_wind_stowed = true;
            sample.validity.reject(WIND_STOW_REASON);
        }
        sample
    });

    info!(
        filter = "wind_stow",
        invalidated = before - stream.valid_count(),
        stowed = stream.samples().iter().filter(|s| s.is_wind_stowed).count(),
        "Filter applied"
    );

    Ok(stream)
}

fn ensure_sensors(
    columns: &BTreeSet<String>,
    params: &WindStowConfig,
) -> Result<(), ConfigurationError> {
    for tag in &params.sensor_tags {
        if !columns.contains(tag) {
            return Err(ConfigurationError::MissingTag {
                role: "wind stow sensor".to_string(),
                tag: tag.clone(),
            });
        }
    }
    Ok(())
}
