use std::collections::BTreeMap;

use chrono::{DurationRound, TimeDelta};
use tracing::{debug, info};

use crate::analyzers::types::{Aggregation, Window};
use crate::analyzers::utility::mean;
use crate::error::ConfigurationError;
use crate::sample::{Observation, Readings, Validity};

pub const INSUFFICIENT_QUARTER_HOUR_REASON: &str =
    "Not enough 1 minute data in 15 minute period";

/// What happens to a window that fails its membership gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientPolicy {
    /// Windows with fewer members than required produce no output at all.
    Drop,
    /// Windows whose member count differs from the required count are kept
    /// but invalid, with the given reason.
    Flag(&'static str),
}

impl InsufficientPolicy {
    fn is_sufficient(self, members: usize, required: usize) -> bool {
        match self {
            InsufficientPolicy::Drop => members >= required,
            InsufficientPolicy::Flag(_) => members == required,
        }
    }
}

/// Groups observations into windows of `duration` by flooring each timestamp,
/// then applies the sufficiency gate.
///
/// Each surviving window holds the mean of every numeric reading across its
/// members, starts valid, and carries the first member's accumulated reasons.
///
/// # Errors
///
/// Returns [`ConfigurationError::Invalid`] if `duration` cannot be used to
/// floor timestamps (zero, negative or too large).
#[tracing::instrument(skip(observations), fields(observations = observations.len()))]
pub fn aggregate<T: Observation>(
    observations: Vec<T>,
    duration: TimeDelta,
    required_members: usize,
    policy: InsufficientPolicy,
) -> Result<Aggregation<T>, ConfigurationError> {
    if duration <= TimeDelta::zero() {
        return Err(ConfigurationError::Invalid(format!(
            "window duration must be positive, got {duration}"
        )));
    }

    let mut groups: BTreeMap<_, Vec<T>> = BTreeMap::new();
    for observation in observations {
        let start = observation
            .timestamp()
            .duration_trunc(duration)
            .map_err(|e| ConfigurationError::Invalid(format!("cannot floor to {duration}: {e}")))?;
        groups.entry(start).or_default().push(observation);
    }

    let mut windows = Vec::with_capacity(groups.len());
    let mut insufficient = 0;

    for (start, members) in groups {
        let sufficient = policy.is_sufficient(members.len(), required_members);
        if !sufficient {
            insufficient += 1;
        }

        let validity = match (sufficient, policy) {
            (false, InsufficientPolicy::Drop) => {
                debug!(%start, members = members.len(), "Window dropped");
                continue;
            }
            (false, InsufficientPolicy::Flag(reason)) => {
                let mut validity = carried_validity(&members);
                validity.reject(reason);
                validity
            }
            (true, _) => carried_validity(&members),
        };

        windows.push(Window {
            start,
            aggregate: mean_readings(&members),
            members,
            validity,
        });
    }

    info!(
        windows = windows.len(),
        insufficient,
        "Aggregation complete"
    );

    Ok(Aggregation {
        windows,
        insufficient,
    })
}

fn carried_validity<T: Observation>(members: &[T]) -> Validity {
    let reasons = members
        .first()
        .map(|m| m.validity().reasons().to_vec())
        .unwrap_or_default();
    Validity::carrying(reasons)
}

/// Mean of each tag over the members that report a finite value for it.
fn mean_readings<T: Observation>(members: &[T]) -> Readings {
    let mut series: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for member in members {
        for (tag, value) in member.readings() {
            if value.is_finite() {
                series.entry(tag.as_str()).or_default().push(*value);
            }
        }
    }

    series
        .into_iter()
        .map(|(tag, values)| (tag.to_string(), mean(&values)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Record, Sample};
    use chrono::{NaiveDate, NaiveDateTime};

    const TAG: &str = "VALUE(RGT-WSTAT211-CWSAIU.UNIT1@NET1)";

    #[test]
    fn test_minute_with_four_members_is_dropped() {
        let mut samples = ticks(0, 4, 15);
        samples.extend(ticks(60, 20, 3));

        let result = aggregate(samples, TimeDelta::minutes(1), 5, InsufficientPolicy::Drop).unwrap();

        assert_eq!(result.windows.len(), 1);
        assert_eq!(result.windows[0].start, at(60));
        assert_eq!(result.windows[0].member_count(), 20);
        assert_eq!(result.insufficient, 1);
    }

    #[test]
    fn test_minute_with_five_members_is_kept() {
        let result = aggregate(
            ticks(0, 5, 12),
            TimeDelta::minutes(1),
            5,
            InsufficientPolicy::Drop,
        )
        .unwrap();

        assert_eq!(result.windows.len(), 1);
        assert_eq!(result.insufficient, 0);
        assert!(result.windows[0].validity.is_valid());
    }

    #[test]
    fn test_quarter_hour_with_fourteen_minutes_is_flagged() {
        let records: Vec<Record> = (0..14).map(|m| record_at(m * 60, 800.0)).collect();

        let result = aggregate(
            records,
            TimeDelta::minutes(15),
            15,
            InsufficientPolicy::Flag(INSUFFICIENT_QUARTER_HOUR_REASON),
        )
        .unwrap();

        assert_eq!(result.windows.len(), 1);
        let window = &result.windows[0];
        assert!(!window.validity.is_valid());
        assert_eq!(window.validity.reasons(), [INSUFFICIENT_QUARTER_HOUR_REASON]);
        assert_eq!(result.insufficient, 1);
    }

    #[test]
    fn test_quarter_hour_with_extra_members_is_flagged() {
        // 30-second records put 30 members in a quarter hour.
        let records: Vec<Record> = (0..30).map(|m| record_at(m * 30, 800.0)).collect();

        let result = aggregate(
            records,
            TimeDelta::minutes(15),
            15,
            InsufficientPolicy::Flag(INSUFFICIENT_QUARTER_HOUR_REASON),
        )
        .unwrap();

        assert_eq!(result.windows[0].member_count(), 30);
        assert!(!result.windows[0].validity.is_valid());
        assert_eq!(result.insufficient, 1);
    }

    #[test]
    fn test_quarter_hour_with_fifteen_minutes_is_valid() {
        let records: Vec<Record> = (0..15).map(|m| record_at(m * 60, 800.0)).collect();

        let result = aggregate(
            records,
            TimeDelta::minutes(15),
            15,
            InsufficientPolicy::Flag(INSUFFICIENT_QUARTER_HOUR_REASON),
        )
        .unwrap();

        assert!(result.windows[0].validity.is_valid());
        assert_eq!(result.insufficient, 0);
    }

    #[test]
    fn test_non_finite_readings_are_left_out_of_mean() {
        let mut samples = ticks(0, 20, 3);
        for (i, sample) in samples.iter_mut().enumerate() {
            sample.readings.insert(TAG.to_string(), 800.0);
            if i == 7 {
                sample.readings.insert(TAG.to_string(), f64::NAN);
            }
        }

        let result = aggregate(samples, TimeDelta::minutes(1), 5, InsufficientPolicy::Drop).unwrap();
        let mean = result.windows[0].aggregate[TAG];

        assert!(!mean.is_nan());
        assert_eq!(mean, 800.0);
    }

    #[test]
    fn test_window_mean_of_readings() {
        let samples = vec![
            sample_with(at(0), &[(TAG, 10.0), ("other", 1.0)]),
            sample_with(at(3), &[(TAG, 20.0)]),
            sample_with(at(6), &[(TAG, 30.0), ("other", 3.0)]),
        ];

        let result = aggregate(samples, TimeDelta::minutes(1), 1, InsufficientPolicy::Drop).unwrap();
        let window = &result.windows[0];

        assert_eq!(window.aggregate[TAG], 20.0);
        assert_eq!(window.aggregate["other"], 2.0);
    }

    #[test]
    fn test_window_carries_first_member_reasons() {
        let mut first = sample_with(at(0), &[(TAG, 1.0)]);
        first.validity.reject("Wind Stow Active");
        let mut second = sample_with(at(3), &[(TAG, 1.0)]);
        second.validity.reject("Point of Connection Limitation");

        let result = aggregate(
            vec![first, second],
            TimeDelta::minutes(1),
            1,
            InsufficientPolicy::Drop,
        )
        .unwrap();
        let window = &result.windows[0];

        assert!(window.validity.is_valid());
        assert_eq!(window.validity.reasons(), ["Wind Stow Active"]);
    }

    #[test]
    fn test_floors_to_window_start() {
        let samples = ticks(61, 6, 3);
        let result = aggregate(samples, TimeDelta::minutes(1), 5, InsufficientPolicy::Drop).unwrap();
        assert_eq!(result.windows[0].start, at(60));

        let window = result.windows.into_iter().next().unwrap();
        let record = window.into_record();
        assert_eq!(record.timestamp, at(60));
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let err = aggregate(ticks(0, 1, 3), TimeDelta::zero(), 1, InsufficientPolicy::Drop)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(_)));
    }

    // Helper functions for tests
    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    fn sample_with(timestamp: NaiveDateTime, readings: &[(&str, f64)]) -> Sample {
        Sample::new(
            timestamp,
            readings
                .iter()
                .map(|(tag, value)| (tag.to_string(), *value))
                .collect(),
        )
    }

    fn ticks(from_secs: i64, count: i64, step: i64) -> Vec<Sample> {
        (0..count)
            .map(|i| sample_with(at(from_secs + i * step), &[(TAG, 800.0 + i as f64)]))
            .collect()
    }

    fn record_at(secs: i64, value: f64) -> Record {
        Record {
            timestamp: at(secs),
            readings: [(TAG.to_string(), value)].into_iter().collect(),
            validity: Validity::default(),
        }
    }
}
