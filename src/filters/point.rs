//! Stateless per-sample checks: grid export limit and inverter output ceilings.

use std::collections::BTreeSet;

use tracing::info;

use crate::config::{Inverter, InverterModule, PointOfConnection, SiteConfig};
use crate::error::ConfigurationError;
use crate::sample::{Sample, SampleStream};

pub const POINT_OF_CONNECTION_REASON: &str = "Point of Connection Limitation";

/// Whether the site is exporting at its point-of-connection limit.
///
/// Missing readings never trigger the check.
pub fn at_connection_limit(sample: &Sample, poc: &PointOfConnection) -> bool {
    let real_limit = poc.real_power_rating * poc.limit_factor;
    let apparent_limit = poc.apparent_power_rating * poc.limit_factor;

    let over = |tag: &str, limit: f64| {
        sample
            .readings
            .get(tag)
            .is_some_and(|value| *value > limit)
    };

    over(&poc.active_power_tag, real_limit) || over(&poc.apparent_power_tag, apparent_limit)
}

/// Whether `inverter` is delivering more than its running modules allow.
pub fn is_constrained(sample: &Sample, inverter: &Inverter, module: &InverterModule) -> bool {
    let (Some(apparent), Some(running)) = (
        sample.readings.get(&inverter.apparent_power_tag),
        sample.readings.get(&inverter.running_modules_tag),
    ) else {
        return false;
    };

    let max_allowed = running * module.rated_capacity * module.limit_factor;
    *apparent > max_allowed
}

/// Applies the point-of-connection check followed by every inverter's
/// constrained-output check.
///
/// # Errors
///
/// Returns [`ConfigurationError::MissingTag`] if a point-of-connection or
/// inverter tag is not a column of the stream.
#[tracing::instrument(skip_all, fields(samples = stream.len()))]
pub fn apply_point_rejections(
    stream: SampleStream,
    config: &SiteConfig,
) -> Result<SampleStream, ConfigurationError> {
    ensure_tags(stream.columns(), config)?;

    let before = stream.valid_count();
    let stream = stream.map_samples(|mut sample| {
        if at_connection_limit(&sample, &config.point_of_connection) {
            sample.validity.reject(POINT_OF_CONNECTION_REASON);
        }
        sample
    });
    let after = stream.valid_count();
    info!(
        filter = "point_of_connection",
        invalidated = before - after,
        "Filter applied"
    );

    let stream = stream.map_samples(|mut sample| {
        for inverter in &config.inverters {
            if is_constrained(&sample, inverter, &config.inverter_module) {
                sample.validity.reject(format!("{} is constrained", inverter.id));
                sample.constrained_inverters.insert(inverter.id.clone());
            }
        }
        sample
    });
    info!(
        filter = "constrained_inverter",
        invalidated = after - stream.valid_count(),
        "Filter applied"
    );

    Ok(stream)
}

fn ensure_tags(columns: &BTreeSet<String>, config: &SiteConfig) -> Result<(), ConfigurationError> {
    let poc = &config.point_of_connection;
    let poc_tags = [
        ("point of connection active power", &poc.active_power_tag),
        ("point of connection apparent power", &poc.apparent_power_tag),
    ];
    for (role, tag) in poc_tags {
        if !columns.contains(tag) {
            return Err(ConfigurationError::MissingTag {
                role: role.to_string(),
                tag: tag.clone(),
            });
        }
    }
    for inverter in &config.inverters {
        for (role, tag) in [
            ("apparent power", &inverter.apparent_power_tag),
            ("running modules", &inverter.running_modules_tag),
        ] {
            if !columns.contains(tag) {
                return Err(ConfigurationError::MissingTag {
                    role: format!("{} {role}", inverter.id),
                    tag: tag.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Readings;
    use chrono::{NaiveDate, TimeDelta};

    const P: &str = "VALUE(RGT-SWBD201-PQM201-P-M.UNIT1@NET1)";
    const S: &str = "VALUE(RGT-SWBD201-PQM201-S-M.UNIT1@NET1)";
    const INV1_S: &str = "VALUE(RGT-INV011-S.UNIT1@NET1)";
    const INV1_NRM: &str = "VALUE(RGT-INV011-NRM.UNIT1@NET1)";
    const INV2_S: &str = "VALUE(RGT-INV012-S.UNIT1@NET1)";
    const INV2_NRM: &str = "VALUE(RGT-INV012-NRM.UNIT1@NET1)";

    #[test]
    fn test_point_of_connection_limitation() {
        let stream = stream_of(vec![
            vec![(P, 23.0), (S, 25.0)],
            vec![(P, 24.0), (S, 25.0)],
            vec![(P, 23.0), (S, 26.0)],
            vec![(P, 23.0), (S, 27.0)],
        ]);

        let stream = apply_point_rejections(stream, &SiteConfig::default()).unwrap();
        let samples = stream.samples();

        assert!(samples[0].validity.is_valid());
        assert!(!samples[1].validity.is_valid());
        assert!(samples[2].validity.is_valid());
        assert!(!samples[3].validity.is_valid());
        assert!(samples[0].validity.reasons().is_empty());
        assert_eq!(samples[1].validity.reasons(), [POINT_OF_CONNECTION_REASON]);
        assert_eq!(samples[3].validity.reasons(), [POINT_OF_CONNECTION_REASON]);
    }

    #[test]
    fn test_limit_is_scaled_by_factor() {
        // 23.7 * 0.998 = 23.6526
        let stream = stream_of(vec![vec![(P, 23.66)], vec![(P, 23.65)]]);
        let stream = apply_point_rejections(stream, &SiteConfig::default()).unwrap();

        assert!(!stream.samples()[0].validity.is_valid());
        assert!(stream.samples()[1].validity.is_valid());
    }

    #[test]
    fn test_constrained_inverter_by_running_modules() {
        // One module allows 1097.5 * 0.998 = 1095.305 kVA
        let stream = stream_of(vec![
            vec![(INV1_NRM, 1.0), (INV1_S, 995.305)],
            vec![(INV1_NRM, 1.0), (INV1_S, 1195.305)],
            vec![(INV1_NRM, 2.0), (INV1_S, 2090.61)],
            vec![(INV1_NRM, 2.0), (INV1_S, 2290.61)],
        ]);

        let stream = apply_point_rejections(stream, &SiteConfig::default()).unwrap();
        let samples = stream.samples();

        assert!(samples[0].validity.is_valid());
        assert!(!samples[1].validity.is_valid());
        assert_eq!(samples[1].validity.reasons(), ["inverter_1 is constrained"]);
        assert!(samples[1].constrained_inverters.contains("inverter_1"));
        assert!(samples[2].validity.is_valid());
        assert!(!samples[3].validity.is_valid());
        assert!(samples[0].constrained_inverters.is_empty());
    }

    #[test]
    fn test_multiple_inverters_each_add_a_reason() {
        let stream = stream_of(vec![vec![
            (P, 30.0),
            (INV1_NRM, 1.0),
            (INV1_S, 1200.0),
            (INV2_NRM, 1.0),
            (INV2_S, 1200.0),
        ]]);

        let stream = apply_point_rejections(stream, &SiteConfig::default()).unwrap();
        let sample = &stream.samples()[0];

        assert_eq!(
            sample.validity.reasons(),
            [
                POINT_OF_CONNECTION_REASON,
                "inverter_1 is constrained",
                "inverter_2 is constrained"
            ]
        );
        assert_eq!(sample.constrained_inverters.len(), 2);
    }

    #[test]
    fn test_missing_readings_do_not_trigger() {
        let stream = stream_of(vec![vec![(INV1_S, 5000.0)]]);
        let stream = apply_point_rejections(stream, &SiteConfig::default()).unwrap();
        assert!(stream.samples()[0].validity.is_valid());
    }

    #[test]
    fn test_missing_inverter_tag_is_reported() {
        let config = SiteConfig::default();
        let header = config
            .tags()
            .map(|(_, tag)| tag.to_string())
            .filter(|tag| tag != INV2_NRM)
            .collect();
        let stream = SampleStream::new(header, vec![]).unwrap();

        let err = apply_point_rejections(stream, &config).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingTag {
                role: "inverter_2 running modules".to_string(),
                tag: INV2_NRM.to_string(),
            }
        );
    }

    // Helper functions for tests
    fn stream_of(rows: Vec<Vec<(&str, f64)>>) -> SampleStream {
        let start = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let samples = rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let readings: Readings = row
                    .into_iter()
                    .map(|(tag, value)| (tag.to_string(), value))
                    .collect();
                Sample::new(start + TimeDelta::seconds(3 * i as i64), readings)
            })
            .collect();
        let header = SiteConfig::default()
            .tags()
            .map(|(_, tag)| tag.to_string())
            .collect();
        SampleStream::new(header, samples).unwrap()
    }
}
