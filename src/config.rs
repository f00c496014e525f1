//! Static site description: device tags, ratings and rule thresholds.
//!
//! Stored as a JSON object on disk. Every section has defaults describing the
//! reference site, so a file only needs the fields it overrides:
//! ```json
//! {
//!   "site": "north-arrays",
//!   "window_rules": { "trc": 400.0, "poa_lower_limit": 250.0, "power_dead_value": null }
//! }
//! ```

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub site: String,
    pub point_of_connection: PointOfConnection,
    pub inverters: Vec<Inverter>,
    pub inverter_module: InverterModule,
    pub weather_stations: Vec<WeatherStation>,
    pub wind_stow: WindStowConfig,
    pub aggregation: AggregationConfig,
    pub window_rules: WindowRules,
}

/// Revenue meter at the grid connection and its contractual limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointOfConnection {
    pub active_power_tag: String,
    pub apparent_power_tag: String,
    /// MW
    pub real_power_rating: f64,
    /// MVA
    pub apparent_power_rating: f64,
    pub limit_factor: f64,
}

/// One physical inverter and the SCADA tags it publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inverter {
    pub id: String,
    pub label: String,
    pub active_power_tag: String,
    pub apparent_power_tag: String,
    pub running_modules_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterModule {
    /// Rated capacity of one power module, in the unit of the apparent power tags (kVA).
    pub rated_capacity: f64,
    pub limit_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherStation {
    pub id: String,
    pub ghi_tag: String,
    pub poa_tag: String,
    pub temperature_tag: String,
    pub wind_speed_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindStowConfig {
    pub sensor_tags: [String; 2],
    pub start_threshold: f64,
    pub end_threshold: f64,
    pub debounce_count: u32,
    pub release_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub minute_secs: i64,
    pub minute_min_members: usize,
    pub quarter_hour_secs: i64,
    pub quarter_hour_members: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowRules {
    /// Reference irradiance the GHI range is scaled from (W/m²).
    pub trc: f64,
    pub poa_lower_limit: f64,
    pub ghi_lower_factor: f64,
    pub ghi_upper_factor: f64,
    /// Irradiance readings at or below this are ignored by the dead-value rule.
    pub irradiance_dead_floor: f64,
    pub dead_value_tolerance: f64,
    /// Standard deviation above this fraction of the mean marks a window unstable.
    pub instability_ratio: f64,
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub temperature_max_step: f64,
    pub wind_max_step: f64,
    pub power_tag: String,
    pub power_rating: f64,
    pub power_lower_factor: f64,
    pub power_upper_factor: f64,
    pub power_dead_value: Option<PowerDeadValue>,
}

/// Rolling check for a frozen AC power signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerDeadValue {
    /// Number of consecutive relative changes that must all stay under the tolerance.
    pub window: usize,
    pub tolerance_pct: f64,
}

impl Inverter {
    /// Builds an inverter from its SCADA label, e.g. `INV011`.
    pub fn from_label(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            active_power_tag: format!("VALUE(RGT-{label}-P.UNIT1@NET1)"),
            apparent_power_tag: format!("VALUE(RGT-{label}-S.UNIT1@NET1)"),
            running_modules_tag: format!("VALUE(RGT-{label}-NRM.UNIT1@NET1)"),
        }
    }
}

impl WeatherStation {
    /// Builds a station from its number, e.g. `211` becomes `WS211`.
    pub fn from_number(number: u32) -> Self {
        Self {
            id: format!("WS{number}"),
            ghi_tag: format!("VALUE(RGT-WSTAT{number}-CWSAIU.UNIT1@NET1)"),
            poa_tag: format!("VALUE(RGT-WSTAT{number}-PVAIU.UNIT1@NET1)"),
            temperature_tag: format!("VALUE(RGT-WSTAT{number}-ATR.UNIT1@NET1)"),
            wind_speed_tag: format!("VALUE(RGT-WSTAT{number}-WSWR.UNIT1@NET1)"),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        let labels = ["INV011", "INV012", "INV023", "INV024", "INV035", "INV036"];
        Self {
            site: "rgt".to_string(),
            point_of_connection: PointOfConnection::default(),
            inverters: labels
                .iter()
                .enumerate()
                .map(|(i, label)| Inverter::from_label(&format!("inverter_{}", i + 1), label))
                .collect(),
            inverter_module: InverterModule::default(),
            weather_stations: vec![
                WeatherStation::from_number(211),
                WeatherStation::from_number(231),
            ],
            wind_stow: WindStowConfig::default(),
            aggregation: AggregationConfig::default(),
            window_rules: WindowRules::default(),
        }
    }
}

impl Default for PointOfConnection {
    fn default() -> Self {
        Self {
            active_power_tag: "VALUE(RGT-SWBD201-PQM201-P-M.UNIT1@NET1)".to_string(),
            apparent_power_tag: "VALUE(RGT-SWBD201-PQM201-S-M.UNIT1@NET1)".to_string(),
            real_power_rating: 23.7,
            apparent_power_rating: 26.34,
            limit_factor: 0.998,
        }
    }
}

impl Default for InverterModule {
    fn default() -> Self {
        Self {
            rated_capacity: 1097.5,
            limit_factor: 0.998,
        }
    }
}

impl Default for WindStowConfig {
    fn default() -> Self {
        Self {
            sensor_tags: [
                "VALUE(RGT-WSTAT211-WSWR.UNIT1@NET1)".to_string(),
                "VALUE(RGT-WSTAT231-WSWR.UNIT1@NET1)".to_string(),
            ],
            start_threshold: 11.11,
            end_threshold: 10.55,
            debounce_count: 2,
            release_secs: 300,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            minute_secs: 60,
            minute_min_members: 5,
            quarter_hour_secs: 15 * 60,
            quarter_hour_members: 15,
        }
    }
}

impl Default for WindowRules {
    fn default() -> Self {
        Self {
            trc: 700.0,
            poa_lower_limit: 450.0,
            ghi_lower_factor: 0.5,
            ghi_upper_factor: 1.2,
            irradiance_dead_floor: 5.0,
            dead_value_tolerance: 1e-4,
            instability_ratio: 0.05,
            temperature_min: -10.0,
            temperature_max: 50.0,
            temperature_max_step: 4.0,
            wind_max_step: 10.0,
            power_tag: "VALUE(RGT-SWBD201-PQM201-P-M.UNIT1@NET1)".to_string(),
            power_rating: 23.7,
            power_lower_factor: -0.01,
            power_upper_factor: 1.02,
            power_dead_value: Some(PowerDeadValue {
                window: 3,
                tolerance_pct: 0.1,
            }),
        }
    }
}

impl SiteConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read site config '{path}'"))?;
        let config: SiteConfig = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse site config '{path}'"))?;
        config.check()?;
        Ok(config)
    }

    /// Rejects settings no stage can run with.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        let minute = self.minute()?;
        let quarter_hour = self.quarter_hour()?;
        let expected = quarter_hour.num_seconds() / minute.num_seconds();
        if quarter_hour.num_seconds() % minute.num_seconds() != 0
            || usize::try_from(expected).ok() != Some(self.aggregation.quarter_hour_members)
        {
            return Err(ConfigurationError::Invalid(format!(
                "a {}s window holds {} records of {}s, not {}",
                quarter_hour.num_seconds(),
                expected,
                minute.num_seconds(),
                self.aggregation.quarter_hour_members
            )));
        }
        self.wind_stow.release()?;
        if self.wind_stow.debounce_count == 0 {
            return Err(ConfigurationError::Invalid(
                "wind stow debounce count must be at least 1".to_string(),
            ));
        }
        if self.wind_stow.end_threshold > self.wind_stow.start_threshold {
            return Err(ConfigurationError::Invalid(
                "wind stow end threshold must not exceed the start threshold".to_string(),
            ));
        }
        if let Some(dead) = &self.window_rules.power_dead_value {
            if dead.window == 0 {
                return Err(ConfigurationError::Invalid(
                    "power dead value window must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Iterates over every `(role, tag)` pair the pipeline reads.
    pub fn tags(&self) -> impl Iterator<Item = (String, &str)> {
        let poc = &self.point_of_connection;
        let poc_tags = [
            ("point of connection active power".to_string(), poc.active_power_tag.as_str()),
            ("point of connection apparent power".to_string(), poc.apparent_power_tag.as_str()),
        ];
        let inverter_tags = self.inverters.iter().flat_map(|inv| {
            [
                (format!("{} active power", inv.id), inv.active_power_tag.as_str()),
                (format!("{} apparent power", inv.id), inv.apparent_power_tag.as_str()),
                (format!("{} running modules", inv.id), inv.running_modules_tag.as_str()),
            ]
        });
        let station_tags = self.weather_stations.iter().flat_map(|ws| {
            [
                (format!("{} GHI", ws.id), ws.ghi_tag.as_str()),
                (format!("{} POA", ws.id), ws.poa_tag.as_str()),
                (format!("{} temperature", ws.id), ws.temperature_tag.as_str()),
                (format!("{} wind speed", ws.id), ws.wind_speed_tag.as_str()),
            ]
        });
        let stow_tags = self
            .wind_stow
            .sensor_tags
            .iter()
            .map(|tag| ("wind stow sensor".to_string(), tag.as_str()));

        poc_tags
            .into_iter()
            .chain(inverter_tags)
            .chain(station_tags)
            .chain(stow_tags)
            .chain(std::iter::once((
                "AC power".to_string(),
                self.window_rules.power_tag.as_str(),
            )))
    }

    /// Checks every configured tag against the columns of the loaded table.
    pub fn verify_columns(&self, columns: &BTreeSet<String>) -> Result<(), ConfigurationError> {
        self.check()?;
        for (role, tag) in self.tags() {
            if !columns.contains(tag) {
                return Err(ConfigurationError::MissingTag {
                    role,
                    tag: tag.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn minute(&self) -> Result<TimeDelta, ConfigurationError> {
        positive_secs("minute_secs", self.aggregation.minute_secs)
    }

    pub fn quarter_hour(&self) -> Result<TimeDelta, ConfigurationError> {
        positive_secs("quarter_hour_secs", self.aggregation.quarter_hour_secs)
    }
}

impl WindStowConfig {
    /// How long both sensors must stay low before stow is released.
    pub fn release(&self) -> Result<TimeDelta, ConfigurationError> {
        if self.release_secs < 0 {
            return Err(ConfigurationError::Invalid(format!(
                "release_secs must not be negative, got {}",
                self.release_secs
            )));
        }
        TimeDelta::try_seconds(self.release_secs).ok_or_else(|| {
            ConfigurationError::Invalid(format!("release_secs {} is out of range", self.release_secs))
        })
    }
}

fn positive_secs(name: &str, secs: i64) -> Result<TimeDelta, ConfigurationError> {
    match TimeDelta::try_seconds(secs) {
        Some(duration) if secs > 0 => Ok(duration),
        _ => Err(ConfigurationError::Invalid(format!(
            "{name} must be a positive number of seconds, got {secs}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    #[test]
    fn test_default_site_layout() {
        let config = SiteConfig::default();
        assert_eq!(config.inverters.len(), 6);
        assert_eq!(config.inverters[2].id, "inverter_3");
        assert_eq!(
            config.inverters[2].apparent_power_tag,
            "VALUE(RGT-INV023-S.UNIT1@NET1)"
        );
        assert_eq!(config.weather_stations[1].id, "WS231");
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let path = temp_path("pv_scada_filter_test_config.json");
        fs::write(
            &path,
            r#"{ "site": "north", "window_rules": { "trc": 400.0, "power_dead_value": null } }"#,
        )
        .unwrap();

        let config = SiteConfig::load(&path).unwrap();
        assert_eq!(config.site, "north");
        assert_eq!(config.window_rules.trc, 400.0);
        assert_eq!(config.window_rules.poa_lower_limit, 450.0);
        assert!(config.window_rules.power_dead_value.is_none());
        assert_eq!(config.inverters.len(), 6);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_check_rejects_zero_debounce() {
        let mut config = SiteConfig::default();
        config.wind_stow.debounce_count = 0;
        assert!(matches!(
            config.check(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_check_rejects_out_of_range_durations() {
        let mut config = SiteConfig::default();
        config.wind_stow.release_secs = i64::MAX;
        assert!(matches!(config.check(), Err(ConfigurationError::Invalid(_))));

        let mut config = SiteConfig::default();
        config.wind_stow.release_secs = -1;
        assert!(matches!(config.check(), Err(ConfigurationError::Invalid(_))));

        let mut config = SiteConfig::default();
        config.aggregation.quarter_hour_secs = i64::MAX;
        assert!(matches!(config.check(), Err(ConfigurationError::Invalid(_))));
        assert!(config.quarter_hour().is_err());

        let mut config = SiteConfig::default();
        config.aggregation.minute_secs = 0;
        assert!(config.minute().is_err());
    }

    #[test]
    fn test_check_rejects_mismatched_quarter_hour_count() {
        let mut config = SiteConfig::default();
        config.aggregation.minute_secs = 30;
        assert!(matches!(config.check(), Err(ConfigurationError::Invalid(_))));

        config.aggregation.quarter_hour_members = 30;
        assert!(config.check().is_ok());

        config.aggregation.minute_secs = 7;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_verify_columns_reports_missing_tag() {
        let config = SiteConfig::default();
        let mut columns: BTreeSet<String> =
            config.tags().map(|(_, tag)| tag.to_string()).collect();
        assert!(config.verify_columns(&columns).is_ok());

        columns.remove("VALUE(RGT-WSTAT231-WSWR.UNIT1@NET1)");
        let err = config.verify_columns(&columns).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::MissingTag {
                role: "WS231 wind speed".to_string(),
                tag: "VALUE(RGT-WSTAT231-WSWR.UNIT1@NET1)".to_string(),
            }
        );
    }
}
