//! Window-level statistical checks.
//!
//! Four independent rule groups run over the members of each 15-minute window:
//! irradiance, temperature, wind speed and AC power. Every group is always
//! evaluated and every fired rule contributes one reason.
//!
//! | Quantity    | Range                       | Dead value                   | Abrupt change          |
//! |-------------|-----------------------------|------------------------------|------------------------|
//! | Irradiance  | GHI in (0.5, 1.2)·TRC, POA  | flat above the 5 W/m² floor  | std-dev > 5% of mean   |
//! | Temperature | (-10, 50) °C                | flat                         | any step > 4           |
//! | Wind        | -                           | flat                         | any step > 10          |
//! | AC power    | [-0.01, 1.02]·rating        | rolling relative change      | std-dev > 5% of mean   |

use crate::analyzers::types::Window;
use crate::analyzers::utility::{abs_diffs, abs_pct_changes, mean, stddev};
use crate::config::{PowerDeadValue, SiteConfig, WeatherStation, WindowRules};
use crate::sample::Observation;

/// Applies every rule group to `window` and appends the reasons that fired.
///
/// Re-running on an already validated window leaves the reason list unchanged.
pub fn validate_window<T: Observation>(mut window: Window<T>, config: &SiteConfig) -> Window<T> {
    for reason in evaluate(&window, config) {
        window.validity.reject(reason);
    }
    window
}

/// Every reason the rule groups raise for `window`, in group order.
pub fn evaluate<T: Observation>(window: &Window<T>, config: &SiteConfig) -> Vec<String> {
    let rules = &config.window_rules;
    let mut reasons = Vec::new();

    for station in &config.weather_stations {
        reasons.extend(irradiance_reasons(window, station, rules));
    }
    for station in &config.weather_stations {
        reasons.extend(temperature_reasons(window, station, rules));
    }
    for station in &config.weather_stations {
        reasons.extend(wind_reasons(window, station, rules));
    }
    reasons.extend(power_reasons(window, rules));

    reasons
}

pub fn irradiance_reasons<T: Observation>(
    window: &Window<T>,
    station: &WeatherStation,
    rules: &WindowRules,
) -> Vec<String> {
    let id = &station.id;
    let ghi = window.series(&station.ghi_tag);
    let poa = window.series(&station.poa_tag);
    let mut reasons = Vec::new();

    let ghi_lower = rules.trc * rules.ghi_lower_factor;
    let ghi_upper = rules.trc * rules.ghi_upper_factor;
    if !mean_within(&ghi, |m| ghi_lower < m) {
        reasons.push(format!("Irradiance - Range - {id}_ghi_lower_limit"));
    }
    if !mean_within(&ghi, |m| m < ghi_upper) {
        reasons.push(format!("Irradiance - Range - {id}_ghi_upper_limit"));
    }
    if !mean_within(&poa, |m| rules.poa_lower_limit < m) {
        reasons.push(format!("Irradiance - Range - {id}_poa_lower_limit"));
    }

    let lit: Vec<f64> = ghi
        .iter()
        .copied()
        .filter(|v| *v > rules.irradiance_dead_floor)
        .collect();
    if is_flat(&lit, rules.dead_value_tolerance) {
        reasons.push(format!("Irradiance - Dead value - {id}"));
    }

    if is_unstable(&ghi, rules.instability_ratio) {
        reasons.push(format!("Irradiance - Abrupt change - {id}"));
    }

    reasons
}

pub fn temperature_reasons<T: Observation>(
    window: &Window<T>,
    station: &WeatherStation,
    rules: &WindowRules,
) -> Vec<String> {
    let id = &station.id;
    let series = window.series(&station.temperature_tag);
    let mut reasons = Vec::new();

    if !mean_within(&series, |m| rules.temperature_min < m && m < rules.temperature_max) {
        reasons.push(format!("Temperature - Range - {id}"));
    }
    if is_flat(&series, rules.dead_value_tolerance) {
        reasons.push(format!("Temperature - Dead value - {id}"));
    }
    if has_step_over(&series, rules.temperature_max_step) {
        reasons.push(format!("Temperature - Abrupt change - {id}"));
    }

    reasons
}

/// Wind speed has no range rule; the wind-stow pass already bounds it.
pub fn wind_reasons<T: Observation>(
    window: &Window<T>,
    station: &WeatherStation,
    rules: &WindowRules,
) -> Vec<String> {
    let id = &station.id;
    let series = window.series(&station.wind_speed_tag);
    let mut reasons = Vec::new();

    if is_flat(&series, rules.dead_value_tolerance) {
        reasons.push(format!("Wind - Dead value - {id}"));
    }
    if has_step_over(&series, rules.wind_max_step) {
        reasons.push(format!("Wind - Abrupt change - {id}"));
    }

    reasons
}

pub fn power_reasons<T: Observation>(window: &Window<T>, rules: &WindowRules) -> Vec<String> {
    let series = window.series(&rules.power_tag);
    let mut reasons = Vec::new();

    let lower = rules.power_lower_factor * rules.power_rating;
    let upper = rules.power_upper_factor * rules.power_rating;
    if !mean_within(&series, |m| lower <= m && m <= upper) {
        reasons.push("Power - Range".to_string());
    }
    if let Some(dead) = &rules.power_dead_value {
        if is_power_frozen(&series, dead) {
            reasons.push("Power - Dead value".to_string());
        }
    }
    if is_unstable(&series, rules.instability_ratio) {
        reasons.push("Power - Abrupt change".to_string());
    }

    reasons
}

/// An empty series never satisfies a range.
fn mean_within(series: &[f64], ok: impl Fn(f64) -> bool) -> bool {
    !series.is_empty() && ok(mean(series))
}

/// True when there is at least one step and every step is under `tolerance`.
fn is_flat(series: &[f64], tolerance: f64) -> bool {
    let diffs = abs_diffs(series);
    !diffs.is_empty() && diffs.iter().all(|d| *d < tolerance)
}

fn has_step_over(series: &[f64], limit: f64) -> bool {
    abs_diffs(series).iter().any(|d| *d > limit)
}

fn is_unstable(series: &[f64], ratio: f64) -> bool {
    let avg = mean(series);
    stddev(series, avg).is_some_and(|sd| sd > ratio * avg)
}

/// Any run of `window` consecutive relative changes all under the tolerance.
fn is_power_frozen(series: &[f64], rule: &PowerDeadValue) -> bool {
    abs_pct_changes(series)
        .windows(rule.window)
        .any(|run| run.iter().all(|c| *c < rule.tolerance_pct))
}
