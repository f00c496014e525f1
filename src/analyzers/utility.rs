/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the sample standard deviation (n - 1) given a pre-computed mean.
/// Returns `None` for fewer than two values.
pub fn stddev(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

    Some(variance.sqrt())
}

/// Absolute differences between consecutive values.
pub fn abs_diffs(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
}

/// Absolute percentage change between consecutive values.
///
/// A zero predecessor yields an infinite or NaN change, which never counts as flat.
pub fn abs_pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| ((w[1] - w[0]) / w[0]).abs() * 100.0)
        .collect()
}
