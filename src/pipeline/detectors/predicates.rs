//! Predicate and scoring helpers shared by the pattern rules
//!
//! Every helper treats missing or warming-up data as "predicate false"
//! (`None` / `false`), never as an error.

use crate::pipeline::types::IndicatorSeries;

/// `value ∈ [lo, hi]`
pub fn in_range(value: f64, lo: f64, hi: f64) -> bool {
    value.is_finite() && value >= lo && value <= hi
}

/// 1.0 at the centre of `[lo, hi]`, falling linearly to 0.0 at the edges
pub fn range_margin(value: f64, lo: f64, hi: f64) -> f64 {
    if !in_range(value, lo, hi) {
        return 0.0;
    }
    let half = (hi - lo) / 2.0;
    if half <= 0.0 {
        return 1.0;
    }
    let mid = lo + half;
    (1.0 - (value - mid).abs() / half).clamp(0.0, 1.0)
}

/// Relative distance `|price - reference| / |reference|`
pub fn relative_distance(price: f64, reference: f64) -> Option<f64> {
    if !price.is_finite() || !reference.is_finite() || reference == 0.0 {
        return None;
    }
    Some((price - reference).abs() / reference.abs())
}

/// Proximity predicate: distance within `epsilon`, returns the distance
pub fn within(price: f64, reference: f64, epsilon: f64) -> Option<f64> {
    relative_distance(price, reference).filter(|d| *d <= epsilon)
}

/// Most recent upward crossing of `threshold` within the last `lookback` steps
///
/// Returns how many samples ago the crossing completed (0 = on the latest
/// sample). Needs `lookback + 1` usable samples.
pub fn crossed_above(series: &IndicatorSeries, threshold: f64, lookback: usize) -> Option<usize> {
    let tail = series.tail(lookback + 1)?;
    last_crossing(tail, |prev, cur| prev <= threshold && cur > threshold)
}

pub fn crossed_below(series: &IndicatorSeries, threshold: f64, lookback: usize) -> Option<usize> {
    let tail = series.tail(lookback + 1)?;
    last_crossing(tail, |prev, cur| prev >= threshold && cur < threshold)
}

/// Most recent crossing of `fast` over `slow` (or under, when `upward` is false)
pub fn series_crossed(
    fast: &IndicatorSeries,
    slow: &IndicatorSeries,
    lookback: usize,
    upward: bool,
) -> Option<usize> {
    let a = fast.tail(lookback + 1)?;
    let b = slow.tail(lookback + 1)?;
    let spread: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    if upward {
        last_crossing(&spread, |prev, cur| prev <= 0.0 && cur > 0.0)
    } else {
        last_crossing(&spread, |prev, cur| prev >= 0.0 && cur < 0.0)
    }
}

fn last_crossing(tail: &[f64], crossed: impl Fn(f64, f64) -> bool) -> Option<usize> {
    let last = tail.len() - 1;
    (1..tail.len())
        .rev()
        .find(|&i| crossed(tail[i - 1], tail[i]))
        .map(|i| last - i)
}

/// Mean of the `n` samples preceding the latest one
pub fn trailing_mean(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n + 1 {
        return None;
    }
    let end = values.len() - 1;
    let window = &values[end - n..end];
    if window.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(window.iter().sum::<f64>() / n as f64)
}

/// Linear 0..1 score of `x` against the value that counts as "full strength"
pub fn ratio_score(x: f64, full: f64) -> f64 {
    if !x.is_finite() || full <= 0.0 {
        return 0.0;
    }
    (x / full).clamp(0.0, 1.0)
}

/// 1.0 for a crossing on the latest sample, 0.0 at the edge of the look-back
pub fn recency_score(bars_ago: usize, lookback: usize) -> f64 {
    if lookback == 0 {
        return 1.0;
    }
    (1.0 - bars_ago as f64 / lookback as f64).clamp(0.0, 1.0)
}

/// Weighted combination of sub-predicate margins
///
/// The final confidence is `floor + (1 - floor) * weighted_mean`, so a rule
/// that merely holds scores `floor` and one that holds with full margin on
/// every component scores 1.0.
#[derive(Debug, Default)]
pub struct ScoreCard {
    weighted: f64,
    total_weight: f64,
}

impl ScoreCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, weight: f64, score: f64) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        self.weighted += weight * score;
        self.total_weight += weight;
        self
    }

    pub fn finish(&self, floor: f64) -> f64 {
        let mean = if self.total_weight > 0.0 {
            self.weighted / self.total_weight
        } else {
            0.0
        };
        (floor + (1.0 - floor) * mean).clamp(0.0, 1.0)
    }
}
