//! Multi-timeframe market data model
//!
//! The acquisition side hands the pipeline one `IndicatorSnapshot` per
//! timeframe, bundled into a `MultiTimeframeView`. Everything in here is
//! read-only once built: detectors only ever borrow a view.
//!
//! ## Shape
//!
//! ```text
//! MultiTimeframeView
//!   ├─ 1d → IndicatorSnapshot { bars, indicators: { "rsi_14": [...], ... } }
//!   ├─ 4h → IndicatorSnapshot
//!   ├─ 1h → IndicatorSnapshot
//!   └─ 5m → IndicatorSnapshot
//! ```
//!
//! Indicator series are index-aligned with `bars`; the last element is the
//! current value. Warm-up samples are `NaN` and read back as "no value".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregation granularity of a bar series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "5m")]
    Min5,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Daily => "1d",
            Timeframe::Hour4 => "4h",
            Timeframe::Hour1 => "1h",
            Timeframe::Min5 => "5m",
        }
    }

    pub fn duration_secs(&self) -> i64 {
        match self {
            Timeframe::Daily => 24 * 60 * 60,
            Timeframe::Hour4 => 4 * 60 * 60,
            Timeframe::Hour1 => 60 * 60,
            Timeframe::Min5 => 5 * 60,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1d" => Some(Timeframe::Daily),
            "4h" => Some(Timeframe::Hour4),
            "1h" => Some(Timeframe::Hour1),
            "5m" => Some(Timeframe::Min5),
            _ => None,
        }
    }

    /// The canonical set, slowest first
    pub fn all() -> [Timeframe; 4] {
        [
            Timeframe::Daily,
            Timeframe::Hour4,
            Timeframe::Hour1,
            Timeframe::Min5,
        ]
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One OHLCV sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time (Unix seconds)
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// `low <= open, close <= high` with finite prices
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return false;
        }

        self.low <= self.high
            && self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

/// Index-aligned indicator values for one snapshot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorSeries(Vec<f64>);

impl IndicatorSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Current value, `None` while still warming up
    pub fn latest(&self) -> Option<f64> {
        self.at_offset(0)
    }

    /// Value `back` samples before the current one (0 = current)
    pub fn at_offset(&self, back: usize) -> Option<f64> {
        if back >= self.0.len() {
            return None;
        }
        let value = self.0[self.0.len() - 1 - back];
        value.is_finite().then_some(value)
    }

    /// Last `n` samples, only if all of them are usable
    pub fn tail(&self, n: usize) -> Option<&[f64]> {
        if n == 0 || n > self.0.len() {
            return None;
        }
        let tail = &self.0[self.0.len() - n..];
        tail.iter().all(|v| v.is_finite()).then_some(tail)
    }
}

impl From<Vec<f64>> for IndicatorSeries {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Why a view was rejected before evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ViewError {
    MissingTimeframe(Timeframe),
    EmptySnapshot(Timeframe),
    InvalidBar {
        timeframe: Timeframe,
        index: usize,
    },
    NonMonotonicTimestamps {
        timeframe: Timeframe,
        index: usize,
    },
    MisalignedSeries {
        timeframe: Timeframe,
        key: String,
        expected: usize,
        actual: usize,
    },
}

impl std::fmt::Display for ViewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewError::MissingTimeframe(tf) => write!(f, "missing timeframe {}", tf),
            ViewError::EmptySnapshot(tf) => write!(f, "snapshot {} has no bars", tf),
            ViewError::InvalidBar { timeframe, index } => {
                write!(f, "snapshot {} has an invalid bar at index {}", timeframe, index)
            }
            ViewError::NonMonotonicTimestamps { timeframe, index } => write!(
                f,
                "snapshot {} timestamps not strictly increasing at index {}",
                timeframe, index
            ),
            ViewError::MisalignedSeries {
                timeframe,
                key,
                expected,
                actual,
            } => write!(
                f,
                "snapshot {} series '{}' has {} values, expected {}",
                timeframe, key, actual, expected
            ),
        }
    }
}

impl std::error::Error for ViewError {}

/// One timeframe's bars plus derived indicators
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
    pub indicators: HashMap<String, IndicatorSeries>,
}

impl IndicatorSnapshot {
    pub fn new(timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self {
            timeframe,
            bars,
            indicators: HashMap::new(),
        }
    }

    /// Builder-style insert of a named series
    pub fn with_indicator(mut self, key: &str, series: impl Into<IndicatorSeries>) -> Self {
        self.indicators.insert(key.to_string(), series.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn indicator(&self, key: &str) -> Option<&IndicatorSeries> {
        self.indicators.get(key)
    }

    /// Current value of an indicator, `None` if missing or warming up
    pub fn latest(&self, key: &str) -> Option<f64> {
        self.indicator(key).and_then(|s| s.latest())
    }

    pub fn latest_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn latest_close(&self) -> Option<f64> {
        self.latest_bar().map(|b| b.close)
    }

    /// Volumes as floats, aligned with `bars`
    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume as f64).collect()
    }

    /// Check the internal consistency contract of a snapshot
    pub fn validate(&self) -> Result<(), ViewError> {
        if self.bars.is_empty() {
            return Err(ViewError::EmptySnapshot(self.timeframe));
        }

        for (index, bar) in self.bars.iter().enumerate() {
            if !bar.is_valid() {
                return Err(ViewError::InvalidBar {
                    timeframe: self.timeframe,
                    index,
                });
            }
        }

        for (index, pair) in self.bars.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ViewError::NonMonotonicTimestamps {
                    timeframe: self.timeframe,
                    index: index + 1,
                });
            }
        }

        // Sorted so the reported key is stable across runs
        let mut keys: Vec<&String> = self.indicators.keys().collect();
        keys.sort();
        for key in keys {
            let actual = self.indicators[key].len();
            if actual != self.bars.len() {
                return Err(ViewError::MisalignedSeries {
                    timeframe: self.timeframe,
                    key: key.clone(),
                    expected: self.bars.len(),
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// All timeframes for one instrument at one evaluation point
#[derive(Debug, Clone, Default)]
pub struct MultiTimeframeView {
    snapshots: HashMap<Timeframe, IndicatorSnapshot>,
}

impl MultiTimeframeView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the snapshot for its timeframe
    pub fn insert(&mut self, snapshot: IndicatorSnapshot) {
        self.snapshots.insert(snapshot.timeframe, snapshot);
    }

    pub fn with_snapshot(mut self, snapshot: IndicatorSnapshot) -> Self {
        self.insert(snapshot);
        self
    }

    pub fn get(&self, timeframe: Timeframe) -> Option<&IndicatorSnapshot> {
        self.snapshots.get(&timeframe)
    }

    pub fn remove(&mut self, timeframe: Timeframe) -> Option<IndicatorSnapshot> {
        self.snapshots.remove(&timeframe)
    }

    pub fn contains(&self, timeframe: Timeframe) -> bool {
        self.snapshots.contains_key(&timeframe)
    }

    /// Present timeframes, slowest first
    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut tfs: Vec<Timeframe> = self.snapshots.keys().copied().collect();
        tfs.sort();
        tfs
    }

    /// Latest value of `key` on `timeframe`
    pub fn latest(&self, timeframe: Timeframe, key: &str) -> Option<f64> {
        self.get(timeframe).and_then(|s| s.latest(key))
    }

    /// Fail-closed validation: every required timeframe present and consistent
    pub fn validate(&self, required: &[Timeframe]) -> Result<(), ViewError> {
        for tf in required {
            let snapshot = self.get(*tf).ok_or(ViewError::MissingTimeframe(*tf))?;
            snapshot.validate()?;
        }
        Ok(())
    }

    /// Shortest bar count among the required timeframes (0 if any is missing)
    pub fn shortest_len(&self, required: &[Timeframe]) -> usize {
        required
            .iter()
            .map(|tf| self.get(*tf).map(|s| s.len()).unwrap_or(0))
            .min()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let px = 100.0 + i as f64;
                Bar::new(1_700_000_000 + i as i64 * 3600, px, px + 1.0, px - 1.0, px + 0.5, 10)
            })
            .collect()
    }

    #[test]
    fn test_timeframe_labels_round_trip() {
        for tf in Timeframe::all() {
            assert_eq!(Timeframe::from_str(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::from_str("15m"), None);
    }

    #[test]
    fn test_timeframe_serde_label() {
        let json = serde_json::to_string(&Timeframe::Hour4).unwrap();
        assert_eq!(json, "\"4h\"");
        let tf: Timeframe = serde_json::from_str("\"5m\"").unwrap();
        assert_eq!(tf, Timeframe::Min5);
    }

    #[test]
    fn test_bar_invariants() {
        assert!(Bar::new(0, 10.0, 12.0, 9.0, 11.0, 5).is_valid());
        assert!(!Bar::new(0, 13.0, 12.0, 9.0, 11.0, 5).is_valid()); // open above high
        assert!(!Bar::new(0, 10.0, 12.0, 10.5, 10.0, 5).is_valid()); // close below low
        assert!(!Bar::new(0, f64::NAN, 12.0, 9.0, 11.0, 5).is_valid());
    }

    #[test]
    fn test_series_latest_skips_warmup() {
        let series = IndicatorSeries::new(vec![f64::NAN, f64::NAN, 42.0]);
        assert_eq!(series.latest(), Some(42.0));
        assert_eq!(series.at_offset(1), None);
        assert_eq!(series.at_offset(5), None);
        assert!(series.tail(2).is_none());
        assert_eq!(series.tail(1), Some(&[42.0][..]));
    }

    #[test]
    fn test_snapshot_validate_misaligned_series() {
        let snapshot = IndicatorSnapshot::new(Timeframe::Hour1, make_bars(5))
            .with_indicator("rsi_14", vec![50.0; 4]);

        let err = snapshot.validate().unwrap_err();
        assert_eq!(
            err,
            ViewError::MisalignedSeries {
                timeframe: Timeframe::Hour1,
                key: "rsi_14".to_string(),
                expected: 5,
                actual: 4,
            }
        );
    }

    #[test]
    fn test_snapshot_validate_non_monotonic() {
        let mut bars = make_bars(3);
        bars[2].timestamp = bars[1].timestamp;
        let snapshot = IndicatorSnapshot::new(Timeframe::Daily, bars);
        assert!(matches!(
            snapshot.validate(),
            Err(ViewError::NonMonotonicTimestamps { index: 2, .. })
        ));
    }

    #[test]
    fn test_view_missing_timeframe() {
        let view = MultiTimeframeView::new()
            .with_snapshot(IndicatorSnapshot::new(Timeframe::Daily, make_bars(3)))
            .with_snapshot(IndicatorSnapshot::new(Timeframe::Hour4, make_bars(3)));

        assert_eq!(
            view.validate(&Timeframe::all()),
            Err(ViewError::MissingTimeframe(Timeframe::Hour1))
        );
        assert!(view.validate(&[Timeframe::Daily, Timeframe::Hour4]).is_ok());
        assert_eq!(view.shortest_len(&Timeframe::all()), 0);
    }

    #[test]
    fn test_view_timeframes_sorted() {
        let view = MultiTimeframeView::new()
            .with_snapshot(IndicatorSnapshot::new(Timeframe::Min5, make_bars(2)))
            .with_snapshot(IndicatorSnapshot::new(Timeframe::Daily, make_bars(4)));

        assert_eq!(view.timeframes(), vec![Timeframe::Daily, Timeframe::Min5]);
        assert_eq!(view.shortest_len(&[Timeframe::Daily, Timeframe::Min5]), 2);
    }
}
