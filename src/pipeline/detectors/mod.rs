//! Pattern rules
//!
//! Each rule is a `Detector`: a pure, stateless conjunction of
//! per-timeframe predicates over a `MultiTimeframeView`.
//!
//! | id | name                    | priority  |
//! |----|-------------------------|-----------|
//! | 1  | RSI_BATTLE              | LOW       |
//! | 2  | GOLDEN_CROSS            | HIGH      |
//! | 3  | DEATH_CROSS             | HIGH      |
//! | 4  | OVERSOLD_REVERSAL       | VERY_HIGH |
//! | 5  | OVERBOUGHT_EXHAUSTION   | VERY_HIGH |
//! | 6  | BOLLINGER_SQUEEZE       | MEDIUM    |
//! | 7  | MACD_BULLISH_ALIGNMENT  | MEDIUM    |
//! | 8  | MACD_BEARISH_ALIGNMENT  | MEDIUM    |
//! | 9  | VOLUME_BREAKOUT         | HIGH      |
//! | 10 | RSI_MIDLINE_CROSS       | LOW       |
//!
//! Absent data (missing timeframe, missing key, warm-up `NaN`, too few
//! samples) makes a predicate false. `Err` is reserved for a rule whose own
//! thresholds are malformed.

pub mod bollinger_squeeze;
pub mod ma_cross;
pub mod macd_alignment;
pub mod predicates;
pub mod rsi_battle;
pub mod rsi_extreme;
pub mod rsi_midline;
pub mod volume_breakout;

pub use bollinger_squeeze::BollingerSqueeze;
pub use ma_cross::MovingAverageCross;
pub use macd_alignment::MacdAlignment;
pub use rsi_battle::RsiBattle;
pub use rsi_extreme::RsiExtreme;
pub use rsi_midline::RsiMidlineCross;
pub use volume_breakout::VolumeBreakout;

use super::detection::{Detection, PatternId};
use super::priority::Priority;
use super::types::MultiTimeframeView;

/// Error raised by a rule that cannot evaluate at all
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// Thresholds of the rule itself are inconsistent
    InvalidConfig {
        pattern: &'static str,
        reason: String,
    },
    /// Anything else that is not "pattern absent" (e.g. a panicked task)
    Internal(String),
}

impl std::fmt::Display for DetectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorError::InvalidConfig { pattern, reason } => {
                write!(f, "{} misconfigured: {}", pattern, reason)
            }
            DetectorError::Internal(msg) => write!(f, "detector failure: {}", msg),
        }
    }
}

impl std::error::Error for DetectorError {}

/// A single pattern rule
pub trait Detector: Send + Sync {
    fn pattern_id(&self) -> PatternId;

    fn name(&self) -> &'static str;

    fn priority(&self) -> Priority;

    fn description(&self) -> &'static str;

    /// Bars needed on every required timeframe before the rule is evaluated
    fn min_len(&self) -> usize {
        1
    }

    /// `Ok(None)` when the pattern is absent
    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError>;

    /// Start a detection carrying this rule's identity
    fn detection(&self, confidence: f64) -> Detection {
        Detection::new(self.pattern_id(), self.name(), self.priority(), confidence)
    }
}

/// Reject a `[lo, hi]` threshold pair that is inverted or not finite
pub(crate) fn check_band(pattern: &'static str, lo: f64, hi: f64) -> Result<(), DetectorError> {
    if !lo.is_finite() || !hi.is_finite() || lo > hi {
        return Err(DetectorError::InvalidConfig {
            pattern,
            reason: format!("band [{}, {}] is inverted or not finite", lo, hi),
        });
    }
    Ok(())
}

/// Reject a threshold that must be strictly positive
pub(crate) fn check_positive(pattern: &'static str, what: &str, value: f64) -> Result<(), DetectorError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DetectorError::InvalidConfig {
            pattern,
            reason: format!("{} must be positive, got {}", what, value),
        });
    }
    Ok(())
}

pub(crate) fn check_lookback(pattern: &'static str, lookback: usize) -> Result<(), DetectorError> {
    if lookback == 0 {
        return Err(DetectorError::InvalidConfig {
            pattern,
            reason: "lookback must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Round for evidence payloads
pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}


/// Synthetic snapshots for rule unit tests
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::pipeline::types::{Bar, IndicatorSnapshot, Timeframe};

    pub const BASE_TS: i64 = 1_700_000_000;

    /// Bars with the given closes and a constant volume
    pub fn bars(timeframe: Timeframe, closes: &[f64]) -> Vec<Bar> {
        bars_with_volume(timeframe, closes, &vec![1_000; closes.len()])
    }

    pub fn bars_with_volume(timeframe: Timeframe, closes: &[f64], volumes: &[u64]) -> Vec<Bar> {
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (close, volume))| {
                Bar::new(
                    BASE_TS + i as i64 * timeframe.duration_secs(),
                    *close,
                    close * 1.001,
                    close * 0.999,
                    *close,
                    *volume,
                )
            })
            .collect()
    }

    /// Snapshot of `n` flat bars at `close`, no indicators yet
    pub fn flat(timeframe: Timeframe, n: usize, close: f64) -> IndicatorSnapshot {
        IndicatorSnapshot::new(timeframe, bars(timeframe, &vec![close; n]))
    }

    /// `n` values of `fill` whose last values are replaced by `tail`
    pub fn series(n: usize, fill: f64, tail: &[f64]) -> Vec<f64> {
        let mut values = vec![fill; n];
        let start = n - tail.len();
        values[start..].copy_from_slice(tail);
        values
    }
}
