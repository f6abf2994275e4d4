//! BOLLINGER_SQUEEZE: 4h and 1h bands at their tightest in the look-back

use super::predicates::{ratio_score, ScoreCard};
use super::{check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{IndicatorSnapshot, MultiTimeframeView, Timeframe};
use serde_json::json;

const NAME: &str = "BOLLINGER_SQUEEZE";
const CONFIDENCE_FLOOR: f64 = 0.5;
const TIMEFRAMES: [Timeframe; 2] = [Timeframe::Hour4, Timeframe::Hour1];

#[derive(Debug, Clone)]
pub struct BollingerSqueeze {
    pub lookback: usize,
    /// Current width may exceed the look-back minimum by this fraction
    pub tolerance: f64,
    /// Compression versus the mean width that scores as full strength
    pub full_compression: f64,
}

impl Default for BollingerSqueeze {
    fn default() -> Self {
        Self {
            lookback: 20,
            tolerance: 0.05,
            full_compression: 0.5,
        }
    }
}

struct Squeeze {
    width: f64,
    min_width: f64,
    mean_width: f64,
}

impl BollingerSqueeze {
    /// Relative band widths `(upper - lower) / middle` over the look-back
    fn widths(&self, snapshot: &IndicatorSnapshot) -> Option<Vec<f64>> {
        let upper = snapshot.indicator(keys::BB_UPPER)?.tail(self.lookback)?;
        let middle = snapshot.indicator(keys::BB_MIDDLE)?.tail(self.lookback)?;
        let lower = snapshot.indicator(keys::BB_LOWER)?.tail(self.lookback)?;

        upper
            .iter()
            .zip(middle)
            .zip(lower)
            .map(|((u, m), l)| (*m > 0.0).then(|| (u - l) / m))
            .collect()
    }

    fn squeeze_on(&self, snapshot: &IndicatorSnapshot) -> Option<Squeeze> {
        let widths = self.widths(snapshot)?;
        let width = *widths.last()?;
        let min_width = widths.iter().copied().fold(f64::INFINITY, f64::min);
        if width > min_width * (1.0 + self.tolerance) {
            return None;
        }
        let mean_width = widths.iter().sum::<f64>() / widths.len() as f64;
        Some(Squeeze {
            width,
            min_width,
            mean_width,
        })
    }

    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let mut card = ScoreCard::new();
        let mut evidence = Vec::with_capacity(TIMEFRAMES.len());
        for tf in TIMEFRAMES {
            let squeeze = self.squeeze_on(view.get(tf)?)?;
            let compression = if squeeze.mean_width > 0.0 {
                1.0 - squeeze.width / squeeze.mean_width
            } else {
                0.0
            };
            card = card.add(0.5, ratio_score(compression, self.full_compression));
            evidence.push((
                tf,
                json!({
                    "band_width_pct": round4(squeeze.width * 100.0),
                    "min_width_pct": round4(squeeze.min_width * 100.0),
                    "mean_width_pct": round4(squeeze.mean_width * 100.0),
                }),
            ));
        }

        let detection = evidence
            .into_iter()
            .fold(self.detection(card.finish(CONFIDENCE_FLOOR)), |d, (tf, e)| {
                d.with_evidence(tf, e)
            });
        Some(detection.with_render_hint(
            format!("4h and 1h Bollinger Bands at their tightest in {} bars", self.lookback),
            MarketBias::Neutral,
        ))
    }
}

impl Detector for BollingerSqueeze {
    fn pattern_id(&self) -> PatternId {
        PatternId(6)
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> Priority {
        Priority::Medium
    }

    fn description(&self) -> &'static str {
        "4h and 1h Bollinger band width at (or near) its look-back minimum"
    }

    fn min_len(&self) -> usize {
        self.lookback
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_lookback(NAME, self.lookback)?;
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(DetectorError::InvalidConfig {
                pattern: NAME,
                reason: format!("tolerance must be non-negative, got {}", self.tolerance),
            });
        }
        check_positive(NAME, "full_compression", self.full_compression)?;
        Ok(self.check(view))
    }
}
