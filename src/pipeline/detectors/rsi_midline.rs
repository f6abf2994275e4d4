//! RSI_MIDLINE_CROSS: 4h RSI crossing 50, 1h RSI already on the new side

use super::predicates::{crossed_above, crossed_below, ratio_score, recency_score, ScoreCard};
use super::{check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{MultiTimeframeView, Timeframe};
use serde_json::json;

const NAME: &str = "RSI_MIDLINE_CROSS";
const CONFIDENCE_FLOOR: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct RsiMidlineCross {
    pub midline: f64,
    /// 4h bars in which the crossing must have happened
    pub lookback: usize,
    /// RSI distance from the midline that scores as full strength
    pub full_distance: f64,
}

impl Default for RsiMidlineCross {
    fn default() -> Self {
        Self {
            midline: 50.0,
            lookback: 3,
            full_distance: 10.0,
        }
    }
}

impl RsiMidlineCross {
    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let rsi_4h = view.get(Timeframe::Hour4)?.indicator(keys::RSI_14)?;

        // Most recent crossing wins when the series whipsawed both ways
        let up = crossed_above(rsi_4h, self.midline, self.lookback);
        let down = crossed_below(rsi_4h, self.midline, self.lookback);
        let (bars_ago, bias) = match (up, down) {
            (Some(u), Some(d)) if u <= d => (u, MarketBias::Bullish),
            (Some(_), Some(d)) => (d, MarketBias::Bearish),
            (Some(u), None) => (u, MarketBias::Bullish),
            (None, Some(d)) => (d, MarketBias::Bearish),
            (None, None) => return None,
        };

        let current_4h = rsi_4h.latest()?;
        let rsi_1h = view.latest(Timeframe::Hour1, keys::RSI_14)?;
        let (distance_4h, distance_1h) = match bias {
            MarketBias::Bearish => (self.midline - current_4h, self.midline - rsi_1h),
            _ => (current_4h - self.midline, rsi_1h - self.midline),
        };
        if distance_4h <= 0.0 || distance_1h <= 0.0 {
            return None;
        }

        let confidence = ScoreCard::new()
            .add(0.4, recency_score(bars_ago, self.lookback))
            .add(0.35, ratio_score(distance_4h, self.full_distance))
            .add(0.25, ratio_score(distance_1h, self.full_distance))
            .finish(CONFIDENCE_FLOOR);

        let side = if bias == MarketBias::Bullish { "above" } else { "below" };
        Some(
            self.detection(confidence)
                .with_evidence(
                    Timeframe::Hour4,
                    json!({
                        "rsi": round4(current_4h),
                        "bars_since_cross": bars_ago,
                    }),
                )
                .with_evidence(Timeframe::Hour1, json!({ "rsi": round4(rsi_1h) }))
                .with_render_hint(
                    format!("4h RSI crossed {} {:.0}, 1h RSI agrees", side, self.midline),
                    bias,
                ),
        )
    }
}

impl Detector for RsiMidlineCross {
    fn pattern_id(&self) -> PatternId {
        PatternId(10)
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> Priority {
        Priority::Low
    }

    fn description(&self) -> &'static str {
        "4h RSI crossed 50 recently with 1h RSI on the same side"
    }

    fn min_len(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_lookback(NAME, self.lookback)?;
        check_positive(NAME, "full_distance", self.full_distance)?;
        if !(0.0..=100.0).contains(&self.midline) {
            return Err(DetectorError::InvalidConfig {
                pattern: NAME,
                reason: format!("midline {} outside the RSI range", self.midline),
            });
        }
        Ok(self.check(view))
    }
}
