//! OVERSOLD_REVERSAL / OVERBOUGHT_EXHAUSTION
//!
//! Higher timeframes pinned at an RSI extreme, 1h price outside the
//! Bollinger envelope, and the 5m RSI turning back through the threshold.

use super::predicates::{crossed_above, crossed_below, ratio_score, recency_score, ScoreCard};
use super::{check_band, check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{MultiTimeframeView, Timeframe};
use serde_json::json;

const CONFIDENCE_FLOOR: f64 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    Oversold,
    Overbought,
}

#[derive(Debug, Clone)]
pub struct RsiExtreme {
    pub extreme: Extreme,
    pub oversold: f64,
    pub overbought: f64,
    /// 5m bars in which the turn must have happened
    pub lookback: usize,
    /// RSI depth beyond the threshold that scores as full strength
    pub full_depth: f64,
    /// Relative band penetration that scores as full strength
    pub full_penetration: f64,
}

impl RsiExtreme {
    pub fn oversold() -> Self {
        Self::with_extreme(Extreme::Oversold)
    }

    pub fn overbought() -> Self {
        Self::with_extreme(Extreme::Overbought)
    }

    fn with_extreme(extreme: Extreme) -> Self {
        Self {
            extreme,
            oversold: 30.0,
            overbought: 70.0,
            lookback: 3,
            full_depth: 15.0,
            full_penetration: 0.01,
        }
    }

    /// How far `rsi` is beyond the active threshold (positive = beyond)
    fn depth(&self, rsi: f64) -> f64 {
        match self.extreme {
            Extreme::Oversold => self.oversold - rsi,
            Extreme::Overbought => rsi - self.overbought,
        }
    }

    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let rsi_4h = view.latest(Timeframe::Hour4, keys::RSI_14)?;
        let rsi_1h = view.latest(Timeframe::Hour1, keys::RSI_14)?;
        let (depth_4h, depth_1h) = (self.depth(rsi_4h), self.depth(rsi_1h));
        if depth_4h <= 0.0 || depth_1h <= 0.0 {
            return None;
        }

        let hourly = view.get(Timeframe::Hour1)?;
        let close = hourly.latest_close()?;
        let (band_key, band) = match self.extreme {
            Extreme::Oversold => (keys::BB_LOWER, hourly.latest(keys::BB_LOWER)?),
            Extreme::Overbought => (keys::BB_UPPER, hourly.latest(keys::BB_UPPER)?),
        };
        let outside = match self.extreme {
            Extreme::Oversold => close <= band,
            Extreme::Overbought => close >= band,
        };
        if !outside || band <= 0.0 {
            return None;
        }
        let penetration = (close - band).abs() / band;

        let rsi_5m = view.get(Timeframe::Min5)?.indicator(keys::RSI_14)?;
        let bars_ago = match self.extreme {
            Extreme::Oversold => crossed_above(rsi_5m, self.oversold, self.lookback)?,
            Extreme::Overbought => crossed_below(rsi_5m, self.overbought, self.lookback)?,
        };

        let confidence = ScoreCard::new()
            .add(0.3, ratio_score(depth_4h, self.full_depth))
            .add(0.2, ratio_score(depth_1h, self.full_depth))
            .add(0.25, ratio_score(penetration, self.full_penetration))
            .add(0.25, recency_score(bars_ago, self.lookback))
            .finish(CONFIDENCE_FLOOR);

        let (headline, bias) = match self.extreme {
            Extreme::Oversold => (
                format!("4h/1h RSI oversold ({:.1}/{:.1}), 5m RSI turning up", rsi_4h, rsi_1h),
                MarketBias::Bullish,
            ),
            Extreme::Overbought => (
                format!("4h/1h RSI overbought ({:.1}/{:.1}), 5m RSI rolling over", rsi_4h, rsi_1h),
                MarketBias::Bearish,
            ),
        };

        Some(
            self.detection(confidence)
                .with_evidence(Timeframe::Hour4, json!({ "rsi": round4(rsi_4h) }))
                .with_evidence(
                    Timeframe::Hour1,
                    json!({
                        "rsi": round4(rsi_1h),
                        "close": close,
                        band_key: round4(band),
                    }),
                )
                .with_evidence(
                    Timeframe::Min5,
                    json!({
                        "rsi": rsi_5m.latest().map(round4),
                        "bars_since_turn": bars_ago,
                    }),
                )
                .with_render_hint(headline, bias),
        )
    }
}

impl Detector for RsiExtreme {
    fn pattern_id(&self) -> PatternId {
        match self.extreme {
            Extreme::Oversold => PatternId(4),
            Extreme::Overbought => PatternId(5),
        }
    }

    fn name(&self) -> &'static str {
        match self.extreme {
            Extreme::Oversold => "OVERSOLD_REVERSAL",
            Extreme::Overbought => "OVERBOUGHT_EXHAUSTION",
        }
    }

    fn priority(&self) -> Priority {
        Priority::VeryHigh
    }

    fn description(&self) -> &'static str {
        match self.extreme {
            Extreme::Oversold => {
                "4h and 1h RSI below 30, 1h close at or below the lower band, 5m RSI back above 30"
            }
            Extreme::Overbought => {
                "4h and 1h RSI above 70, 1h close at or above the upper band, 5m RSI back below 70"
            }
        }
    }

    fn min_len(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_band(self.name(), self.oversold, self.overbought)?;
        check_lookback(self.name(), self.lookback)?;
        check_positive(self.name(), "full_depth", self.full_depth)?;
        check_positive(self.name(), "full_penetration", self.full_penetration)?;
        Ok(self.check(view))
    }
}
