//! GOLDEN_CROSS / DEATH_CROSS
//!
//! Daily SMA50 crossing SMA200 within the look-back, confirmed by 4h RSI on
//! the same side of 50.

use super::predicates::{ratio_score, recency_score, relative_distance, series_crossed, ScoreCard};
use super::{check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{MultiTimeframeView, Timeframe};
use serde_json::json;

const CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossDirection {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct MovingAverageCross {
    pub direction: CrossDirection,
    /// Daily bars in which the crossing must have happened
    pub lookback: usize,
    pub rsi_midline: f64,
    /// SMA spread (relative) that scores as full strength
    pub full_spread: f64,
    /// RSI distance from the midline that scores as full strength
    pub full_rsi_distance: f64,
}

impl MovingAverageCross {
    pub fn golden() -> Self {
        Self::with_direction(CrossDirection::Up)
    }

    pub fn death() -> Self {
        Self::with_direction(CrossDirection::Down)
    }

    fn with_direction(direction: CrossDirection) -> Self {
        Self {
            direction,
            lookback: 5,
            rsi_midline: 50.0,
            full_spread: 0.02,
            full_rsi_distance: 20.0,
        }
    }

    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let upward = self.direction == CrossDirection::Up;

        let daily = view.get(Timeframe::Daily)?;
        let fast = daily.indicator(keys::SMA_50)?;
        let slow = daily.indicator(keys::SMA_200)?;
        let bars_ago = series_crossed(fast, slow, self.lookback, upward)?;

        let rsi_4h = view.latest(Timeframe::Hour4, keys::RSI_14)?;
        let rsi_excess = if upward {
            rsi_4h - self.rsi_midline
        } else {
            self.rsi_midline - rsi_4h
        };
        if rsi_excess <= 0.0 {
            return None;
        }

        let sma_fast = fast.latest()?;
        let sma_slow = slow.latest()?;
        let spread = relative_distance(sma_fast, sma_slow).unwrap_or(0.0);

        let confidence = ScoreCard::new()
            .add(0.4, recency_score(bars_ago, self.lookback))
            .add(0.3, ratio_score(spread, self.full_spread))
            .add(0.3, ratio_score(rsi_excess, self.full_rsi_distance))
            .finish(CONFIDENCE_FLOOR);

        let (headline, bias) = if upward {
            (
                format!("Daily SMA50 crossed above SMA200 {} bar(s) ago", bars_ago),
                MarketBias::Bullish,
            )
        } else {
            (
                format!("Daily SMA50 crossed below SMA200 {} bar(s) ago", bars_ago),
                MarketBias::Bearish,
            )
        };

        Some(
            self.detection(confidence)
                .with_evidence(
                    Timeframe::Daily,
                    json!({
                        "sma_50": round4(sma_fast),
                        "sma_200": round4(sma_slow),
                        "bars_since_cross": bars_ago,
                        "spread_pct": round4(spread * 100.0),
                    }),
                )
                .with_evidence(Timeframe::Hour4, json!({ "rsi": round4(rsi_4h) }))
                .with_render_hint(headline, bias),
        )
    }
}

impl Detector for MovingAverageCross {
    fn pattern_id(&self) -> PatternId {
        match self.direction {
            CrossDirection::Up => PatternId(2),
            CrossDirection::Down => PatternId(3),
        }
    }

    fn name(&self) -> &'static str {
        match self.direction {
            CrossDirection::Up => "GOLDEN_CROSS",
            CrossDirection::Down => "DEATH_CROSS",
        }
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn description(&self) -> &'static str {
        match self.direction {
            CrossDirection::Up => "Daily SMA50 crossed above SMA200 recently, 4h RSI above 50",
            CrossDirection::Down => "Daily SMA50 crossed below SMA200 recently, 4h RSI below 50",
        }
    }

    fn min_len(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_lookback(self.name(), self.lookback)?;
        check_positive(self.name(), "full_spread", self.full_spread)?;
        check_positive(self.name(), "full_rsi_distance", self.full_rsi_distance)?;
        Ok(self.check(view))
    }
}
