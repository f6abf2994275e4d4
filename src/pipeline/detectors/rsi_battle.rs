//! RSI_BATTLE: a market in balance on every timeframe while volatility builds
//!
//! Fires when
//! - RSI(14) sits inside the neutral band on 1d, 4h, 1h and 5m
//! - daily MACD line and signal are both near zero and converged
//! - the 1h close hugs the 1h Bollinger middle band
//! - 1h realized volatility is above its trailing mean
//!
//! Confidence ranges from 0.6 (all predicates barely hold) to 1.0.

use super::predicates::{in_range, range_margin, ratio_score, trailing_mean, within, ScoreCard};
use super::{check_band, check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{MultiTimeframeView, Timeframe};
use serde_json::json;

const NAME: &str = "RSI_BATTLE";
const CONFIDENCE_FLOOR: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct RsiBattle {
    pub rsi_low: f64,
    pub rsi_high: f64,
    /// Max |line|, |signal| and |line - signal| of the daily MACD
    pub macd_tolerance: f64,
    /// Max relative distance of the 1h close from the middle band
    pub band_epsilon: f64,
    /// Samples in the volatility trailing mean
    pub volatility_lookback: usize,
    /// Volatility expansion (current / mean - 1) that scores as full strength
    pub volatility_full_expansion: f64,
}

impl Default for RsiBattle {
    fn default() -> Self {
        Self {
            rsi_low: 45.0,
            rsi_high: 55.0,
            macd_tolerance: 0.05,
            band_epsilon: 0.001,
            volatility_lookback: 20,
            volatility_full_expansion: 0.5,
        }
    }
}

impl RsiBattle {
    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let mut rsi_scores = Vec::with_capacity(4);
        let mut rsi_values = Vec::with_capacity(4);
        for tf in Timeframe::all() {
            let rsi = view.latest(tf, keys::RSI_14)?;
            if !in_range(rsi, self.rsi_low, self.rsi_high) {
                return None;
            }
            rsi_scores.push(range_margin(rsi, self.rsi_low, self.rsi_high));
            rsi_values.push((tf, rsi));
        }

        let macd_line = view.latest(Timeframe::Daily, keys::MACD_LINE)?;
        let macd_signal = view.latest(Timeframe::Daily, keys::MACD_SIGNAL)?;
        let macd_gap = (macd_line - macd_signal).abs();
        if macd_line.abs() > self.macd_tolerance
            || macd_signal.abs() > self.macd_tolerance
            || macd_gap > self.macd_tolerance
        {
            return None;
        }

        let hourly = view.get(Timeframe::Hour1)?;
        let close = hourly.latest_close()?;
        let middle = hourly.latest(keys::BB_MIDDLE)?;
        let distance = within(close, middle, self.band_epsilon)?;

        let volatility = hourly.indicator(keys::VOLATILITY)?;
        let current_vol = volatility.latest()?;
        let mean_vol = trailing_mean(volatility.values(), self.volatility_lookback)?;
        if current_vol <= mean_vol {
            return None;
        }
        let vol_score = if mean_vol > 0.0 {
            ratio_score(current_vol / mean_vol - 1.0, self.volatility_full_expansion)
        } else {
            1.0
        };

        let rsi_score = rsi_scores.iter().sum::<f64>() / rsi_scores.len() as f64;
        let confidence = ScoreCard::new()
            .add(0.4, rsi_score)
            .add(0.2, 1.0 - macd_gap / self.macd_tolerance)
            .add(0.2, 1.0 - distance / self.band_epsilon)
            .add(0.2, vol_score)
            .finish(CONFIDENCE_FLOOR);

        let mut detection = self.detection(confidence);
        for (tf, rsi) in rsi_values {
            let evidence = match tf {
                Timeframe::Daily => json!({
                    "rsi": round4(rsi),
                    "macd_line": round4(macd_line),
                    "macd_signal": round4(macd_signal),
                }),
                Timeframe::Hour1 => json!({
                    "rsi": round4(rsi),
                    "close": close,
                    "bb_middle": round4(middle),
                    "distance_pct": round4(distance * 100.0),
                    "volatility": current_vol,
                    "volatility_mean": mean_vol,
                }),
                _ => json!({ "rsi": round4(rsi) }),
            };
            detection = detection.with_evidence(tf, evidence);
        }

        Some(detection.with_render_hint(
            format!(
                "RSI balanced between {:.0} and {:.0} on all timeframes while 1h volatility expands",
                self.rsi_low, self.rsi_high
            ),
            MarketBias::Neutral,
        ))
    }
}

impl Detector for RsiBattle {
    fn pattern_id(&self) -> PatternId {
        PatternId(1)
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> Priority {
        Priority::Low
    }

    fn description(&self) -> &'static str {
        "Neutral RSI on 1d/4h/1h/5m, flat daily MACD, 1h price at the middle band, rising 1h volatility"
    }

    fn min_len(&self) -> usize {
        self.volatility_lookback + 1
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_band(NAME, self.rsi_low, self.rsi_high)?;
        check_positive(NAME, "macd_tolerance", self.macd_tolerance)?;
        check_positive(NAME, "band_epsilon", self.band_epsilon)?;
        check_positive(NAME, "volatility_full_expansion", self.volatility_full_expansion)?;
        check_lookback(NAME, self.volatility_lookback)?;
        Ok(self.check(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detectors::fixtures::{flat, series};
    use crate::pipeline::types::IndicatorSnapshot;

    const N: usize = 30;

    fn neutral(tf: Timeframe, rsi: f64) -> IndicatorSnapshot {
        flat(tf, N, 100.0).with_indicator(keys::RSI_14, vec![rsi; N])
    }

    fn battle_view(rsi: f64, close_offset: f64, vol_latest: f64) -> MultiTimeframeView {
        let daily = neutral(Timeframe::Daily, rsi)
            .with_indicator(keys::MACD_LINE, vec![0.02; N])
            .with_indicator(keys::MACD_SIGNAL, vec![0.02; N]);
        let hourly = neutral(Timeframe::Hour1, rsi)
            .with_indicator(keys::BB_MIDDLE, vec![100.0 - close_offset; N])
            .with_indicator(keys::VOLATILITY, series(N, 0.01, &[vol_latest]));

        MultiTimeframeView::new()
            .with_snapshot(daily)
            .with_snapshot(neutral(Timeframe::Hour4, rsi))
            .with_snapshot(hourly)
            .with_snapshot(neutral(Timeframe::Min5, rsi))
    }

    #[test]
    fn test_fires_on_balanced_market() {
        let detection = RsiBattle::default()
            .evaluate(&battle_view(50.0, 0.04, 0.015))
            .unwrap()
            .expect("pattern should fire");

        assert_eq!(detection.pattern_name, "RSI_BATTLE");
        assert_eq!(detection.priority, Priority::Low);
        assert!((0.6..=1.0).contains(&detection.confidence));
        assert_eq!(detection.evidence.len(), 4);
        assert_eq!(detection.evidence[&Timeframe::Daily]["macd_line"], 0.02);
    }

    #[test]
    fn test_rsi_outside_band_is_absent() {
        let result = RsiBattle::default().evaluate(&battle_view(62.0, 0.0, 0.015)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_falling_volatility_is_absent() {
        let result = RsiBattle::default().evaluate(&battle_view(50.0, 0.0, 0.005)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_price_far_from_middle_is_absent() {
        let result = RsiBattle::default().evaluate(&battle_view(50.0, 1.0, 0.015)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_confidence_monotone_in_centering() {
        let detector = RsiBattle::default();
        let edge = detector.evaluate(&battle_view(54.0, 0.0, 0.015)).unwrap().unwrap();
        let centre = detector.evaluate(&battle_view(50.0, 0.0, 0.015)).unwrap().unwrap();
        assert!(centre.confidence > edge.confidence);
    }

    #[test]
    fn test_missing_timeframe_is_absent() {
        let mut view = battle_view(50.0, 0.0, 0.015);
        view.remove(Timeframe::Min5);
        assert!(RsiBattle::default().evaluate(&view).unwrap().is_none());
    }

    #[test]
    fn test_inverted_band_is_error() {
        let detector = RsiBattle {
            rsi_low: 60.0,
            rsi_high: 40.0,
            ..RsiBattle::default()
        };
        assert!(matches!(
            detector.evaluate(&battle_view(50.0, 0.0, 0.015)),
            Err(DetectorError::InvalidConfig { pattern: "RSI_BATTLE", .. })
        ));
    }
}
