//! VOLUME_BREAKOUT: 1h volume spike closing above the upper band, daily trend up

use super::predicates::{ratio_score, relative_distance, trailing_mean, ScoreCard};
use super::{check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{MultiTimeframeView, Timeframe};
use serde_json::json;

const NAME: &str = "VOLUME_BREAKOUT";
const CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct VolumeBreakout {
    /// Minimum multiple of the trailing mean volume
    pub volume_multiple: f64,
    pub lookback: usize,
    /// Relative close above the upper band that scores as full strength
    pub full_breakout: f64,
    /// Relative daily close above SMA50 that scores as full strength
    pub full_trend: f64,
}

impl Default for VolumeBreakout {
    fn default() -> Self {
        Self {
            volume_multiple: 2.0,
            lookback: 20,
            full_breakout: 0.01,
            full_trend: 0.05,
        }
    }
}

impl VolumeBreakout {
    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let hourly = view.get(Timeframe::Hour1)?;
        let volumes = hourly.volumes();
        let current_volume = *volumes.last()?;
        let mean_volume = trailing_mean(&volumes, self.lookback)?;
        if mean_volume <= 0.0 || current_volume < self.volume_multiple * mean_volume {
            return None;
        }
        let volume_ratio = current_volume / mean_volume;

        let close = hourly.latest_close()?;
        let upper = hourly.latest(keys::BB_UPPER)?;
        if close <= upper {
            return None;
        }

        let daily_close = view.get(Timeframe::Daily)?.latest_close()?;
        let sma_50 = view.latest(Timeframe::Daily, keys::SMA_50)?;
        if daily_close <= sma_50 {
            return None;
        }

        let confidence = ScoreCard::new()
            .add(0.5, ratio_score(volume_ratio / self.volume_multiple - 1.0, 1.0))
            .add(0.3, ratio_score(relative_distance(close, upper).unwrap_or(0.0), self.full_breakout))
            .add(0.2, ratio_score(relative_distance(daily_close, sma_50).unwrap_or(0.0), self.full_trend))
            .finish(CONFIDENCE_FLOOR);

        Some(
            self.detection(confidence)
                .with_evidence(
                    Timeframe::Hour1,
                    json!({
                        "volume": current_volume,
                        "volume_mean": round4(mean_volume),
                        "volume_ratio": round4(volume_ratio),
                        "close": close,
                        "bb_upper": round4(upper),
                    }),
                )
                .with_evidence(
                    Timeframe::Daily,
                    json!({
                        "close": daily_close,
                        "sma_50": round4(sma_50),
                    }),
                )
                .with_render_hint(
                    format!("1h volume {:.1}x average with a close above the upper band", volume_ratio),
                    MarketBias::Bullish,
                ),
        )
    }
}

impl Detector for VolumeBreakout {
    fn pattern_id(&self) -> PatternId {
        PatternId(9)
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn description(&self) -> &'static str {
        "1h volume at least 2x its trailing mean, 1h close above the upper band, daily close above SMA50"
    }

    fn min_len(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_lookback(NAME, self.lookback)?;
        check_positive(NAME, "volume_multiple", self.volume_multiple)?;
        check_positive(NAME, "full_breakout", self.full_breakout)?;
        check_positive(NAME, "full_trend", self.full_trend)?;
        Ok(self.check(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detectors::fixtures::{bars_with_volume, flat};
    use crate::pipeline::types::IndicatorSnapshot;

    const N: usize = 25;

    fn breakout_view(last_volume: u64, upper: f64, sma_50: f64) -> MultiTimeframeView {
        let mut volumes = vec![1_000; N];
        volumes[N - 1] = last_volume;
        let hourly = IndicatorSnapshot::new(
            Timeframe::Hour1,
            bars_with_volume(Timeframe::Hour1, &vec![100.0; N], &volumes),
        )
        .with_indicator(keys::BB_UPPER, vec![upper; N]);
        let daily = flat(Timeframe::Daily, N, 100.0).with_indicator(keys::SMA_50, vec![sma_50; N]);

        MultiTimeframeView::new().with_snapshot(hourly).with_snapshot(daily)
    }

    #[test]
    fn test_breakout_fires() {
        let detection = VolumeBreakout::default()
            .evaluate(&breakout_view(3_000, 99.5, 95.0))
            .unwrap()
            .unwrap();

        assert_eq!(detection.pattern_id, PatternId(9));
        assert_eq!(detection.priority, Priority::High);
        assert_eq!(detection.evidence[&Timeframe::Hour1]["volume_ratio"], 3.0);
        assert!((0.5..=1.0).contains(&detection.confidence));
    }

    #[test]
    fn test_thin_volume_is_absent() {
        let result = VolumeBreakout::default().evaluate(&breakout_view(1_500, 99.5, 95.0)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_close_inside_band_is_absent() {
        let result = VolumeBreakout::default().evaluate(&breakout_view(3_000, 101.0, 95.0)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_daily_downtrend_is_absent() {
        let result = VolumeBreakout::default().evaluate(&breakout_view(3_000, 99.5, 105.0)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_bigger_spike_scores_higher() {
        let detector = VolumeBreakout::default();
        let small = detector.evaluate(&breakout_view(2_200, 99.5, 95.0)).unwrap().unwrap();
        let large = detector.evaluate(&breakout_view(3_500, 99.5, 95.0)).unwrap().unwrap();
        assert!(large.confidence > small.confidence);
    }
}
