//! MACD_BULLISH_ALIGNMENT / MACD_BEARISH_ALIGNMENT
//!
//! MACD line on the same side of its signal on every timeframe, with the 1h
//! histogram having just flipped sign.

use super::predicates::{crossed_above, crossed_below, ratio_score, recency_score, ScoreCard};
use super::{check_lookback, check_positive, round4, Detector, DetectorError};
use crate::pipeline::detection::{Detection, MarketBias, PatternId};
use crate::pipeline::indicators::keys;
use crate::pipeline::priority::Priority;
use crate::pipeline::types::{MultiTimeframeView, Timeframe};
use serde_json::json;

const CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone)]
pub struct MacdAlignment {
    side: Side,
    /// 1h bars in which the histogram must have flipped
    pub lookback: usize,
    /// Normalised line/signal separation that scores as full strength
    pub full_separation: f64,
}

impl MacdAlignment {
    pub fn bullish() -> Self {
        Self {
            side: Side::Bullish,
            lookback: 3,
            full_separation: 0.25,
        }
    }

    pub fn bearish() -> Self {
        Self {
            side: Side::Bearish,
            ..Self::bullish()
        }
    }

    fn bullish_side(&self) -> bool {
        self.side == Side::Bullish
    }

    fn bias(&self) -> MarketBias {
        match self.side {
            Side::Bullish => MarketBias::Bullish,
            Side::Bearish => MarketBias::Bearish,
        }
    }

    fn check(&self, view: &MultiTimeframeView) -> Option<Detection> {
        let mut separations = Vec::with_capacity(4);
        let mut evidence = Vec::with_capacity(4);
        for tf in Timeframe::all() {
            let line = view.latest(tf, keys::MACD_LINE)?;
            let signal = view.latest(tf, keys::MACD_SIGNAL)?;
            let aligned = if self.bullish_side() {
                line > signal
            } else {
                line < signal
            };
            if !aligned {
                return None;
            }
            let scale = line.abs() + signal.abs();
            separations.push(if scale > 0.0 { (line - signal).abs() / scale } else { 0.0 });
            evidence.push((tf, line, signal));
        }

        let hist = view.get(Timeframe::Hour1)?.indicator(keys::MACD_HIST)?;
        let bars_ago = if self.bullish_side() {
            crossed_above(hist, 0.0, self.lookback)?
        } else {
            crossed_below(hist, 0.0, self.lookback)?
        };

        let separation = separations.iter().sum::<f64>() / separations.len() as f64;
        let confidence = ScoreCard::new()
            .add(0.6, ratio_score(separation, self.full_separation))
            .add(0.4, recency_score(bars_ago, self.lookback))
            .finish(CONFIDENCE_FLOOR);

        let mut detection = self.detection(confidence);
        for (tf, line, signal) in evidence {
            let mut fields = json!({
                "macd_line": round4(line),
                "macd_signal": round4(signal),
            });
            if tf == Timeframe::Hour1 {
                fields["macd_hist"] = json!(hist.latest().map(round4));
                fields["bars_since_flip"] = json!(bars_ago);
            }
            detection = detection.with_evidence(tf, fields);
        }

        let direction = if self.bullish_side() { "above" } else { "below" };
        Some(detection.with_render_hint(
            format!("MACD {} signal on all timeframes, 1h histogram flipped {} bar(s) ago", direction, bars_ago),
            self.bias(),
        ))
    }
}

impl Detector for MacdAlignment {
    fn pattern_id(&self) -> PatternId {
        if self.bullish_side() {
            PatternId(7)
        } else {
            PatternId(8)
        }
    }

    fn name(&self) -> &'static str {
        if self.bullish_side() {
            "MACD_BULLISH_ALIGNMENT"
        } else {
            "MACD_BEARISH_ALIGNMENT"
        }
    }

    fn priority(&self) -> Priority {
        Priority::Medium
    }

    fn description(&self) -> &'static str {
        if self.bullish_side() {
            "MACD line above signal on 1d/4h/1h/5m and 1h histogram turned positive"
        } else {
            "MACD line below signal on 1d/4h/1h/5m and 1h histogram turned negative"
        }
    }

    fn min_len(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        check_lookback(self.name(), self.lookback)?;
        check_positive(self.name(), "full_separation", self.full_separation)?;
        Ok(self.check(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detectors::fixtures::{flat, series};
    use crate::pipeline::types::IndicatorSnapshot;

    const N: usize = 10;

    fn macd(tf: Timeframe, line: f64, signal: f64) -> IndicatorSnapshot {
        flat(tf, N, 100.0)
            .with_indicator(keys::MACD_LINE, vec![line; N])
            .with_indicator(keys::MACD_SIGNAL, vec![signal; N])
    }

    fn aligned_view(line: f64, signal: f64, hist_tail: &[f64], hist_fill: f64) -> MultiTimeframeView {
        MultiTimeframeView::new()
            .with_snapshot(macd(Timeframe::Daily, line, signal))
            .with_snapshot(macd(Timeframe::Hour4, line, signal))
            .with_snapshot(
                macd(Timeframe::Hour1, line, signal)
                    .with_indicator(keys::MACD_HIST, series(N, hist_fill, hist_tail)),
            )
            .with_snapshot(macd(Timeframe::Min5, line, signal))
    }

    #[test]
    fn test_bullish_alignment_fires() {
        let view = aligned_view(0.5, 0.3, &[-0.05, 0.1], -0.1);
        let detection = MacdAlignment::bullish().evaluate(&view).unwrap().unwrap();

        assert_eq!(detection.pattern_id, PatternId(7));
        assert_eq!(detection.evidence.len(), 4);
        assert_eq!(detection.evidence[&Timeframe::Hour1]["bars_since_flip"], 0);
        assert!(MacdAlignment::bearish().evaluate(&view).unwrap().is_none());
    }

    #[test]
    fn test_bearish_alignment_fires() {
        let view = aligned_view(-0.5, -0.3, &[0.05, -0.1], 0.1);
        let detection = MacdAlignment::bearish().evaluate(&view).unwrap().unwrap();
        assert_eq!(detection.pattern_name, "MACD_BEARISH_ALIGNMENT");
        assert_eq!(detection.render_hint.bias, MarketBias::Bearish);
    }

    #[test]
    fn test_one_misaligned_timeframe_is_absent() {
        let view = aligned_view(0.5, 0.3, &[-0.05, 0.1], -0.1)
            .with_snapshot(macd(Timeframe::Min5, 0.2, 0.3));
        assert!(MacdAlignment::bullish().evaluate(&view).unwrap().is_none());
    }

    #[test]
    fn test_stale_histogram_flip_is_absent() {
        // histogram has been positive for the whole look-back
        let view = aligned_view(0.5, 0.3, &[0.1, 0.1, 0.1, 0.1], -0.1);
        assert!(MacdAlignment::bullish().evaluate(&view).unwrap().is_none());
    }

    #[test]
    fn test_zero_lookback_is_error() {
        let detector = MacdAlignment {
            lookback: 0,
            ..MacdAlignment::bearish()
        };
        let view = aligned_view(-0.5, -0.3, &[0.05, -0.1], 0.1);
        assert!(detector.evaluate(&view).is_err());
        assert_eq!(detector.pattern_id(), PatternId(8));
    }
}
