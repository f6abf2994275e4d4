//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use patternwatch::pipeline::channel::{AlertChannel, ChannelError};
use patternwatch::pipeline::detection::{Detection, PatternId};
use patternwatch::pipeline::detectors::{Detector, DetectorError};
use patternwatch::pipeline::indicators::keys;
use patternwatch::pipeline::priority::Priority;
use patternwatch::pipeline::render::AlertPayload;
use patternwatch::pipeline::types::{Bar, IndicatorSnapshot, MultiTimeframeView, Timeframe};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub const T0: i64 = 1_700_000_000;

pub fn flat_bars(timeframe: Timeframe, n: usize, close: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            Bar::new(
                T0 + i as i64 * timeframe.duration_secs(),
                close,
                close * 1.001,
                close * 0.999,
                close,
                1_000,
            )
        })
        .collect()
}

/// Balanced market: RSI 50 everywhere, daily MACD ≈ 0.02, 1h close within
/// 0.04% of the middle band, 1h volatility rising on the last bar
pub fn rsi_battle_view() -> MultiTimeframeView {
    const N: usize = 30;
    let neutral = |tf: Timeframe| {
        IndicatorSnapshot::new(tf, flat_bars(tf, N, 100.0)).with_indicator(keys::RSI_14, vec![50.0; N])
    };

    let mut volatility = vec![0.01; N];
    volatility[N - 1] = 0.015;

    MultiTimeframeView::new()
        .with_snapshot(
            neutral(Timeframe::Daily)
                .with_indicator(keys::MACD_LINE, vec![0.02; N])
                .with_indicator(keys::MACD_SIGNAL, vec![0.021; N]),
        )
        .with_snapshot(neutral(Timeframe::Hour4))
        .with_snapshot(
            neutral(Timeframe::Hour1)
                .with_indicator(keys::BB_MIDDLE, vec![99.96; N])
                .with_indicator(keys::VOLATILITY, volatility),
        )
        .with_snapshot(neutral(Timeframe::Min5))
}

/// 4h/1h RSI pinned at `rsi`, 1h close on the wrong side of `band`, and the
/// 5m RSI stepping from `turn.0` to `turn.1` on the last bar
fn extreme_view(rsi: f64, band: (&str, f64), turn: (f64, f64)) -> MultiTimeframeView {
    const N: usize = 30;
    let pinned = |tf: Timeframe| {
        IndicatorSnapshot::new(tf, flat_bars(tf, N, 100.0)).with_indicator(keys::RSI_14, vec![rsi; N])
    };

    let mut rsi_5m = vec![turn.0; N];
    rsi_5m[N - 1] = turn.1;

    MultiTimeframeView::new()
        .with_snapshot(
            IndicatorSnapshot::new(Timeframe::Daily, flat_bars(Timeframe::Daily, N, 100.0))
                .with_indicator(keys::RSI_14, vec![50.0; N]),
        )
        .with_snapshot(pinned(Timeframe::Hour4))
        .with_snapshot(pinned(Timeframe::Hour1).with_indicator(band.0, vec![band.1; N]))
        .with_snapshot(
            IndicatorSnapshot::new(Timeframe::Min5, flat_bars(Timeframe::Min5, N, 100.0))
                .with_indicator(keys::RSI_14, rsi_5m),
        )
}

/// Capitulation: RSI 22 on 4h/1h, close under the lower band, 5m RSI back above 30
pub fn oversold_view() -> MultiTimeframeView {
    extreme_view(22.0, (keys::BB_LOWER, 100.5), (28.0, 33.0))
}

/// Blow-off: RSI 78 on 4h/1h, close over the upper band, 5m RSI back below 70
pub fn overbought_view() -> MultiTimeframeView {
    extreme_view(78.0, (keys::BB_UPPER, 99.5), (72.0, 67.0))
}

/// Random-walk OHLCV bars
pub fn random_bars(rng: &mut StdRng, timeframe: Timeframe, n: usize) -> Vec<Bar> {
    let mut close: f64 = rng.gen_range(20.0..2_000.0);
    (0..n)
        .map(|i| {
            let open = close;
            close = (open * (1.0 + rng.gen_range(-0.03..0.03))).max(0.01);
            let wick = rng.gen_range(0.0..0.01);
            Bar::new(
                T0 + i as i64 * timeframe.duration_secs(),
                open,
                open.max(close) * (1.0 + wick),
                open.min(close) * (1.0 - wick),
                close,
                rng.gen_range(100..10_000),
            )
        })
        .collect()
}

/// Every timeframe computed from random bars with the standard indicator set
pub fn random_view(rng: &mut StdRng, n: usize) -> MultiTimeframeView {
    Timeframe::all().iter().fold(MultiTimeframeView::new(), |view, tf| {
        view.with_snapshot(IndicatorSnapshot::from_bars(*tf, random_bars(rng, *tf, n)))
    })
}

/// Non-increasing by (priority value, confidence)
pub fn assert_ranked(detections: &[Detection]) {
    for pair in detections.windows(2) {
        let (a, b) = (pair[0].rank(), pair[1].rank());
        assert!(
            a.0 > b.0 || (a.0 == b.0 && a.1 >= b.1),
            "out of order: {:?} before {:?}",
            a,
            b
        );
    }
}

/// Keeps every payload; accepts or rejects as told
pub struct RecordingChannel {
    accept: AtomicBool,
    sent: Mutex<Vec<AlertPayload>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            accept: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<AlertPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<bool, ChannelError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(self.accept.load(Ordering::SeqCst))
    }
}

/// Always errors
pub struct FailingDetector;

impl Detector for FailingDetector {
    fn pattern_id(&self) -> PatternId {
        PatternId(99)
    }

    fn name(&self) -> &'static str {
        "ALWAYS_FAILS"
    }

    fn priority(&self) -> Priority {
        Priority::VeryHigh
    }

    fn description(&self) -> &'static str {
        "errors on every view"
    }

    fn evaluate(&self, _view: &MultiTimeframeView) -> Result<Option<Detection>, DetectorError> {
        Err(DetectorError::Internal("indicator backend unavailable".to_string()))
    }
}
