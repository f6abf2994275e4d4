//! Standard indicator set computed from raw bars
//!
//! Used by the file-backed data source and by tests to turn plain OHLCV
//! bars into an `IndicatorSnapshot`. Every function returns a series aligned
//! 1:1 with its input; samples before the look-back is filled are `NaN`.

use super::types::{Bar, IndicatorSnapshot, Timeframe};

/// Indicator keys understood by the shipped detectors
pub mod keys {
    pub const RSI_14: &str = "rsi_14";
    pub const MACD_LINE: &str = "macd_line";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const BB_UPPER: &str = "bb_upper";
    pub const BB_MIDDLE: &str = "bb_middle";
    pub const BB_LOWER: &str = "bb_lower";
    pub const SMA_50: &str = "sma_50";
    pub const SMA_200: &str = "sma_200";
    pub const VOLATILITY: &str = "volatility";
}

/// Periods used for the standard set
#[derive(Debug, Clone)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub volatility_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
            sma_fast: 50,
            sma_slow: 200,
            volatility_period: 20,
        }
    }
}

/// Simple moving average
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values
///
/// Leading `NaN`s in the input are skipped, so this can be chained
/// (e.g. the MACD signal line is an EMA of the MACD line).
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }

    let start = match values.iter().position(|v| v.is_finite()) {
        Some(idx) => idx,
        None => return out,
    };
    if values.len() - start < period {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed_end = start + period;
    let mut prev = values[start..seed_end].iter().sum::<f64>() / period as f64;
    out[seed_end - 1] = prev;
    for i in seed_end..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Relative Strength Index with Wilder smoothing
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    for i in (period + 1)..n {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// MACD line, signal line and histogram
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal);
    let hist = line.iter().zip(&signal_line).map(|(l, s)| l - s).collect();
    (line, signal_line, hist)
}

/// Rolling population standard deviation
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| !v.is_finite()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        out[i] = var.sqrt();
    }
    out
}

/// Bollinger Bands: (upper, middle, lower)
pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let middle = sma(closes, period);
    let std = rolling_std(closes, period);
    let upper = middle.iter().zip(&std).map(|(m, s)| m + num_std * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - num_std * s).collect();
    (upper, middle, lower)
}

/// Realized volatility: rolling std-dev of log returns
pub fn realized_volatility(closes: &[f64], period: usize) -> Vec<f64> {
    let mut returns = vec![f64::NAN; closes.len()];
    for i in 1..closes.len() {
        if closes[i - 1] > 0.0 && closes[i] > 0.0 {
            returns[i] = (closes[i] / closes[i - 1]).ln();
        }
    }
    rolling_std(&returns, period)
}

impl IndicatorSnapshot {
    /// Build a snapshot with the standard indicator set
    pub fn from_bars(timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        Self::from_bars_with(timeframe, bars, &IndicatorParams::default())
    }

    pub fn from_bars_with(timeframe: Timeframe, bars: Vec<Bar>, params: &IndicatorParams) -> Self {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let (macd_line, macd_signal, macd_hist) =
            macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal);
        let (bb_upper, bb_middle, bb_lower) = bollinger(&closes, params.bb_period, params.bb_std);

        IndicatorSnapshot::new(timeframe, bars)
            .with_indicator(keys::RSI_14, rsi(&closes, params.rsi_period))
            .with_indicator(keys::MACD_LINE, macd_line)
            .with_indicator(keys::MACD_SIGNAL, macd_signal)
            .with_indicator(keys::MACD_HIST, macd_hist)
            .with_indicator(keys::BB_UPPER, bb_upper)
            .with_indicator(keys::BB_MIDDLE, bb_middle)
            .with_indicator(keys::BB_LOWER, bb_lower)
            .with_indicator(keys::SMA_50, sma(&closes, params.sma_fast))
            .with_indicator(keys::SMA_200, sma(&closes, params.sma_slow))
            .with_indicator(
                keys::VOLATILITY,
                realized_volatility(&closes, params.volatility_period),
            )
    }
}
