//! Detection output of a fired pattern rule
//!
//! A detector builds a `Detection` with the builder methods below; the
//! engine then consumes it once more through `stamp()` to attach the
//! instrument and evaluation time. After that the value is only read.

use super::priority::Priority;
use super::types::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable numeric identifier of a pattern rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub u32);

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Directional lean of a pattern, used for presentation only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketBias {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketBias {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketBias::Bullish => "BULLISH",
            MarketBias::Bearish => "BEARISH",
            MarketBias::Neutral => "NEUTRAL",
        }
    }
}

/// Presentation hint attached by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderHint {
    /// One-line human summary of what fired
    pub headline: String,
    pub bias: MarketBias,
}

impl Default for RenderHint {
    fn default() -> Self {
        Self {
            headline: String::new(),
            bias: MarketBias::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub pattern_id: PatternId,
    pub pattern_name: String,
    pub priority: Priority,
    /// Always within [0, 1]
    pub confidence: f64,
    /// Evaluation time (Unix seconds), set by the engine
    pub timestamp: i64,
    /// Set by the engine
    pub instrument: String,
    pub evidence: BTreeMap<Timeframe, serde_json::Value>,
    pub render_hint: RenderHint,
}

impl Detection {
    /// Create a detection; confidence is clamped to [0, 1] (NaN becomes 0)
    pub fn new(pattern_id: PatternId, pattern_name: &str, priority: Priority, confidence: f64) -> Self {
        Self {
            pattern_id,
            pattern_name: pattern_name.to_string(),
            priority,
            confidence: clamp_confidence(confidence),
            timestamp: 0,
            instrument: String::new(),
            evidence: BTreeMap::new(),
            render_hint: RenderHint::default(),
        }
    }

    pub fn with_evidence(mut self, timeframe: Timeframe, evidence: serde_json::Value) -> Self {
        self.evidence.insert(timeframe, evidence);
        self
    }

    pub fn with_render_hint(mut self, headline: impl Into<String>, bias: MarketBias) -> Self {
        self.render_hint = RenderHint {
            headline: headline.into(),
            bias,
        };
        self
    }

    /// Attach instrument and evaluation time
    pub fn stamp(mut self, instrument: &str, timestamp: i64) -> Self {
        self.instrument = instrument.to_string();
        self.timestamp = timestamp;
        self
    }

    /// Sort key: priority value first, confidence as tiebreak
    pub fn rank(&self) -> (u32, f64) {
        (self.priority.value(), self.confidence)
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}
