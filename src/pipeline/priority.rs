//! Alert priority tiers
//!
//! Ranking uses the stored numeric value, not the declaration order of the
//! variants. `High` (100) therefore outranks `VeryHigh` (90); the values are
//! kept as-is so historic alert ordering stays reproducible.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    VeryHigh,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank used for sorting and confidence weighting
    pub fn value(&self) -> u32 {
        match self {
            Priority::VeryHigh => 90,
            Priority::High => 100,
            Priority::Medium => 70,
            Priority::Low => 50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::VeryHigh => "VERY_HIGH",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    /// Accepts `VERY_HIGH`, `very-high`, `VeryHigh` ...
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "VERYHIGH" => Some(Priority::VeryHigh),
            "HIGH" => Some(Priority::High),
            "MEDIUM" => Some(Priority::Medium),
            "LOW" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Delay before delivery when configuration does not override it
    ///
    /// The two top tiers go out immediately.
    pub fn default_delay(&self) -> Duration {
        match self {
            Priority::VeryHigh | Priority::High => Duration::ZERO,
            Priority::Medium => Duration::from_secs(30),
            Priority::Low => Duration::from_secs(60),
        }
    }

    /// Embed colour (0xRRGGBB)
    pub fn color(&self) -> u32 {
        match self {
            Priority::VeryHigh => 0xE74C3C,
            Priority::High => 0xE67E22,
            Priority::Medium => 0xF1C40F,
            Priority::Low => 0x3498DB,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Priority::VeryHigh => "🔴",
            Priority::High => "🟠",
            Priority::Medium => "🟡",
            Priority::Low => "🔵",
        }
    }

    pub fn all() -> [Priority; 4] {
        [
            Priority::VeryHigh,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ]
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
