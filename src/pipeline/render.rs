//! Detection → alert payload
//!
//! Pure formatting; no I/O and no clock. The dispatch policy sets the
//! delivery timestamp just before handing the payload to a channel.

use super::detection::Detection;
use super::types::Timeframe;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub title: String,
    pub description: String,
    /// 0xRRGGBB
    pub color: u32,
    pub priority: String,
    pub instrument: String,
    pub fields: Vec<AlertField>,
    /// Unix seconds; evaluation time until `delivered_at` is applied
    pub timestamp: i64,
}

impl AlertPayload {
    pub fn delivered_at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

pub fn render_alert(detection: &Detection) -> AlertPayload {
    let priority = detection.priority;
    let title = format!(
        "{} {} | {}",
        priority.emoji(),
        detection.pattern_name,
        detection.instrument
    );

    let mut description = detection.render_hint.headline.clone();
    if description.is_empty() {
        description = format!("{} detected", detection.pattern_name);
    }

    let mut fields = vec![
        AlertField {
            name: "Priority".to_string(),
            value: priority.as_str().to_string(),
            inline: true,
        },
        AlertField {
            name: "Confidence".to_string(),
            value: format!("{:.0}%", detection.confidence * 100.0),
            inline: true,
        },
        AlertField {
            name: "Bias".to_string(),
            value: detection.render_hint.bias.as_str().to_string(),
            inline: true,
        },
    ];

    for (timeframe, evidence) in &detection.evidence {
        fields.push(AlertField {
            name: timeframe_label(*timeframe).to_string(),
            value: format_evidence(evidence),
            inline: false,
        });
    }

    AlertPayload {
        title,
        description,
        color: priority.color(),
        priority: priority.as_str().to_string(),
        instrument: detection.instrument.clone(),
        fields,
        timestamp: detection.timestamp,
    }
}

fn timeframe_label(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Daily => "1D",
        Timeframe::Hour4 => "4H",
        Timeframe::Hour1 => "1H",
        Timeframe::Min5 => "5M",
    }
}

/// `key: value` per line, keys in sorted order
fn format_evidence(evidence: &serde_json::Value) -> String {
    match evidence {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.iter()
                .map(|k| format!("{}: {}", k, format_scalar(&map[k.as_str()])))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => format_scalar(other),
    }
}

fn format_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}
