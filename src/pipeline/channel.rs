//! Alert channels
//!
//! `deliver` returns `Ok(true)` only when the destination confirmed receipt.
//! `Ok(false)` is a clean rejection (e.g. non-2xx status); `Err` is a
//! transport failure. Either way the dispatch policy does not write the
//! notification record.

use super::render::AlertPayload;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

#[derive(Debug)]
pub enum ChannelError {
    Http(reqwest::Error),
    Config(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Http(e) => write!(f, "http error: {}", e),
            ChannelError::Config(msg) => write!(f, "channel misconfigured: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Http(e) => Some(e),
            ChannelError::Config(_) => None,
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        ChannelError::Http(e)
    }
}

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, payload: &AlertPayload) -> Result<bool, ChannelError>;
}

/// Discord webhook delivery (JSON embed)
pub struct DiscordWebhookChannel {
    webhook_url: String,
    username: String,
    client: reqwest::Client,
}

impl DiscordWebhookChannel {
    pub fn new(webhook_url: &str) -> Result<Self, ChannelError> {
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ChannelError::Config(format!(
                "webhook url must be http(s), got '{}'",
                webhook_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            webhook_url: webhook_url.to_string(),
            username: "patternwatch".to_string(),
            client,
        })
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }
}

/// Webhook body for one payload
pub fn build_embed(payload: &AlertPayload, username: &str) -> serde_json::Value {
    let fields: Vec<serde_json::Value> = payload
        .fields
        .iter()
        .map(|f| json!({ "name": f.name, "value": f.value, "inline": f.inline }))
        .collect();

    let timestamp = chrono::DateTime::from_timestamp(payload.timestamp, 0).map(|dt| dt.to_rfc3339());

    json!({
        "username": username,
        "embeds": [{
            "title": payload.title,
            "description": payload.description,
            "color": payload.color,
            "fields": fields,
            "timestamp": timestamp,
            "footer": { "text": format!("{} | {}", payload.instrument, payload.priority) },
        }],
    })
}

#[async_trait]
impl AlertChannel for DiscordWebhookChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<bool, ChannelError> {
        let body = build_embed(payload, &self.username);
        let response = self.client.post(&self.webhook_url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("⚠️  Discord webhook rejected alert '{}': {}", payload.title, status);
            return Ok(false);
        }
        Ok(true)
    }
}

/// Writes alerts to the log; always reports delivery
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<bool, ChannelError> {
        log::info!("🚨 {}", payload.title);
        log::info!("   ├─ {}", payload.description);
        for field in &payload.fields {
            log::info!("   ├─ {}: {}", field.name, field.value.replace('\n', ", "));
        }
        log::info!("   └─ at {}", payload.timestamp);
        Ok(true)
    }
}
