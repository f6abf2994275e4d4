//! # Multi-timeframe pattern pipeline
//!
//! Evaluates a fixed registry of market-pattern detectors against one
//! instrument's multi-timeframe view and routes what fires to an alert
//! channel, subject to enable filters, per-priority delays and a
//! per-(pattern, instrument) cooldown.
//!
//! ## Flow
//!
//! ```text
//! MarketDataSource → MultiTimeframeView
//!     ↓
//! PipelineEngine (DetectorRegistry, fail-closed validation, ranked output)
//!     ↓
//! DispatchPolicy (pattern gate → priority gate → cooldown → delay)
//!     ↓
//! render_alert → AlertChannel → NotificationStore (on confirmed delivery)
//! ```
//!
//! `PipelineScheduler` drives the flow on an interval and re-reads the
//! configuration every cycle.
//!
//! ## Module Organization
//!
//! - `types` - Timeframes, bars, indicator snapshots, the view
//! - `indicators` - SMA/EMA/RSI/MACD/Bollinger/volatility
//! - `priority`, `detection` - Detector output
//! - `detectors` - The ten pattern rules
//! - `registry` - Ordered, duplicate-free detector set
//! - `engine` - Evaluation and ranking
//! - `dispatch`, `history` - Gating, delays, cooldown, outcome ring buffer
//! - `render`, `channel` - Payload formatting and delivery
//! - `db` - Notification records (SQLite or in-memory)
//! - `config`, `source`, `scheduler`, `error` - Runtime plumbing

pub mod channel;
pub mod config;
pub mod db;
pub mod detection;
pub mod detectors;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod history;
pub mod indicators;
pub mod priority;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use channel::{AlertChannel, DiscordWebhookChannel, LogChannel};
pub use config::{ConfigSource, DispatchSettings, EnvConfigSource, PipelineConfig};
pub use db::{InMemoryNotificationStore, NotificationRecord, NotificationStore, SqliteNotificationStore};
pub use detection::{Detection, MarketBias, PatternId};
pub use detectors::{Detector, DetectorError};
pub use dispatch::{DispatchDecision, DispatchPolicy, SuppressReason};
pub use engine::PipelineEngine;
pub use error::PipelineError;
pub use priority::Priority;
pub use registry::DetectorRegistry;
pub use render::{render_alert, AlertPayload};
pub use scheduler::{CycleReport, PipelineScheduler};
pub use source::{FileSnapshotSource, MarketDataSource};
pub use types::{Bar, IndicatorSnapshot, MultiTimeframeView, Timeframe};
