//! Market data acquisition
//!
//! The pipeline only needs one `MultiTimeframeView` per instrument per
//! cycle. `FileSnapshotSource` reads raw bars from disk and computes the
//! standard indicator set; `InMemorySource` serves prepared views.
//!
//! ## File format
//!
//! `<data_dir>/<INSTRUMENT>.json`:
//!
//! ```json
//! {
//!   "timeframes": {
//!     "1d": [{"timestamp": 1700000000, "open": 1.0, "high": 1.1, "low": 0.9, "close": 1.05, "volume": 10}],
//!     "4h": [...], "1h": [...], "5m": [...]
//!   }
//! }
//! ```

use super::indicators::IndicatorParams;
use super::types::{Bar, IndicatorSnapshot, MultiTimeframeView, Timeframe};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug)]
pub enum SourceError {
    NotFound(String),
    Io(std::io::Error),
    Parse(serde_json::Error),
    UnknownTimeframe(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::NotFound(instrument) => write!(f, "no market data for {}", instrument),
            SourceError::Io(e) => write!(f, "io error: {}", e),
            SourceError::Parse(e) => write!(f, "malformed market data: {}", e),
            SourceError::UnknownTimeframe(label) => write!(f, "unknown timeframe label '{}'", label),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e)
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_view(&self, instrument: &str) -> Result<MultiTimeframeView, SourceError>;
}

#[derive(Debug, Deserialize)]
struct BarFile {
    timeframes: HashMap<String, Vec<Bar>>,
}

/// Reads `<data_dir>/<instrument>.json` on every fetch
pub struct FileSnapshotSource {
    data_dir: PathBuf,
    params: IndicatorParams,
}

impl FileSnapshotSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            params: IndicatorParams::default(),
        }
    }

    pub fn with_params(mut self, params: IndicatorParams) -> Self {
        self.params = params;
        self
    }

    fn path_for(&self, instrument: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", instrument))
    }
}

/// Parse a bar file and compute the standard indicator set per timeframe
pub fn parse_view(content: &str, params: &IndicatorParams) -> Result<MultiTimeframeView, SourceError> {
    let file: BarFile = serde_json::from_str(content)?;

    let mut view = MultiTimeframeView::new();
    for (label, bars) in file.timeframes {
        let timeframe = Timeframe::from_str(&label).ok_or(SourceError::UnknownTimeframe(label))?;
        view.insert(IndicatorSnapshot::from_bars_with(timeframe, bars, params));
    }
    Ok(view)
}

#[async_trait]
impl MarketDataSource for FileSnapshotSource {
    async fn fetch_view(&self, instrument: &str) -> Result<MultiTimeframeView, SourceError> {
        let path = self.path_for(instrument);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(instrument.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let view = parse_view(&content, &self.params)?;
        log::debug!(
            "📥 Loaded {} ({} timeframes) from {}",
            instrument,
            view.timeframes().len(),
            path.display()
        );
        Ok(view)
    }
}

/// Serves prepared views keyed by instrument
#[derive(Default)]
pub struct InMemorySource {
    views: Mutex<HashMap<String, MultiTimeframeView>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instrument: &str, view: MultiTimeframeView) {
        self.views
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(instrument.to_string(), view);
    }
}

#[async_trait]
impl MarketDataSource for InMemorySource {
    async fn fetch_view(&self, instrument: &str) -> Result<MultiTimeframeView, SourceError> {
        self.views
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(instrument)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(instrument.to_string()))
    }
}
