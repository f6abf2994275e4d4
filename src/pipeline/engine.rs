//! Pipeline Engine - runs the detector registry against one instrument's view
//!
//! ## Flow
//!
//! ```text
//! MultiTimeframeView
//!     ↓
//! validate (fail-closed: any missing/inconsistent timeframe → no detections)
//!     ↓
//! every detector whose min_len() is satisfied → evaluate()
//!     ↓
//! stamp(instrument, now) → stable sort by (priority value, confidence) desc
//!     ↓
//! Vec<Detection>
//! ```
//!
//! `analyze` evaluates sequentially; `analyze_concurrent` fans the same work
//! out over tokio tasks (bounded by a semaphore) and returns the same list.
//! A failing or panicking detector only loses its own result.

use super::detection::Detection;
use super::detectors::{Detector, DetectorError};
use super::registry::DetectorRegistry;
use super::types::{MultiTimeframeView, Timeframe};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct PipelineEngine {
    registry: Arc<DetectorRegistry>,

    /// Timeframes every view must carry
    required: Vec<Timeframe>,

    /// Upper bound on detector tasks in flight for `analyze_concurrent`
    concurrency: usize,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl PipelineEngine {
    /// Engine over the full canonical timeframe set, wall-clock timestamps
    pub fn new(registry: Arc<DetectorRegistry>) -> Self {
        Self::new_with_timestamp_fn(registry, Box::new(|| chrono::Utc::now().timestamp()))
    }

    /// Used for testing with deterministic timestamps
    pub fn new_with_timestamp_fn(
        registry: Arc<DetectorRegistry>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            required: Timeframe::all().to_vec(),
            concurrency: DEFAULT_CONCURRENCY,
            now_fn,
        }
    }

    pub fn with_required_timeframes(mut self, required: Vec<Timeframe>) -> Self {
        self.required = required;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Applied between cycles when the configured limit changes
    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.concurrency = concurrency.max(1);
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn registry(&self) -> &Arc<DetectorRegistry> {
        &self.registry
    }

    pub fn required_timeframes(&self) -> &[Timeframe] {
        &self.required
    }

    /// Evaluate every detector sequentially
    pub fn analyze(&self, view: &MultiTimeframeView, instrument: &str) -> Vec<Detection> {
        let eligible = match self.eligible_detectors(view, instrument) {
            Some(detectors) => detectors,
            None => return Vec::new(),
        };
        let now = (self.now_fn)();

        let mut found = Vec::new();
        for detector in eligible {
            if let Some(detection) = collect(detector.as_ref(), detector.evaluate(view), instrument) {
                found.push(detection);
            }
        }

        finish(found, instrument, now)
    }

    /// Same result as `analyze`, with detectors fanned out over tokio tasks
    pub async fn analyze_concurrent(
        &self,
        view: Arc<MultiTimeframeView>,
        instrument: &str,
    ) -> Vec<Detection> {
        let eligible = match self.eligible_detectors(&view, instrument) {
            Some(detectors) => detectors,
            None => return Vec::new(),
        };
        let now = (self.now_fn)();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(eligible.len());
        for detector in &eligible {
            let detector = Arc::clone(detector);
            let view = Arc::clone(&view);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                // Closed only if the semaphore is dropped, which never happens here
                let _permit = semaphore.acquire_owned().await.ok();
                detector.evaluate(&view)
            }));
        }

        // Awaited in registration order so the stable sort matches `analyze`
        let mut found = Vec::new();
        for (detector, handle) in eligible.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(DetectorError::Internal(format!("task failed: {}", join_err))),
            };
            if let Some(detection) = collect(detector.as_ref(), outcome, instrument) {
                found.push(detection);
            }
        }

        finish(found, instrument, now)
    }

    /// Validate the view and select the detectors with enough history
    ///
    /// `None` when the view is globally invalid.
    fn eligible_detectors(&self, view: &MultiTimeframeView, instrument: &str) -> Option<Vec<Arc<dyn Detector>>> {
        if let Err(e) = view.validate(&self.required) {
            log::warn!("⚠️  Skipping {}: invalid market view ({})", instrument, e);
            return None;
        }

        let available = view.shortest_len(&self.required);
        let eligible = self
            .registry
            .list()
            .iter()
            .filter(|detector| {
                let needed = detector.min_len();
                if available < needed {
                    log::debug!(
                        "⏭️  {} skipped for {}: {} bars available, {} needed",
                        detector.name(),
                        instrument,
                        available,
                        needed
                    );
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        Some(eligible)
    }
}

/// Priority-weighted mean confidence (weight = priority value / 100)
///
/// Informational only; 0.0 for an empty list.
pub fn overall_confidence(detections: &[Detection]) -> f64 {
    let (weighted, total) = detections.iter().fold((0.0, 0.0), |(weighted, total), d| {
        let weight = d.priority.value() as f64 / 100.0;
        (weighted + weight * d.confidence, total + weight)
    });
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}

fn collect(
    detector: &dyn Detector,
    outcome: Result<Option<Detection>, DetectorError>,
    instrument: &str,
) -> Option<Detection> {
    match outcome {
        Ok(found) => found,
        Err(e) => {
            log::error!("❌ {} failed on {}: {}", detector.name(), instrument, e);
            None
        }
    }
}

fn finish(found: Vec<Detection>, instrument: &str, now: i64) -> Vec<Detection> {
    let mut stamped: Vec<Detection> = found.into_iter().map(|d| d.stamp(instrument, now)).collect();
    // Vec::sort_by is stable: ties keep registration order
    stamped.sort_by(|a, b| compare_rank(b, a));
    stamped
}

fn compare_rank(a: &Detection, b: &Detection) -> Ordering {
    a.priority
        .value()
        .cmp(&b.priority.value())
        .then(a.confidence.partial_cmp(&b.confidence).unwrap_or(Ordering::Equal))
}
