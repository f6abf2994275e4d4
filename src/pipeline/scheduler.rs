//! Evaluation scheduler
//!
//! One cycle:
//!
//! ```text
//! ConfigSource::load  (failure → keep last good config)
//!     ↓
//! for each instrument:
//!     MarketDataSource::fetch_view  (failure → skip this instrument only)
//!         ↓
//!     PipelineEngine::analyze_concurrent
//!         ↓
//!     DispatchPolicy::dispatch_all
//!     ↓
//! CycleReport
//! ```
//!
//! `run` repeats the cycle on the configured interval until shutdown, then
//! cancels pending delayed dispatches.

use super::config::{ConfigSource, PipelineConfig};
use super::db::SqliteNotificationStore;
use super::dispatch::{DispatchDecision, DispatchPolicy, SuppressReason};
use super::engine::{overall_confidence, PipelineEngine};
use super::error::PipelineError;
use super::source::MarketDataSource;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};

/// Tally of one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub instruments_evaluated: usize,
    pub instruments_skipped: usize,
    pub detections: usize,
    pub delivered: usize,
    pub scheduled: usize,
    pub dropped_pattern: usize,
    pub dropped_priority: usize,
    pub dropped_cooldown: usize,
    pub cancelled: usize,
    pub failed: usize,
    /// Priority-weighted mean confidence per evaluated instrument
    pub confidence: BTreeMap<String, f64>,
}

impl CycleReport {
    fn tally(&mut self, decision: DispatchDecision) {
        match decision {
            DispatchDecision::Delivered => self.delivered += 1,
            DispatchDecision::Scheduled { .. } => self.scheduled += 1,
            DispatchDecision::Suppressed(SuppressReason::PatternDisabled) => self.dropped_pattern += 1,
            DispatchDecision::Suppressed(SuppressReason::PriorityDisabled) => self.dropped_priority += 1,
            DispatchDecision::Suppressed(SuppressReason::Cooldown) => self.dropped_cooldown += 1,
            DispatchDecision::Suppressed(SuppressReason::ShuttingDown) => self.cancelled += 1,
            DispatchDecision::Failed => self.failed += 1,
        }
    }

    fn log(&self) {
        log::info!(
            "📊 Cycle: {} instrument(s), {} detection(s)",
            self.instruments_evaluated,
            self.detections
        );
        log::info!(
            "   ├─ Delivered: {}, scheduled: {}, failed: {}",
            self.delivered,
            self.scheduled,
            self.failed
        );
        log::info!(
            "   ├─ Dropped: {} pattern, {} priority, {} cooldown",
            self.dropped_pattern,
            self.dropped_priority,
            self.dropped_cooldown
        );
        log::info!("   └─ Skipped instruments: {}", self.instruments_skipped);
    }
}

pub struct PipelineScheduler {
    config_source: Arc<dyn ConfigSource>,
    engine: PipelineEngine,
    source: Arc<dyn MarketDataSource>,
    policy: Arc<DispatchPolicy>,
    last_good: Option<PipelineConfig>,
    history_store: Option<Arc<SqliteNotificationStore>>,
}

impl PipelineScheduler {
    pub fn new(
        config_source: Arc<dyn ConfigSource>,
        engine: PipelineEngine,
        source: Arc<dyn MarketDataSource>,
        policy: Arc<DispatchPolicy>,
    ) -> Self {
        Self {
            config_source,
            engine,
            source,
            policy,
            last_good: None,
            history_store: None,
        }
    }

    /// Prune the SQLite alert history after every cycle
    pub fn with_history_pruning(mut self, store: Arc<SqliteNotificationStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn policy(&self) -> &Arc<DispatchPolicy> {
        &self.policy
    }

    /// Configuration used by the latest successful load
    pub fn current_config(&self) -> Option<&PipelineConfig> {
        self.last_good.as_ref()
    }

    fn load_config(&mut self) -> Result<PipelineConfig, PipelineError> {
        match self.config_source.load() {
            Ok(config) => {
                if self.engine.concurrency() != config.detector_concurrency {
                    log::info!("🔧 Detector concurrency → {}", config.detector_concurrency);
                    self.engine.set_concurrency(config.detector_concurrency);
                }
                self.last_good = Some(config.clone());
                Ok(config)
            }
            Err(e) => match &self.last_good {
                Some(previous) => {
                    log::error!("❌ Config reload failed, keeping previous config: {}", e);
                    Ok(previous.clone())
                }
                None => Err(e.into()),
            },
        }
    }

    /// Evaluate and dispatch every configured instrument once
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PipelineError> {
        let config = self.load_config()?;
        if self.engine.registry().is_empty() {
            return Err(PipelineError::EmptyRegistry);
        }

        let mut report = CycleReport::default();
        if !config.enabled {
            log::info!("⏸️  Pipeline disabled, skipping cycle");
            return Ok(report);
        }

        for instrument in &config.instruments {
            let view = match self.source.fetch_view(instrument).await {
                Ok(view) => Arc::new(view),
                Err(e) => {
                    log::warn!("⚠️  No market data for {}: {}", instrument, e);
                    report.instruments_skipped += 1;
                    continue;
                }
            };

            let detections = self.engine.analyze_concurrent(view, instrument).await;
            report.instruments_evaluated += 1;
            report.detections += detections.len();
            report
                .confidence
                .insert(instrument.clone(), overall_confidence(&detections));

            for decision in self.policy.dispatch_all(detections, &config.dispatch).await {
                report.tally(decision);
            }
        }

        Ok(report)
    }

    fn interval_ms(&self) -> u64 {
        self.last_good
            .as_ref()
            .map(|c| c.evaluation_interval_ms)
            .unwrap_or_else(|| PipelineConfig::default().evaluation_interval_ms)
    }

    fn prune_history(&self) {
        let (store, config) = match (&self.history_store, &self.last_good) {
            (Some(store), Some(config)) => (store, config),
            _ => return,
        };
        let cutoff = chrono::Utc::now().timestamp() - config.history_retention_secs;
        if let Err(e) = store.prune_history(cutoff) {
            log::warn!("⚠️  Failed to prune alert history: {}", e);
        }
    }

    /// Run cycles until `shutdown` flips (or its sender is dropped)
    ///
    /// A failing cycle is logged and the next tick tries again. Interval
    /// changes in the configuration take effect after the current tick.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut period = self.interval_ms();
        let mut timer = interval(Duration::from_millis(period));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("⏰ Starting evaluation scheduler (interval: {}ms)", period);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => report.log(),
                        Err(e) => log::error!("❌ Evaluation cycle failed: {}", e),
                    }
                    self.prune_history();

                    let wanted = self.interval_ms();
                    if wanted != period {
                        log::info!("🔧 Evaluation interval {}ms → {}ms", period, wanted);
                        period = wanted;
                        let every = Duration::from_millis(period);
                        timer = interval_at(Instant::now() + every, every);
                        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.changed() => {
                    log::info!("🛑 Scheduler received shutdown");
                    break;
                }
            }
        }

        self.policy.shutdown().await;
        log::info!("✅ Scheduler stopped");
    }
}
