//! Notification dispatch policy
//!
//! ## Gates (in order, each independent)
//!
//! 1. Pattern gate: pattern enabled?
//! 2. Priority gate: priority tier enabled?
//! 3. Cooldown gate: `now - last_sent_at < cooldown` → duplicate. No record
//!    passes; a store read failure also passes (logged at error level).
//!
//! ## Delivery
//!
//! Zero delay delivers inline. A positive delay spawns a task that sleeps
//! and then delivers, unless `shutdown()` fires first. Delivery always runs
//! under the (pattern, instrument) lock and re-checks the cooldown there, so
//! two deliveries of the same pair never race. The notification record is
//! written only after the channel confirmed delivery.
//!
//! ```text
//! NEVER_SENT → SENT(t) → [cooldown] → ELIGIBLE → SENT(t') → ...
//! ```

use super::channel::AlertChannel;
use super::config::DispatchSettings;
use super::db::{NotificationRecord, NotificationStore};
use super::detection::{Detection, PatternId};
use super::history::{AlertHistory, AlertOutcome, HistoryEntry};
use super::render::render_alert;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    PatternDisabled,
    PriorityDisabled,
    Cooldown,
    ShuttingDown,
}

/// What happened to one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    Delivered,
    Scheduled { delay: Duration },
    Suppressed(SuppressReason),
    /// Channel rejected or errored; no record written
    Failed,
}

type PairKey = (PatternId, String);

/// Everything a delivery needs, shared with delayed tasks
struct DeliveryContext {
    store: Arc<dyn NotificationStore>,
    channel: Arc<dyn AlertChannel>,
    history: Mutex<AlertHistory>,
    pair_locks: Mutex<HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>>,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl DeliveryContext {
    fn now(&self) -> i64 {
        (self.now_fn)()
    }

    fn record(&self, detection: &Detection, outcome: AlertOutcome) {
        let entry = HistoryEntry {
            pattern_id: detection.pattern_id,
            pattern_name: detection.pattern_name.clone(),
            instrument: detection.instrument.clone(),
            priority: detection.priority,
            outcome,
            at: self.now(),
        };
        self.history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record(entry);
    }

    fn pair_lock(&self, detection: &Detection) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.pair_locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry((detection.pattern_id, detection.instrument.clone()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Cooldown check; an unreadable store never suppresses
    async fn in_cooldown(&self, detection: &Detection, cooldown: Duration) -> bool {
        match self
            .store
            .load(detection.pattern_id, &detection.instrument)
            .await
        {
            Ok(Some(record)) => {
                let elapsed = self.now() - record.last_sent_at;
                elapsed < cooldown.as_secs() as i64
            }
            Ok(None) => false,
            Err(e) => {
                log::error!(
                    "❌ Cooldown lookup failed for {} on {}, not suppressing: {}",
                    detection.pattern_name,
                    detection.instrument,
                    e
                );
                false
            }
        }
    }

    async fn deliver(&self, detection: &Detection, cooldown: Duration) -> DispatchDecision {
        let lock = self.pair_lock(detection);
        let _guard = lock.lock().await;

        if self.in_cooldown(detection, cooldown).await {
            log::debug!(
                "🔕 {} on {} already sent within cooldown",
                detection.pattern_name,
                detection.instrument
            );
            self.record(detection, AlertOutcome::Cooldown);
            return DispatchDecision::Suppressed(SuppressReason::Cooldown);
        }

        let now = self.now();
        let payload = render_alert(detection).delivered_at(now);

        match self.channel.deliver(&payload).await {
            Ok(true) => {
                let record = NotificationRecord::new(detection.pattern_id, &detection.instrument, now);
                if let Err(e) = self.store.save(&record).await {
                    log::error!(
                        "❌ Delivered {} on {} but failed to persist cooldown: {}",
                        detection.pattern_name,
                        detection.instrument,
                        e
                    );
                }
                if let Err(e) = self.store.append_history(detection, now).await {
                    log::warn!("⚠️  Failed to append alert history: {}", e);
                }
                log::info!(
                    "🚨 Sent {} {} on {} via {} (confidence {:.2})",
                    detection.priority.emoji(),
                    detection.pattern_name,
                    detection.instrument,
                    self.channel.name(),
                    detection.confidence
                );
                self.record(detection, AlertOutcome::Delivered);
                DispatchDecision::Delivered
            }
            Ok(false) => {
                log::warn!(
                    "⚠️  {} rejected {} on {}",
                    self.channel.name(),
                    detection.pattern_name,
                    detection.instrument
                );
                self.record(detection, AlertOutcome::Failed);
                DispatchDecision::Failed
            }
            Err(e) => {
                log::warn!(
                    "⚠️  Delivery of {} on {} via {} failed: {}",
                    detection.pattern_name,
                    detection.instrument,
                    self.channel.name(),
                    e
                );
                self.record(detection, AlertOutcome::Failed);
                DispatchDecision::Failed
            }
        }
    }
}

pub struct DispatchPolicy {
    ctx: Arc<DeliveryContext>,
    pending: Mutex<JoinSet<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl DispatchPolicy {
    pub fn new(store: Arc<dyn NotificationStore>, channel: Arc<dyn AlertChannel>) -> Self {
        Self::new_with_timestamp_fn(store, channel, Box::new(|| chrono::Utc::now().timestamp()))
    }

    /// Used for testing with deterministic timestamps
    pub fn new_with_timestamp_fn(
        store: Arc<dyn NotificationStore>,
        channel: Arc<dyn AlertChannel>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx: Arc::new(DeliveryContext {
                store,
                channel,
                history: Mutex::new(AlertHistory::new(DEFAULT_HISTORY_CAPACITY)),
                pair_locks: Mutex::new(HashMap::new()),
                now_fn,
            }),
            pending: Mutex::new(JoinSet::new()),
            shutdown_tx,
        }
    }

    pub fn with_history_capacity(self, capacity: usize) -> Self {
        *self.ctx.history.lock().unwrap_or_else(|p| p.into_inner()) = AlertHistory::new(capacity);
        self
    }

    /// Run one detection through the gates
    pub async fn dispatch(&self, detection: Detection, settings: &DispatchSettings) -> DispatchDecision {
        if !settings
            .enabled_patterns
            .allows(detection.pattern_id, &detection.pattern_name)
        {
            log::debug!("🔇 {} disabled, dropping", detection.pattern_name);
            self.ctx.record(&detection, AlertOutcome::PatternDisabled);
            return DispatchDecision::Suppressed(SuppressReason::PatternDisabled);
        }

        if !settings.enabled_priorities.allows(detection.priority) {
            log::debug!(
                "🔇 {} priority {} disabled, dropping",
                detection.pattern_name,
                detection.priority
            );
            self.ctx.record(&detection, AlertOutcome::PriorityDisabled);
            return DispatchDecision::Suppressed(SuppressReason::PriorityDisabled);
        }

        if self.ctx.in_cooldown(&detection, settings.cooldown).await {
            log::debug!(
                "🔕 {} on {} in cooldown, dropping duplicate",
                detection.pattern_name,
                detection.instrument
            );
            self.ctx.record(&detection, AlertOutcome::Cooldown);
            return DispatchDecision::Suppressed(SuppressReason::Cooldown);
        }

        let delay = settings.delays.delay_for(detection.priority);
        if delay.is_zero() {
            return self.ctx.deliver(&detection, settings.cooldown).await;
        }

        if *self.shutdown_tx.borrow() {
            self.ctx.record(&detection, AlertOutcome::Cancelled);
            return DispatchDecision::Suppressed(SuppressReason::ShuttingDown);
        }

        self.schedule(detection, delay, settings.cooldown);
        DispatchDecision::Scheduled { delay }
    }

    /// Dispatch a ranked list in order
    pub async fn dispatch_all(
        &self,
        detections: Vec<Detection>,
        settings: &DispatchSettings,
    ) -> Vec<DispatchDecision> {
        let mut decisions = Vec::with_capacity(detections.len());
        for detection in detections {
            decisions.push(self.dispatch(detection, settings).await);
        }
        decisions
    }

    fn schedule(&self, detection: Detection, delay: Duration, cooldown: Duration) {
        log::info!(
            "⏳ {} on {} scheduled in {}s",
            detection.pattern_name,
            detection.instrument,
            delay.as_secs()
        );
        self.ctx.record(&detection, AlertOutcome::Scheduled);

        let ctx = Arc::clone(&self.ctx);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        // Reap finished tasks so the set only holds live ones
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    ctx.deliver(&detection, cooldown).await;
                }
                _ = shutdown_rx.changed() => {
                    log::info!(
                        "🛑 Cancelled pending {} on {}",
                        detection.pattern_name,
                        detection.instrument
                    );
                    ctx.record(&detection, AlertOutcome::Cancelled);
                }
            }
        });
    }

    /// Delayed deliveries not yet finished
    pub fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        while pending.try_join_next().is_some() {}
        pending.len()
    }

    /// Wait for every pending delayed delivery to run
    pub async fn flush_pending(&self) {
        let mut tasks = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|p| p.into_inner()));
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                log::error!("❌ Delayed dispatch task failed: {}", e);
            }
        }
    }

    /// Cancel pending delayed deliveries and wait for them to stop
    ///
    /// Dispatches after this point that need a delay are dropped.
    pub async fn shutdown(&self) {
        let pending = self.pending_count();
        if pending > 0 {
            log::info!("🛑 Cancelling {} pending dispatch(es)", pending);
        }
        self.shutdown_tx.send_replace(true);
        self.flush_pending().await;
    }

    pub fn recent_history(&self, n: usize) -> Vec<HistoryEntry> {
        self.ctx
            .history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .recent(n)
    }

    pub fn outcome_count(&self, outcome: AlertOutcome) -> usize {
        self.ctx
            .history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .count(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::channel::ChannelError;
    use crate::pipeline::config::{PatternFilter, PriorityDelays, PriorityFilter};
    use crate::pipeline::db::{InMemoryNotificationStore, StoreError};
    use crate::pipeline::priority::Priority;
    use crate::pipeline::render::AlertPayload;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000;

    /// Counts deliveries; answers with a fixed result
    struct CountingChannel {
        sent: AtomicUsize,
        accept: bool,
    }

    impl CountingChannel {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                accept: true,
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                accept: false,
            })
        }

        fn sent(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AlertChannel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _payload: &AlertPayload) -> Result<bool, ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(self.accept)
        }
    }

    /// Errors until told to recover
    struct FlakyChannel {
        attempts: AtomicUsize,
        down: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl AlertChannel for FlakyChannel {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, _payload: &AlertPayload) -> Result<bool, ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(ChannelError::Config("webhook unreachable".to_string()))
            } else {
                Ok(true)
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl NotificationStore for BrokenStore {
        async fn load(&self, _: PatternId, _: &str) -> Result<Option<NotificationRecord>, StoreError> {
            Err(StoreError::Unavailable("disk gone".to_string()))
        }

        async fn save(&self, _: &NotificationRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".to_string()))
        }
    }

    fn detection(id: u32, priority: Priority) -> Detection {
        Detection::new(PatternId(id), "TEST_PATTERN", priority, 0.8).stamp("BTCUSDT", T0)
    }

    fn inline_settings() -> DispatchSettings {
        DispatchSettings {
            delays: PriorityDelays::none(),
            ..DispatchSettings::default()
        }
    }

    fn policy_at(
        store: Arc<dyn NotificationStore>,
        channel: Arc<dyn AlertChannel>,
        clock: Arc<AtomicI64>,
    ) -> DispatchPolicy {
        DispatchPolicy::new_with_timestamp_fn(store, channel, Box::new(move || clock.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn test_first_delivery_writes_record() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::accepting();
        let clock = Arc::new(AtomicI64::new(T0));
        let policy = policy_at(store.clone(), channel.clone(), clock);

        let decision = policy.dispatch(detection(1, Priority::High), &inline_settings()).await;

        assert_eq!(decision, DispatchDecision::Delivered);
        assert_eq!(channel.sent(), 1);
        assert_eq!(store.records(), vec![NotificationRecord::new(PatternId(1), "BTCUSDT", T0)]);
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_boundary() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::accepting();
        let clock = Arc::new(AtomicI64::new(T0));
        let policy = policy_at(store.clone(), channel.clone(), clock.clone());
        let settings = inline_settings();

        policy.dispatch(detection(1, Priority::High), &settings).await;

        clock.store(T0 + 3599, Ordering::SeqCst);
        assert_eq!(
            policy.dispatch(detection(1, Priority::High), &settings).await,
            DispatchDecision::Suppressed(SuppressReason::Cooldown)
        );

        clock.store(T0 + 3600, Ordering::SeqCst);
        assert_eq!(
            policy.dispatch(detection(1, Priority::High), &settings).await,
            DispatchDecision::Delivered
        );
        assert_eq!(channel.sent(), 2);
        assert_eq!(store.records()[0].last_sent_at, T0 + 3600);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_pair() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::accepting();
        let policy = policy_at(store, channel.clone(), Arc::new(AtomicI64::new(T0)));
        let settings = inline_settings();

        policy.dispatch(detection(1, Priority::High), &settings).await;
        let other_pattern = policy.dispatch(detection(2, Priority::High), &settings).await;
        let other_instrument = policy
            .dispatch(
                Detection::new(PatternId(1), "TEST_PATTERN", Priority::High, 0.8).stamp("ETHUSDT", T0),
                &settings,
            )
            .await;

        assert_eq!(other_pattern, DispatchDecision::Delivered);
        assert_eq!(other_instrument, DispatchDecision::Delivered);
        assert_eq!(channel.sent(), 3);
    }

    #[tokio::test]
    async fn test_gates_are_independent() {
        let channel = CountingChannel::accepting();
        let policy = policy_at(
            Arc::new(InMemoryNotificationStore::new()),
            channel.clone(),
            Arc::new(AtomicI64::new(T0)),
        );

        // pattern enabled, priority disabled
        let priority_off = DispatchSettings {
            enabled_priorities: PriorityFilter::Only(HashSet::from([Priority::Low])),
            ..inline_settings()
        };
        assert_eq!(
            policy.dispatch(detection(1, Priority::High), &priority_off).await,
            DispatchDecision::Suppressed(SuppressReason::PriorityDisabled)
        );

        // priority enabled, pattern disabled
        let pattern_off = DispatchSettings {
            enabled_patterns: PatternFilter::parse("2"),
            ..inline_settings()
        };
        assert_eq!(
            policy.dispatch(detection(1, Priority::High), &pattern_off).await,
            DispatchDecision::Suppressed(SuppressReason::PatternDisabled)
        );

        assert_eq!(channel.sent(), 0);
        assert_eq!(policy.outcome_count(AlertOutcome::PatternDisabled), 1);
        assert_eq!(policy.outcome_count(AlertOutcome::PriorityDisabled), 1);
    }

    #[tokio::test]
    async fn test_rejected_delivery_writes_no_record() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::rejecting();
        let policy = policy_at(store.clone(), channel.clone(), Arc::new(AtomicI64::new(T0)));

        let decision = policy.dispatch(detection(1, Priority::High), &inline_settings()).await;

        assert_eq!(decision, DispatchDecision::Failed);
        assert!(store.records().is_empty());

        // not in cooldown, so the next cycle tries again
        policy.dispatch(detection(1, Priority::High), &inline_settings()).await;
        assert_eq!(channel.sent(), 2);
    }

    #[tokio::test]
    async fn test_channel_error_writes_no_record_and_retries() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = Arc::new(FlakyChannel {
            attempts: AtomicUsize::new(0),
            down: std::sync::atomic::AtomicBool::new(true),
        });
        let policy = policy_at(store.clone(), channel.clone(), Arc::new(AtomicI64::new(T0)));

        let decision = policy.dispatch(detection(3, Priority::High), &inline_settings()).await;
        assert_eq!(decision, DispatchDecision::Failed);
        assert!(store.records().is_empty());
        assert!(store.history().is_empty());
        assert_eq!(policy.outcome_count(AlertOutcome::Failed), 1);

        channel.down.store(false, Ordering::SeqCst);
        let retry = policy.dispatch(detection(3, Priority::High), &inline_settings()).await;
        assert_eq!(retry, DispatchDecision::Delivered);
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.records(), vec![NotificationRecord::new(PatternId(3), "BTCUSDT", T0)]);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_suppress() {
        let channel = CountingChannel::accepting();
        let policy = policy_at(Arc::new(BrokenStore), channel.clone(), Arc::new(AtomicI64::new(T0)));

        let decision = policy.dispatch(detection(1, Priority::High), &inline_settings()).await;
        assert_eq!(decision, DispatchDecision::Delivered);
        assert_eq!(channel.sent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_dispatch_delivers_after_delay() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::accepting();
        let policy = policy_at(store.clone(), channel.clone(), Arc::new(AtomicI64::new(T0)));

        let decision = policy
            .dispatch(detection(6, Priority::Medium), &DispatchSettings::default())
            .await;
        assert_eq!(decision, DispatchDecision::Scheduled { delay: Duration::from_secs(30) });
        assert_eq!(channel.sent(), 0);
        assert_eq!(policy.pending_count(), 1);

        policy.flush_pending().await;
        assert_eq!(channel.sent(), 1);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::accepting();
        let policy = policy_at(store.clone(), channel.clone(), Arc::new(AtomicI64::new(T0)));

        policy
            .dispatch(detection(10, Priority::Low), &DispatchSettings::default())
            .await;
        policy.shutdown().await;

        assert_eq!(channel.sent(), 0);
        assert!(store.records().is_empty());
        assert_eq!(policy.outcome_count(AlertOutcome::Cancelled), 1);

        // delayed work after shutdown is dropped
        assert_eq!(
            policy
                .dispatch(detection(10, Priority::Low), &DispatchSettings::default())
                .await,
            DispatchDecision::Suppressed(SuppressReason::ShuttingDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_pending_deliveries_send_once() {
        let store = Arc::new(InMemoryNotificationStore::new());
        let channel = CountingChannel::accepting();
        let policy = policy_at(store.clone(), channel.clone(), Arc::new(AtomicI64::new(T0)));
        let settings = DispatchSettings::default();

        // both pass the pre-delay cooldown check: nothing sent yet
        policy.dispatch(detection(7, Priority::Medium), &settings).await;
        policy.dispatch(detection(7, Priority::Medium), &settings).await;
        policy.flush_pending().await;

        assert_eq!(channel.sent(), 1);
        assert_eq!(policy.outcome_count(AlertOutcome::Cooldown), 1);
    }
}
