//! Bounded record of dispatch outcomes
//!
//! Oldest entries are evicted once `capacity` is reached, so the buffer
//! never grows with uptime.

use super::detection::PatternId;
use super::priority::Priority;
use serde::Serialize;
use std::collections::VecDeque;

/// What the dispatch policy did with one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOutcome {
    /// Channel confirmed delivery, record written
    Delivered,
    /// Delayed delivery spawned
    Scheduled,
    /// Pattern not enabled
    PatternDisabled,
    /// Priority not enabled
    PriorityDisabled,
    /// Inside the cooldown window
    Cooldown,
    /// Channel error or rejection
    Failed,
    /// Pending delivery cancelled by shutdown
    Cancelled,
}

impl AlertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertOutcome::Delivered => "delivered",
            AlertOutcome::Scheduled => "scheduled",
            AlertOutcome::PatternDisabled => "pattern_disabled",
            AlertOutcome::PriorityDisabled => "priority_disabled",
            AlertOutcome::Cooldown => "cooldown",
            AlertOutcome::Failed => "failed",
            AlertOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub pattern_id: PatternId,
    pub pattern_name: String,
    pub instrument: String,
    pub priority: Priority,
    pub outcome: AlertOutcome,
    /// Unix seconds
    pub at: i64,
}

#[derive(Debug, Clone)]
pub struct AlertHistory {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
    /// Entries ever recorded, including evicted ones
    total_recorded: u64,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(10_000)),
            total_recorded: 0,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.total_recorded += 1;
    }

    /// Up to `n` most recent entries, newest first
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// Retained entries with this outcome
    pub fn count(&self, outcome: AlertOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32, outcome: AlertOutcome, at: i64) -> HistoryEntry {
        HistoryEntry {
            pattern_id: PatternId(id),
            pattern_name: format!("P{}", id),
            instrument: "BTCUSDT".to_string(),
            priority: Priority::Medium,
            outcome,
            at,
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = AlertHistory::new(3);
        for i in 0..5 {
            history.record(entry(i, AlertOutcome::Delivered, i as i64));
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.total_recorded(), 5);
        let recent = history.recent(10);
        assert_eq!(recent.iter().map(|e| e.at).collect::<Vec<_>>(), vec![4, 3, 2]);
    }

    #[test]
    fn test_counts_per_outcome() {
        let mut history = AlertHistory::new(10);
        history.record(entry(1, AlertOutcome::Delivered, 1));
        history.record(entry(1, AlertOutcome::Cooldown, 2));
        history.record(entry(2, AlertOutcome::Cooldown, 3));

        assert_eq!(history.count(AlertOutcome::Cooldown), 2);
        assert_eq!(history.count(AlertOutcome::Failed), 0);
        assert_eq!(history.recent(1)[0].at, 3);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut history = AlertHistory::new(0);
        history.record(entry(1, AlertOutcome::Delivered, 1));
        history.record(entry(2, AlertOutcome::Delivered, 2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.recent(5)[0].pattern_id, PatternId(2));
    }
}
