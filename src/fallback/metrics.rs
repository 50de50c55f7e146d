//! Bounded collector of fallback-chain outcomes.
//!
//! One instance is shared (behind an `Arc`) by every tool in the process.
//! Appends are FIFO; once `capacity` is reached the oldest outcome is
//! evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_METRICS_CAPACITY: usize = 1000;

/// Record of one completed fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackOutcome {
    pub tool_name: String,
    /// Winning strategy name, or `FALLBACK`.
    pub strategy: String,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate view returned by [`MetricsCollector::fallback_metrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackMetrics {
    pub total: usize,
    pub by_strategy: BTreeMap<String, usize>,
    pub avg_duration_ms_by_strategy: BTreeMap<String, f64>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    capacity: usize,
    outcomes: Mutex<VecDeque<FallbackOutcome>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_CAPACITY)
    }
}

impl MetricsCollector {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            outcomes: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FallbackOutcome>> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, outcome: FallbackOutcome) {
        let mut outcomes = self.lock();
        while outcomes.len() >= self.capacity {
            outcomes.pop_front();
        }
        outcomes.push_back(outcome);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the buffered outcomes, oldest first.
    pub fn snapshot(&self) -> Vec<FallbackOutcome> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count and average latency per strategy, optionally for one tool only.
    pub fn fallback_metrics(&self, tool_name: Option<&str>) -> FallbackMetrics {
        let outcomes = self.lock();

        let mut by_strategy: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_ms: BTreeMap<String, f64> = BTreeMap::new();
        let mut total = 0;

        for outcome in outcomes
            .iter()
            .filter(|o| tool_name.map_or(true, |name| o.tool_name == name))
        {
            total += 1;
            *by_strategy.entry(outcome.strategy.clone()).or_default() += 1;
            *total_ms.entry(outcome.strategy.clone()).or_default() +=
                outcome.duration.as_secs_f64() * 1000.0;
        }

        let avg_duration_ms_by_strategy = total_ms
            .into_iter()
            .map(|(name, ms)| {
                let count = by_strategy.get(&name).copied().unwrap_or(1).max(1);
                (name, ms / count as f64)
            })
            .collect();

        FallbackMetrics {
            total,
            by_strategy,
            avg_duration_ms_by_strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(tool: &str, strategy: &str, ms: u64) -> FallbackOutcome {
        FallbackOutcome {
            tool_name: tool.into(),
            strategy: strategy.into(),
            duration: Duration::from_millis(ms),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn overflow_evicts_oldest() {
        let metrics = MetricsCollector::new(1000);
        for i in 0..1001 {
            metrics.record(outcome("t", &format!("s{}", i), 1));
        }
        assert_eq!(metrics.len(), 1000);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.first().unwrap().strategy, "s1");
        assert_eq!(snapshot.last().unwrap().strategy, "s1000");
    }

    #[test]
    fn never_exceeds_small_capacity() {
        let metrics = MetricsCollector::new(3);
        for _ in 0..10 {
            metrics.record(outcome("t", "a", 1));
            assert!(metrics.len() <= 3);
        }
        assert_eq!(metrics.capacity(), 3);
    }

    #[test]
    fn aggregates_counts_and_averages() {
        let metrics = MetricsCollector::default();
        metrics.record(outcome("meds", "formulary", 10));
        metrics.record(outcome("meds", "formulary", 30));
        metrics.record(outcome("meds", "FALLBACK", 100));
        metrics.record(outcome("labs", "cache", 5));

        let all = metrics.fallback_metrics(None);
        assert_eq!(all.total, 4);
        assert_eq!(all.by_strategy["formulary"], 2);

        let meds = metrics.fallback_metrics(Some("meds"));
        assert_eq!(meds.total, 3);
        assert!(!meds.by_strategy.contains_key("cache"));
        assert!((meds.avg_duration_ms_by_strategy["formulary"] - 20.0).abs() < 1e-6);
        assert!((meds.avg_duration_ms_by_strategy["FALLBACK"] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_tool_yields_empty_metrics() {
        let metrics = MetricsCollector::default();
        metrics.record(outcome("meds", "formulary", 10));
        assert_eq!(metrics.fallback_metrics(Some("nope")), FallbackMetrics::default());
    }

    #[test]
    fn clear_resets_buffer() {
        let metrics = MetricsCollector::new(5);
        metrics.record(outcome("meds", "formulary", 10));
        metrics.clear();
        assert!(metrics.is_empty());
    }
}
