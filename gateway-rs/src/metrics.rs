//! # Metrics Aggregator
//!
//! In-process counters and latency samples keyed by executor name, with a
//! snapshot that derives average and 95th-percentile latency on every read.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

/// Sink for per-executor request metrics.
pub trait MetricsCollector: Send + Sync {
    fn record_request(&self, executor: &str);
    fn record_success(&self, executor: &str);
    fn record_failure(&self, executor: &str, is_transient: bool);
    fn record_latency(&self, executor: &str, milliseconds: f64);
    fn snapshot(&self) -> MetricsSnapshot;
}

/// Counters by name plus `latency_<executor>_avg` / `_p95` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub counters: BTreeMap<String, i64>,
    #[serde(flatten)]
    pub latencies: BTreeMap<String, f64>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn latency(&self, name: &str) -> Option<f64> {
        self.latencies.get(name).copied()
    }
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    counters: DashMap<String, i64>,
    latencies: DashMap<String, Vec<f64>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn increment(&self, key: String) {
        *self.counters.entry(key).or_insert(0) += 1;
    }
}

impl MetricsCollector for MetricsAggregator {
    fn record_request(&self, executor: &str) {
        self.increment(format!("requests_total_{}", executor));
    }

    fn record_success(&self, executor: &str) {
        self.increment(format!("requests_success_{}", executor));
    }

    fn record_failure(&self, executor: &str, is_transient: bool) {
        self.increment(format!("requests_failed_{}", executor));
        if is_transient {
            self.increment(format!("requests_transient_error_{}", executor));
        }
    }

    fn record_latency(&self, executor: &str, milliseconds: f64) {
        self.latencies
            .entry(format!("latency_{}", executor))
            .or_default()
            .push(milliseconds);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        // Copy out so no shard lock is held while sorting.
        let sampled: Vec<(String, Vec<f64>)> = self
            .latencies
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut latencies = BTreeMap::new();
        for (key, mut samples) in sampled {
            if samples.is_empty() {
                continue;
            }
            samples.sort_by(|a, b| a.total_cmp(b));

            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            let index = ((samples.len() as f64 * 0.95) as usize).min(samples.len() - 1);

            latencies.insert(format!("{}_avg", key), avg);
            latencies.insert(format!("{}_p95", key), samples[index]);
        }

        MetricsSnapshot {
            counters,
            latencies,
        }
    }
}
