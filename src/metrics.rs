use crate::error::CacheError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Cluster operations tracked by [`ClusterMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    Set,
    Del,
    Mget,
    Mset,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Get,
        Operation::Set,
        Operation::Del,
        Operation::Mget,
        Operation::Mset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Del => "del",
            Operation::Mget => "mget",
            Operation::Mset => "mset",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CacheError::Configuration(format!("unknown operation: {}", s)))
    }
}

/// Running latency statistics for one operation, in milliseconds.
///
/// Mean and variance are accumulated with Welford's method so no samples
/// are retained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl OperationStats {
    pub fn record(&mut self, sample_ms: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = sample_ms;
            self.max = sample_ms;
        } else {
            self.min = self.min.min(sample_ms);
            self.max = self.max.max(sample_ms);
        }

        let delta = sample_ms - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (sample_ms - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean latency in milliseconds, 0.0 before the first sample
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

/// Latency statistics and failure counters owned by one cluster.
///
/// Latency samples sit behind a single lock; every counter is an atomic, so
/// concurrent sub-request completions never contend on them.
#[derive(Debug, Default)]
pub struct ClusterMetrics {
    stats: Mutex<[OperationStats; 5]>,
    partial_failures: [AtomicU64; 5],
    timeouts: [AtomicU64; 5],
    accesses: AtomicU64,
    hits: AtomicU64,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latency of one successful cluster call
    pub fn record_latency(&self, op: Operation, latency: Duration) {
        let sample_ms = latency.as_secs_f64() * 1000.0;
        self.stats.lock()[op.index()].record(sample_ms);

        #[cfg(feature = "metrics")]
        metrics::histogram!("zcache_request_latency_ms", sample_ms, "operation" => op.as_str());
    }

    pub fn record_timeout(&self, op: Operation) {
        self.timeouts[op.index()].fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!("zcache_timeouts_total", 1, "operation" => op.as_str());
    }

    pub fn record_partial_failure(&self, op: Operation) {
        self.partial_failures[op.index()].fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!("zcache_partial_failures_total", 1, "operation" => op.as_str());
    }

    /// Count `accesses` key lookups answered by a node, `hits` of which found a value
    pub fn record_access(&self, accesses: u64, hits: u64) {
        self.accesses.fetch_add(accesses, Ordering::Relaxed);
        self.hits.fetch_add(hits, Ordering::Relaxed);
    }

    pub fn stats(&self, op: Operation) -> OperationStats {
        self.stats.lock()[op.index()].clone()
    }

    pub fn partial_failure_count(&self, op: Operation) -> u64 {
        self.partial_failures[op.index()].load(Ordering::Relaxed)
    }

    pub fn timeout_count(&self, op: Operation) -> u64 {
        self.timeouts[op.index()].load(Ordering::Relaxed)
    }

    pub fn reset_timeout_count(&self, op: Operation) {
        self.timeouts[op.index()].store(0, Ordering::Relaxed);
    }

    pub fn access_count(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let accesses = self.access_count();
        if accesses == 0 {
            0.0
        } else {
            self.hit_count() as f64 / accesses as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.stats.lock().clone();

        let operations = Operation::ALL
            .into_iter()
            .map(|op| {
                let entry = &stats[op.index()];
                (
                    op.as_str().to_string(),
                    OperationSnapshot {
                        count: entry.count(),
                        mean_ms: entry.mean(),
                        std_dev_ms: entry.std_dev(),
                        min_ms: entry.min(),
                        max_ms: entry.max(),
                        partial_failures: self.partial_failure_count(op),
                        timeouts: self.timeout_count(op),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            generated_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            operations,
            access_count: self.access_count(),
            hit_count: self.hit_count(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Point-in-time view of a cluster's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub generated_at: u64,
    pub operations: BTreeMap<String, OperationSnapshot>,
    pub access_count: u64,
    pub hit_count: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub partial_failures: u64,
    pub timeouts: u64,
}
