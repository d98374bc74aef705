//! Latency histograms, throughput and recall tracking, and the health rule.

use crate::config;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const BUCKETS: usize = config::LATENCY_BUCKETS_US.len() + 1;

/// Fixed-boundary latency histogram, lock-free on the record path.
#[derive(Debug)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }
}

impl LatencyHistogram {
    pub fn record_us(&self, micros: f64) {
        let micros = micros.max(0.0);
        let bucket = config::LATENCY_BUCKETS_US
            .iter()
            .position(|&upper| micros <= upper)
            .unwrap_or(BUCKETS - 1);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros.round() as u64, Ordering::Relaxed);
        self.max_us.fetch_max(micros.round() as u64, Ordering::Relaxed);
    }

    pub fn record(&self, elapsed: Duration) {
        self.record_us(elapsed.as_secs_f64() * 1e6);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let count = self.count();
        let sum = self.sum_us.load(Ordering::Relaxed);
        HistogramSnapshot {
            bounds_us: config::LATENCY_BUCKETS_US.to_vec(),
            p50_us: percentile(&counts, count, 0.50),
            p95_us: percentile(&counts, count, 0.95),
            p99_us: percentile(&counts, count, 0.99),
            counts,
            count,
            mean_us: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            max_us: self.max_us.load(Ordering::Relaxed) as f64,
        }
    }
}

/// Upper bound of the bucket holding the `q` quantile.
fn percentile(counts: &[u64], total: u64, q: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let target = ((total as f64) * q).ceil().max(1.0) as u64;
    let mut seen = 0;
    for (i, &c) in counts.iter().enumerate() {
        seen += c;
        if seen >= target {
            return config::LATENCY_BUCKETS_US
                .get(i)
                .copied()
                .unwrap_or(f64::INFINITY);
        }
    }
    f64::INFINITY
}

/// Point-in-time copy of a [`LatencyHistogram`]. `counts` has one more entry
/// than `bounds_us`: the overflow bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub bounds_us: Vec<f64>,
    pub counts: Vec<u64>,
    pub count: u64,
    pub mean_us: f64,
    pub max_us: f64,
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallStats {
    pub samples: u64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

#[derive(Debug, Default)]
struct RecallAccumulator {
    samples: u64,
    sum: f64,
    min: f64,
    max: f64,
}

#[derive(Debug)]
struct RateWindow {
    since: Instant,
    queries: u64,
    inserts: u64,
}

/// Per-database telemetry.
#[derive(Debug)]
pub struct Telemetry {
    pub insert_latency: LatencyHistogram,
    pub search_latency: LatencyHistogram,
    queries: AtomicU64,
    inserts: AtomicU64,
    recall: Mutex<RecallAccumulator>,
    window: Mutex<RateWindow>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            insert_latency: LatencyHistogram::default(),
            search_latency: LatencyHistogram::default(),
            queries: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            recall: Mutex::new(RecallAccumulator::default()),
            window: Mutex::new(RateWindow {
                since: Instant::now(),
                queries: 0,
                inserts: 0,
            }),
        }
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_search(&self, elapsed: Duration) {
        self.search_latency.record(elapsed);
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self, elapsed: Duration, count: u64) {
        self.insert_latency.record(elapsed);
        self.inserts.fetch_add(count, Ordering::Relaxed);
    }

    /// Records one recall measurement in `[0, 1]`; out-of-range values are clamped.
    pub fn record_recall(&self, recall: f64) {
        let r = if recall.is_finite() { recall.clamp(0.0, 1.0) } else { 0.0 };
        let mut acc = self.recall.lock();
        if acc.samples == 0 {
            acc.min = r;
            acc.max = r;
        } else {
            acc.min = acc.min.min(r);
            acc.max = acc.max.max(r);
        }
        acc.samples += 1;
        acc.sum += r;
    }

    pub fn recall(&self) -> RecallStats {
        let acc = self.recall.lock();
        if acc.samples == 0 {
            return RecallStats::default();
        }
        RecallStats {
            samples: acc.samples,
            min: acc.min,
            avg: acc.sum / acc.samples as f64,
            max: acc.max,
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn total_inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Queries and inserts per second since the previous call, then restarts the window.
    pub fn take_rates(&self) -> (f64, f64) {
        let mut w = self.window.lock();
        let now = Instant::now();
        let secs = now.duration_since(w.since).as_secs_f64();
        let queries = self.total_queries();
        let inserts = self.total_inserts();
        let rates = if secs > 0.0 {
            (
                (queries - w.queries) as f64 / secs,
                (inserts - w.inserts) as f64 / secs,
            )
        } else {
            (0.0, 0.0)
        };
        *w = RateWindow {
            since: now,
            queries,
            inserts,
        };
        rates
    }
}

/// Database health as reported across the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn code(self) -> i32 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => -1,
            HealthStatus::Unhealthy => -2,
        }
    }

    /// Unhealthy past the memory limit or after a failed WAL append; degraded
    /// above the deleted-ratio threshold or near the memory limit.
    pub fn evaluate(
        memory_bytes: u64,
        max_memory_bytes: u64,
        wal_failed: bool,
        deleted_ratio: f64,
        deleted_ratio_threshold: f64,
    ) -> Self {
        if wal_failed || (max_memory_bytes > 0 && memory_bytes > max_memory_bytes) {
            return HealthStatus::Unhealthy;
        }
        let near_limit = max_memory_bytes > 0
            && memory_bytes as f64 > max_memory_bytes as f64 * config::HEALTH_MEMORY_DEGRADED_RATIO;
        if near_limit || (deleted_ratio_threshold > 0.0 && deleted_ratio > deleted_ratio_threshold) {
            return HealthStatus::Degraded;
        }
        HealthStatus::Healthy
    }
}
