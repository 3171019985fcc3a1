//! Master metrics
//!
//! Lock-free counters owned by each master's state and rendered in the
//! Prometheus text format at `/metrics`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for placement latency (in milliseconds)
const LATENCY_BUCKETS: [f64; 9] = [
    5.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Cumulative latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..=LATENCY_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let idx = LATENCY_BUCKETS
            .iter()
            .position(|&le| ms <= le)
            .unwrap_or(LATENCY_BUCKETS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String, name: &str) {
        let mut cumulative = 0;
        for (i, le) in LATENCY_BUCKETS.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, le, cumulative);
        }
        cumulative += self.buckets[LATENCY_BUCKETS.len()].load(Ordering::Relaxed);
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, cumulative);
        let _ = writeln!(
            out,
            "{}_sum {}",
            name,
            self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
        );
        let _ = writeln!(out, "{}_count {}", name, self.count());
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time values the registry does not own itself
#[derive(Debug, Clone, Default)]
pub struct ClusterGauges {
    pub is_leader: bool,
    pub term: u64,
    pub active_workers: usize,
    pub sync_pending: usize,
}

/// Per-master metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    pub uploads_total: Counter,
    pub upload_failures: Counter,
    pub bytes_placed: Counter,
    pub chunk_pushes: Counter,
    pub chunk_push_failures: Counter,
    pub elections_started: Counter,
    pub elections_won: Counter,
    pub sync_pushes: Counter,
    pub sync_push_failures: Counter,
    pub workers_marked_inactive: Counter,
    pub placement_latency: Histogram,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            uploads_total: Counter::default(),
            upload_failures: Counter::default(),
            bytes_placed: Counter::default(),
            chunk_pushes: Counter::default(),
            chunk_push_failures: Counter::default(),
            elections_started: Counter::default(),
            elections_won: Counter::default(),
            sync_pushes: Counter::default(),
            sync_push_failures: Counter::default(),
            workers_marked_inactive: Counter::default(),
            placement_latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self, gauges: &ClusterGauges) -> String {
        let mut out = String::new();
        let counters = [
            ("minidfs_uploads_total", "Accepted uploads", &self.uploads_total),
            ("minidfs_upload_failures_total", "Rejected or failed uploads", &self.upload_failures),
            ("minidfs_bytes_placed_total", "Bytes placed on workers (before replication)", &self.bytes_placed),
            ("minidfs_chunk_pushes_total", "Replica writes to workers", &self.chunk_pushes),
            ("minidfs_chunk_push_failures_total", "Failed replica writes", &self.chunk_push_failures),
            ("minidfs_elections_started_total", "Elections started by this node", &self.elections_started),
            ("minidfs_elections_won_total", "Elections won by this node", &self.elections_won),
            ("minidfs_sync_pushes_total", "Metadata pushes delivered to peers", &self.sync_pushes),
            ("minidfs_sync_push_failures_total", "Metadata pushes that failed", &self.sync_push_failures),
            ("minidfs_workers_marked_inactive_total", "Workers flipped to inactive by the sweep", &self.workers_marked_inactive),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        let gauge_values = [
            ("minidfs_is_leader", u64::from(gauges.is_leader)),
            ("minidfs_term", gauges.term),
            ("minidfs_active_workers", gauges.active_workers as u64),
            ("minidfs_sync_pending", gauges.sync_pending as u64),
            ("minidfs_uptime_seconds", self.uptime_seconds()),
        ];
        for (name, value) in gauge_values {
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP minidfs_placement_duration_ms Upload placement duration in milliseconds\n");
        out.push_str("# TYPE minidfs_placement_duration_ms histogram\n");
        self.placement_latency
            .render(&mut out, "minidfs_placement_duration_ms");
        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let hist = Histogram::new();
        hist.observe(Duration::from_millis(3));
        hist.observe(Duration::from_millis(40));
        hist.observe(Duration::from_secs(10));
        assert_eq!(hist.count(), 3);

        let mut out = String::new();
        hist.render(&mut out, "h");
        assert!(out.contains("h_bucket{le=\"5\"} 1"));
        assert!(out.contains("h_bucket{le=\"50\"} 2"));
        assert!(out.contains("h_bucket{le=\"+Inf\"} 3"));
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = MetricsRegistry::new();
        metrics.uploads_total.inc();
        metrics.bytes_placed.add(1024);

        let out = metrics.to_prometheus(&ClusterGauges {
            is_leader: true,
            term: 4,
            active_workers: 5,
            sync_pending: 0,
        });
        assert!(out.contains("minidfs_uploads_total 1"));
        assert!(out.contains("minidfs_bytes_placed_total 1024"));
        assert!(out.contains("minidfs_is_leader 1"));
        assert!(out.contains("minidfs_term 4"));
        assert!(out.contains("minidfs_active_workers 5"));
    }
}
