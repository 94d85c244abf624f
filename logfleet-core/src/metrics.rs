//! Prometheus metrics for the coordinator
//!
//! Counters, gauges, and histograms rendered in the Prometheus text format.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Write the `# HELP` and `# TYPE` lines of a metric
fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Append in Prometheus text format
    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "counter");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Append in Prometheus text format
    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "gauge");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Latency histogram with cumulative buckets
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    /// Sum of observations in microseconds
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    /// Buckets from 1ms to 10s
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self::with_buckets(
            name,
            help,
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
    }

    pub fn with_buckets(name: &'static str, help: &'static str, bounds: &[f64]) -> Self {
        Self {
            buckets: bounds.iter().map(|b| (*b, AtomicU64::new(0))).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    /// Observe a value in seconds
    pub fn observe(&self, secs: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((secs * 1_000_000.0) as u64, Ordering::Relaxed);
        for (_, hits) in self.buckets.iter().filter(|(bound, _)| secs <= *bound) {
            hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the time elapsed since `start`
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Append in Prometheus text format
    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "histogram");
        for (bound, hits) in &self.buckets {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                hits.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", self.name, self.count());
        let sum_secs = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_sum {}", self.name, sum_secs);
        let _ = writeln!(out, "{}_count {}", self.name, self.count());
    }
}

/// Standard logfleet metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static CHUNKS_DISPATCHED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("logfleet_chunks_dispatched_total", "Chunk requests sent to workers")
    });

    pub static CHUNKS_COMPLETED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("logfleet_chunks_completed_total", "Chunk results folded into an aggregate")
    });

    pub static CHUNKS_REASSIGNED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("logfleet_chunks_reassigned_total", "Pending chunks released for re-dispatch")
    });

    pub static CHUNKS_FAILED: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("logfleet_chunks_failed_total", "Chunks that failed permanently")
    });

    pub static DUPLICATE_RESULTS: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("logfleet_duplicate_results_total", "Late or duplicate results discarded")
    });

    pub static SEND_FAILURES: LazyLock<Counter> = LazyLock::new(|| {
        Counter::new("logfleet_send_failures_total", "Chunk requests a worker rejected or never received")
    });

    pub static HEALTHY_WORKERS: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("logfleet_healthy_workers", "Number of healthy workers")
    });

    pub static PENDING_CHUNKS: LazyLock<Gauge> = LazyLock::new(|| {
        Gauge::new("logfleet_pending_chunks", "Chunks awaiting a result in the active job")
    });

    pub static DISPATCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new("logfleet_dispatch_duration_seconds", "Latency of chunk request sends")
    });

    pub static JOB_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::with_buckets(
            "logfleet_job_duration_seconds",
            "Wall time of whole jobs",
            &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0],
        )
    });
}

/// Render all standard metrics
pub fn gather_system_metrics() -> String {
    use standard::*;

    let mut output = String::new();
    for counter in [
        &CHUNKS_DISPATCHED,
        &CHUNKS_COMPLETED,
        &CHUNKS_REASSIGNED,
        &CHUNKS_FAILED,
        &DUPLICATE_RESULTS,
        &SEND_FAILURES,
    ] {
        counter.render(&mut output);
    }
    HEALTHY_WORKERS.render(&mut output);
    PENDING_CHUNKS.render(&mut output);
    DISPATCH_DURATION.render(&mut output);
    JOB_DURATION.render(&mut output);
    output
}
