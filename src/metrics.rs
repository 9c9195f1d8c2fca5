//! Observability primitives: counters, gauges and histograms for the
//! networking stack, following the teacher crate's RED-method
//! (`src/metrics.rs`) naming and API, trimmed of the USE-method
//! system-resource metrics (CPU/memory/disk utilization) that have no
//! counterpart in a client networking library — there is no server
//! process here to report on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Monotonically increasing counter (requests sent, bytes transferred,
/// redirects followed, ...).
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
    description: String,
}

impl Counter {
    /// Create a new counter starting at zero.
    pub fn new(description: impl Into<String>) -> Self {
        Self { value: AtomicU64::new(0), description: description.into() }
    }

    /// Increment by 1.
    pub fn increment(&self) {
        self.increment_by(1);
    }

    /// Increment by `amount`.
    pub fn increment_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time measurement (active connections, pool size, ...).
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
    description: String,
}

impl Gauge {
    /// Create a new gauge starting at zero.
    pub fn new(description: impl Into<String>) -> Self {
        Self { value: AtomicU64::new(0), description: description.into() }
    }

    /// Set to an absolute value.
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Increment by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by 1, saturating at zero.
    pub fn decrement(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Latency/size distribution with running min/max/sum and a sample buffer
/// for percentile estimation.
#[derive(Debug)]
pub struct Histogram {
    values: RwLock<Vec<u64>>,
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    description: String,
}

impl Histogram {
    /// Create a new, empty histogram.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            values: RwLock::new(Vec::new()),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            description: description.into(),
        }
    }

    /// Record one observation.
    pub fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        let _ = self.min.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |m| Some(m.min(value)));
        let _ = self.max.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |m| Some(m.max(value)));
        if let Ok(mut values) = self.values.write() {
            values.push(value);
        }
    }

    /// Snapshot count/sum/min/max/mean and p50/p95/p99.
    pub fn stats(&self) -> HistogramStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        let mean = if count > 0 { sum as f64 / count as f64 } else { 0.0 };

        let percentiles = self.values.read().map(|values| {
            let mut sorted = values.clone();
            sorted.sort_unstable();
            Percentiles {
                p50: percentile(&sorted, 0.5),
                p95: percentile(&sorted, 0.95),
                p99: percentile(&sorted, 0.99),
            }
        }).unwrap_or_default();

        HistogramStats {
            count,
            sum,
            min: if min == u64::MAX { 0 } else { min },
            max,
            mean,
            percentiles,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((p * (sorted.len() - 1) as f64).round() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Snapshot statistics returned by [`Histogram::stats`].
#[derive(Debug, Clone, Default)]
pub struct HistogramStats {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: u64,
    /// Smallest observed value.
    pub min: u64,
    /// Largest observed value.
    pub max: u64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Estimated percentiles.
    pub percentiles: Percentiles,
}

/// Estimated percentile values.
#[derive(Debug, Clone, Default)]
pub struct Percentiles {
    /// Median.
    pub p50: u64,
    /// 95th percentile.
    pub p95: u64,
    /// 99th percentile.
    pub p99: u64,
}

/// RED-method metrics for the HTTP/WebSocket/DNS client paths (spec §4
/// C5/C6/C7/C11/C14). One instance is normally shared per [`crate::http::HttpClient`]
/// or [`crate::ws::WsClient`].
#[derive(Debug)]
pub struct NetworkMetrics {
    /// Requests sent.
    pub requests_sent: Counter,
    /// Responses that ended in a transport or protocol error.
    pub errors: Counter,
    /// Request round-trip latency, microseconds.
    pub request_duration_us: Histogram,
    /// Currently-open (pooled or in-flight) sockets.
    pub active_connections: Gauge,
    /// Bytes written to sockets.
    pub bytes_sent: Counter,
    /// Bytes read from sockets.
    pub bytes_received: Counter,
    /// Completed TLS handshakes.
    pub tls_handshakes: Counter,
    /// Failed TLS handshakes/verifications.
    pub tls_errors: Counter,
    /// Completed DNS lookups.
    pub dns_lookups: Counter,
    /// WebSocket messages sent and received (combined).
    pub ws_messages: Counter,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMetrics {
    /// Create a fresh, zeroed metrics set.
    pub fn new() -> Self {
        Self {
            requests_sent: Counter::new("HTTP requests sent"),
            errors: Counter::new("Transport/protocol errors"),
            request_duration_us: Histogram::new("Request round-trip latency (microseconds)"),
            active_connections: Gauge::new("Open sockets (pooled + in-flight)"),
            bytes_sent: Counter::new("Bytes written to sockets"),
            bytes_received: Counter::new("Bytes read from sockets"),
            tls_handshakes: Counter::new("Completed TLS handshakes"),
            tls_errors: Counter::new("Failed TLS handshakes/verifications"),
            dns_lookups: Counter::new("Completed DNS lookups"),
            ws_messages: Counter::new("WebSocket messages sent + received"),
        }
    }
}

/// Named-metric registry, for applications that want ad hoc counters
/// beyond the fixed [`NetworkMetrics`] set.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<HashMap<String, Arc<Counter>>>>,
    gauges: Arc<RwLock<HashMap<String, Arc<Gauge>>>>,
    histograms: Arc<RwLock<HashMap<String, Arc<Histogram>>>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named counter.
    pub fn register_counter(&self, name: impl Into<String>, counter: Counter) -> Arc<Counter> {
        let counter = Arc::new(counter);
        self.counters.write().unwrap().insert(name.into(), counter.clone());
        counter
    }

    /// Register (or replace) a named gauge.
    pub fn register_gauge(&self, name: impl Into<String>, gauge: Gauge) -> Arc<Gauge> {
        let gauge = Arc::new(gauge);
        self.gauges.write().unwrap().insert(name.into(), gauge.clone());
        gauge
    }

    /// Register (or replace) a named histogram.
    pub fn register_histogram(&self, name: impl Into<String>, histogram: Histogram) -> Arc<Histogram> {
        let histogram = Arc::new(histogram);
        self.histograms.write().unwrap().insert(name.into(), histogram.clone());
        histogram
    }

    /// Render everything in Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, counter) in self.counters.read().unwrap().iter() {
            out.push_str(&format!("# HELP {name} {}\n# TYPE {name} counter\n{name} {}\n", counter.description, counter.get()));
        }
        for (name, gauge) in self.gauges.read().unwrap().iter() {
            out.push_str(&format!("# HELP {name} {}\n# TYPE {name} gauge\n{name} {}\n", gauge.description, gauge.get()));
        }
        for (name, histogram) in self.histograms.read().unwrap().iter() {
            let stats = histogram.stats();
            out.push_str(&format!(
                "# HELP {name} {}\n# TYPE {name} histogram\n{name}_count {}\n{name}_sum {}\n",
                histogram.description, stats.count, stats.sum
            ));
        }
        out
    }
}

/// Scoped stopwatch that records its elapsed time into a histogram when
/// dropped or explicitly stopped.
pub struct Timer<'a> {
    start: Instant,
    histogram: Option<&'a Histogram>,
}

impl<'a> Timer<'a> {
    /// Start an unattached timer (just measures elapsed time).
    pub fn start() -> Self {
        Self { start: Instant::now(), histogram: None }
    }

    /// Start a timer that records its elapsed microseconds into `histogram`
    /// when stopped.
    pub fn start_with_histogram(histogram: &'a Histogram) -> Self {
        Self { start: Instant::now(), histogram: Some(histogram) }
    }

    /// Stop the timer, recording to its histogram if one was given, and
    /// return the elapsed duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(histogram) = self.histogram {
            histogram.record(elapsed.as_micros() as u64);
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new("test");
        c.increment();
        c.increment_by(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn gauge_saturates_at_zero() {
        let g = Gauge::new("test");
        g.decrement();
        assert_eq!(g.get(), 0);
        g.increment();
        g.increment();
        g.decrement();
        assert_eq!(g.get(), 1);
    }

    #[test]
    fn histogram_reports_min_max_mean() {
        let h = Histogram::new("test");
        for v in [10, 20, 30] {
            h.record(v);
        }
        let stats = h.stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 30);
        assert_eq!(stats.mean, 20.0);
    }

    #[test]
    fn registry_exports_prometheus_text() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("vortex_requests_total", Counter::new("requests"));
        counter.increment();
        let text = registry.export_prometheus();
        assert!(text.contains("vortex_requests_total 1"));
    }
}
