use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

const LABELS: &[&str] = &["query_id", "stage_id"];

#[derive(Clone, Debug)]
pub struct ExchangeMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    pages_polled: CounterVec,
    bytes_polled: CounterVec,
    sources_closed: CounterVec,
    close_failures: CounterVec,
    memory_bytes: GaugeVec,
}

impl ExchangeMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Resolve the per-page series of one exchange once, so the read path
    /// only touches atomics. Every call returns an independent reporter; the
    /// memory gauge of a stage is the sum over all of them.
    pub fn page_metrics(&self, query_id: &str, stage_id: &str) -> PageMetrics {
        let labels = [query_id, stage_id];
        PageMetrics {
            pages: self.inner.pages_polled.with_label_values(&labels),
            bytes: self.inner.bytes_polled.with_label_values(&labels),
            memory: self.inner.memory_bytes.with_label_values(&labels),
            reported_memory: AtomicU64::new(0),
        }
    }

    pub fn record_source_closed(&self, query_id: &str, stage_id: &str, failed: bool) {
        let labels = [query_id, stage_id];
        self.inner.sources_closed.with_label_values(&labels).inc();
        if failed {
            self.inner.close_failures.with_label_values(&labels).inc();
        }
    }

    pub fn close_failures(&self, query_id: &str, stage_id: &str) -> u64 {
        self.inner
            .close_failures
            .with_label_values(&[query_id, stage_id])
            .get() as u64
    }

    pub fn memory_bytes(&self, query_id: &str, stage_id: &str) -> u64 {
        self.inner
            .memory_bytes
            .with_label_values(&[query_id, stage_id])
            .get() as u64
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

/// Pre-resolved page counters of one exchange.
#[derive(Debug)]
pub struct PageMetrics {
    pages: Counter,
    bytes: Counter,
    memory: Gauge,
    // This reporter's share of `memory`.
    reported_memory: AtomicU64,
}

impl PageMetrics {
    pub fn record_page(&self, bytes: u64) {
        self.pages.inc();
        self.bytes.inc_by(bytes as f64);
    }

    /// Replace this exchange's contribution to the stage memory gauge.
    pub fn set_memory_bytes(&self, bytes: u64) {
        let previous = self.reported_memory.swap(bytes, Ordering::SeqCst);
        if previous != bytes {
            self.memory.add(bytes as f64 - previous as f64);
        }
    }

    pub fn pages(&self) -> u64 {
        self.pages.get() as u64
    }
}

impl Default for ExchangeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let pages_polled = counter_vec(
            &registry,
            "spool_exchange_pages_polled_total",
            "Pages returned by spooling exchange data sources",
        );
        let bytes_polled = counter_vec(
            &registry,
            "spool_exchange_bytes_polled_total",
            "Page bytes returned by spooling exchange data sources",
        );
        let sources_closed = counter_vec(
            &registry,
            "spool_exchange_sources_closed_total",
            "Exchange sources released by closing data sources",
        );
        let close_failures = counter_vec(
            &registry,
            "spool_exchange_close_failures_total",
            "Exchange source close calls that failed and were suppressed",
        );
        let memory_bytes = gauge_vec(
            &registry,
            "spool_exchange_memory_bytes",
            "Memory retained by the exchange sources of a stage",
        );

        Self {
            registry,
            pages_polled,
            bytes_polled,
            sources_closed,
            close_failures,
            memory_bytes,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), LABELS).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), LABELS).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

static GLOBAL_METRICS: OnceLock<ExchangeMetrics> = OnceLock::new();

pub fn global_metrics() -> &'static ExchangeMetrics {
    GLOBAL_METRICS.get_or_init(ExchangeMetrics::new)
}
