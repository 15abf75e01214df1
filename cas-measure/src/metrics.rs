use std::sync::Arc;

use prometheus::{HistogramOpts, IntCounter, Opts, Registry};

use crate::error::MetricsError;

/// Upper bounds, in milliseconds, of the latency buckets.
pub const LATENCY_BUCKETS_MS: [f64; 31] = [
    0.01, 0.05, 0.1, 0.3, 0.6, 0.8, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0, 13.0, 16.0, 32.0,
    64.0, 128.0, 256.0, 500.0, 1000.0, 2000.0, 3000.0, 5000.0, 10000.0, 20000.0, 30000.0,
    40000.0, 50000.0, 60000.0,
];

/// Upper bounds of the payload and batch size buckets: 64 B, 4 KiB, 256 KiB, 16 MiB.
pub const SIZE_BUCKETS: [f64; 4] = [
    (1u64 << 6) as f64,
    (1u64 << 12) as f64,
    (1u64 << 18) as f64,
    (1u64 << 24) as f64,
];

/// Monotonically increasing count.
pub trait Counter: Send + Sync {
    fn inc(&self);
}

/// Distribution of observed values over fixed buckets.
pub trait Histogram: Send + Sync {
    fn observe(&self, value: f64);
}

/// Factory for metric instruments
///
/// This is a trait object that allows applications to plug in their own
/// metrics implementations (Prometheus, StatsD, etc.). Every name may be
/// registered once; a second registration fails.
pub trait MetricsRegistry: Send + Sync {
    fn counter(&self, name: &str, help: &str) -> Result<Arc<dyn Counter>, MetricsError>;

    fn histogram(
        &self,
        name: &str,
        help: &str,
        buckets: &[f64],
    ) -> Result<Arc<dyn Histogram>, MetricsError>;
}

/// No-op metrics registry
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

struct NoOpInstrument;

impl Counter for NoOpInstrument {
    fn inc(&self) {}
}

impl Histogram for NoOpInstrument {
    fn observe(&self, _value: f64) {}
}

impl MetricsRegistry for NoOpMetrics {
    fn counter(&self, _name: &str, _help: &str) -> Result<Arc<dyn Counter>, MetricsError> {
        Ok(Arc::new(NoOpInstrument))
    }

    fn histogram(
        &self,
        _name: &str,
        _help: &str,
        _buckets: &[f64],
    ) -> Result<Arc<dyn Histogram>, MetricsError> {
        Ok(Arc::new(NoOpInstrument))
    }
}

/// Metrics registry backed by a [`prometheus::Registry`].
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
}

impl PrometheusMetrics {
    /// Registers into the process wide default registry, the one read by
    /// [`prometheus::gather`].
    pub fn global() -> Self {
        Self::new(prometheus::default_registry().clone())
    }

    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn register<C>(&self, name: &str, collector: C) -> Result<(), MetricsError>
    where
        C: prometheus::core::Collector + 'static,
    {
        self.registry
            .register(Box::new(collector))
            .map_err(|err| match err {
                prometheus::Error::AlreadyReg => MetricsError::AlreadyRegistered(name.to_string()),
                other => MetricsError::Prometheus(other),
            })
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::global()
    }
}

struct PromCounter(IntCounter);

impl Counter for PromCounter {
    fn inc(&self) {
        self.0.inc();
    }
}

struct PromHistogram(prometheus::Histogram);

impl Histogram for PromHistogram {
    fn observe(&self, value: f64) {
        self.0.observe(value);
    }
}

impl MetricsRegistry for PrometheusMetrics {
    fn counter(&self, name: &str, help: &str) -> Result<Arc<dyn Counter>, MetricsError> {
        let counter = IntCounter::with_opts(Opts::new(prometheus_name(name), help))?;
        self.register(name, counter.clone())?;
        Ok(Arc::new(PromCounter(counter)))
    }

    fn histogram(
        &self,
        name: &str,
        help: &str,
        buckets: &[f64],
    ) -> Result<Arc<dyn Histogram>, MetricsError> {
        let opts = HistogramOpts::new(prometheus_name(name), help).buckets(buckets.to_vec());
        let histogram = prometheus::Histogram::with_opts(opts)?;
        self.register(name, histogram.clone())?;
        Ok(Arc::new(PromHistogram(histogram)))
    }
}

/// Maps a dotted instrument name onto the Prometheus name alphabet.
///
/// `blocks.put.size_bytes` becomes `blocks_put_size_bytes`.
pub fn prometheus_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_bounds_are_increasing() {
        assert!(LATENCY_BUCKETS_MS.windows(2).all(|w| w[0] < w[1]));
        assert!(SIZE_BUCKETS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(SIZE_BUCKETS, [64.0, 4096.0, 262144.0, 16777216.0]);
        assert_eq!(LATENCY_BUCKETS_MS[0], 0.01);
        assert_eq!(LATENCY_BUCKETS_MS[30], 60000.0);
    }

    #[test]
    fn test_prometheus_name() {
        assert_eq!(prometheus_name("t.put.size_bytes"), "t_put_size_bytes");
        assert_eq!(prometheus_name("my-store.get_total"), "my_store_get_total");
        assert_eq!(prometheus_name("9lives.has_total"), "_9lives_has_total");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let metrics = PrometheusMetrics::new(Registry::new());
        metrics.counter("dup.get_total", "first").unwrap();
        let err = metrics.counter("dup.get_total", "second").err().unwrap();
        assert!(matches!(err, MetricsError::AlreadyRegistered(name) if name == "dup.get_total"));
    }

    #[test]
    fn test_prometheus_instruments_record() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(registry.clone());
        let counter = metrics.counter("x.put_total", "puts").unwrap();
        let histogram = metrics
            .histogram("x.put.size_bytes", "sizes", &SIZE_BUCKETS)
            .unwrap();

        counter.inc();
        counter.inc();
        histogram.observe(100.0);

        let families = registry.gather();
        let puts = families
            .iter()
            .find(|f| f.get_name() == "x_put_total")
            .unwrap();
        assert_eq!(puts.get_metric()[0].get_counter().get_value(), 2.0);
        let sizes = families
            .iter()
            .find(|f| f.get_name() == "x_put_size_bytes")
            .unwrap();
        let h = sizes.get_metric()[0].get_histogram();
        assert_eq!(h.get_sample_count(), 1);
        assert_eq!(h.get_sample_sum(), 100.0);
    }

    #[test]
    fn test_noop_never_fails() {
        let metrics = NoOpMetrics;
        metrics.counter("a", "a").unwrap().inc();
        metrics.counter("a", "a").unwrap().inc();
        metrics.histogram("b", "b", &SIZE_BUCKETS).unwrap().observe(1.0);
    }
}
