//! Metrics-recording wrapper around a [`Blockstore`].
//!
//! Every operation bumps a call counter, times the backend call into a latency
//! histogram (milliseconds) and counts failures. Absent blocks are not failures
//! for reads, size queries, batched deletes and views. Results pass through
//! untouched.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::block::{Block, Cid};
use crate::error::{BlockstoreError, MetricsError};
use crate::metrics::{
    Counter, Histogram, MetricsRegistry, PrometheusMetrics, LATENCY_BUCKETS_MS, SIZE_BUCKETS,
};
use crate::store::{BatchDelete, Blockstore, Close, KeyIter, View, ViewFn};

/// Optional behaviours found on the wrapped backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub batch_delete: bool,
    pub view: bool,
    pub close: bool,
}

impl Capabilities {
    pub fn probe(store: &dyn Blockstore) -> Self {
        Self {
            batch_delete: store.as_batch_deleter().is_some(),
            view: store.as_viewer().is_some(),
            close: store.as_closer().is_some(),
        }
    }
}

/// Observes the elapsed time into a histogram when dropped.
struct LatencyTimer<'a> {
    histogram: &'a dyn Histogram,
    start: Instant,
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        self.histogram
            .observe(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Instruments of one operation.
struct OpMetrics {
    calls: Arc<dyn Counter>,
    errors: Arc<dyn Counter>,
    latency: Arc<dyn Histogram>,
    size: Option<Arc<dyn Histogram>>,
}

impl OpMetrics {
    fn new(
        registry: &dyn MetricsRegistry,
        prefix: &str,
        op: &str,
        method: &str,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            calls: registry.counter(
                &format!("{prefix}.{op}_total"),
                &format!("Total number of Blockstore.{method} calls"),
            )?,
            errors: registry.counter(
                &format!("{prefix}.{op}.errors_total"),
                &format!("Number of errored Blockstore.{method} calls"),
            )?,
            latency: registry.histogram(
                &format!("{prefix}.{op}.latency_seconds"),
                &format!("Latency distribution of Blockstore.{method} calls"),
                &LATENCY_BUCKETS_MS,
            )?,
            size: None,
        })
    }

    fn with_size(
        mut self,
        registry: &dyn MetricsRegistry,
        name: &str,
        help: &str,
    ) -> Result<Self, MetricsError> {
        self.size = Some(registry.histogram(name, help, &SIZE_BUCKETS)?);
        Ok(self)
    }

    /// Counts the call and starts its latency timer.
    fn start(&self) -> LatencyTimer<'_> {
        let timer = LatencyTimer {
            histogram: self.latency.as_ref(),
            start: Instant::now(),
        };
        self.calls.inc();
        timer
    }

    fn observe_size(&self, value: usize) {
        if let Some(size) = &self.size {
            size.observe(value as f64);
        }
    }

    /// Counts every error.
    fn record<T>(&self, result: &Result<T, BlockstoreError>) {
        if result.is_err() {
            self.errors.inc();
        }
    }

    /// Counts every error except a missing block.
    fn record_found<T>(&self, result: &Result<T, BlockstoreError>) {
        match result {
            Err(err) if !err.is_not_found() => self.errors.inc(),
            _ => {}
        }
    }
}

/// A [`Blockstore`] that records metrics for every call and forwards it to
/// the wrapped backend.
///
/// Instruments are registered under `<prefix>.<op>...`, e.g.
/// `blocks.get.latency_seconds`. The prefix must be unique per registry.
pub struct MeasuredBlockstore {
    prefix: String,
    backend: Arc<dyn Blockstore>,
    capabilities: Capabilities,

    put: OpMetrics,
    put_many: OpMetrics,
    get: OpMetrics,
    has: OpMetrics,
    get_size: OpMetrics,
    delete: OpMetrics,
    delete_many: OpMetrics,
    view: OpMetrics,
}

impl MeasuredBlockstore {
    /// Wraps `backend`, registering its metrics in the default Prometheus
    /// registry.
    pub fn new(prefix: &str, backend: Arc<dyn Blockstore>) -> Result<Self, MetricsError> {
        Self::with_registry(prefix, backend, &PrometheusMetrics::global())
    }

    /// Wraps `backend`, registering its metrics in `registry`.
    pub fn with_registry(
        prefix: &str,
        backend: Arc<dyn Blockstore>,
        registry: &dyn MetricsRegistry,
    ) -> Result<Self, MetricsError> {
        let capabilities = Capabilities::probe(backend.as_ref());
        debug!(
            prefix,
            batch_delete = capabilities.batch_delete,
            view = capabilities.view,
            close = capabilities.close,
            "probed blockstore capabilities"
        );

        Ok(Self {
            prefix: prefix.to_string(),
            backend,
            capabilities,

            put: OpMetrics::new(registry, prefix, "put", "Put")?.with_size(
                registry,
                &format!("{prefix}.put.size_bytes"),
                "Size distribution of stored byte slices",
            )?,
            put_many: OpMetrics::new(registry, prefix, "putmany", "PutMany")?.with_size(
                registry,
                &format!("{prefix}.putmany.size_bytes"),
                "Size distribution of Blockstore.PutMany batch sizes",
            )?,
            get: OpMetrics::new(registry, prefix, "get", "Get")?.with_size(
                registry,
                &format!("{prefix}.get.size_bytes"),
                "Size distribution of retrieved byte slices",
            )?,
            has: OpMetrics::new(registry, prefix, "has", "Has")?,
            get_size: OpMetrics::new(registry, prefix, "getsize", "GetSize")?,
            delete: OpMetrics::new(registry, prefix, "delete", "Delete")?,
            delete_many: OpMetrics::new(registry, prefix, "deletemany", "DeleteMany")?.with_size(
                registry,
                &format!("{prefix}.deletemany.size_items"),
                "Size distribution of batch delete calls",
            )?,
            view: OpMetrics::new(registry, prefix, "view", "View")?,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn batch_deleter(&self) -> Option<&dyn BatchDelete> {
        if self.capabilities.batch_delete {
            self.backend.as_batch_deleter()
        } else {
            None
        }
    }

    fn viewer(&self) -> Option<&dyn View> {
        if self.capabilities.view {
            self.backend.as_viewer()
        } else {
            None
        }
    }

    fn closer(&self) -> Option<&dyn Close> {
        if self.capabilities.close {
            self.backend.as_closer()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for MeasuredBlockstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasuredBlockstore")
            .field("prefix", &self.prefix)
            .field("backend", &self.backend)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Blockstore for MeasuredBlockstore {
    fn put(&self, block: &Block) -> Result<(), BlockstoreError> {
        let _timer = self.put.start();
        self.put.observe_size(block.len());
        let result = self.backend.put(block);
        self.put.record(&result);
        result
    }

    fn put_many(&self, blocks: &[Block]) -> Result<(), BlockstoreError> {
        let _timer = self.put_many.start();
        self.put_many.observe_size(blocks.len());
        let result = self.backend.put_many(blocks);
        self.put_many.record(&result);
        result
    }

    fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        let _timer = self.get.start();
        let result = self.backend.get(cid);
        if let Ok(block) = &result {
            self.get.observe_size(block.len());
        }
        self.get.record_found(&result);
        result
    }

    fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        let _timer = self.has.start();
        let result = self.backend.has(cid);
        self.has.record(&result);
        result
    }

    fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        let _timer = self.get_size.start();
        let result = self.backend.get_size(cid);
        self.get_size.record_found(&result);
        result
    }

    fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        let _timer = self.delete.start();
        let result = self.backend.delete_block(cid);
        self.delete.record(&result);
        result
    }

    fn all_keys(&self) -> Result<KeyIter, BlockstoreError> {
        self.backend.all_keys()
    }

    fn hash_on_read(&self, enabled: bool) {
        self.backend.hash_on_read(enabled)
    }

    fn as_batch_deleter(&self) -> Option<&dyn BatchDelete> {
        Some(self)
    }

    fn as_viewer(&self) -> Option<&dyn View> {
        Some(self)
    }

    fn as_closer(&self) -> Option<&dyn Close> {
        Some(self)
    }
}

impl BatchDelete for MeasuredBlockstore {
    /// Uses the backend's batched delete when it has one. Otherwise deletes
    /// one by one and stops at the first failure; blocks already removed stay
    /// removed.
    fn delete_many(&self, cids: &[Cid]) -> Result<(), BlockstoreError> {
        let Some(deleter) = self.batch_deleter() else {
            for cid in cids {
                self.delete_block(cid)?;
            }
            return Ok(());
        };

        let _timer = self.delete_many.start();
        self.delete_many.observe_size(cids.len());
        let result = deleter.delete_many(cids);
        self.delete_many.record_found(&result);
        result
    }
}

impl View for MeasuredBlockstore {
    /// Falls back to a full [`Blockstore::get`] when the backend cannot view
    /// in place.
    fn view(&self, cid: &Cid, f: &mut ViewFn<'_>) -> Result<(), BlockstoreError> {
        let Some(viewer) = self.viewer() else {
            let block = self.get(cid)?;
            return f(block.data().as_ref());
        };

        let _timer = self.view.start();
        let result = viewer.view(cid, f);
        self.view.record_found(&result);
        result
    }
}

impl Close for MeasuredBlockstore {
    fn close(&self) -> Result<(), BlockstoreError> {
        match self.closer() {
            Some(closer) => closer.close(),
            None => Ok(()),
        }
    }
}
