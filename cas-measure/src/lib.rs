//! # CAS Measure
//!
//! A metrics-recording layer for content-addressed block stores.
//!
//! [`MeasuredBlockstore`] wraps any [`Blockstore`] and, for every call, counts
//! it, times it and records payload or batch sizes before handing the call to
//! the wrapped store. Results and errors come back exactly as the backend
//! produced them.
//!
//! ## Features
//!
//! - **Transparent**: the wrapper is itself a [`Blockstore`]
//! - **Capability aware**: batched deletes, in place views and explicit close
//!   are used when the backend has them, and emulated otherwise
//! - **Pluggable metrics**: instruments come from a [`MetricsRegistry`];
//!   [`PrometheusMetrics`] and [`NoOpMetrics`] are provided
//! - **Reference backends**: [`MemoryBlockstore`] and [`FjallBlockstore`]
//!
//! ## Example
//!
//! ```no_run
//! use cas_measure::{Block, Blockstore, MeasuredBlockstore, MemoryBlockstore};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MeasuredBlockstore::new("blocks", Arc::new(MemoryBlockstore::new()))?;
//!
//! let block = Block::new(&b"hello"[..]);
//! store.put(&block)?;
//! assert_eq!(store.get(block.cid())?, block);
//!
//! // blocks_put_total, blocks_get_size_bytes, ... are now in prometheus::gather()
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod error;
pub mod fjall_store;
pub mod measure;
pub mod memory;
pub mod metrics;
pub mod store;

pub use block::{Block, Cid};
pub use error::{BlockstoreError, MetricsError};
pub use fjall_store::{Durability, FjallBlockstore};
pub use measure::{Capabilities, MeasuredBlockstore};
pub use memory::MemoryBlockstore;
pub use metrics::{
    Counter, Histogram, MetricsRegistry, NoOpMetrics, PrometheusMetrics, LATENCY_BUCKETS_MS,
    SIZE_BUCKETS,
};
pub use store::{BatchDelete, Blockstore, Close, KeyIter, View, ViewFn};
