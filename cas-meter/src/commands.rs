use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cas_measure::{Block, Blockstore, FjallBlockstore, MeasuredBlockstore, MetricsRegistry};
use clap::Parser;
use prometheus::Encoder;

use crate::config::{StoreArgs, StoreConfig};

#[derive(Parser, Debug)]
pub struct ImportConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(required = true, help = "Files to store, one block per file")]
    pub files: Vec<PathBuf>,
}

/// Stores every file as one block through a measured store.
pub fn import(args: ImportConfig, registry: &dyn MetricsRegistry) -> Result<Vec<Block>> {
    let store = StoreConfig::from(&args.store).open(&args.store.prefix, registry)?;

    let mut blocks = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let block = Block::new(data);
        store
            .put(&block)
            .with_context(|| format!("failed to store {}", path.display()))?;
        blocks.push(block);
    }
    cas_measure::Close::close(&store)?;
    Ok(blocks)
}

/// Counts the blocks of a Fjall store by enumerating it through a measured
/// store.
pub fn num_keys(data_root: PathBuf, registry: &dyn MetricsRegistry) -> Result<usize> {
    let backend = Arc::new(FjallBlockstore::open(&data_root, None)?);
    let store = MeasuredBlockstore::with_registry("inspect", backend, registry)?;
    let mut count = 0;
    for cid in store.all_keys()? {
        cid?;
        count += 1;
    }
    Ok(count)
}

/// On-disk size in bytes of the Fjall keyspace at `data_root`.
pub fn disk_space(data_root: PathBuf) -> Result<u64> {
    let store = FjallBlockstore::open(&data_root, None)?;
    Ok(store.disk_space())
}

/// Writes the default registry in the Prometheus text format.
pub fn write_metrics(out: &mut impl Write) -> Result<()> {
    let mut buffer = Vec::new();
    prometheus::TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    out.write_all(&buffer)?;
    Ok(())
}
