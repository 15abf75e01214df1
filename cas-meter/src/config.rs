use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cas_measure::{
    Blockstore, Close, Durability, FjallBlockstore, MeasuredBlockstore, MemoryBlockstore,
    MetricsRegistry,
};
use clap::Args;
use serde::{Deserialize, Deserializer};
use tracing::info;

/// Storage backend behind a measured store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Fjall,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "fjall" => Ok(BackendKind::Fjall),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Flags describing a single store.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = "fjall", help = "Block store backend (memory, fjall)")]
    pub backend: BackendKind,

    #[arg(long, default_value = ".")]
    pub data_root: PathBuf,

    #[arg(long, default_value = "cas_meter", help = "Name prefix of the store metrics")]
    pub prefix: String,

    #[arg(
        long,
        help = "Durability level (buffer, fsync, fdatasync), leave empty for background flushes"
    )]
    pub durability: Option<Durability>,

    #[arg(long, help = "Verify block hashes on reads")]
    pub hash_on_read: bool,
}

impl From<&StoreArgs> for StoreConfig {
    fn from(args: &StoreArgs) -> Self {
        Self {
            backend: args.backend,
            path: Some(args.data_root.clone()),
            prefix: Some(args.prefix.clone()),
            durability: args.durability,
            hash_on_read: args.hash_on_read,
        }
    }
}

/// One `[stores.<name>]` table of the stores file.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Metric name prefix, defaults to the store name.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default, deserialize_with = "durability_from_str")]
    pub durability: Option<Durability>,
    #[serde(default)]
    pub hash_on_read: bool,
}

impl StoreConfig {
    /// Opens the backend and wraps it, registering metrics in `registry`.
    pub fn open(&self, name: &str, registry: &dyn MetricsRegistry) -> Result<MeasuredBlockstore> {
        let backend: Arc<dyn Blockstore> = match self.backend {
            BackendKind::Memory => Arc::new(MemoryBlockstore::new()),
            BackendKind::Fjall => {
                let Some(path) = &self.path else {
                    bail!("store {name}: the fjall backend needs a path");
                };
                let store = FjallBlockstore::open(path, self.durability)
                    .with_context(|| format!("failed to open store {name} at {}", path.display()))?;
                Arc::new(store)
            }
        };
        backend.hash_on_read(self.hash_on_read);

        let prefix = self.prefix.as_deref().unwrap_or(name);
        let store = MeasuredBlockstore::with_registry(prefix, backend, registry)
            .with_context(|| format!("failed to register metrics for store {name}"))?;
        info!(store = name, prefix, backend = ?self.backend, "store ready");
        Ok(store)
    }
}

fn durability_from_str<'de, D>(deserializer: D) -> Result<Option<Durability>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}

/// Configuration file structure for stores.toml
#[derive(Debug, Clone, Deserialize)]
pub struct StoresConfig {
    pub stores: BTreeMap<String, StoreConfig>,
}

impl StoresConfig {
    /// Load stores configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read stores config file {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse stores config")?;
        if config.stores.is_empty() {
            bail!("stores config does not define any store");
        }
        Ok(config)
    }

    /// Opens every configured store.
    pub fn open(&self, registry: &dyn MetricsRegistry) -> Result<Stores> {
        let mut stores = HashMap::new();
        for (name, config) in &self.stores {
            let store = config.open(name, registry)?;
            stores.insert(name.clone(), Arc::new(store));
        }
        Ok(Stores { stores })
    }
}

/// Opened stores addressed by name.
#[derive(Debug, Default)]
pub struct Stores {
    stores: HashMap<String, Arc<MeasuredBlockstore>>,
}

impl Stores {
    pub fn single(name: &str, store: MeasuredBlockstore) -> Self {
        let mut stores = HashMap::new();
        stores.insert(name.to_string(), Arc::new(store));
        Self { stores }
    }

    pub fn get(&self, name: &str) -> Option<Arc<MeasuredBlockstore>> {
        self.stores.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.stores.keys()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Closes every store, returning the first failure after trying all.
    pub fn close_all(&self) -> Result<()> {
        let mut first_err = None;
        for (name, store) in &self.stores {
            if let Err(err) = store.close() {
                tracing::error!(store = %name, "failed to close store: {err}");
                first_err.get_or_insert(anyhow::Error::new(err).context(format!("store {name}")));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
