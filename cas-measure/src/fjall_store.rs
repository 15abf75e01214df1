use std::ops::Bound;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::{info, warn};

use crate::block::{Block, Cid};
use crate::error::BlockstoreError;
use crate::store::{BatchDelete, Blockstore, Close, KeyIter, View, ViewFn};

const BLOCK_PARTITION: &str = "blocks";

/// Number of keys fetched per step while enumerating.
const KEY_PAGE_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Buffer,
    Fsync,
    Fdatasync,
}

impl From<Durability> for PersistMode {
    fn from(value: Durability) -> Self {
        match value {
            Durability::Buffer => PersistMode::Buffer,
            Durability::Fsync => PersistMode::SyncAll,
            Durability::Fdatasync => PersistMode::SyncData,
        }
    }
}

impl std::fmt::Display for Durability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Durability::Buffer => "buffer",
            Durability::Fsync => "fsync",
            Durability::Fdatasync => "fdatasync",
        })
    }
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffer" => Ok(Durability::Buffer),
            "fsync" => Ok(Durability::Fsync),
            "fdatasync" => Ok(Durability::Fdatasync),
            _ => Err(format!("Unknown durability option: {}", s)),
        }
    }
}

/// Block store persisted in a Fjall keyspace.
///
/// Besides the mandatory operations it supports batched deletes, in place
/// views and an explicit close that flushes the journal.
pub struct FjallBlockstore {
    keyspace: Keyspace,
    blocks: PartitionHandle,
    durability: Option<Durability>,
    hash_on_read: AtomicBool,
}

impl std::fmt::Debug for FjallBlockstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FjallBlockstore")
            .field("durability", &self.durability)
            .field("hash_on_read", &self.hash_on_read)
            .finish()
    }
}

impl FjallBlockstore {
    /// Opens (or creates) the store at `path`.
    ///
    /// With a durability level every write is persisted with that mode before
    /// returning; without one, writes are flushed by Fjall in the background
    /// and on [`Close::close`].
    pub fn open(
        path: impl AsRef<Path>,
        durability: Option<Durability>,
    ) -> Result<Self, BlockstoreError> {
        let path = path.as_ref();
        let keyspace = Config::new(path).open()?;
        let blocks = keyspace.open_partition(BLOCK_PARTITION, PartitionCreateOptions::default())?;
        info!(path = %path.display(), ?durability, "opened fjall blockstore");

        Ok(Self {
            keyspace,
            blocks,
            durability,
            hash_on_read: AtomicBool::new(false),
        })
    }

    pub fn disk_space(&self) -> u64 {
        self.keyspace.disk_space()
    }

    fn persist(&self) -> Result<(), BlockstoreError> {
        if let Some(durability) = self.durability {
            self.keyspace.persist(durability.into())?;
        }
        Ok(())
    }

    fn check(&self, cid: &Cid, data: &[u8]) -> Result<(), BlockstoreError> {
        if self.hash_on_read.load(Ordering::Relaxed) && Cid::digest(data) != *cid {
            warn!(cid = %cid, "stored block does not match its identifier");
            return Err(BlockstoreError::HashMismatch(*cid));
        }
        Ok(())
    }
}

impl Blockstore for FjallBlockstore {
    fn put(&self, block: &Block) -> Result<(), BlockstoreError> {
        self.blocks
            .insert(block.cid().as_bytes().as_slice(), block.data().as_ref())?;
        self.persist()
    }

    fn put_many(&self, blocks: &[Block]) -> Result<(), BlockstoreError> {
        let mut batch = self
            .keyspace
            .batch()
            .durability(self.durability.map(PersistMode::from));
        for block in blocks {
            batch.insert(
                &self.blocks,
                block.cid().as_bytes().as_slice(),
                block.data().as_ref(),
            );
        }
        batch.commit()?;
        Ok(())
    }

    fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        let data = self
            .blocks
            .get(cid.as_bytes())?
            .ok_or(BlockstoreError::NotFound(*cid))?;
        self.check(cid, &data)?;
        Ok(Block::with_cid(*cid, data.to_vec()))
    }

    fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        Ok(self.blocks.contains_key(cid.as_bytes())?)
    }

    fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        self.blocks
            .size_of(cid.as_bytes())?
            .map(|size| size as usize)
            .ok_or(BlockstoreError::NotFound(*cid))
    }

    fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        self.blocks.remove(cid.as_bytes().as_slice())?;
        self.persist()
    }

    fn all_keys(&self) -> Result<KeyIter, BlockstoreError> {
        Ok(Box::new(KeyPages {
            blocks: self.blocks.clone(),
            page: Vec::new().into_iter(),
            last: None,
            done: false,
        }))
    }

    fn hash_on_read(&self, enabled: bool) {
        self.hash_on_read.store(enabled, Ordering::Relaxed);
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

impl BatchDelete for FjallBlockstore {
    fn delete_many(&self, cids: &[Cid]) -> Result<(), BlockstoreError> {
        let mut batch = self
            .keyspace
            .batch()
            .durability(self.durability.map(PersistMode::from));
        for cid in cids {
            batch.remove(&self.blocks, cid.as_bytes().as_slice());
        }
        batch.commit()?;
        Ok(())
    }
}

impl View for FjallBlockstore {
    fn view(&self, cid: &Cid, f: &mut ViewFn<'_>) -> Result<(), BlockstoreError> {
        let data = self
            .blocks
            .get(cid.as_bytes())?
            .ok_or(BlockstoreError::NotFound(*cid))?;
        self.check(cid, &data)?;
        f(&data[..])
    }
}

impl Close for FjallBlockstore {
    fn close(&self) -> Result<(), BlockstoreError> {
        let mode = self.durability.unwrap_or(Durability::Fsync);
        self.keyspace.persist(mode.into())?;
        info!(%mode, "closed fjall blockstore");
        Ok(())
    }
}

/// Walks the block partition one page of keys at a time, so no iterator into
/// the keyspace outlives a single `next` call.
struct KeyPages {
    blocks: PartitionHandle,
    page: std::vec::IntoIter<Result<Cid, BlockstoreError>>,
    last: Option<Vec<u8>>,
    done: bool,
}

impl KeyPages {
    fn fill(&mut self) {
        let lower = match self.last.take() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let mut page = Vec::with_capacity(KEY_PAGE_SIZE);
        for item in self
            .blocks
            .range::<Vec<u8>, _>((lower, Bound::Unbounded))
            .take(KEY_PAGE_SIZE)
        {
            match item {
                Ok((key, _)) => {
                    page.push(Cid::try_from(&key[..]));
                    self.last = Some(key.to_vec());
                }
                Err(err) => {
                    page.push(Err(err.into()));
                    self.done = true;
                    break;
                }
            }
        }
        if page.len() < KEY_PAGE_SIZE {
            self.done = true;
        }
        self.page = page.into_iter();
    }
}

impl Iterator for KeyPages {
    type Item = Result<Cid, BlockstoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.page.next() {
            return Some(item);
        }
        if self.done {
            return None;
        }
        self.fill();
        self.page.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, FjallBlockstore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FjallBlockstore::open(dir.path(), None).unwrap();
        (dir, store)
    }

    #[test]
    fn test_durability_from_str() {
        assert_eq!("fsync".parse::<Durability>(), Ok(Durability::Fsync));
        assert_eq!("FDATASYNC".parse::<Durability>(), Ok(Durability::Fdatasync));
        assert_eq!("buffer".parse::<Durability>(), Ok(Durability::Buffer));
        assert!("sometimes".parse::<Durability>().is_err());
        assert_eq!(Durability::Fdatasync.to_string(), "fdatasync");
    }

    #[test]
    fn test_put_get_size_delete() {
        let (_dir, store) = open_temp();
        let block = Block::new(&b"fjall block"[..]);

        store.put(&block).unwrap();
        assert!(store.has(block.cid()).unwrap());
        assert_eq!(store.get(block.cid()).unwrap(), block);
        assert_eq!(store.get_size(block.cid()).unwrap(), 11);

        store.delete_block(block.cid()).unwrap();
        assert!(store.get(block.cid()).unwrap_err().is_not_found());
        assert!(store.get_size(block.cid()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_batch_operations() {
        let (_dir, store) = open_temp();
        let blocks: Vec<Block> = (0u8..10).map(|i| Block::new(vec![i; 32])).collect();
        store.put_many(&blocks).unwrap();

        let cids: Vec<Cid> = blocks.iter().take(4).map(|b| *b.cid()).collect();
        store.delete_many(&cids).unwrap();

        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(store.has(block.cid()).unwrap(), i >= 4);
        }
    }

    #[test]
    fn test_view_and_hash_on_read() {
        let (_dir, store) = open_temp();
        let cid = Cid::digest(b"expected");
        store.put(&Block::with_cid(cid, &b"actual"[..])).unwrap();

        let mut seen = Vec::new();
        store
            .view(&cid, &mut |data| {
                seen.extend_from_slice(data);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, b"actual");

        store.hash_on_read(true);
        assert!(matches!(store.get(&cid), Err(BlockstoreError::HashMismatch(_))));
        assert!(matches!(
            store.view(&cid, &mut |_| Ok(())),
            Err(BlockstoreError::HashMismatch(_))
        ));
    }

    #[test]
    fn test_all_keys_spans_pages() {
        let (_dir, store) = open_temp();
        let count = KEY_PAGE_SIZE * 2 + 7;
        let blocks: Vec<Block> = (0..count)
            .map(|i| Block::new((i as u32).to_le_bytes().to_vec()))
            .collect();
        store.put_many(&blocks).unwrap();

        let keys: Vec<Cid> = store.all_keys().unwrap().map(Result::unwrap).collect();
        assert_eq!(keys.len(), count);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reopen_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let block = Block::new(&b"persisted"[..]);
        {
            let store = FjallBlockstore::open(dir.path(), Some(Durability::Buffer)).unwrap();
            store.put(&block).unwrap();
            store.close().unwrap();
        }
        let store = FjallBlockstore::open(dir.path(), None).unwrap();
        assert_eq!(store.get(block.cid()).unwrap(), block);
    }
}
