use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use tracing::warn;

use crate::block::{Block, Cid};
use crate::error::BlockstoreError;
use crate::store::{Blockstore, KeyIter};

/// In-memory block store.
///
/// Only the mandatory [`Blockstore`] operations are provided, so a
/// [`MeasuredBlockstore`](crate::MeasuredBlockstore) in front of it runs its
/// fallback paths for batched deletes and views.
#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Bytes>>,
    hash_on_read: AtomicBool,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, BlockstoreError> {
        let blocks = self.blocks.read().map_err(|_| BlockstoreError::Poisoned)?;
        Ok(blocks.len())
    }

    pub fn is_empty(&self) -> Result<bool, BlockstoreError> {
        Ok(self.len()? == 0)
    }
}

impl Blockstore for MemoryBlockstore {
    fn put(&self, block: &Block) -> Result<(), BlockstoreError> {
        let mut blocks = self.blocks.write().map_err(|_| BlockstoreError::Poisoned)?;
        blocks.insert(*block.cid(), block.data().clone());
        Ok(())
    }

    fn put_many(&self, new_blocks: &[Block]) -> Result<(), BlockstoreError> {
        let mut blocks = self.blocks.write().map_err(|_| BlockstoreError::Poisoned)?;
        for block in new_blocks {
            blocks.insert(*block.cid(), block.data().clone());
        }
        Ok(())
    }

    fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        let data = {
            let blocks = self.blocks.read().map_err(|_| BlockstoreError::Poisoned)?;
            blocks.get(cid).cloned()
        };
        let block = Block::with_cid(*cid, data.ok_or(BlockstoreError::NotFound(*cid))?);
        if self.hash_on_read.load(Ordering::Relaxed) {
            if let Err(err) = block.verify() {
                warn!(cid = %cid, "stored block does not match its identifier");
                return Err(err);
            }
        }
        Ok(block)
    }

    fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        let blocks = self.blocks.read().map_err(|_| BlockstoreError::Poisoned)?;
        Ok(blocks.contains_key(cid))
    }

    fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        let blocks = self.blocks.read().map_err(|_| BlockstoreError::Poisoned)?;
        blocks
            .get(cid)
            .map(|data| data.len())
            .ok_or(BlockstoreError::NotFound(*cid))
    }

    fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        let mut blocks = self.blocks.write().map_err(|_| BlockstoreError::Poisoned)?;
        blocks.remove(cid);
        Ok(())
    }

    fn all_keys(&self) -> Result<KeyIter, BlockstoreError> {
        // snapshot, so the iterator does not hold the lock
        let keys: Vec<Cid> = {
            let blocks = self.blocks.read().map_err(|_| BlockstoreError::Poisoned)?;
            blocks.keys().copied().collect()
        };
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn hash_on_read(&self, enabled: bool) {
        self.hash_on_read.store(enabled, Ordering::Relaxed);
    }
}
