use std::fmt::Debug;

use crate::block::{Block, Cid};
use crate::error::BlockstoreError;

/// Lazily produced sequence of stored block identifiers.
///
/// Enumeration stops as soon as the consumer drops the iterator; backends must
/// not do work ahead of what has been pulled.
pub type KeyIter = Box<dyn Iterator<Item = Result<Cid, BlockstoreError>> + Send>;

/// Consumer invoked by [`View::view`] with a borrowed view of a block payload.
pub type ViewFn<'a> = dyn FnMut(&[u8]) -> Result<(), BlockstoreError> + 'a;

/// Blockstore is the mandatory contract every block storage backend provides.
///
/// Optional, usually more efficient, behaviours are separate traits. A backend
/// advertises them by overriding the matching `as_*` accessor; the defaults
/// report the capability as absent.
pub trait Blockstore: Send + Sync + Debug + 'static {
    /// Stores a single block.
    fn put(&self, block: &Block) -> Result<(), BlockstoreError>;

    /// Stores a batch of blocks.
    fn put_many(&self, blocks: &[Block]) -> Result<(), BlockstoreError>;

    /// Retrieves a block.
    ///
    /// Fails with [`BlockstoreError::NotFound`] when the block is absent.
    fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError>;

    /// Checks whether a block is stored.
    fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError>;

    /// Returns the payload length of a stored block.
    ///
    /// Fails with [`BlockstoreError::NotFound`] when the block is absent.
    fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError>;

    /// Removes a block.
    fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError>;

    /// Enumerates the identifiers of all stored blocks.
    fn all_keys(&self) -> Result<KeyIter, BlockstoreError>;

    /// Turns payload verification on reads on or off.
    fn hash_on_read(&self, enabled: bool);

    /// Returns the batched delete capability if the backend has one.
    fn as_batch_deleter(&self) -> Option<&dyn BatchDelete> {
        None
    }

    /// Returns the streaming view capability if the backend has one.
    fn as_viewer(&self) -> Option<&dyn View> {
        None
    }

    /// Returns the explicit close capability if the backend has one.
    fn as_closer(&self) -> Option<&dyn Close> {
        None
    }
}

/// Removes many blocks in one backend operation.
pub trait BatchDelete: Send + Sync {
    fn delete_many(&self, cids: &[Cid]) -> Result<(), BlockstoreError>;
}

/// Hands a block payload to a consumer without copying it into a [`Block`].
pub trait View: Send + Sync {
    /// Calls `f` with the payload of `cid`. The consumer's error is returned
    /// as is.
    fn view(&self, cid: &Cid, f: &mut ViewFn<'_>) -> Result<(), BlockstoreError>;
}

/// Releases the resources held by a backend.
pub trait Close: Send + Sync {
    fn close(&self) -> Result<(), BlockstoreError>;
}
