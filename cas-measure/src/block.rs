use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use md5::{Digest, Md5};

use crate::error::BlockstoreError;

/// Length in bytes of a block identifier (an MD5 digest).
pub const CID_LEN: usize = 16;

/// Content identifier of a block: the MD5 digest of its payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid([u8; CID_LEN]);

impl Cid {
    /// Computes the identifier of the given payload.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; CID_LEN] {
        &self.0
    }
}

impl From<[u8; CID_LEN]> for Cid {
    fn from(value: [u8; CID_LEN]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Cid {
    type Error = BlockstoreError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; CID_LEN] = value
            .try_into()
            .map_err(|_| BlockstoreError::InvalidCid(faster_hex::hex_string(value)))?;
        Ok(Self(raw))
    }
}

impl FromStr for Cid {
    type Err = BlockstoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != CID_LEN * 2 {
            return Err(BlockstoreError::InvalidCid(s.to_string()));
        }
        let mut raw = [0u8; CID_LEN];
        faster_hex::hex_decode(s.as_bytes(), &mut raw)
            .map_err(|_| BlockstoreError::InvalidCid(s.to_string()))?;
        Ok(Self(raw))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&faster_hex::hex_string(&self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

/// An immutable payload together with the identifier it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Creates a block, deriving its identifier from the payload.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            cid: Cid::digest(&data),
            data,
        }
    }

    /// Creates a block under a caller supplied identifier. The payload is not
    /// checked against it; use [`Block::verify`] for that.
    pub fn with_cid(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Recomputes the digest of the payload and compares it to the identifier.
    pub fn verify(&self) -> Result<(), BlockstoreError> {
        if Cid::digest(&self.data) == self.cid {
            Ok(())
        } else {
            Err(BlockstoreError::HashMismatch(self.cid))
        }
    }
}
