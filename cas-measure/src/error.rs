use crate::block::Cid;

/// Errors reported by block stores.
#[derive(Debug, thiserror::Error)]
pub enum BlockstoreError {
    /// The requested block is not stored.
    #[error("block {0} not found")]
    NotFound(Cid),

    /// The stored payload does not hash to its identifier.
    #[error("block {0} failed hash verification")]
    HashMismatch(Cid),

    #[error("invalid block identifier: {0}")]
    InvalidCid(String),

    #[error("block store lock poisoned")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// Failure raised by a consumer passed to a view call.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BlockstoreError {
    /// Whether this error only reports an absent block.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockstoreError::NotFound(_))
    }
}

/// Errors raised while registering metric instruments.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metric {0} is already registered")]
    AlreadyRegistered(String),

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}
