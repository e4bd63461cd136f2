use curvetrees::TreeError;
use thiserror::Error;

/// Alias for `core::result::Result<T, SyncError>`.
pub type Result<T> = core::result::Result<T, SyncError>;

/// Errors from the sync cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// An underlying tree computation failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// The submitted block does not extend the current tip.
    #[error("non-contiguous block: {0}")]
    NonContiguousBlock(String),
    /// The requested rewind reaches past the retained block window.
    #[error("reorg depth exceeded: {0}")]
    ReorgDepthExceeded(String),
    /// The output's unlock block was already synced, so its leaf index can
    /// no longer be recovered.
    #[error("output unlocking at block {unlock_block_idx} registered after tip {tip_blk_idx}")]
    RegisterAfterUnlock {
        /// Block at which the output unlocks.
        unlock_block_idx: u64,
        /// Current chain tip.
        tip_blk_idx: u64,
    },
    /// The output was never registered.
    #[error("output is not registered")]
    NotRegistered,
    /// A cache entry the reference counts guarantee is missing or malformed.
    #[error("corrupted cache: {0}")]
    CorruptedCache(String),
    /// A snapshot failed validation against the supplied tree config.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}
