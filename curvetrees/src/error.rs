use thiserror::Error;

/// Alias for `core::result::Result<T, TreeError>`.
pub type Result<T> = core::result::Result<T, TreeError>;

/// Errors from curve-tree operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Invalid input parameters (caller bug).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A curve backend failed an incremental hash. The whole batch is
    /// aborted; the operation is pure and may be retried in full.
    #[error("incremental hash failed on curve {curve}")]
    HashFailed {
        /// Name of the curve whose backend failed.
        curve: &'static str,
    },
    /// Internal bookkeeping produced a state the tree invariants forbid.
    #[error("inconsistent tree: {0}")]
    InconsistentTree(String),
    /// Invalid data (deserialization, failed batch inversion).
    #[error("invalid data: {0}")]
    InvalidData(String),
}
