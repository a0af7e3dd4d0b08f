//! Error types for bucket construction, local consumption and remote execution.

use thiserror::Error;

/// Errors raised while building a bucket or validating a request against it.
#[derive(Error, Debug)]
pub enum BucketError {
    /// A bucket needs at least one bandwidth
    #[error("At least one bandwidth must be configured")]
    NoBandwidths,

    /// One of the configured bandwidths has an invalid parameter
    #[error("Invalid bandwidth at index {index}: {reason}")]
    InvalidBandwidth { index: usize, reason: String },

    /// Interval-aligned refill only makes sense against a wall clock
    #[error("Bandwidth at index {index} uses interval-aligned refill, which requires a wall-clock based time meter")]
    AlignedRefillRequiresWallClock { index: usize },

    /// Amount of tokens to consume or add must be positive
    #[error("Amount of tokens must be positive")]
    NonPositiveAmount,

    /// Requested amount can never be satisfied by the smallest bandwidth
    #[error("Requested {requested} tokens, which exceeds the smallest bandwidth capacity {capacity}")]
    ExceedsCapacity { requested: u64, capacity: u64 },

    /// Settings could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by a [`CommandExecutor`](crate::distributed::CommandExecutor).
///
/// Cloneable so that one failed physical request can be reported to every
/// caller whose command was folded into it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The backing store failed to execute the request
    #[error("Remote execution failed: {0}")]
    Remote(String),

    /// The store answered with a result that does not match the command
    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),

    /// The request was rejected before it reached the store
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The request driver went away without producing a result
    #[error("Executor closed before producing a result")]
    Closed,
}

impl From<BucketError> for ExecutionError {
    fn from(err: BucketError) -> Self {
        ExecutionError::Rejected(err.to_string())
    }
}

/// Result type alias for bucket operations.
pub type Result<T> = std::result::Result<T, BucketError>;
