//! Error types for the segment engine.

use std::io;
use thiserror::Error;

/// Result type for segment operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in segment operations.
///
/// Busy and closed conditions are ordinary `Err` values, never panics.
/// Policy decisions (should-compact, split feasibility estimates) are pure
/// and do not produce errors; execution steps do.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] silt_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The segment cannot admit the operation in its current state.
    ///
    /// Recoverable: retry with backoff once the conflicting maintenance
    /// window has ended.
    #[error("segment busy: cannot {operation} while maintenance is in progress")]
    Busy {
        /// The operation that was refused.
        operation: &'static str,
    },

    /// Operation attempted after the segment was closed.
    #[error("segment is closed")]
    Closed,

    /// The segment entered the terminal error state after a failed
    /// maintenance operation. Not recoverable.
    #[error("segment failed: a previous maintenance operation left it in the error state")]
    Failed,

    /// Keys observed out of order during a consistency check.
    #[error("consistency violation: key {next:?} is not greater than its predecessor {prev:?}")]
    ConsistencyViolation {
        /// The predecessor key.
        prev: Vec<u8>,
        /// The offending key.
        next: Vec<u8>,
    },

    /// The segment holds too few live keys to divide meaningfully.
    #[error("split infeasible: estimated {estimated_keys} live keys")]
    SplitInfeasible {
        /// The live key estimate from the split plan.
        estimated_keys: u64,
    },

    /// The lower half of a split received no entries.
    #[error("split produced an empty lower segment")]
    EmptySplit,

    /// An on-disk record failed validation.
    #[error("segment corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected while decoding a record.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// The segment configuration is inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration issue.
        message: String,
    },

    /// The metadata document could not be encoded or decoded.
    #[error("metadata error: {message}")]
    Metadata {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a busy error for the named operation.
    pub fn busy(operation: &'static str) -> Self {
        Self::Busy { operation }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }
}
