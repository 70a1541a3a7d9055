//! Error types for amplitude storage

use thiserror::Error;

/// Errors that can occur while managing amplitude buffers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// Memory allocation failure
    #[error("failed to allocate {size} bytes for state vector")]
    Allocation { size: usize },

    /// Buffer length does not match the expected dimension
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u64, actual: u64 },

    /// Requested dimension is not a power of two
    #[error("invalid state dimension {dimension}, expected a power of 2")]
    InvalidDimension { dimension: u64 },
}

/// Result type for amplitude storage operations
pub type Result<T> = std::result::Result<T, StateError>;
