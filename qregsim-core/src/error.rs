//! Error types shared across the qregsim workspace

use crate::QubitId;
use thiserror::Error;

/// Errors raised by validating entry points of the simulator
///
/// All variants are reported synchronously, before any state mutation;
/// kernels assume validated inputs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Qubit index outside the allocated register
    #[error("qubit {qubit} is out of bounds for a {num_qubits}-qubit register")]
    InvalidQubit { qubit: QubitId, num_qubits: usize },

    /// Permutation index at or beyond 2^N
    #[error("permutation {permutation} is out of bounds for a {num_qubits}-qubit register")]
    InvalidPermutation { permutation: u64, num_qubits: usize },

    /// Bit mask referencing qubits outside the register
    #[error("mask {mask:#x} is out of bounds for a {num_qubits}-qubit register")]
    InvalidMask { mask: u64, num_qubits: usize },

    /// Contiguous bit range [start, start+length) outside the register
    #[error("bit range start={start} length={length} is out of bounds for {num_qubits} qubits")]
    InvalidBitRange {
        start: usize,
        length: usize,
        num_qubits: usize,
    },

    /// Amplitude page [offset, offset+length) outside the buffer
    #[error("amplitude page offset={offset} length={length} exceeds dimension {dimension}")]
    InvalidPageRange {
        offset: u64,
        length: u64,
        dimension: u64,
    },

    /// The same bit power appears twice among controls and target
    #[error("duplicate bit power {power:#x} among control and target qubits")]
    DuplicatePower { power: u64 },

    /// Two registers that must agree in width do not
    #[error("qubit count mismatch: expected {expected}, got {actual}")]
    QubitCountMismatch { expected: usize, actual: usize },

    /// Requested register exceeds the configured capacity cap
    #[error("cannot allocate {requested} qubits: configured maximum is {max_qubits}")]
    CapacityExceeded { requested: usize, max_qubits: usize },

    /// Failed to allocate the amplitude buffer
    #[error("failed to allocate {bytes} bytes for the amplitude buffer")]
    Allocation { bytes: usize },

    /// Amplitude storage reported an inconsistency
    #[error("amplitude storage: {message}")]
    Storage { message: String },

    /// Capability not supported by this engine variant
    #[error("operation not implemented by this engine: {0}")]
    NotImplemented(&'static str),
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;
