//! Amplitude storage and parallel index iteration
//!
//! This crate owns the two lowest layers of the simulator:
//!
//! - [`StateVector`]: a dense, 64-byte-aligned buffer of `2^N` complex
//!   amplitudes with indexed and paired read/write access, page copies,
//!   buffer shuffling, and probability extraction. No operation here
//!   normalizes; norm bookkeeping belongs to the engine above.
//! - [`parallel`]: the `par_for` family that drives kernels across linear,
//!   strided, and masked permutation index spaces, partitioning work across
//!   a fixed set of workers and handing each a `cpu` index for contention-free
//!   accumulation into [`WorkerSlots`].

pub mod error;
pub mod parallel;
pub mod state_vector;

pub use error::{Result, StateError};
pub use parallel::{
    concurrency_level, par_for, par_for_mask, par_for_skip, SharedSlice, WorkerSlots,
};
pub use state_vector::StateVector;
