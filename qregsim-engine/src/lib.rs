//! Dense state-vector quantum register engine
//!
//! [`QubitRegister`] owns the wave function of an N-qubit system as a
//! dense buffer of `2^N` complex amplitudes and evolves it under 2×2
//! unitaries (optionally controlled), bit-masked phase/parity gates,
//! measurement, and tensor composition/decomposition.
//!
//! Gates that need no synchronous return value are submitted through a
//! single-worker [`dispatch::Dispatcher`] and executed in order; reads and
//! measurements fence on [`QubitRegister::finish`]. Inside each gate, the
//! kernel sweeps the amplitude index space with the data-parallel iterators
//! from `qregsim-state`.
//!
//! # Example
//!
//! ```
//! use qregsim_engine::{EngineConfig, QubitRegister};
//! use num_complex::Complex64;
//! use qregsim_core::QubitId;
//!
//! let mut reg = QubitRegister::new(2, 0, EngineConfig::default()).unwrap();
//! let h = std::f64::consts::FRAC_1_SQRT_2;
//! let hadamard = [
//!     Complex64::new(h, 0.0), Complex64::new(h, 0.0),
//!     Complex64::new(h, 0.0), Complex64::new(-h, 0.0),
//! ];
//! reg.mtrx(&hadamard, QubitId::new(0)).unwrap();
//! let p = reg.prob(QubitId::new(0)).unwrap();
//! assert!((p - 0.5).abs() < 1e-10);
//! ```

mod apply2x2;
mod compose;
mod config;
mod dispatch;
mod engine;
mod norm;
mod ops;
mod prob;

pub use config::EngineConfig;
pub use dispatch::Dispatcher;
pub use engine::QubitRegister;
pub use norm::RunningNorm;
