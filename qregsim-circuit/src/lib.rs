//! Symbolic circuit layer
//!
//! A [`Circuit`] is an ordered sequence of [`CircuitGate`]s that is
//! rewritten as gates are appended: adjacent compatible gates fuse by
//! matrix product, identities vanish, and phase-structured gates commute
//! past each other to reach fusion partners. [`Circuit::run`] lowers the
//! rewritten sequence onto a `qregsim_engine::QubitRegister`.

pub mod circuit;
pub mod gate;

pub use circuit::Circuit;
pub use gate::CircuitGate;
