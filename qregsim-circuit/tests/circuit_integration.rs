//! Circuit rewriting against engine execution

use approx::assert_relative_eq;
use num_complex::Complex64;
use qregsim_circuit::{Circuit, CircuitGate};
use qregsim_core::matrix::Matrix2;
use qregsim_core::QubitId;
use qregsim_engine::{EngineConfig, QubitRegister};
use std::collections::BTreeSet;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn q(i: usize) -> QubitId {
    QubitId::new(i)
}

fn hadamard() -> Matrix2 {
    let h = std::f64::consts::FRAC_1_SQRT_2;
    [c(h, 0.0), c(h, 0.0), c(h, 0.0), c(-h, 0.0)]
}

fn x_matrix() -> Matrix2 {
    [c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)]
}

fn t_matrix() -> Matrix2 {
    [
        c(1.0, 0.0),
        c(0.0, 0.0),
        c(0.0, 0.0),
        Complex64::from_polar(1.0, std::f64::consts::FRAC_PI_4),
    ]
}

fn config() -> EngineConfig {
    EngineConfig::default().with_rng_seed(31)
}

/// Run the same gates once through the circuit rewriter and once directly
/// against a register; the two must agree.
fn assert_rewrite_preserves_action(gates: &[CircuitGate], num_qubits: usize) {
    let mut circuit = Circuit::new();
    for gate in gates {
        circuit.append_gate(gate.clone());
    }

    let mut rewritten = QubitRegister::new(num_qubits, 0, config()).unwrap();
    circuit.run(&mut rewritten).unwrap();

    let mut direct = QubitRegister::new(num_qubits, 0, config()).unwrap();
    for gate in gates {
        // A fresh single-gate circuit cannot fuse anything.
        let mut single = Circuit::new();
        single.append_gate(gate.clone());
        single.run(&mut direct).unwrap();
    }

    let diff = rewritten.sum_sqr_diff(&direct);
    assert!(diff <= 1e-9, "rewritten circuit diverged: {diff}");
}

#[test]
fn fusion_preserves_ghz_preparation() {
    let gates = vec![
        CircuitGate::single(q(0), hadamard()),
        CircuitGate::controlled(q(1), x_matrix(), BTreeSet::from([q(0)]), 1),
        CircuitGate::controlled(q(2), x_matrix(), BTreeSet::from([q(0)]), 1),
    ];
    assert_rewrite_preserves_action(&gates, 3);
}

#[test]
fn fusion_preserves_phase_heavy_sequence() {
    let gates = vec![
        CircuitGate::single(q(0), hadamard()),
        CircuitGate::single(q(1), t_matrix()),
        CircuitGate::single(q(0), t_matrix()),
        CircuitGate::controlled(q(1), x_matrix(), BTreeSet::from([q(0)]), 1),
        CircuitGate::single(q(1), t_matrix()),
        CircuitGate::single(q(0), hadamard()),
        CircuitGate::single(q(0), hadamard()),
    ];
    assert_rewrite_preserves_action(&gates, 2);
}

#[test]
fn fusion_preserves_mixed_control_patterns() {
    let gates = vec![
        CircuitGate::single(q(0), hadamard()),
        CircuitGate::single(q(1), hadamard()),
        CircuitGate::controlled(q(2), x_matrix(), BTreeSet::from([q(0), q(1)]), 0b11),
        CircuitGate::controlled(q(2), x_matrix(), BTreeSet::from([q(0), q(1)]), 0b00),
        CircuitGate::single(q(2), t_matrix()),
    ];
    assert_rewrite_preserves_action(&gates, 3);
}

#[test]
fn swap_decomposition_equals_direct_swap() {
    // Prepare distinguishable qubits, swap via the three-CNOT
    // decomposition, and compare against a directly constructed swap gate.
    let mut decomposed = Circuit::new();
    decomposed.append_gate(CircuitGate::single(q(0), hadamard()));
    decomposed.swap(q(0), q(1));

    let mut direct = Circuit::new();
    direct.append_gate(CircuitGate::single(q(0), hadamard()));
    direct.append_gate(CircuitGate::swap(q(0), q(1)));

    let mut reg_a = QubitRegister::new(2, 0, config()).unwrap();
    decomposed.run(&mut reg_a).unwrap();

    let mut reg_b = QubitRegister::new(2, 0, config()).unwrap();
    direct.run(&mut reg_b).unwrap();

    assert!(reg_a.sum_sqr_diff(&reg_b) <= 1e-10);
    // And the superposition really moved to qubit 1.
    assert_relative_eq!(reg_a.prob(q(1)).unwrap(), 0.5, epsilon = 1e-10);
    assert_relative_eq!(reg_a.prob(q(0)).unwrap(), 0.0, epsilon = 1e-10);
}

#[test]
fn appended_inverse_circuit_cancels() {
    // A circuit followed by its inverse fuses to nothing at all.
    let mut circuit = Circuit::new();
    circuit.append_gate(CircuitGate::single(q(0), hadamard()));
    circuit.append_gate(CircuitGate::single(q(0), t_matrix()));

    let t_dag: Matrix2 = [
        c(1.0, 0.0),
        c(0.0, 0.0),
        c(0.0, 0.0),
        Complex64::from_polar(1.0, -std::f64::consts::FRAC_PI_4),
    ];
    circuit.append_gate(CircuitGate::single(q(0), t_dag));
    circuit.append_gate(CircuitGate::single(q(0), hadamard()));

    assert!(circuit.is_empty());
}

#[test]
fn measurement_after_circuit() {
    let mut circuit = Circuit::new();
    circuit.append_gate(CircuitGate::single(q(0), hadamard()));
    circuit.append_gate(CircuitGate::controlled(
        q(1),
        x_matrix(),
        BTreeSet::from([q(0)]),
        1,
    ));

    // Bell-pair measurements are perfectly correlated.
    let mut reg = QubitRegister::new(2, 0, config()).unwrap();
    for _ in 0..64 {
        reg.set_permutation(0, None).unwrap();
        circuit.run(&mut reg).unwrap();
        let outcome = reg.m_all().unwrap();
        assert!(outcome == 0b00 || outcome == 0b11);
    }
}
