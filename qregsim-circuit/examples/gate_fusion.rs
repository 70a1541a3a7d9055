//! Watch the circuit rewriter fuse a redundant gate stream

use num_complex::Complex64;
use qregsim_circuit::{Circuit, CircuitGate};
use qregsim_core::matrix::Matrix2;
use qregsim_core::QubitId;
use qregsim_engine::{EngineConfig, QubitRegister};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let h = std::f64::consts::FRAC_1_SQRT_2;
    let hadamard: Matrix2 = [
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(-h, 0.0),
    ];
    let t: Matrix2 = [
        Complex64::new(1.0, 0.0),
        Complex64::new(0.0, 0.0),
        Complex64::new(0.0, 0.0),
        Complex64::from_polar(1.0, std::f64::consts::FRAC_PI_4),
    ];

    let mut circuit = Circuit::new();
    let mut appended = 0;

    // Eight T gates on one wire collapse to a single identity; the
    // rewriter drops the whole run.
    for _ in 0..8 {
        circuit.append_gate(CircuitGate::single(QubitId::new(0), t));
        appended += 1;
    }
    println!("appended {appended} T gates, kept {}", circuit.len());

    circuit.append_gate(CircuitGate::single(QubitId::new(0), hadamard));
    circuit.append_gate(CircuitGate::single(QubitId::new(1), t));
    circuit.append_gate(CircuitGate::single(QubitId::new(0), hadamard));
    println!("after H .. H sandwich: {} gates", circuit.len());

    let mut reg = QubitRegister::new(circuit.qubit_count(), 0, EngineConfig::default())?;
    circuit.run(&mut reg)?;
    println!("P(q0 = 1) = {:.3}", reg.prob(QubitId::new(0))?);

    Ok(())
}
