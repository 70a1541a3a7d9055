//! Ordered gate sequences with fusion on append

use crate::gate::CircuitGate;
use num_complex::Complex64;
use qregsim_core::matrix::{invert_rows, Matrix2, IDENTITY};
use qregsim_core::{QubitId, Result, SimError};
use qregsim_engine::QubitRegister;
use std::collections::BTreeSet;

const X_MATRIX: Matrix2 = [
    Complex64::new(0.0, 0.0),
    Complex64::new(1.0, 0.0),
    Complex64::new(1.0, 0.0),
    Complex64::new(0.0, 0.0),
];

/// An ordered gate sequence, equivalent to the product of its gates
///
/// The implied qubit count is the highest referenced qubit plus one.
/// Appending rewrites the tail: the new gate fuses into the nearest
/// compatible predecessor it can commute back to, and gates that become
/// the identity disappear, so the gate count never exceeds the number of
/// appends.
///
/// # Example
///
/// ```
/// use qregsim_circuit::{Circuit, CircuitGate};
/// use qregsim_core::matrix::Matrix2;
/// use qregsim_core::QubitId;
/// use num_complex::Complex64;
///
/// let x: Matrix2 = [
///     Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0),
///     Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0),
/// ];
/// let mut circuit = Circuit::new();
/// circuit.append_gate(CircuitGate::single(QubitId::new(0), x));
/// circuit.append_gate(CircuitGate::single(QubitId::new(0), x));
/// // X·X fused away entirely.
/// assert!(circuit.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Circuit {
    qubit_count: usize,
    gates: Vec<CircuitGate>,
}

impl Circuit {
    /// An empty circuit over zero qubits
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest referenced qubit plus one
    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.qubit_count
    }

    /// Number of gates after rewriting
    #[inline]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// True when every appended gate has fused away
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// The rewritten gate sequence
    #[inline]
    pub fn gates(&self) -> &[CircuitGate] {
        &self.gates
    }

    /// Append a swap of `q1` and `q2`
    ///
    /// Decomposed into three CNOT-like gates with the pair in fixed
    /// (low, high) order, so adjacent swaps meet fusible partners.
    pub fn swap(&mut self, q1: QubitId, q2: QubitId) {
        if q1 == q2 {
            return;
        }
        let (lo, hi) = if q1 < q2 { (q1, q2) } else { (q2, q1) };

        self.append_gate(CircuitGate::controlled(
            lo,
            X_MATRIX,
            BTreeSet::from([hi]),
            1,
        ));
        self.append_gate(CircuitGate::controlled(
            hi,
            X_MATRIX,
            BTreeSet::from([lo]),
            1,
        ));
        self.append_gate(CircuitGate::controlled(
            lo,
            X_MATRIX,
            BTreeSet::from([hi]),
            1,
        ));
    }

    /// Append a gate, fusing it into the tail where the algebra allows
    ///
    /// Walks the sequence backwards from the end: a predecessor that can
    /// combine absorbs the gate in place (and is dropped if the product is
    /// the identity); a predecessor it cannot commute past pins the
    /// insertion point. Identity gates are dropped outright.
    pub fn append_gate(&mut self, gate: CircuitGate) {
        if gate.is_identity() {
            return;
        }

        let highest = gate.max_qubit().index() + 1;
        if highest > self.qubit_count {
            self.qubit_count = highest;
        }

        for i in (0..self.gates.len()).rev() {
            if self.gates[i].try_combine(&gate) {
                if self.gates[i].is_identity() {
                    self.gates.remove(i);
                }
                return;
            }
            if !self.gates[i].can_pass(&gate) {
                self.gates.insert(i + 1, gate);
                return;
            }
        }

        self.gates.insert(0, gate);
    }

    /// Execute the circuit against a register
    ///
    /// Gates dispatch as plain, all-ones-controlled, all-zeros-controlled,
    /// or uniformly controlled applications. Pauli-X conjugations needed to
    /// reshape control patterns are tracked per wire and undone lazily, so
    /// consecutive payloads reuse them.
    ///
    /// # Errors
    /// Fails when the register is narrower than the circuit.
    pub fn run(&self, reg: &mut QubitRegister) -> Result<()> {
        if reg.qubit_count() < self.qubit_count {
            return Err(SimError::QubitCountMismatch {
                expected: self.qubit_count,
                actual: reg.qubit_count(),
            });
        }

        let mut flipped = vec![false; self.qubit_count];

        for gate in &self.gates {
            let t = gate.target;

            if gate.is_swap() {
                let partner = *gate
                    .controls
                    .iter()
                    .next()
                    .expect("swap gates carry their partner as the sole control");
                for q in [t, partner] {
                    if flipped[q.index()] {
                        reg.x(q)?;
                        flipped[q.index()] = false;
                    }
                }
                reg.mcmtrx(&[partner], &X_MATRIX, t)?;
                reg.mcmtrx(&[t], &X_MATRIX, partner)?;
                reg.mcmtrx(&[partner], &X_MATRIX, t)?;
                continue;
            }

            if gate.controls.is_empty() {
                let m = gate.payloads.get(&0).copied().unwrap_or(IDENTITY);
                if flipped[t.index()] {
                    reg.mtrx(&invert_rows(&m), t)?;
                    flipped[t.index()] = false;
                } else {
                    reg.mtrx(&m, t)?;
                }
                continue;
            }

            let controls = gate.controls_vec();

            if gate.payloads.len() == 1usize << controls.len() || gate.payloads.len() >= 8 {
                for &c in &controls {
                    if flipped[c.index()] {
                        reg.x(c)?;
                        flipped[c.index()] = false;
                    }
                }
                if flipped[t.index()] {
                    reg.x(t)?;
                    flipped[t.index()] = false;
                }
                let table = gate.make_uniformly_controlled_payload();
                reg.uniformly_controlled_single_bit(&controls, t, &table, &[], 0)?;
                continue;
            }

            for (&pattern, m) in &gate.payloads {
                // A wire must read 1 exactly when its pattern bit differs
                // from its pending-X flag.
                let mut wire_high = vec![false; controls.len()];
                let mut high_count = 0usize;
                for (j, c) in controls.iter().enumerate() {
                    let want = (pattern >> j) & 1 == 1;
                    wire_high[j] = want != flipped[c.index()];
                    if wire_high[j] {
                        high_count += 1;
                    }
                }

                if flipped[t.index()] {
                    reg.x(t)?;
                    flipped[t.index()] = false;
                }

                if high_count * 2 > controls.len() {
                    // Mostly-high pattern: flip the low wires, condition
                    // on all-ones.
                    for (j, &c) in controls.iter().enumerate() {
                        if !wire_high[j] {
                            reg.x(c)?;
                            flipped[c.index()] = !flipped[c.index()];
                        }
                    }
                    reg.mcmtrx(&controls, m, t)?;
                } else {
                    for (j, &c) in controls.iter().enumerate() {
                        if wire_high[j] {
                            reg.x(c)?;
                            flipped[c.index()] = !flipped[c.index()];
                        }
                    }
                    reg.macmtrx(&controls, m, t)?;
                }
            }
        }

        for (i, pending) in flipped.iter().enumerate() {
            if *pending {
                reg.x(QubitId::new(i))?;
            }
        }

        Ok(())
    }
}
