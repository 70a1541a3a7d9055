//! Symbolic gates with payloads keyed by control pattern

use num_complex::Complex64;
use qregsim_core::matrix::{
    is_anti_diagonal, is_diagonal, is_identity, mul2x2, Matrix2, IDENTITY,
};
use qregsim_core::QubitId;
use std::collections::{BTreeMap, BTreeSet};

/// One gate in a [`crate::Circuit`]
///
/// A gate targets one qubit and carries a 2×2 matrix per control bit
/// pattern; patterns with no payload act as the identity. Payload keys are
/// packed by control ordinal: bit `j` of a key is the required value of the
/// `j`-th smallest control qubit.
///
/// A gate with no payloads at all is a swap, and its single "control" names
/// the partner qubit.
#[derive(Clone, Debug)]
pub struct CircuitGate {
    /// The acted-on qubit
    pub target: QubitId,
    /// Control pattern → 2×2 matrix
    pub payloads: BTreeMap<u64, Matrix2>,
    /// Control qubits, kept sorted
    pub controls: BTreeSet<QubitId>,
}

impl CircuitGate {
    /// A swap of `q1` and `q2`
    pub fn swap(q1: QubitId, q2: QubitId) -> Self {
        Self {
            target: q1,
            payloads: BTreeMap::new(),
            controls: BTreeSet::from([q2]),
        }
    }

    /// An uncontrolled single-qubit gate
    pub fn single(target: QubitId, matrix: Matrix2) -> Self {
        Self {
            target,
            payloads: BTreeMap::from([(0, matrix)]),
            controls: BTreeSet::new(),
        }
    }

    /// A controlled gate firing on one control pattern
    pub fn controlled(
        target: QubitId,
        matrix: Matrix2,
        controls: BTreeSet<QubitId>,
        perm: u64,
    ) -> Self {
        Self {
            target,
            payloads: BTreeMap::from([(perm, matrix)]),
            controls,
        }
    }

    /// A uniformly controlled gate with explicit payloads
    pub fn uniform(
        target: QubitId,
        payloads: BTreeMap<u64, Matrix2>,
        controls: BTreeSet<QubitId>,
    ) -> Self {
        Self {
            target,
            payloads,
            controls,
        }
    }

    /// No payloads: this is a swap
    pub fn is_swap(&self) -> bool {
        self.payloads.is_empty()
    }

    /// An uncontrolled single payload equal to the identity
    pub fn is_identity(&self) -> bool {
        if !self.controls.is_empty() || self.payloads.len() != 1 {
            return false;
        }
        self.payloads.values().all(is_identity)
    }

    /// Every payload is diagonal
    pub fn is_phase(&self) -> bool {
        if self.is_swap() {
            return false;
        }
        self.payloads.values().all(is_diagonal)
    }

    /// Every payload is anti-diagonal (Pauli X up to phases)
    pub fn is_invert(&self) -> bool {
        if self.is_swap() {
            return false;
        }
        self.payloads.values().all(is_anti_diagonal)
    }

    /// The two qubits a swap exchanges, low first
    fn swap_pair(&self) -> (QubitId, QubitId) {
        let partner = *self
            .controls
            .iter()
            .next()
            .expect("swap gates carry their partner as the sole control");
        if self.target < partner {
            (self.target, partner)
        } else {
            (partner, self.target)
        }
    }

    /// Whether `other`, applied after this gate, can merge into it
    ///
    /// Non-swap gates combine when target and control set agree; swaps
    /// combine only with the swap on the same pair.
    pub fn can_combine(&self, other: &CircuitGate) -> bool {
        if self.is_swap() || other.is_swap() {
            return self.is_swap() && other.is_swap() && self.swap_pair() == other.swap_pair();
        }

        self.target == other.target && self.controls == other.controls
    }

    /// Become the identity gate
    pub fn clear(&mut self) {
        self.controls.clear();
        self.payloads.clear();
        self.payloads.insert(0, IDENTITY);
    }

    /// Merge `other` (applied after this gate) into this gate
    ///
    /// Payloads multiply right-to-left per control pattern; products that
    /// land on the identity are dropped, and a gate whose payloads all
    /// drop becomes the explicit identity.
    pub fn combine(&mut self, other: &CircuitGate) {
        if self.is_swap() {
            // Two swaps on one pair cancel.
            self.clear();
            return;
        }

        for (&perm, other_m) in &other.payloads {
            match self.payloads.get(&perm) {
                None => {
                    self.payloads.insert(perm, *other_m);
                }
                Some(m) => {
                    let out = mul2x2(other_m, m);
                    if is_identity(&out) {
                        self.payloads.remove(&perm);
                    } else {
                        self.payloads.insert(perm, out);
                    }
                }
            }
        }

        if self.payloads.is_empty() {
            self.clear();
        }
    }

    /// Combine if possible; reports whether it happened
    pub fn try_combine(&mut self, other: &CircuitGate) -> bool {
        if !self.can_combine(other) {
            return false;
        }
        self.combine(other);
        true
    }

    /// Whether this gate commutes with `other`
    ///
    /// Shared roles must all be phase-like: a target sitting in the other
    /// gate's control set demands the phase structure, and equal targets
    /// commute only when both gates are phases.
    pub fn can_pass(&self, other: &CircuitGate) -> bool {
        if other.controls.contains(&self.target) {
            if !self.is_phase() {
                return false;
            }
            if self.controls.contains(&other.target) {
                return other.is_phase();
            }
            return true;
        }

        if self.controls.contains(&other.target) {
            return other.is_phase();
        }

        self.target != other.target || (self.is_phase() && other.is_phase())
    }

    /// The dense `4·2^|controls|` payload table, absent patterns filled
    /// with the identity
    pub fn make_uniformly_controlled_payload(&self) -> Vec<Complex64> {
        let patterns = 1u64 << self.controls.len();
        let mut table = Vec::with_capacity((patterns as usize) * 4);
        for pattern in 0..patterns {
            let m = self.payloads.get(&pattern).unwrap_or(&IDENTITY);
            table.extend_from_slice(m);
        }
        table
    }

    /// The control set as a sorted vector
    pub fn controls_vec(&self) -> Vec<QubitId> {
        self.controls.iter().copied().collect()
    }

    /// Highest qubit index this gate touches
    pub fn max_qubit(&self) -> QubitId {
        self.controls
            .iter()
            .next_back()
            .copied()
            .map_or(self.target, |c| c.max(self.target))
    }
}
