//! Tensor-product composition and subsystem separation

use crate::engine::{state_err, QubitRegister};
use crate::norm::RunningNorm;
use num_complex::Complex64;
use qregsim_core::bits::{bit_reg_mask, pow2, pow2_mask};
use qregsim_core::{Result, SimError};
use qregsim_state::{par_for, SharedSlice, StateVector};

impl QubitRegister {
    /// Append `other`'s qubits after this register's last qubit
    ///
    /// The combined amplitude at index `lcv` is the product of this
    /// register's amplitude over the low bits and `other`'s over the high
    /// bits. Both operands are normalized first when configured; if either
    /// side is in the zero state the result is the (wider) zero state.
    ///
    /// Returns the index at which `other`'s qubits begin.
    pub fn compose(&mut self, other: &QubitRegister) -> Result<usize> {
        let start = self.qubit_count();
        if other.qubit_count() == 0 {
            return Ok(start);
        }

        let n_total = start + other.qubit_count();
        if n_total > self.config().max_qubits {
            return Err(SimError::CapacityExceeded {
                requested: n_total,
                max_qubits: self.config().max_qubits,
            });
        }

        if start == 0 {
            self.finish();
            other.finish();
            {
                let other_core = other.core_guard();
                let mut core = self.core_guard();
                match &other_core.state {
                    Some(other_sv) => {
                        let mut sv =
                            StateVector::new(other_sv.dimension()).map_err(state_err)?;
                        sv.copy_from(other_sv).map_err(state_err)?;
                        core.state = Some(sv);
                        core.running_norm = other_core.running_norm;
                    }
                    None => core.zero(),
                }
            }
            self.set_counts(other.qubit_count());
            return Ok(0);
        }

        self.ensure_normalized();
        other.ensure_normalized();
        self.finish();
        other.finish();

        let start_mask = self.max_q_power() - 1;
        let n_max_q_power = pow2(n_total);
        {
            let other_core = other.core_guard();
            let mut core = self.core_guard();

            if core.state.is_none() || other_core.state.is_none() {
                core.zero();
            } else {
                let n_sv = StateVector::new(n_max_q_power).map_err(state_err)?;
                {
                    let sv = core.state.as_ref().expect("checked above");
                    let other_sv = other_core.state.as_ref().expect("checked above");
                    par_for(0, n_max_q_power, |lcv, _cpu| {
                        n_sv.write(
                            lcv,
                            sv.read(lcv & start_mask) * other_sv.read(lcv >> start),
                        );
                    });
                }
                core.state = Some(n_sv);
                core.running_norm =
                    match (core.running_norm.known(), other_core.running_norm.known()) {
                        (Some(a), Some(b)) => RunningNorm::Known(a * b),
                        _ => RunningNorm::Unknown,
                    };
            }
        }
        self.set_counts(n_total);
        Ok(start)
    }

    /// Insert `other`'s qubits at position `mid_start`
    ///
    /// Existing qubits at or above `mid_start` shift up by `other`'s
    /// width; the combined index interleaves the three bit fields.
    pub fn compose_at(&mut self, other: &QubitRegister, mid_start: usize) -> Result<usize> {
        if mid_start > self.qubit_count() {
            return Err(SimError::InvalidBitRange {
                start: mid_start,
                length: 0,
                num_qubits: self.qubit_count(),
            });
        }

        if self.qubit_count() == 0 {
            self.compose(other)?;
            return Ok(0);
        }
        if other.qubit_count() == 0 {
            return Ok(mid_start);
        }

        let o_qubits = other.qubit_count();
        let n_total = self.qubit_count() + o_qubits;
        if n_total > self.config().max_qubits {
            return Err(SimError::CapacityExceeded {
                requested: n_total,
                max_qubits: self.config().max_qubits,
            });
        }

        self.ensure_normalized();
        other.ensure_normalized();
        self.finish();
        other.finish();

        let start_mask = pow2_mask(mid_start);
        let mid_mask = bit_reg_mask(mid_start, o_qubits);
        let end_mask = pow2_mask(n_total) & !(start_mask | mid_mask);
        let n_max_q_power = pow2(n_total);
        {
            let other_core = other.core_guard();
            let mut core = self.core_guard();

            if core.state.is_none() || other_core.state.is_none() {
                core.zero();
            } else {
                let n_sv = StateVector::new(n_max_q_power).map_err(state_err)?;
                {
                    let sv = core.state.as_ref().expect("checked above");
                    let other_sv = other_core.state.as_ref().expect("checked above");
                    par_for(0, n_max_q_power, |lcv, _cpu| {
                        n_sv.write(
                            lcv,
                            sv.read((lcv & start_mask) | ((lcv & end_mask) >> o_qubits))
                                * other_sv.read((lcv & mid_mask) >> mid_start),
                        );
                    });
                }
                core.state = Some(n_sv);
                core.running_norm =
                    match (core.running_norm.known(), other_core.running_norm.known()) {
                        (Some(a), Some(b)) => RunningNorm::Known(a * b),
                        _ => RunningNorm::Unknown,
                    };
            }
        }
        self.set_counts(n_total);
        Ok(mid_start)
    }

    /// Separate `dest.qubit_count()` qubits starting at `start` into `dest`
    ///
    /// Both reduced states are rebuilt from probability-and-angle pairs,
    /// which is exact when the split subsystem is a product factor and
    /// lossy otherwise; compare a re-composition against the original with
    /// [`Self::sum_sqr_diff`] and the configured separability floor to
    /// detect the lossy case.
    pub fn decompose(&mut self, start: usize, dest: &mut QubitRegister) -> Result<()> {
        self.decompose_dispose(start, dest.qubit_count(), Some(dest))
    }

    /// Discard `length` qubits starting at `start`
    pub fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.decompose_dispose(start, length, None)
    }

    /// Discard `length` qubits known to hold the literal `disposed_perm`
    ///
    /// Skips the reconstruction entirely: the surviving amplitudes are
    /// copied out directly, indexed with the disposed bits at their known
    /// value.
    pub fn dispose_perm(
        &mut self,
        start: usize,
        length: usize,
        disposed_perm: u64,
    ) -> Result<()> {
        self.check_bit_range(start, length)?;
        if length == 0 {
            return Ok(());
        }
        if disposed_perm >= pow2(length) {
            return Err(SimError::InvalidPermutation {
                permutation: disposed_perm,
                num_qubits: length,
            });
        }

        let n_length = self.qubit_count() - length;

        self.finish();
        if self.core_guard().state.is_none() {
            self.set_counts(n_length);
            return Ok(());
        }

        self.ensure_normalized();
        self.finish();

        let remainder_power = pow2(n_length);
        let skip_mask = pow2(start) - 1;
        let disposed_res = disposed_perm << start;
        {
            let mut core = self.core_guard();
            if core.state.is_none() {
                core.zero();
            } else {
                let n_sv = StateVector::new(remainder_power).map_err(state_err)?;
                {
                    let sv = core.state.as_ref().expect("checked above");
                    par_for(0, remainder_power, |i_high, _cpu| {
                        let i_low = i_high & skip_mask;
                        n_sv.write(
                            i_high,
                            sv.read(i_low | ((i_high ^ i_low) << length) | disposed_res),
                        );
                    });
                }
                core.state = Some(n_sv);
                core.running_norm = RunningNorm::Unknown;
            }
        }
        self.set_counts(n_length);
        Ok(())
    }

    fn decompose_dispose(
        &mut self,
        start: usize,
        length: usize,
        mut dest: Option<&mut QubitRegister>,
    ) -> Result<()> {
        self.check_bit_range(start, length)?;
        if length == 0 {
            return Ok(());
        }
        if let Some(d) = dest.as_deref() {
            if d.qubit_count() != length {
                return Err(SimError::QubitCountMismatch {
                    expected: length,
                    actual: d.qubit_count(),
                });
            }
        }

        let n_length = self.qubit_count() - length;

        self.finish();
        if self.core_guard().state.is_none() {
            if let Some(d) = dest.as_deref_mut() {
                d.zero_amplitudes();
            }
            self.set_counts(n_length);
            return Ok(());
        }

        // Splitting off every qubit hands the whole buffer over.
        if n_length == 0 {
            if let Some(d) = dest.as_deref_mut() {
                d.dump();
                let mut core = self.core_guard();
                let mut dest_core = d.core_guard();
                dest_core.state = core.state.take();
                dest_core.running_norm = core.running_norm;
                core.running_norm = RunningNorm::Known(0.0);
            } else {
                self.core_guard().zero();
            }
            self.set_counts(0);
            return Ok(());
        }

        self.ensure_normalized();
        self.finish();

        let part_power = pow2(length);
        let remainder_power = pow2(n_length);
        let start_mask = pow2_mask(start);
        let amplitude_floor = self.config().amplitude_floor;

        let mut rem_prob = vec![0.0f64; remainder_power as usize];
        let mut rem_angle = vec![0.0f64; remainder_power as usize];
        let want_part = dest.is_some();
        let mut part_prob = vec![0.0f64; if want_part { part_power as usize } else { 0 }];
        let mut part_angle = vec![0.0f64; if want_part { part_power as usize } else { 0 }];

        {
            let core = self.core_guard();
            let Some(sv) = core.state.as_ref() else {
                // Collapsed while normalizing.
                drop(core);
                if let Some(d) = dest.as_deref_mut() {
                    d.zero_amplitudes();
                }
                self.set_counts(n_length);
                return Ok(());
            };

            // Each reduced state is rebuilt as probability and
            // norm-weighted mean phase. The passes are grouped so every
            // worker owns the slots it writes: remainder slots from the
            // remainder-indexed sweep, part slots from the part-indexed
            // one.
            let rem_prob_s = SharedSlice::new(&mut rem_prob);
            let rem_angle_s = SharedSlice::new(&mut rem_angle);
            par_for(0, remainder_power, |r, _cpu| {
                let low = r & start_mask;
                let j = low | ((r ^ low) << length);
                let mut prob = 0.0;
                let mut angle = 0.0;
                for k in 0..part_power {
                    let amp = sv.read(j | (k << start));
                    let nrm = amp.norm_sqr();
                    prob += nrm;
                    if nrm > amplitude_floor {
                        angle += amp.arg() * nrm;
                    }
                }
                if prob > amplitude_floor {
                    angle /= prob;
                } else {
                    angle = 0.0;
                }
                rem_prob_s.write(r, prob);
                rem_angle_s.write(r, angle);
            });

            if want_part {
                let part_prob_s = SharedSlice::new(&mut part_prob);
                let part_angle_s = SharedSlice::new(&mut part_angle);
                par_for(0, part_power, |k, _cpu| {
                    let j = k << start;
                    let mut prob = 0.0;
                    let mut angle = 0.0;
                    for r in 0..remainder_power {
                        let low = r & start_mask;
                        let amp = sv.read(low | j | ((r ^ low) << length));
                        let nrm = amp.norm_sqr();
                        prob += nrm;
                        if nrm > amplitude_floor {
                            angle += amp.arg() * nrm;
                        }
                    }
                    if prob > amplitude_floor {
                        angle /= prob;
                    } else {
                        angle = 0.0;
                    }
                    part_prob_s.write(k, prob);
                    part_angle_s.write(k, angle);
                });
            }
        }

        if let Some(d) = dest.as_deref_mut() {
            d.dump();
            let mut dest_core = d.core_guard();
            let dest_sv = dest_core.alloc_cleared(part_power)?;
            par_for(0, part_power, |k, _cpu| {
                dest_sv.write(
                    k,
                    Complex64::from_polar(part_prob[k as usize].sqrt(), part_angle[k as usize]),
                );
            });
            dest_core.running_norm = RunningNorm::Known(1.0);
        }

        {
            let mut core = self.core_guard();
            let n_sv = StateVector::new(remainder_power).map_err(state_err)?;
            par_for(0, remainder_power, |r, _cpu| {
                n_sv.write(
                    r,
                    Complex64::from_polar(rem_prob[r as usize].sqrt(), rem_angle[r as usize]),
                );
            });
            core.state = Some(n_sv);
            core.running_norm = RunningNorm::Known(1.0);
        }
        self.set_counts(n_length);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use approx::assert_relative_eq;

    fn config() -> EngineConfig {
        EngineConfig::default().with_rng_seed(13)
    }

    #[test]
    fn test_compose_basis_states() {
        // |01> (2 qubits) with |1> appended becomes |101> = index 5.
        let mut a = QubitRegister::new(2, 0b01, config()).unwrap();
        let b = QubitRegister::new(1, 1, config()).unwrap();

        let start = a.compose(&b).unwrap();
        assert_eq!(start, 2);
        assert_eq!(a.qubit_count(), 3);
        assert_relative_eq!(a.get_amplitude(0b101).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_into_empty() {
        let mut a = QubitRegister::new(0, 0, config()).unwrap();
        let b = QubitRegister::new(2, 3, config()).unwrap();
        let start = a.compose(&b).unwrap();
        assert_eq!(start, 0);
        assert_eq!(a.qubit_count(), 2);
        assert_relative_eq!(a.get_amplitude(3).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_zero_state_annihilates() {
        let mut a = QubitRegister::new(1, 0, config()).unwrap();
        let mut b = QubitRegister::new(1, 0, config()).unwrap();
        b.zero_amplitudes();
        a.compose(&b).unwrap();
        assert_eq!(a.qubit_count(), 2);
        assert!(a.is_zero_amplitude());
    }

    #[test]
    fn test_compose_capacity() {
        let mut a = QubitRegister::new(3, 0, config().with_max_qubits(4)).unwrap();
        let b = QubitRegister::new(2, 0, config().with_max_qubits(4)).unwrap();
        assert!(matches!(
            a.compose(&b),
            Err(SimError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_compose_at_middle() {
        // Self |10> (qubit 0 = 0, qubit 1 = 1), insert |1> at position 1:
        // expect qubit 0 = 0, qubit 1 = 1 (inserted), qubit 2 = 1 -> |110>.
        let mut a = QubitRegister::new(2, 0b10, config()).unwrap();
        let b = QubitRegister::new(1, 1, config()).unwrap();

        let at = a.compose_at(&b, 1).unwrap();
        assert_eq!(at, 1);
        assert_eq!(a.qubit_count(), 3);
        assert_relative_eq!(a.get_amplitude(0b110).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_decompose_product_state() {
        // |01> tensor |1>: splitting the top qubit back off recovers both.
        let mut a = QubitRegister::new(2, 0b01, config()).unwrap();
        let b = QubitRegister::new(1, 1, config()).unwrap();
        a.compose(&b).unwrap();

        let mut dest = QubitRegister::new(1, 0, config()).unwrap();
        a.decompose(2, &mut dest).unwrap();

        assert_eq!(a.qubit_count(), 2);
        assert_relative_eq!(a.get_amplitude(0b01).unwrap().re, 1.0, epsilon = 1e-10);
        assert_relative_eq!(dest.get_amplitude(1).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_decompose_width_mismatch() {
        let mut a = QubitRegister::new(3, 0, config()).unwrap();
        let mut dest = QubitRegister::new(2, 0, config()).unwrap();
        // decompose takes the dest width; disposing 2 qubits from position
        // 2 would run off the end.
        assert!(a.decompose(2, &mut dest).is_err());
    }

    #[test]
    fn test_dispose_shrinks() {
        let mut a = QubitRegister::new(3, 0b010, config()).unwrap();
        a.dispose(1, 1).unwrap();
        assert_eq!(a.qubit_count(), 2);
        // The disposed qubit held 1; the survivors read |00>.
        assert_relative_eq!(a.get_amplitude(0).unwrap().norm(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_dispose_perm_fast_path() {
        // |q2 q1 q0> = |1 0 1>; dispose qubit 1 with known value 0.
        let mut a = QubitRegister::new(3, 0b101, config()).unwrap();
        a.dispose_perm(1, 1, 0).unwrap();
        assert_eq!(a.qubit_count(), 2);
        assert_relative_eq!(a.get_amplitude(0b11).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_dispose_perm_validation() {
        let mut a = QubitRegister::new(3, 0, config()).unwrap();
        assert!(a.dispose_perm(1, 1, 2).is_err());
        assert!(a.dispose_perm(2, 2, 0).is_err());
    }

    #[test]
    fn test_decompose_everything_moves_state() {
        let mut a = QubitRegister::new(2, 0b10, config()).unwrap();
        let mut dest = QubitRegister::new(2, 0, config()).unwrap();
        a.decompose(0, &mut dest).unwrap();

        assert_eq!(a.qubit_count(), 0);
        assert!(a.is_zero_amplitude());
        assert_relative_eq!(dest.get_amplitude(0b10).unwrap().re, 1.0, epsilon = 1e-10);
    }
}
