//! Bit-masked and uniformly controlled state-vector operations

use crate::engine::QubitRegister;
use crate::norm::RunningNorm;
use num_complex::Complex64;
use qregsim_core::bits::{expand_with_zero_bits, is_power_of_two, log2, odd_parity};
use qregsim_core::matrix::Matrix2;
use qregsim_core::{QubitId, Result, SimError};
use qregsim_state::{par_for, par_for_mask, par_for_skip};
use smallvec::SmallVec;
use std::f64::consts::PI;

impl QubitRegister {
    /// Apply Pauli X to every qubit in `mask` at once
    ///
    /// Amplitudes at indices whose masked bits are bitwise complements
    /// swap; a single-bit mask reduces to the plain X gate.
    pub fn x_mask(&mut self, mask: u64) -> Result<()> {
        self.check_mask(mask)?;

        if mask == 0 {
            return Ok(());
        }
        if is_power_of_two(mask) {
            return self.x(QubitId::new(log2(mask)));
        }

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            let Some(sv) = core.state.as_ref() else {
                return;
            };
            let other_mask = (max_q_power - 1) ^ mask;
            par_for(0, max_q_power, |lcv, _cpu| {
                let other = lcv & other_mask;
                let set = lcv & mask;
                let reset = set ^ mask;
                // Each complementary pair is swapped once, by its upper
                // representative.
                if set < reset {
                    return;
                }
                let set_i = set | other;
                let reset_i = reset | other;
                let y0 = sv.read(reset_i);
                sv.write(reset_i, sv.read(set_i));
                sv.write(set_i, y0);
            });
        });
        Ok(())
    }

    /// Apply Pauli Z to every qubit in `mask` at once
    ///
    /// Each amplitude is negated when the parity of its masked bits is odd.
    pub fn z_mask(&mut self, mask: u64) -> Result<()> {
        self.check_mask(mask)?;

        if mask == 0 {
            return Ok(());
        }
        if is_power_of_two(mask) {
            return self.z(QubitId::new(log2(mask)));
        }

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            let Some(sv) = core.state.as_ref() else {
                return;
            };
            par_for(0, max_q_power, |lcv, _cpu| {
                if odd_parity(lcv & mask) {
                    sv.write(lcv, -sv.read(lcv));
                }
            });
        });
        Ok(())
    }

    /// Rotate the phase of each amplitude by `±radians/2` according to the
    /// parity of its masked bits
    pub fn phase_parity(&mut self, radians: f64, mask: u64) -> Result<()> {
        self.check_mask(mask)?;

        if mask == 0 {
            return Ok(());
        }
        if is_power_of_two(mask) {
            let phase_fac = Complex64::from_polar(1.0, radians / 2.0);
            return self.phase(
                Complex64::new(1.0, 0.0) / phase_fac,
                phase_fac,
                QubitId::new(log2(mask)),
            );
        }

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            let Some(sv) = core.state.as_ref() else {
                return;
            };
            let angle = radians / 2.0;
            let phase_fac = Complex64::from_polar(1.0, angle);
            let phase_fac_adj = Complex64::from_polar(1.0, -angle);
            par_for(0, max_q_power, |lcv, _cpu| {
                let fac = if odd_parity(lcv & mask) {
                    phase_fac
                } else {
                    phase_fac_adj
                };
                sv.write(lcv, fac * sv.read(lcv));
            });
        });
        Ok(())
    }

    /// Apply the `n`-th root-of-Z phase per masked set bit
    ///
    /// Each amplitude turns by `-π/2^(n-1)` per set bit of `lcv & mask`,
    /// phases counted mod `2^n`. `n == 1` reduces to [`Self::z_mask`].
    pub fn phase_root_n_mask(&mut self, n: usize, mask: u64) -> Result<()> {
        self.check_mask(mask)?;

        if n == 0 || mask == 0 {
            return Ok(());
        }
        if n == 1 {
            return self.z_mask(mask);
        }

        let radians = -PI / 2f64.powi((n - 1) as i32);

        if is_power_of_two(mask) {
            return self.phase(
                Complex64::new(1.0, 0.0),
                Complex64::from_polar(1.0, radians),
                QubitId::new(log2(mask)),
            );
        }

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            let Some(sv) = core.state.as_ref() else {
                return;
            };
            let n_phases = 1u64.checked_shl(n as u32);
            par_for(0, max_q_power, |lcv, _cpu| {
                let mut steps = (lcv & mask).count_ones() as u64;
                if let Some(np) = n_phases {
                    steps %= np;
                }
                if steps != 0 {
                    let fac = Complex64::from_polar(1.0, radians * steps as f64);
                    sv.write(lcv, fac * sv.read(lcv));
                }
            });
        });
        Ok(())
    }

    /// Rotate by `e^{±i·angle}` according to the parity of the masked bits
    pub fn uniform_parity_rz(&mut self, mask: u64, angle: f64) -> Result<()> {
        self.check_mask(mask)?;

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            let Some(sv) = core.state.as_ref() else {
                return;
            };
            let phase_fac = Complex64::from_polar(1.0, angle);
            let phase_fac_adj = Complex64::from_polar(1.0, -angle);
            par_for(0, max_q_power, |lcv, _cpu| {
                let fac = if odd_parity(lcv & mask) {
                    phase_fac
                } else {
                    phase_fac_adj
                };
                sv.write(lcv, fac * sv.read(lcv));
            });
        });
        Ok(())
    }

    /// [`Self::uniform_parity_rz`] gated on every control qubit reading 1
    pub fn c_uniform_parity_rz(
        &mut self,
        controls: &[QubitId],
        mask: u64,
        angle: f64,
    ) -> Result<()> {
        if controls.is_empty() {
            return self.uniform_parity_rz(mask, angle);
        }
        self.check_mask(mask)?;
        for (i, &c) in controls.iter().enumerate() {
            self.check_qubit(c)?;
            if controls[..i].contains(&c) {
                return Err(SimError::DuplicatePower { power: c.power() });
            }
        }

        let mut control_powers: SmallVec<[u64; 4]> =
            controls.iter().map(|c| c.power()).collect();
        control_powers.sort_unstable();
        let control_mask: u64 = control_powers.iter().sum();

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            let Some(sv) = core.state.as_ref() else {
                return;
            };
            let phase_fac = Complex64::from_polar(1.0, angle);
            let phase_fac_adj = Complex64::from_polar(1.0, -angle);
            par_for_mask(0, max_q_power, &control_powers, |lcv, _cpu| {
                let i = control_mask | lcv;
                let fac = if odd_parity(lcv & mask) {
                    phase_fac
                } else {
                    phase_fac_adj
                };
                sv.write(i, fac * sv.read(i));
            });
        });
        Ok(())
    }

    /// Apply a different 2×2 matrix to `target` for every control bit
    /// pattern
    ///
    /// `mtrxs` is a flat array of 4-entry matrices indexed by the packed
    /// control pattern. `skip_powers` (ascending single-bit masks over the
    /// matrix-index space) compress that space: the decoded pattern is
    /// spread across them and OR-ed with `skip_value_mask` before lookup.
    ///
    /// With no controls this is a plain [`Self::mtrx`] of the matrix at
    /// `skip_value_mask`.
    pub fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[QubitId],
        target: QubitId,
        mtrxs: &[Complex64],
        skip_powers: &[u64],
        skip_value_mask: u64,
    ) -> Result<()> {
        if controls.is_empty() {
            let m = matrix_at(mtrxs, skip_value_mask)?;
            return self.mtrx(&m, target);
        }

        self.check_controls(controls, target)?;
        for (i, &p) in skip_powers.iter().enumerate() {
            if !is_power_of_two(p) || (i > 0 && skip_powers[i - 1] >= p) {
                return Err(SimError::DuplicatePower { power: p });
            }
        }
        let table_len = 4usize
            .checked_shl((controls.len() + skip_powers.len()) as u32)
            .ok_or(SimError::NotImplemented(
                "uniformly controlled table too large",
            ))?;
        if mtrxs.len() < table_len {
            return Err(SimError::InvalidPageRange {
                offset: 0,
                length: mtrxs.len() as u64,
                dimension: table_len as u64,
            });
        }

        let control_powers: SmallVec<[u64; 4]> = controls.iter().map(|c| c.power()).collect();
        let target_power = target.power();
        let max_q_power = self.max_q_power();
        let do_normalize = self.config().do_normalize;

        self.finish();
        let mut core = self.core_guard();
        if core.state.is_none() {
            return Ok(());
        }

        let nrm = match core.running_norm.known() {
            Some(v) if v > 0.0 => 1.0 / v.sqrt(),
            _ => 1.0,
        };
        let scale = if do_normalize && (1.0 - nrm).abs() > qregsim_core::NORM_EPSILON {
            nrm
        } else {
            1.0
        };

        {
            let sv = core.state.as_ref().expect("checked above");
            let lookup = |lcv: u64| -> usize {
                let mut pattern = 0u64;
                for (j, &qp) in control_powers.iter().enumerate() {
                    if lcv & qp != 0 {
                        pattern |= 1 << j;
                    }
                }
                let spread = expand_with_zero_bits(pattern, skip_powers);
                ((spread | skip_value_mask) * 4) as usize
            };

            par_for_skip(0, max_q_power, target_power, 1, |lcv, _cpu| {
                let off = lookup(lcv);
                let y0 = sv.read(lcv);
                let y1 = sv.read(lcv | target_power);
                let o0 = scale * (mtrxs[off] * y0 + mtrxs[off + 1] * y1);
                let o1 = scale * (mtrxs[off + 2] * y0 + mtrxs[off + 3] * y1);
                sv.write2(lcv, o0, lcv | target_power, o1);
            });
        }

        if do_normalize && !core.running_norm.is_unknown() {
            core.running_norm = RunningNorm::Known(1.0);
        }
        Ok(())
    }
}

fn matrix_at(mtrxs: &[Complex64], index: u64) -> Result<Matrix2> {
    let off = (index as usize) * 4;
    if off + 4 > mtrxs.len() {
        return Err(SimError::InvalidPageRange {
            offset: off as u64,
            length: 4,
            dimension: mtrxs.len() as u64,
        });
    }
    Ok([mtrxs[off], mtrxs[off + 1], mtrxs[off + 2], mtrxs[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;
    use approx::assert_relative_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn config() -> EngineConfig {
        EngineConfig::default().with_rng_seed(3)
    }

    #[test]
    fn test_x_mask_moves_basis_state() {
        let mut reg = QubitRegister::new(4, 0b0101, config()).unwrap();
        reg.x_mask(0b0110).unwrap();
        assert_relative_eq!(
            reg.get_amplitude(0b0011).unwrap().re,
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_x_mask_self_inverse() {
        let mut reg = QubitRegister::new(3, 0b011, config()).unwrap();
        reg.x_mask(0b101).unwrap();
        reg.x_mask(0b101).unwrap();
        assert_relative_eq!(reg.get_amplitude(0b011).unwrap().re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_x_mask_validation() {
        let mut reg = QubitRegister::new(2, 0, config()).unwrap();
        assert!(reg.x_mask(4).is_err());
        assert!(reg.x_mask(0).is_ok());
    }

    #[test]
    fn test_z_mask_parity_sign() {
        let mut reg = QubitRegister::new(2, 0b11, config()).unwrap();
        // Both masked bits set: even parity, no sign change.
        reg.z_mask(0b11).unwrap();
        assert_relative_eq!(reg.get_amplitude(3).unwrap().re, 1.0, epsilon = 1e-12);

        // One masked bit set: odd parity, sign flips.
        reg.z_mask(0b01).unwrap();
        assert_relative_eq!(reg.get_amplitude(3).unwrap().re, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_phase_parity_even_vs_odd() {
        let mut reg = QubitRegister::new(2, 0, config().with_normalization(false)).unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        reg.set_quantum_state(&[c(h, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(h, 0.0)])
            .unwrap();

        let theta = PI / 3.0;
        reg.phase_parity(theta, 0b01).unwrap();

        // Index 0 has even parity, index 3 odd (under mask 0b01).
        let even = reg.get_amplitude(0).unwrap();
        let odd = reg.get_amplitude(3).unwrap();
        assert_relative_eq!(even.arg(), -theta / 2.0, epsilon = 1e-10);
        assert_relative_eq!(odd.arg(), theta / 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_phase_root_n_accumulates_to_identity() {
        let mut reg = QubitRegister::new(1, 1, config()).unwrap();
        for _ in 0..8 {
            reg.phase_root_n_mask(3, 0b1).unwrap();
        }
        let amp = reg.get_amplitude(1).unwrap();
        assert_relative_eq!(amp.re, 1.0, epsilon = 1e-10);
        assert_relative_eq!(amp.im, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_phase_root_n_one_is_z_mask() {
        let mut a = QubitRegister::new(2, 0b11, config()).unwrap();
        let mut b = QubitRegister::new(2, 0b11, config()).unwrap();
        a.phase_root_n_mask(1, 0b01).unwrap();
        b.z_mask(0b01).unwrap();
        assert_relative_eq!(
            a.get_amplitude(3).unwrap().re,
            b.get_amplitude(3).unwrap().re,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_uniform_parity_rz_full_angle() {
        let mut reg = QubitRegister::new(2, 0b01, config()).unwrap();
        let theta = PI / 5.0;
        reg.uniform_parity_rz(0b01, theta).unwrap();
        // Odd parity turns by +theta (no half-angle here).
        assert_relative_eq!(reg.get_amplitude(1).unwrap().arg(), theta, epsilon = 1e-10);
    }

    #[test]
    fn test_c_uniform_parity_rz_gating() {
        // Control (qubit 1) is 0: nothing happens.
        let mut reg = QubitRegister::new(2, 0b01, config()).unwrap();
        reg.c_uniform_parity_rz(&[QubitId::new(1)], 0b01, PI / 7.0)
            .unwrap();
        assert_relative_eq!(reg.get_amplitude(1).unwrap().arg(), 0.0, epsilon = 1e-10);

        // Control is 1: the rotation lands.
        let mut reg = QubitRegister::new(2, 0b11, config()).unwrap();
        reg.c_uniform_parity_rz(&[QubitId::new(1)], 0b01, PI / 7.0)
            .unwrap();
        assert_relative_eq!(
            reg.get_amplitude(3).unwrap().arg(),
            PI / 7.0,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_uniformly_controlled_matches_mcmtrx() {
        // Payload X under control pattern 1, identity under pattern 0:
        // exactly a CNOT.
        let x = [c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)];
        let id = qregsim_core::matrix::IDENTITY;
        let mut table = Vec::new();
        table.extend_from_slice(&id);
        table.extend_from_slice(&x);

        let mut a = QubitRegister::new(2, 1, config()).unwrap();
        a.uniformly_controlled_single_bit(&[QubitId::new(0)], QubitId::new(1), &table, &[], 0)
            .unwrap();

        let mut b = QubitRegister::new(2, 1, config()).unwrap();
        b.mcmtrx(&[QubitId::new(0)], &x, QubitId::new(1)).unwrap();

        for p in 0..4 {
            let ampl_a = a.get_amplitude(p).unwrap();
            let ampl_b = b.get_amplitude(p).unwrap();
            assert_relative_eq!(ampl_a.re, ampl_b.re, epsilon = 1e-10);
            assert_relative_eq!(ampl_a.im, ampl_b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_uniformly_controlled_same_payload_is_unconditional() {
        // The same matrix in every slot acts like the uncontrolled gate.
        let h = std::f64::consts::FRAC_1_SQRT_2;
        let had = [c(h, 0.0), c(h, 0.0), c(h, 0.0), c(-h, 0.0)];
        let mut table = Vec::new();
        table.extend_from_slice(&had);
        table.extend_from_slice(&had);

        let mut a = QubitRegister::new(2, 0, config()).unwrap();
        a.uniformly_controlled_single_bit(&[QubitId::new(1)], QubitId::new(0), &table, &[], 0)
            .unwrap();

        let mut b = QubitRegister::new(2, 0, config()).unwrap();
        b.mtrx(&had, QubitId::new(0)).unwrap();

        for p in 0..4 {
            let ampl_a = a.get_amplitude(p).unwrap();
            let ampl_b = b.get_amplitude(p).unwrap();
            assert_relative_eq!(ampl_a.re, ampl_b.re, epsilon = 1e-10);
            assert_relative_eq!(ampl_a.im, ampl_b.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_uniformly_controlled_skip_powers() {
        // One control plus one skip power at matrix-index bit 0, with the
        // skip value forced to 1: pattern p looks up slot (p << 1) | 1.
        let x = [c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)];
        let id = qregsim_core::matrix::IDENTITY;
        // Slots: 00 -> id, 01 -> X, 10 -> id, 11 -> X.
        let mut table = Vec::new();
        table.extend_from_slice(&id);
        table.extend_from_slice(&x);
        table.extend_from_slice(&id);
        table.extend_from_slice(&x);

        // Control reads 0, so pattern 0 spreads to 0 and the skip value
        // selects slot 1: X fires.
        let mut reg = QubitRegister::new(2, 0, config()).unwrap();
        reg.uniformly_controlled_single_bit(&[QubitId::new(1)], QubitId::new(0), &table, &[1], 1)
            .unwrap();
        assert_relative_eq!(reg.get_amplitude(1).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_uniformly_controlled_table_length_validated() {
        let mut reg = QubitRegister::new(2, 0, config()).unwrap();
        let short = vec![c(1.0, 0.0); 4];
        assert!(reg
            .uniformly_controlled_single_bit(
                &[QubitId::new(1)],
                QubitId::new(0),
                &short,
                &[],
                0
            )
            .is_err());
    }
}
