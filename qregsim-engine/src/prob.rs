//! Probability reads and measurement collapse

use crate::engine::{normalize_core, set_permutation_core, update_running_norm_core, QubitRegister};
use crate::norm::RunningNorm;
use num_complex::Complex64;
use qregsim_core::bits::{mask_to_powers, odd_parity, pow2};
use qregsim_core::{QubitId, Result, SimError, NORM_EPSILON};
use qregsim_state::{par_for, par_for_mask, par_for_skip, WorkerSlots};
use rand::Rng;

#[inline]
fn clamp_prob(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

impl QubitRegister {
    /// Probability of measuring `qubit` as 1
    pub fn prob(&mut self, qubit: QubitId) -> Result<f64> {
        self.check_qubit(qubit)?;
        self.ensure_normalized();
        self.finish();

        let core = self.core_guard();
        let Some(sv) = core.state.as_ref() else {
            return Ok(0.0);
        };

        if self.qubit_count() == 1 {
            return Ok(clamp_prob(sv.read(1).norm_sqr()));
        }

        let q_power = qubit.power();
        let slots = WorkerSlots::<f64>::new();
        par_for_skip(0, self.max_q_power(), q_power, 1, |lcv, cpu| {
            slots.add(cpu, sv.read(lcv | q_power).norm_sqr());
        });
        Ok(clamp_prob(slots.total()))
    }

    /// Probability of the full register reading exactly `perm`
    pub fn prob_all(&mut self, perm: u64) -> Result<f64> {
        self.check_perm(perm)?;
        self.ensure_normalized();
        self.finish();

        let core = self.core_guard();
        Ok(match &core.state {
            Some(sv) => clamp_prob(sv.read(perm).norm_sqr()),
            None => 0.0,
        })
    }

    /// Probability that the `length`-bit register at `start` reads
    /// `permutation`
    pub fn prob_reg(&mut self, start: usize, length: usize, permutation: u64) -> Result<f64> {
        self.check_bit_range(start, length)?;
        if permutation >= 1u64 << length {
            return Err(SimError::InvalidPermutation {
                permutation,
                num_qubits: length,
            });
        }
        self.ensure_normalized();
        self.finish();

        let core = self.core_guard();
        let Some(sv) = core.state.as_ref() else {
            return Ok(0.0);
        };

        let perm = permutation << start;
        let slots = WorkerSlots::<f64>::new();
        par_for_skip(0, self.max_q_power(), pow2(start), length, |lcv, cpu| {
            slots.add(cpu, sv.read(lcv | perm).norm_sqr());
        });
        Ok(clamp_prob(slots.total()))
    }

    /// Probability that the qubits in `mask` read the bit pattern
    /// `permutation`
    pub fn prob_mask(&mut self, mask: u64, permutation: u64) -> Result<f64> {
        self.check_mask(mask)?;
        if permutation & !mask != 0 {
            return Err(SimError::InvalidPermutation {
                permutation,
                num_qubits: self.qubit_count(),
            });
        }
        self.ensure_normalized();
        self.finish();

        let core = self.core_guard();
        let Some(sv) = core.state.as_ref() else {
            return Ok(0.0);
        };

        let powers = mask_to_powers(mask);
        let slots = WorkerSlots::<f64>::new();
        par_for_mask(0, self.max_q_power(), &powers, |lcv, cpu| {
            slots.add(cpu, sv.read(lcv | permutation).norm_sqr());
        });
        Ok(clamp_prob(slots.total()))
    }

    /// Probability that the masked bits have odd parity
    pub fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        self.check_mask(mask)?;
        if mask == 0 {
            return Ok(0.0);
        }
        self.ensure_normalized();
        self.finish();

        let core = self.core_guard();
        let Some(sv) = core.state.as_ref() else {
            return Ok(0.0);
        };

        let slots = WorkerSlots::<f64>::new();
        par_for(0, self.max_q_power(), |lcv, cpu| {
            if odd_parity(lcv & mask) {
                slots.add(cpu, sv.read(lcv).norm_sqr());
            }
        });
        Ok(clamp_prob(slots.total()))
    }

    /// Conditional probability `P(target = 1 | control = control_state)`
    ///
    /// Returns 0 when the conditioning event itself has negligible
    /// probability.
    pub fn ctrl_or_anti_prob(
        &mut self,
        control_state: bool,
        control: QubitId,
        target: QubitId,
    ) -> Result<f64> {
        self.check_qubit(control)?;
        self.check_qubit(target)?;

        let mut control_prob = self.prob(control)?;
        if !control_state {
            control_prob = 1.0 - control_prob;
        }

        if control_prob <= NORM_EPSILON {
            return Ok(0.0);
        }
        if (1.0 - control_prob) <= NORM_EPSILON {
            return self.prob(target);
        }

        self.finish();
        let core = self.core_guard();
        let Some(sv) = core.state.as_ref() else {
            return Ok(0.0);
        };

        let control_power = control.power();
        let control_mask = if control_state { control_power } else { 0 };
        let target_power = target.power();

        let slots = WorkerSlots::<f64>::new();
        par_for_skip(0, self.max_q_power(), target_power, 1, |lcv, cpu| {
            if lcv & control_power == control_mask {
                slots.add(cpu, sv.read(lcv | target_power).norm_sqr());
            }
        });

        Ok(clamp_prob(slots.total() / control_prob))
    }

    /// Measure every qubit, collapsing to one basis state
    ///
    /// Samples the cumulative distribution with one uniform draw; the
    /// epsilon-tolerant tail selects the last permutation with any weight.
    pub fn m_all(&mut self) -> Result<u64> {
        self.ensure_normalized();
        self.finish();

        let max_q_power = self.max_q_power();
        let config = self.config().clone();
        let mut core = self.core_guard();
        if core.state.is_none() {
            return Ok(0);
        }

        let rnd = core.rng.gen::<f64>();
        let mut chosen = None;
        let mut last_nonzero = max_q_power - 1;
        {
            let sv = core.state.as_ref().expect("checked above");
            let mut tot_prob = 0.0;
            for perm in 0..max_q_power {
                let part = sv.read(perm).norm_sqr();
                if part > f64::EPSILON {
                    tot_prob += part;
                    if tot_prob > rnd || (1.0 - tot_prob) <= NORM_EPSILON {
                        chosen = Some(perm);
                        break;
                    }
                    last_nonzero = perm;
                }
            }
        }

        let outcome = chosen.unwrap_or(last_nonzero);
        set_permutation_core(&mut core, &config, max_q_power, outcome, None)?;
        Ok(outcome)
    }

    /// Measure the parity of the masked bits, optionally forcing the
    /// outcome
    ///
    /// With `do_force` unset the outcome is sampled from
    /// `P(parity = odd)`. Every amplitude disagreeing with the outcome is
    /// zeroed; the survivors' norm becomes the running norm and
    /// normalization is folded into upcoming gates (or applied now when the
    /// engine does not normalize lazily).
    pub fn force_m_parity(&mut self, mask: u64, result: bool, do_force: bool) -> Result<bool> {
        self.check_mask(mask)?;
        self.finish();

        let max_q_power = self.max_q_power();
        let config = self.config().clone();
        let mut core = self.core_guard();
        if core.state.is_none() || mask == 0 {
            return Ok(false);
        }

        let result = if do_force {
            result
        } else {
            if config.do_normalize {
                normalize_core(&mut core, &config, max_q_power, None, None, 0.0);
                if core.state.is_none() {
                    return Ok(false);
                }
            }
            let sv = core.state.as_ref().expect("checked above");
            let slots = WorkerSlots::<f64>::new();
            par_for(0, max_q_power, |lcv, cpu| {
                if odd_parity(lcv & mask) {
                    slots.add(cpu, sv.read(lcv).norm_sqr());
                }
            });
            core.rng.gen::<f64>() <= clamp_prob(slots.total())
        };

        let survivors = {
            let sv = core.state.as_ref().expect("checked above");
            let slots = WorkerSlots::<f64>::new();
            par_for(0, max_q_power, |lcv, cpu| {
                if odd_parity(lcv & mask) == result {
                    slots.add(cpu, sv.read(lcv).norm_sqr());
                } else {
                    sv.write(lcv, Complex64::new(0.0, 0.0));
                }
            });
            slots.total()
        };

        core.running_norm = RunningNorm::Known(survivors);
        if !config.do_normalize {
            normalize_core(&mut core, &config, max_q_power, None, None, 0.0);
        }
        Ok(result)
    }

    /// Project onto `reg_mask` reading `result`, scaling survivors by `nrm`
    ///
    /// The collapse half of a forced register measurement: amplitudes
    /// whose masked bits disagree with `result` are zeroed and the rest
    /// are scaled by the caller-supplied factor.
    pub fn apply_m(&mut self, reg_mask: u64, result: u64, nrm: Complex64) -> Result<()> {
        self.check_mask(reg_mask)?;
        if result & !reg_mask != 0 {
            return Err(SimError::InvalidPermutation {
                permutation: result,
                num_qubits: self.qubit_count(),
            });
        }

        let max_q_power = self.max_q_power();
        self.dispatch_core(move |core| {
            {
                let Some(sv) = core.state.as_ref() else {
                    return;
                };
                par_for(0, max_q_power, |i, _cpu| {
                    if i & reg_mask == result {
                        sv.write(i, nrm * sv.read(i));
                    } else {
                        sv.write(i, Complex64::new(0.0, 0.0));
                    }
                });
            }
            core.running_norm = RunningNorm::Known(1.0);
        });
        Ok(())
    }

    /// `1 − |⟨self|other⟩|²`, the squared-overlap distance
    ///
    /// Registers of different widths return 1. A side in the zero state
    /// returns the other side's total norm.
    pub fn sum_sqr_diff(&mut self, other: &QubitRegister) -> f64 {
        if self.qubit_count() != other.qubit_count() {
            return 1.0;
        }

        self.ensure_normalized();
        other.ensure_normalized();
        self.finish();
        other.finish();

        let mut core = self.core_guard();
        let mut other_core = other.core_guard();

        match (core.state.is_some(), other_core.state.is_some()) {
            (false, false) => return 0.0,
            (false, true) => {
                update_running_norm_core(
                    &mut other_core,
                    other.config(),
                    other.max_q_power(),
                    None,
                );
                return other_core.running_norm.known().unwrap_or(0.0);
            }
            (true, false) => {
                update_running_norm_core(&mut core, self.config(), self.max_q_power(), None);
                return core.running_norm.known().unwrap_or(0.0);
            }
            (true, true) => {}
        }

        let sv = core.state.as_ref().expect("checked above");
        let other_sv = other_core.state.as_ref().expect("checked above");

        let slots = WorkerSlots::<Complex64>::new();
        par_for(0, self.max_q_power(), |lcv, cpu| {
            slots.add(cpu, sv.read(lcv).conj() * other_sv.read(lcv));
        });

        1.0 - clamp_prob(slots.total().norm_sqr())
    }
}
