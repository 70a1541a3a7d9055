//! The Apply2x2 kernel engine
//!
//! Every gate in the simulator bottoms out here: a 2×2 matrix applied to
//! amplitude pairs `(lcv + offset1, lcv + offset2)` for every `lcv` in the
//! complement of the held bit powers (target plus controls).
//!
//! The matrix is classified once per call as diagonal, anti-diagonal, or
//! generic, and that is crossed with three normalization modes (none /
//! running-norm recalculation / recalculation with amplitude-floor
//! clamping), giving nine kernels; the cheapest applicable one runs. When
//! exactly one bit is held, normalization is enabled, and the running norm
//! is known positive, the pending `1/√runningNorm` scale is folded into the
//! matrix and the cache resets to 1.

use crate::engine::{EngineCore, QubitRegister};
use crate::norm::RunningNorm;
use num_complex::Complex64;
use qregsim_core::matrix::{
    is_anti_diagonal, is_diagonal, is_identity, norm_is_zero, Matrix2,
};
use qregsim_core::{QubitId, Result, SimError};
use qregsim_state::{par_for_mask, WorkerSlots};
use smallvec::SmallVec;

/// Bit powers held fixed by one gate: target plus at most a few controls
pub(crate) type HeldPowers = SmallVec<[u64; 4]>;

#[derive(Copy, Clone, PartialEq)]
enum MatrixKind {
    Diagonal,
    AntiDiagonal,
    Generic,
}

fn classify(m: &Matrix2) -> MatrixKind {
    if is_diagonal(m) {
        MatrixKind::Diagonal
    } else if is_anti_diagonal(m) {
        MatrixKind::AntiDiagonal
    } else {
        MatrixKind::Generic
    }
}

#[derive(Copy, Clone, PartialEq)]
enum NormMode {
    Skip,
    Calc,
    CalcWithFloor,
}

impl QubitRegister {
    /// Apply a 2×2 matrix across the amplitude pairs selected by
    /// `q_pows_sorted`
    ///
    /// `offset1` and `offset2` are the pair base offsets (they differ in
    /// the target bit and fix the control bits); `q_pows_sorted` holds the
    /// bit powers of the target and every control, ascending. With
    /// `do_calc_norm` the kernel rebuilds the running norm as it writes,
    /// discarding amplitudes whose squared magnitude falls below
    /// `norm_thresh` (default: the configured amplitude floor). A rebuilt
    /// norm at or below the collapse floor zeroes the state.
    ///
    /// # Errors
    /// Fails when an offset or power is out of bounds, or a power is
    /// duplicated.
    pub fn apply_2x2(
        &mut self,
        offset1: u64,
        offset2: u64,
        mtrx: &Matrix2,
        q_pows_sorted: &[u64],
        do_calc_norm: bool,
        norm_thresh: Option<f64>,
    ) -> Result<()> {
        if offset1 >= self.max_q_power() || offset2 >= self.max_q_power() {
            return Err(SimError::InvalidPermutation {
                permutation: offset1.max(offset2),
                num_qubits: self.qubit_count(),
            });
        }
        for (i, &p) in q_pows_sorted.iter().enumerate() {
            if p >= self.max_q_power() {
                return Err(SimError::InvalidMask {
                    mask: p,
                    num_qubits: self.qubit_count(),
                });
            }
            if i > 0 && q_pows_sorted[i - 1] >= p {
                return Err(SimError::DuplicatePower { power: p });
            }
        }

        let powers: HeldPowers = SmallVec::from_slice(q_pows_sorted);
        let mtrx = *mtrx;
        let max_q_power = self.max_q_power();
        let do_normalize = self.config().do_normalize;
        let amplitude_floor = self.config().amplitude_floor;
        let norm_floor = self.config().norm_floor;

        self.dispatch_core(move |core| {
            apply_2x2_task(
                core,
                offset1,
                offset2,
                mtrx,
                &powers,
                do_calc_norm,
                norm_thresh,
                max_q_power,
                do_normalize,
                amplitude_floor,
                norm_floor,
            );
        });

        Ok(())
    }

    /// Apply an uncontrolled 2×2 matrix to one qubit
    ///
    /// Phase and invert structure disables the norm recalculation, since
    /// those kernels cannot change the total.
    pub fn mtrx(&mut self, m: &Matrix2, target: QubitId) -> Result<()> {
        self.check_qubit(target)?;
        if is_identity(m) {
            return Ok(());
        }

        let do_calc_norm = !(is_diagonal(m) || is_anti_diagonal(m));
        let p = target.power();
        self.apply_2x2(0, p, m, &[p], do_calc_norm, None)
    }

    /// Apply a diagonal single-qubit gate `diag(top_left, bottom_right)`
    pub fn phase(
        &mut self,
        top_left: Complex64,
        bottom_right: Complex64,
        target: QubitId,
    ) -> Result<()> {
        self.check_qubit(target)?;

        let one = Complex64::new(1.0, 0.0);
        let global = self.config().random_global_phase || norm_is_zero(one - top_left);
        if global && norm_is_zero(top_left - bottom_right) {
            return Ok(());
        }

        let m = [
            top_left,
            Complex64::new(0.0, 0.0),
            Complex64::new(0.0, 0.0),
            bottom_right,
        ];
        let p = target.power();
        self.apply_2x2(0, p, &m, &[p], false, None)
    }

    /// Apply an anti-diagonal single-qubit gate (Pauli X times phases)
    pub fn invert(
        &mut self,
        top_right: Complex64,
        bottom_left: Complex64,
        target: QubitId,
    ) -> Result<()> {
        self.check_qubit(target)?;

        let m = [
            Complex64::new(0.0, 0.0),
            top_right,
            bottom_left,
            Complex64::new(0.0, 0.0),
        ];
        let p = target.power();
        self.apply_2x2(0, p, &m, &[p], false, None)
    }

    /// Pauli X on one qubit
    pub fn x(&mut self, target: QubitId) -> Result<()> {
        let one = Complex64::new(1.0, 0.0);
        self.invert(one, one, target)
    }

    /// Pauli Z on one qubit
    pub fn z(&mut self, target: QubitId) -> Result<()> {
        self.phase(Complex64::new(1.0, 0.0), Complex64::new(-1.0, 0.0), target)
    }

    /// Apply `m` to `target` when every control qubit reads 1
    pub fn mcmtrx(&mut self, controls: &[QubitId], m: &Matrix2, target: QubitId) -> Result<()> {
        self.check_controls(controls, target)?;
        if is_identity(m) {
            return Ok(());
        }

        let target_power = target.power();
        let mut control_mask = 0u64;
        let mut powers: HeldPowers = SmallVec::with_capacity(controls.len() + 1);
        for c in controls {
            control_mask |= c.power();
            powers.push(c.power());
        }
        powers.push(target_power);
        powers.sort_unstable();

        self.apply_2x2(
            control_mask,
            control_mask | target_power,
            m,
            &powers,
            false,
            None,
        )
    }

    /// Apply `m` to `target` when every control qubit reads 0
    pub fn macmtrx(&mut self, controls: &[QubitId], m: &Matrix2, target: QubitId) -> Result<()> {
        self.check_controls(controls, target)?;
        if is_identity(m) {
            return Ok(());
        }

        let target_power = target.power();
        let mut powers: HeldPowers = SmallVec::with_capacity(controls.len() + 1);
        for c in controls {
            powers.push(c.power());
        }
        powers.push(target_power);
        powers.sort_unstable();

        self.apply_2x2(0, target_power, m, &powers, false, None)
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_2x2_task(
    core: &mut EngineCore,
    offset1: u64,
    offset2: u64,
    mtrx: Matrix2,
    powers: &HeldPowers,
    do_calc_norm: bool,
    norm_thresh: Option<f64>,
    max_q_power: u64,
    do_normalize: bool,
    amplitude_floor: f64,
    norm_floor: f64,
) {
    if core.state.is_none() {
        return;
    }

    // The normalization decision reads the running norm as left by the
    // previous task; this task runs alone behind the dispatch fence.
    let bit_count = powers.len();
    let do_apply_norm = do_normalize && bit_count == 1 && core.running_norm.is_known_positive();
    let do_calc = do_calc_norm && (do_apply_norm || core.running_norm.needs_recalc());

    let mut m = mtrx;
    if do_apply_norm {
        let scale = 1.0
            / core
                .running_norm
                .known()
                .expect("known positive per do_apply_norm")
                .sqrt();
        if (1.0 - scale).abs() > f64::EPSILON {
            for entry in &mut m {
                *entry *= scale;
            }
        }
    }

    let thresh = norm_thresh.unwrap_or(amplitude_floor);
    let mode = if !do_calc {
        NormMode::Skip
    } else if thresh > 0.0 {
        NormMode::CalcWithFloor
    } else {
        NormMode::Calc
    };
    let kind = classify(&m);

    let slots = WorkerSlots::<f64>::new();
    {
        let sv = core.state.as_ref().expect("checked above");
        let zero = Complex64::new(0.0, 0.0);

        // One kernel per (matrix structure, normalization mode) pair. The
        // diagonal and anti-diagonal forms skip the dead multiplies of the
        // generic matrix-vector product.
        match (kind, mode) {
            (MatrixKind::Diagonal, NormMode::Skip) => {
                par_for_mask(0, max_q_power, powers, |lcv, _cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    sv.write2(lcv + offset1, m[0] * y0, lcv + offset2, m[3] * y1);
                });
            }
            (MatrixKind::AntiDiagonal, NormMode::Skip) => {
                par_for_mask(0, max_q_power, powers, |lcv, _cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    sv.write2(lcv + offset1, m[1] * y1, lcv + offset2, m[2] * y0);
                });
            }
            (MatrixKind::Generic, NormMode::Skip) => {
                par_for_mask(0, max_q_power, powers, |lcv, _cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    sv.write2(
                        lcv + offset1,
                        m[0] * y0 + m[1] * y1,
                        lcv + offset2,
                        m[2] * y0 + m[3] * y1,
                    );
                });
            }
            (MatrixKind::Diagonal, NormMode::Calc) => {
                par_for_mask(0, max_q_power, powers, |lcv, cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    let (o0, o1) = (m[0] * y0, m[3] * y1);
                    slots.add(cpu, o0.norm_sqr() + o1.norm_sqr());
                    sv.write2(lcv + offset1, o0, lcv + offset2, o1);
                });
            }
            (MatrixKind::AntiDiagonal, NormMode::Calc) => {
                par_for_mask(0, max_q_power, powers, |lcv, cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    let (o0, o1) = (m[1] * y1, m[2] * y0);
                    slots.add(cpu, o0.norm_sqr() + o1.norm_sqr());
                    sv.write2(lcv + offset1, o0, lcv + offset2, o1);
                });
            }
            (MatrixKind::Generic, NormMode::Calc) => {
                par_for_mask(0, max_q_power, powers, |lcv, cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    let (o0, o1) = (m[0] * y0 + m[1] * y1, m[2] * y0 + m[3] * y1);
                    slots.add(cpu, o0.norm_sqr() + o1.norm_sqr());
                    sv.write2(lcv + offset1, o0, lcv + offset2, o1);
                });
            }
            (MatrixKind::Diagonal, NormMode::CalcWithFloor) => {
                par_for_mask(0, max_q_power, powers, |lcv, cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    let (mut o0, mut o1) = (m[0] * y0, m[3] * y1);
                    let n0 = o0.norm_sqr();
                    if n0 < thresh {
                        o0 = zero;
                    } else {
                        slots.add(cpu, n0);
                    }
                    let n1 = o1.norm_sqr();
                    if n1 < thresh {
                        o1 = zero;
                    } else {
                        slots.add(cpu, n1);
                    }
                    sv.write2(lcv + offset1, o0, lcv + offset2, o1);
                });
            }
            (MatrixKind::AntiDiagonal, NormMode::CalcWithFloor) => {
                par_for_mask(0, max_q_power, powers, |lcv, cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    let (mut o0, mut o1) = (m[1] * y1, m[2] * y0);
                    let n0 = o0.norm_sqr();
                    if n0 < thresh {
                        o0 = zero;
                    } else {
                        slots.add(cpu, n0);
                    }
                    let n1 = o1.norm_sqr();
                    if n1 < thresh {
                        o1 = zero;
                    } else {
                        slots.add(cpu, n1);
                    }
                    sv.write2(lcv + offset1, o0, lcv + offset2, o1);
                });
            }
            (MatrixKind::Generic, NormMode::CalcWithFloor) => {
                par_for_mask(0, max_q_power, powers, |lcv, cpu| {
                    let (y0, y1) = sv.read2(lcv + offset1, lcv + offset2);
                    let (mut o0, mut o1) = (m[0] * y0 + m[1] * y1, m[2] * y0 + m[3] * y1);
                    let n0 = o0.norm_sqr();
                    if n0 < thresh {
                        o0 = zero;
                    } else {
                        slots.add(cpu, n0);
                    }
                    let n1 = o1.norm_sqr();
                    if n1 < thresh {
                        o1 = zero;
                    } else {
                        slots.add(cpu, n1);
                    }
                    sv.write2(lcv + offset1, o0, lcv + offset2, o1);
                });
            }
        }
    }

    if do_apply_norm {
        core.running_norm = RunningNorm::Known(1.0);
    }
    if do_calc {
        let total = slots.total();
        core.running_norm = RunningNorm::Known(total);
        if total <= norm_floor {
            core.zero();
        }
    }
}
