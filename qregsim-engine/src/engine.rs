//! The qubit register: lifecycle, state I/O, and norm maintenance
//!
//! Gate kernels live in the sibling modules (`apply2x2`, `ops`, `compose`,
//! `prob`); this module owns the register itself and the operations that
//! move amplitudes in and out of it.

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::norm::RunningNorm;
use num_complex::Complex64;
use qregsim_core::{QubitId, Result, SimError};
use qregsim_state::{par_for, StateError, StateVector, WorkerSlots};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};

/// The mutable heart of an engine: amplitudes, norm cache, random source
///
/// Owned behind a mutex taken by the dispatch worker per task and by
/// callers only after a fence.
pub(crate) struct EngineCore {
    pub(crate) state: Option<StateVector>,
    pub(crate) running_norm: RunningNorm,
    pub(crate) rng: StdRng,
}

impl EngineCore {
    /// Deallocate the buffer; the register is now in the zero state
    pub(crate) fn zero(&mut self) {
        self.state = None;
        self.running_norm = RunningNorm::Known(0.0);
    }

    /// Allocate a cleared buffer if the register is in the zero state
    pub(crate) fn alloc_cleared(&mut self, dimension: u64) -> Result<&mut StateVector> {
        if self.state.is_none() {
            self.state = Some(StateVector::new(dimension).map_err(state_err)?);
        }
        Ok(self
            .state
            .as_mut()
            .expect("state vector allocated just above"))
    }

    /// A uniformly distributed unit-modulus phase factor
    pub(crate) fn random_phase(&mut self) -> Complex64 {
        Complex64::from_polar(1.0, self.rng.gen::<f64>() * 2.0 * PI)
    }
}

pub(crate) fn state_err(e: StateError) -> SimError {
    match e {
        StateError::Allocation { size } => SimError::Allocation { bytes: size },
        other => SimError::Storage {
            message: other.to_string(),
        },
    }
}

/// Dense state-vector engine over `2^N` complex amplitudes
///
/// See the crate-level documentation for the execution model. The register
/// exclusively owns its amplitude buffer; callers observe it through
/// copy-out operations, all of which fence on the dispatch queue first.
pub struct QubitRegister {
    qubit_count: usize,
    max_q_power: u64,
    config: EngineConfig,
    core: Arc<Mutex<EngineCore>>,
    dispatcher: Dispatcher,
}

impl QubitRegister {
    /// Construct a register of `num_qubits` qubits in the computational
    /// basis state `init_perm`
    ///
    /// With `random_global_phase` set, the initial amplitude carries a
    /// uniformly distributed phase; otherwise it is exactly 1.
    ///
    /// # Errors
    /// Fails if `num_qubits` exceeds the configured cap, `init_perm` is out
    /// of range, or allocation fails.
    pub fn new(num_qubits: usize, init_perm: u64, config: EngineConfig) -> Result<Self> {
        Self::new_with_phase(num_qubits, init_perm, None, config)
    }

    /// Construct with an explicit initial phase factor
    ///
    /// The factor is scaled to unit modulus before being written.
    pub fn new_with_phase(
        num_qubits: usize,
        init_perm: u64,
        phase: Option<Complex64>,
        config: EngineConfig,
    ) -> Result<Self> {
        if num_qubits > config.max_qubits {
            return Err(SimError::CapacityExceeded {
                requested: num_qubits,
                max_qubits: config.max_qubits,
            });
        }

        let max_q_power = 1u64 << num_qubits;
        if init_perm >= max_q_power {
            return Err(SimError::InvalidPermutation {
                permutation: init_perm,
                num_qubits,
            });
        }

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (state, running_norm) = if num_qubits == 0 {
            (None, RunningNorm::Known(0.0))
        } else {
            let sv = StateVector::new(max_q_power).map_err(state_err)?;
            let amp = match phase {
                Some(p) => p / p.norm(),
                None if config.random_global_phase => {
                    Complex64::from_polar(1.0, rng.gen::<f64>() * 2.0 * PI)
                }
                None => Complex64::new(1.0, 0.0),
            };
            sv.write(init_perm, amp);
            (Some(sv), RunningNorm::Known(1.0))
        };

        Ok(Self {
            qubit_count: num_qubits,
            max_q_power,
            config,
            core: Arc::new(Mutex::new(EngineCore {
                state,
                running_norm,
                rng,
            })),
            dispatcher: Dispatcher::new(),
        })
    }

    /// Number of qubits in the register
    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.qubit_count
    }

    /// Dimension of the amplitude space, `2^N`
    #[inline]
    pub fn max_q_power(&self) -> u64 {
        self.max_q_power
    }

    /// The engine configuration
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Block until every dispatched gate has executed
    pub fn finish(&self) {
        self.dispatcher.finish();
    }

    /// Discard pending gates; the one in flight (if any) completes
    pub fn dump(&self) {
        self.dispatcher.dump();
    }

    /// True when no gate is queued or in flight
    pub fn is_finished(&self) -> bool {
        self.dispatcher.is_finished()
    }

    /// True when the register has collapsed to the zero state
    ///
    /// Fences first: a pending kernel may be the one that collapses it.
    pub fn is_zero_amplitude(&self) -> bool {
        self.finish();
        self.core_guard().state.is_none()
    }

    /// The current running-norm cache
    pub fn running_norm(&self) -> RunningNorm {
        self.finish();
        self.core_guard().running_norm
    }

    /// Drop all amplitudes and pending work; the register reads as zero
    pub fn zero_amplitudes(&mut self) {
        self.dump();
        self.core_guard().zero();
    }

    // ---- state I/O --------------------------------------------------------

    /// Reset to the computational basis state `perm`
    ///
    /// With `phase` given, the amplitude is that factor scaled to unit
    /// modulus; otherwise 1, or a random phase under `random_global_phase`.
    pub fn set_permutation(&mut self, perm: u64, phase: Option<Complex64>) -> Result<()> {
        self.check_perm(perm)?;
        self.dump();
        let mut core = self.core_guard();
        set_permutation_core(&mut core, &self.config, self.max_q_power, perm, phase)
    }

    /// Load an arbitrary pure state, invalidating the norm cache
    pub fn set_quantum_state(&mut self, amplitudes: &[Complex64]) -> Result<()> {
        if amplitudes.len() as u64 != self.max_q_power {
            return Err(SimError::InvalidPageRange {
                offset: 0,
                length: amplitudes.len() as u64,
                dimension: self.max_q_power,
            });
        }
        self.dump();
        let mut core = self.core_guard();
        let sv = core.alloc_cleared(self.max_q_power)?;
        sv.copy_in(amplitudes).map_err(state_err)?;
        core.running_norm = RunningNorm::Unknown;
        Ok(())
    }

    /// Copy the full state out, normalizing first when configured
    pub fn get_quantum_state(&mut self, out: &mut [Complex64]) -> Result<()> {
        if out.len() as u64 != self.max_q_power {
            return Err(SimError::InvalidPageRange {
                offset: 0,
                length: out.len() as u64,
                dimension: self.max_q_power,
            });
        }
        self.ensure_normalized();
        self.finish();
        let core = self.core_guard();
        match &core.state {
            Some(sv) => sv.copy_out(out).map_err(state_err),
            None => {
                out.fill(Complex64::new(0.0, 0.0));
                Ok(())
            }
        }
    }

    /// Fill `out` with every basis-state probability
    pub fn get_probs(&mut self, out: &mut [f64]) -> Result<()> {
        if out.len() as u64 != self.max_q_power {
            return Err(SimError::InvalidPageRange {
                offset: 0,
                length: out.len() as u64,
                dimension: self.max_q_power,
            });
        }
        self.ensure_normalized();
        self.finish();
        let core = self.core_guard();
        match &core.state {
            Some(sv) => sv.get_probs(out).map_err(state_err),
            None => {
                out.fill(0.0);
                Ok(())
            }
        }
    }

    /// Read one amplitude; does not normalize
    pub fn get_amplitude(&self, perm: u64) -> Result<Complex64> {
        self.check_perm(perm)?;
        self.finish();
        let core = self.core_guard();
        Ok(match &core.state {
            Some(sv) => sv.read(perm),
            None => Complex64::new(0.0, 0.0),
        })
    }

    /// Write one amplitude; does not normalize
    ///
    /// The running-norm cache is updated incrementally when it is known.
    pub fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()> {
        self.check_perm(perm)?;
        self.finish();
        let mut core = self.core_guard();

        if core.state.is_none() && amp.norm_sqr() == 0.0 {
            return Ok(());
        }

        if let RunningNorm::Known(v) = core.running_norm {
            let old = core
                .state
                .as_ref()
                .map_or(0.0, |sv| sv.read(perm).norm_sqr());
            core.running_norm = RunningNorm::Known(v + amp.norm_sqr() - old);
        }

        let sv = core.alloc_cleared(self.max_q_power)?;
        sv.write(perm, amp);
        Ok(())
    }

    /// Copy a page of amplitudes out, starting at `offset`
    pub fn get_amplitude_page(&self, out: &mut [Complex64], offset: u64) -> Result<()> {
        self.check_page(offset, out.len() as u64)?;
        self.finish();
        let core = self.core_guard();
        match &core.state {
            Some(sv) => sv.copy_out_page(out, offset).map_err(state_err),
            None => {
                out.fill(Complex64::new(0.0, 0.0));
                Ok(())
            }
        }
    }

    /// Copy a page of amplitudes in at `offset`, invalidating the norm
    /// cache when normalization is configured
    pub fn set_amplitude_page(&mut self, page: &[Complex64], offset: u64) -> Result<()> {
        self.check_page(offset, page.len() as u64)?;
        self.finish();
        let mut core = self.core_guard();
        let sv = core.alloc_cleared(self.max_q_power)?;
        sv.copy_in_page(page, offset).map_err(state_err)?;
        if self.config.do_normalize {
            core.running_norm = RunningNorm::Unknown;
        }
        Ok(())
    }

    /// Replace this register's amplitudes with a copy of `src`'s
    pub fn copy_state_vec(&mut self, src: &QubitRegister) -> Result<()> {
        if self.qubit_count != src.qubit_count {
            return Err(SimError::QubitCountMismatch {
                expected: self.qubit_count,
                actual: src.qubit_count,
            });
        }

        src.finish();
        self.dump();

        let src_core = src.core_guard();
        let mut core = self.core_guard();
        match &src_core.state {
            None => core.zero(),
            Some(src_sv) => {
                let sv = core.alloc_cleared(self.max_q_power)?;
                sv.copy_from(src_sv).map_err(state_err)?;
                core.running_norm = src_core.running_norm;
            }
        }
        Ok(())
    }

    /// Swap this register's upper amplitude half with `other`'s lower half
    ///
    /// Both norm caches are invalidated. Zero-state sides are allocated
    /// cleared first, unless both are zero.
    pub fn shuffle_buffers(&mut self, other: &QubitRegister) -> Result<()> {
        if self.qubit_count != other.qubit_count {
            return Err(SimError::QubitCountMismatch {
                expected: self.qubit_count,
                actual: other.qubit_count,
            });
        }

        self.finish();
        other.finish();

        let mut core = self.core_guard();
        let mut other_core = other.core_guard();

        if core.state.is_none() && other_core.state.is_none() {
            return Ok(());
        }

        core.alloc_cleared(self.max_q_power)?;
        other_core.alloc_cleared(self.max_q_power)?;

        let sv = core.state.as_mut().expect("allocated above");
        let other_sv = other_core.state.as_mut().expect("allocated above");
        sv.shuffle(other_sv).map_err(state_err)?;

        core.running_norm = RunningNorm::Unknown;
        other_core.running_norm = RunningNorm::Unknown;
        Ok(())
    }

    // ---- norm maintenance -------------------------------------------------

    /// Recompute the running norm from the amplitudes
    ///
    /// Amplitudes with squared magnitude below `norm_thresh` (default: the
    /// configured amplitude floor) do not contribute. A total at or below
    /// the collapse floor zeroes the state.
    pub fn update_running_norm(&mut self, norm_thresh: Option<f64>) {
        self.finish();
        let mut core = self.core_guard();
        update_running_norm_core(&mut core, &self.config, self.max_q_power, norm_thresh);
    }

    /// Scale the state to unit norm, optionally applying a global phase
    ///
    /// `nrm` overrides the cached running norm; `norm_thresh` overrides the
    /// amplitude floor below which amplitudes are zeroed. A norm at or
    /// below the collapse floor zeroes the state instead.
    pub fn normalize_state(
        &mut self,
        nrm: Option<f64>,
        norm_thresh: Option<f64>,
        phase_arg: f64,
    ) {
        self.finish();
        let mut core = self.core_guard();
        normalize_core(
            &mut core,
            &self.config,
            self.max_q_power,
            nrm,
            norm_thresh,
            phase_arg,
        );
    }

    // ---- crate-internal plumbing -----------------------------------------

    pub(crate) fn core_guard(&self) -> MutexGuard<'_, EngineCore> {
        self.core.lock().expect("engine core mutex poisoned")
    }

    /// Enqueue a task that runs with exclusive access to the core
    pub(crate) fn dispatch_core<F>(&self, job: F)
    where
        F: FnOnce(&mut EngineCore) + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.dispatcher.dispatch(move || {
            let mut guard = core.lock().expect("engine core mutex poisoned");
            job(&mut guard);
        });
    }

    /// Normalize now if the configuration folds normalization into gates
    pub(crate) fn ensure_normalized(&self) {
        if !self.config.do_normalize {
            return;
        }
        self.finish();
        let mut core = self.core_guard();
        normalize_core(&mut core, &self.config, self.max_q_power, None, None, 0.0);
    }

    pub(crate) fn set_counts(&mut self, qubit_count: usize) {
        self.qubit_count = qubit_count;
        self.max_q_power = 1u64 << qubit_count;
    }

    // ---- validation -------------------------------------------------------

    pub(crate) fn check_qubit(&self, qubit: QubitId) -> Result<()> {
        if qubit.index() >= self.qubit_count {
            return Err(SimError::InvalidQubit {
                qubit,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    pub(crate) fn check_perm(&self, perm: u64) -> Result<()> {
        if perm >= self.max_q_power {
            return Err(SimError::InvalidPermutation {
                permutation: perm,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    pub(crate) fn check_mask(&self, mask: u64) -> Result<()> {
        if mask >= self.max_q_power {
            return Err(SimError::InvalidMask {
                mask,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    pub(crate) fn check_bit_range(&self, start: usize, length: usize) -> Result<()> {
        if start + length > self.qubit_count {
            return Err(SimError::InvalidBitRange {
                start,
                length,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    pub(crate) fn check_page(&self, offset: u64, length: u64) -> Result<()> {
        if offset.checked_add(length).map_or(true, |end| end > self.max_q_power) {
            return Err(SimError::InvalidPageRange {
                offset,
                length,
                dimension: self.max_q_power,
            });
        }
        Ok(())
    }

    /// Controls must be in range, mutually distinct, and exclude the target
    pub(crate) fn check_controls(&self, controls: &[QubitId], target: QubitId) -> Result<()> {
        self.check_qubit(target)?;
        for (i, &c) in controls.iter().enumerate() {
            self.check_qubit(c)?;
            if c == target {
                return Err(SimError::DuplicatePower { power: c.power() });
            }
            if controls[..i].contains(&c) {
                return Err(SimError::DuplicatePower { power: c.power() });
            }
        }
        Ok(())
    }
}

// ---- core-level helpers shared by the op modules --------------------------

pub(crate) fn set_permutation_core(
    core: &mut EngineCore,
    config: &EngineConfig,
    max_q_power: u64,
    perm: u64,
    phase: Option<Complex64>,
) -> Result<()> {
    let amp = match phase {
        Some(p) => p / p.norm(),
        None if config.random_global_phase => core.random_phase(),
        None => Complex64::new(1.0, 0.0),
    };
    let sv = core.alloc_cleared(max_q_power)?;
    sv.clear();
    sv.write(perm, amp);
    core.running_norm = RunningNorm::Known(1.0);
    Ok(())
}

pub(crate) fn update_running_norm_core(
    core: &mut EngineCore,
    config: &EngineConfig,
    max_q_power: u64,
    norm_thresh: Option<f64>,
) {
    let total = match &core.state {
        None => {
            core.running_norm = RunningNorm::Known(0.0);
            return;
        }
        Some(sv) => {
            let thresh = norm_thresh.unwrap_or(config.amplitude_floor);
            let slots = WorkerSlots::<f64>::new();
            par_for(0, max_q_power, |lcv, cpu| {
                let nrm = sv.read(lcv).norm_sqr();
                if nrm >= thresh {
                    slots.add(cpu, nrm);
                }
            });
            slots.total()
        }
    };

    core.running_norm = RunningNorm::Known(total);
    if total <= config.norm_floor {
        core.zero();
    }
}

pub(crate) fn normalize_core(
    core: &mut EngineCore,
    config: &EngineConfig,
    max_q_power: u64,
    nrm: Option<f64>,
    norm_thresh: Option<f64>,
    phase_arg: f64,
) {
    if core.state.is_none() {
        return;
    }

    if core.running_norm.is_unknown() && nrm.is_none() {
        update_running_norm_core(core, config, max_q_power, norm_thresh);
        if core.state.is_none() {
            return;
        }
    }

    let nrm = nrm
        .or_else(|| core.running_norm.known())
        .unwrap_or(0.0);
    if nrm <= config.norm_floor {
        core.zero();
        return;
    }
    if (1.0 - nrm).abs() <= qregsim_core::NORM_EPSILON
        && phase_arg * phase_arg <= qregsim_core::NORM_EPSILON
    {
        core.running_norm = RunningNorm::Known(1.0);
        return;
    }

    let thresh = norm_thresh.unwrap_or(config.amplitude_floor);
    let scale = Complex64::from_polar(1.0 / nrm.sqrt(), phase_arg);

    {
        let sv = core.state.as_ref().expect("checked above");
        if thresh <= 0.0 {
            par_for(0, max_q_power, |lcv, _cpu| {
                sv.write(lcv, scale * sv.read(lcv));
            });
        } else {
            par_for(0, max_q_power, |lcv, _cpu| {
                let mut amp = sv.read(lcv);
                if amp.norm_sqr() < thresh {
                    amp = Complex64::new(0.0, 0.0);
                }
                sv.write(lcv, scale * amp);
            });
        }
    }

    core.running_norm = RunningNorm::Known(1.0);
}
