//! Composition and separation round trips

use approx::assert_relative_eq;
use num_complex::Complex64;
use qregsim_core::matrix::Matrix2;
use qregsim_core::QubitId;
use qregsim_engine::{EngineConfig, QubitRegister};

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

fn config() -> EngineConfig {
    EngineConfig::default().with_rng_seed(29)
}

/// An arbitrary unentangled-from-outside register: rotations and phases
/// within the register only.
fn arbitrary_two_qubit() -> QubitRegister {
    let mut reg = QubitRegister::new(2, 0, config()).unwrap();
    reg.mtrx(&hadamard(), q(0)).unwrap();
    reg.phase(c(1.0, 0.0), Complex64::from_polar(1.0, 0.4), q(0))
        .unwrap();
    reg.mcmtrx(
        &[q(0)],
        &[c(0.0, 0.0), c(0.0, -1.0), c(0.0, 1.0), c(0.0, 0.0)],
        q(1),
    )
    .unwrap();
    reg
}

fn arbitrary_three_qubit() -> QubitRegister {
    let mut reg = QubitRegister::new(3, 0b010, config()).unwrap();
    reg.mtrx(&hadamard(), q(2)).unwrap();
    reg.phase_parity(0.9, 0b110).unwrap();
    reg
}

#[test]
fn compose_decompose_round_trip() {
    let mut psi = arbitrary_two_qubit();
    let phi = arbitrary_three_qubit();

    // chi = psi (qubits 0..1) tensor phi (qubits 2..4).
    let mut chi = QubitRegister::new(0, 0, config()).unwrap();
    chi.compose(&psi).unwrap();
    let start = chi.compose(&phi).unwrap();
    assert_eq!(start, 2);
    assert_eq!(chi.qubit_count(), 5);

    // Separate the last three qubits back out.
    let mut xi = QubitRegister::new(3, 0, config()).unwrap();
    chi.decompose(2, &mut xi).unwrap();
    assert_eq!(chi.qubit_count(), 2);

    let mut phi_check = arbitrary_three_qubit();
    assert!(phi_check.sum_sqr_diff(&xi) <= 1e-6);
    assert!(psi.sum_sqr_diff(&chi) <= 1e-6);
}

#[test]
fn compose_with_basis_state_is_bit_exact() {
    let mut a = arbitrary_two_qubit();
    let b = QubitRegister::new(2, 0, config()).unwrap();
    a.compose(&b).unwrap();

    // The appended |00> factor leaves the low-quadrant amplitudes intact
    // and everything else zero.
    let mut probs = vec![0.0; 16];
    a.get_probs(&mut probs).unwrap();
    let low: f64 = probs[..4].iter().sum();
    let high: f64 = probs[4..].iter().sum();
    assert_relative_eq!(low, 1.0, epsilon = 1e-10);
    assert_relative_eq!(high, 0.0, epsilon = 1e-10);
}

#[test]
fn decompose_basis_factor_is_exact() {
    // psi tensor |00>, then decompose the |00> half: the remainder must be
    // bit-exact psi up to the reconstruction's phase convention.
    let mut a = arbitrary_two_qubit();
    let b = QubitRegister::new(2, 0, config()).unwrap();
    a.compose(&b).unwrap();

    let mut dest = QubitRegister::new(2, 0, config()).unwrap();
    a.decompose(2, &mut dest).unwrap();

    assert_relative_eq!(dest.prob_all(0).unwrap(), 1.0, epsilon = 1e-10);

    let mut psi = arbitrary_two_qubit();
    assert!(psi.sum_sqr_diff(&a) <= 1e-9);
}

#[test]
fn separability_score_flags_entangled_split() {
    // A Bell pair is maximally non-separable: re-composing the two
    // decomposed halves misses the original by far more than the
    // separability floor.
    let mut bell = QubitRegister::new(2, 0, config()).unwrap();
    bell.mtrx(&hadamard(), q(0)).unwrap();
    bell.mcmtrx(
        &[q(0)],
        &[c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)],
        q(1),
    )
    .unwrap();

    let mut original = QubitRegister::new(2, 0, config()).unwrap();
    original.copy_state_vec(&bell).unwrap();

    let mut dest = QubitRegister::new(1, 0, config()).unwrap();
    bell.decompose(1, &mut dest).unwrap();

    let mut recomposed = QubitRegister::new(0, 0, config()).unwrap();
    recomposed.compose(&bell).unwrap();
    recomposed.compose(&dest).unwrap();

    let residual = original.sum_sqr_diff(&recomposed);
    let floor = original.config().separability_floor;
    assert!(
        residual > floor,
        "entangled split should exceed the separability floor: {residual}"
    );
}

#[test]
fn separability_score_passes_product_split() {
    let mut a = arbitrary_two_qubit();
    let b = arbitrary_three_qubit();
    a.compose(&b).unwrap();

    let mut original = QubitRegister::new(5, 0, config()).unwrap();
    original.copy_state_vec(&a).unwrap();

    let mut dest = QubitRegister::new(3, 0, config()).unwrap();
    a.decompose(2, &mut dest).unwrap();

    let mut recomposed = QubitRegister::new(0, 0, config()).unwrap();
    recomposed.compose(&a).unwrap();
    recomposed.compose(&dest).unwrap();

    let residual = original.sum_sqr_diff(&recomposed);
    let floor = original.config().separability_floor;
    assert!(
        residual <= floor,
        "product split should stay under the separability floor: {residual}"
    );
}

#[test]
fn dispose_known_permutation_preserves_rest() {
    let mut a = arbitrary_two_qubit();
    let b = QubitRegister::new(1, 1, config()).unwrap();
    a.compose(&b).unwrap();

    // Qubit 2 is |1> with certainty; dispose it by literal value.
    a.dispose_perm(2, 1, 1).unwrap();
    assert_eq!(a.qubit_count(), 2);

    let mut psi = arbitrary_two_qubit();
    assert!(psi.sum_sqr_diff(&a) <= 1e-9);
}

#[test]
fn shuffle_buffers_splices_halves() {
    // a = |10> lives in the upper half, b = |01> in the lower. The shuffle
    // exchanges a's upper half with b's lower half, a second shuffle
    // restores both.
    let mut a = QubitRegister::new(2, 2, config()).unwrap();
    let b = QubitRegister::new(2, 1, config()).unwrap();

    a.shuffle_buffers(&b).unwrap();
    assert_relative_eq!(a.prob_all(3).unwrap(), 1.0, epsilon = 1e-10);
    let mut b_probe = QubitRegister::new(2, 0, config()).unwrap();
    b_probe.copy_state_vec(&b).unwrap();
    assert_relative_eq!(b_probe.prob_all(0).unwrap(), 1.0, epsilon = 1e-10);

    a.shuffle_buffers(&b).unwrap();
    assert_relative_eq!(a.prob_all(2).unwrap(), 1.0, epsilon = 1e-10);
    b_probe.copy_state_vec(&b).unwrap();
    assert_relative_eq!(b_probe.prob_all(1).unwrap(), 1.0, epsilon = 1e-10);
}
