//! Benchmarks for the 2×2 kernel engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use num_complex::Complex64;
use qregsim_core::matrix::Matrix2;
use qregsim_core::QubitId;
use qregsim_engine::{EngineConfig, QubitRegister};

fn hadamard() -> Matrix2 {
    let h = std::f64::consts::FRAC_1_SQRT_2;
    [
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(-h, 0.0),
    ]
}

fn s_matrix() -> Matrix2 {
    [
        Complex64::new(1.0, 0.0),
        Complex64::new(0.0, 0.0),
        Complex64::new(0.0, 0.0),
        Complex64::new(0.0, 1.0),
    ]
}

fn bench_single_qubit_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_2x2");

    for num_qubits in [12usize, 16, 20] {
        group.bench_with_input(
            BenchmarkId::new("generic", num_qubits),
            &num_qubits,
            |b, &n| {
                let mut reg =
                    QubitRegister::new(n, 0, EngineConfig::default().with_rng_seed(1)).unwrap();
                let h = hadamard();
                b.iter(|| {
                    reg.mtrx(black_box(&h), QubitId::new(n / 2)).unwrap();
                    reg.finish();
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("diagonal", num_qubits),
            &num_qubits,
            |b, &n| {
                let mut reg =
                    QubitRegister::new(n, 0, EngineConfig::default().with_rng_seed(1)).unwrap();
                let s = s_matrix();
                b.iter(|| {
                    reg.mtrx(black_box(&s), QubitId::new(n / 2)).unwrap();
                    reg.finish();
                });
            },
        );
    }

    group.finish();
}

fn bench_controlled_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("controlled");

    for num_qubits in [16usize, 20] {
        group.bench_with_input(
            BenchmarkId::new("mcmtrx", num_qubits),
            &num_qubits,
            |b, &n| {
                let mut reg =
                    QubitRegister::new(n, 0, EngineConfig::default().with_rng_seed(1)).unwrap();
                let h = hadamard();
                let controls = [QubitId::new(0), QubitId::new(1)];
                b.iter(|| {
                    reg.mcmtrx(black_box(&controls), &h, QubitId::new(n - 1))
                        .unwrap();
                    reg.finish();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_qubit_kernels, bench_controlled_kernels);
criterion_main!(benches);
