//! Prepare a Bell pair and sample it

use num_complex::Complex64;
use qregsim_core::QubitId;
use qregsim_engine::{EngineConfig, QubitRegister};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = QubitRegister::new(2, 0, EngineConfig::default())?;

    let h = std::f64::consts::FRAC_1_SQRT_2;
    let hadamard = [
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(-h, 0.0),
    ];
    let x = [
        Complex64::new(0.0, 0.0),
        Complex64::new(1.0, 0.0),
        Complex64::new(1.0, 0.0),
        Complex64::new(0.0, 0.0),
    ];

    reg.mtrx(&hadamard, QubitId::new(0))?;
    reg.mcmtrx(&[QubitId::new(0)], &x, QubitId::new(1))?;

    println!("P(q0 = 1) = {:.3}", reg.prob(QubitId::new(0))?);
    println!("P(q1 = 1) = {:.3}", reg.prob(QubitId::new(1))?);

    let mut counts = [0u32; 4];
    for _ in 0..1000 {
        reg.set_permutation(0, None)?;
        reg.mtrx(&hadamard, QubitId::new(0))?;
        reg.mcmtrx(&[QubitId::new(0)], &x, QubitId::new(1))?;
        counts[reg.m_all()? as usize] += 1;
    }

    for (outcome, count) in counts.iter().enumerate() {
        println!("|{outcome:02b}>: {count}");
    }

    Ok(())
}
