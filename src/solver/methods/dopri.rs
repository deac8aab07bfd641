//! Dormand-Prince 5(4) integrator
//!
//! # Mathematical Background
//!
//! Seven-stage explicit Runge-Kutta pair. The fifth-order solution is
//! propagated; the difference with the embedded fourth-order solution is
//! the local error estimate:
//!
//! ```text
//! kᵢ = f(tₙ + cᵢh, yₙ + h Σⱼ aᵢⱼ kⱼ)
//! yₙ₊₁ = yₙ + h Σ bᵢ kᵢ
//! err  = h Σ (bᵢ − b̂ᵢ) kᵢ
//! ```
//!
//! The last stage is evaluated at `(tₙ₊₁, yₙ₊₁)` (first same as last), so an
//! accepted step costs six new evaluations.
//!
//! # When NOT to Use
//!
//! Stiff systems: while the photon mean free time is much shorter than the
//! Hubble time the explicit stability limit forces tiny steps. Use
//! [`Rosenbrock`](super::Rosenbrock) there.

use crate::error::PerturbResult;
use crate::solver::{EvolutionReport, Evolver, EvolverConfig, OdeSystem};
use super::{drive, StepMethod};

const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0, 0.0],
    [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0, 0.0],
    [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];

/// b − b̂
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

/// Explicit Dormand-Prince 5(4) evolver
#[derive(Debug, Clone, Copy, Default)]
pub struct DormandPrince;

impl DormandPrince {
    pub fn new() -> Self {
        Self
    }
}

struct Stages {
    k: Vec<Vec<f64>>,
    y_stage: Vec<f64>,
}

impl Stages {
    fn new(n: usize) -> Self {
        Self {
            k: vec![vec![0.0; n]; 7],
            y_stage: vec![0.0; n],
        }
    }
}

impl StepMethod for Stages {
    const ERROR_ORDER: f64 = 4.0;

    fn attempt(
        &mut self,
        system: &mut dyn OdeSystem,
        t: f64,
        h: f64,
        y: &[f64],
        f0: &[f64],
        y_new: &mut [f64],
        error: &mut [f64],
    ) -> PerturbResult<usize> {
        let n = y.len();
        self.k[0].copy_from_slice(f0);

        for stage in 1..7 {
            for i in 0..n {
                let mut increment = 0.0;
                for (j, a) in A[stage].iter().enumerate().take(stage) {
                    increment += a * self.k[j][i];
                }
                self.y_stage[i] = y[i] + h * increment;
            }
            system.derivatives(t + C[stage] * h, &self.y_stage, &mut self.k[stage])?;
        }

        // the last row of A is the fifth-order weights
        y_new.copy_from_slice(&self.y_stage);
        for i in 0..n {
            let mut e = 0.0;
            for (s, weight) in E.iter().enumerate() {
                e += weight * self.k[s][i];
            }
            error[i] = h * e;
        }

        Ok(6)
    }
}

impl Evolver for DormandPrince {
    fn name(&self) -> &str {
        "Dormand-Prince 5(4)"
    }

    fn evolve(
        &self,
        system: &mut dyn OdeSystem,
        t0: f64,
        t1: f64,
        y: &mut [f64],
        samples: &[(usize, f64)],
        config: &EvolverConfig,
    ) -> PerturbResult<EvolutionReport> {
        let mut stages = Stages::new(y.len());
        drive(&mut stages, system, t0, t1, y, samples, config)
    }
}
