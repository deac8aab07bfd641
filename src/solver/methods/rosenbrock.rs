//! Rosenbrock 2(3) integrator (ode23s)
//!
//! # Mathematical Background
//!
//! Linearly implicit method of Shampine and Reichelt. With `J = ∂f/∂y`,
//! `T = ∂f/∂t` and `d = 1/(2 + √2)`:
//!
//! ```text
//! W  = I − h d J
//! k₁ = W⁻¹ (F₀ + h d T)
//! F₁ = f(t + h/2, y + h k₁/2)
//! k₂ = W⁻¹ (F₁ − k₁) + k₁
//! yₙ₊₁ = yₙ + h k₂
//! F₂ = f(t + h, yₙ₊₁)
//! k₃ = W⁻¹ (F₂ − e₃₂ (k₂ − F₁) − 2 (k₁ − F₀) + h d T),   e₃₂ = 6 + √2
//! err = h (k₁ − 2 k₂ + k₃) / 6
//! ```
//!
//! The method is L-stable, so the step is limited by accuracy alone even
//! while Thomson scattering drives the photon-baryon slip on time scales far
//! below the Hubble time.
//!
//! # Jacobian
//!
//! Formed by forward differences at the start of a step and kept across
//! rejected attempts from the same point. Each Jacobian costs `n + 1`
//! evaluations of the right-hand side.

use nalgebra::{DMatrix, DVector};

use crate::error::{PerturbError, PerturbResult};
use crate::solver::{EvolutionReport, Evolver, EvolverConfig, OdeSystem};
use super::{drive, StepMethod};

/// Linearly implicit Rosenbrock 2(3) evolver
#[derive(Debug, Clone, Copy, Default)]
pub struct Rosenbrock;

impl Rosenbrock {
    pub fn new() -> Self {
        Self
    }
}

struct Linearization {
    jacobian: DMatrix<f64>,
    dfdt: DVector<f64>,
    fresh: bool,
    y_shift: Vec<f64>,
    f_shift: Vec<f64>,
    y_stage: Vec<f64>,
    f1: Vec<f64>,
    f2: Vec<f64>,
}

impl Linearization {
    fn new(n: usize) -> Self {
        Self {
            jacobian: DMatrix::zeros(n, n),
            dfdt: DVector::zeros(n),
            fresh: false,
            y_shift: vec![0.0; n],
            f_shift: vec![0.0; n],
            y_stage: vec![0.0; n],
            f1: vec![0.0; n],
            f2: vec![0.0; n],
        }
    }

    /// Forward-difference Jacobian and backward-difference ∂f/∂t at `(t, y)`
    fn linearize(&mut self, system: &mut dyn OdeSystem, t: f64, h: f64, y: &[f64], f0: &[f64]) -> PerturbResult<usize> {
        let n = y.len();
        let sqrt_eps = f64::EPSILON.sqrt();
        self.y_shift.copy_from_slice(y);

        for j in 0..n {
            let delta = sqrt_eps * y[j].abs().max(1e-8);
            self.y_shift[j] = y[j] + delta;
            let step = self.y_shift[j] - y[j];
            system.derivatives(t, &self.y_shift, &mut self.f_shift)?;
            for i in 0..n {
                self.jacobian[(i, j)] = (self.f_shift[i] - f0[i]) / step;
            }
            self.y_shift[j] = y[j];
        }

        let dt = sqrt_eps * t.abs().max(h.abs());
        system.derivatives(t - dt, y, &mut self.f_shift)?;
        for i in 0..n {
            self.dfdt[i] = (f0[i] - self.f_shift[i]) / dt;
        }

        self.fresh = true;
        Ok(n + 1)
    }
}

impl StepMethod for Linearization {
    const ERROR_ORDER: f64 = 2.0;

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
        let d = 1.0 / (2.0 + std::f64::consts::SQRT_2);
        let e32 = 6.0 + std::f64::consts::SQRT_2;

        let mut evaluations = 0;
        if !self.fresh {
            evaluations += self.linearize(system, t, h, y, f0)?;
        }

        let w = DMatrix::identity(n, n) - &self.jacobian * (h * d);
        let lu = w.lu();
        let solve = |rhs: DVector<f64>| {
            lu.solve(&rhs).ok_or_else(|| {
                PerturbError::Numerical(format!("singular iteration matrix at t = {:e}, h = {:e}", t, h))
            })
        };

        let f0_vec = DVector::from_column_slice(f0);
        let hdt = &self.dfdt * (h * d);

        let k1 = solve(&f0_vec + &hdt)?;
        for i in 0..n {
            self.y_stage[i] = y[i] + 0.5 * h * k1[i];
        }
        system.derivatives(t + 0.5 * h, &self.y_stage, &mut self.f1)?;
        let f1 = DVector::from_column_slice(&self.f1);

        let k2 = solve(&f1 - &k1)? + &k1;
        for i in 0..n {
            y_new[i] = y[i] + h * k2[i];
        }
        system.derivatives(t + h, y_new, &mut self.f2)?;
        let f2 = DVector::from_column_slice(&self.f2);

        let rhs3 = &f2 - (&k2 - &f1) * e32 - (&k1 - &f0_vec) * 2.0 + &hdt;
        let k3 = solve(rhs3)?;
        for i in 0..n {
            error[i] = h / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]);
        }

        Ok(evaluations + 2)
    }

    fn state_changed(&mut self) {
        self.fresh = false;
    }
}

impl Evolver for Rosenbrock {
    fn name(&self) -> &str {
        "Rosenbrock 2(3)"
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
        let mut linearization = Linearization::new(y.len());
        drive(&mut linearization, system, t0, t1, y, samples, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::methods::test_systems::{Decay, Oscillator};
    use crate::solver::DormandPrince;
    use approx::assert_relative_eq;

    fn config() -> EvolverConfig {
        EvolverConfig {
            rtol: 1e-6,
            atol: 1e-12,
            ..Default::default()
        }
    }

    #[test]
    fn test_decay_matches_exponential() {
        let mut system = Decay::new(vec![1.0]);
        let mut y = vec![1.0];
        Rosenbrock::new()
            .evolve(&mut system, 0.0, 2.0, &mut y, &[], &config())
            .unwrap();
        assert_relative_eq!(y[0], (-2.0f64).exp(), max_relative = 1e-4);
    }

    #[test]
    fn test_stiff_decay_takes_few_steps() {
        // one mode decays 10⁴ times faster than the other
        let mut implicit = Decay::new(vec![1e4, 1.0]);
        let mut y = vec![1.0, 1.0];
        let report = Rosenbrock::new()
            .evolve(&mut implicit, 0.0, 1.0, &mut y, &[], &config())
            .unwrap();
        assert!(y[0].abs() < 1e-6);
        assert_relative_eq!(y[1], (-1.0f64).exp(), max_relative = 1e-4);

        let mut explicit = Decay::new(vec![1e4, 1.0]);
        let mut y = vec![1.0, 1.0];
        let explicit_report = DormandPrince::new()
            .evolve(&mut explicit, 0.0, 1.0, &mut y, &[], &config())
            .unwrap();
        assert!(report.accepted * 5 < explicit_report.accepted);
    }

    #[test]
    fn test_oscillator_samples() {
        let mut system = Oscillator { omega: 1.0, used: vec![true, false] };
        let mut y = vec![0.0, 1.0];
        let samples = [(0, 0.5), (1, 1.0), (2, 1.5)];
        let report = Rosenbrock::new()
            .evolve(&mut system, 0.0, 1.5, &mut y, &samples, &config())
            .unwrap();
        assert_eq!(report.samples, 3);
        assert_relative_eq!(y[0], 1.5f64.sin(), epsilon = 1e-4);
    }
}
