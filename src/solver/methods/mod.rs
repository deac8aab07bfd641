//! Adaptive integration methods
//!
//! Concrete implementations of the [`Evolver`](crate::solver::Evolver) trait.
//!
//! # Available Methods
//!
//! - **[`DormandPrince`]**: explicit Runge-Kutta 5(4) with FSAL
//!   - Order: fifth-order solution, fourth-order error estimate
//!   - Cost: 6 right-hand-side evaluations per step
//!   - Use: smooth late-time evolution once the photon coupling is weak
//!
//! - **[`Rosenbrock`]**: linearly implicit 2(3) method (ode23s)
//!   - Order: second-order solution, third-order error estimate
//!   - Cost: one Jacobian (n + 1 evaluations) and 3 linear solves per step
//!   - Use: **default**; the photon-baryon system is stiff before decoupling
//!
//! Both share [`drive`], which owns the step-size controller, the step limit
//! from the physical time scale, and dense output at the sample points.

use crate::error::{PerturbError, PerturbResult};
use crate::solver::{EvolutionReport, EvolverConfig, OdeSystem};

mod dopri;
mod rosenbrock;

pub use dopri::DormandPrince;
pub use rosenbrock::Rosenbrock;

/// One trial step of an embedded pair
pub(crate) trait StepMethod {
    /// Order of the error estimate
    const ERROR_ORDER: f64;

    /// Advance `(t, y)` by `h`, writing the solution and its error estimate
    ///
    /// `f0` holds dy/dt at `(t, y)`. Returns the number of right-hand-side
    /// evaluations spent.
    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &mut self,
        system: &mut dyn OdeSystem,
        t: f64,
        h: f64,
        y: &[f64],
        f0: &[f64],
        y_new: &mut [f64],
        error: &mut [f64],
    ) -> PerturbResult<usize>;

    /// Forget data cached for the previous `(t, y)`
    fn state_changed(&mut self) {}
}

/// RMS norm of the error scaled by the mixed tolerance
fn error_norm(error: &[f64], y: &[f64], y_new: &[f64], config: &EvolverConfig) -> f64 {
    let n = error.len().max(1) as f64;
    let sum: f64 = error
        .iter()
        .zip(y.iter().zip(y_new))
        .map(|(e, (a, b))| {
            let scale = config.atol + config.rtol * a.abs().max(b.abs());
            (e / scale).powi(2)
        })
        .sum();
    (sum / n).sqrt()
}

/// Cubic Hermite interpolation on the used slots, linear elsewhere
#[allow(clippy::too_many_arguments)]
fn dense_output(
    t0: f64,
    h: f64,
    y0: &[f64],
    f0: &[f64],
    y1: &[f64],
    f1: &[f64],
    used: &[bool],
    at: f64,
    out: &mut [f64],
) {
    let s = (at - t0) / h;
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    for i in 0..out.len() {
        out[i] = if used.get(i).copied().unwrap_or(true) {
            h00 * y0[i] + h10 * h * f0[i] + h01 * y1[i] + h11 * h * f1[i]
        } else {
            (1.0 - s) * y0[i] + s * y1[i]
        };
    }
}

/// Adaptive integration of `system` from `t0` to `t1` with `method`
pub(crate) fn drive<M: StepMethod>(
    method: &mut M,
    system: &mut dyn OdeSystem,
    t0: f64,
    t1: f64,
    y: &mut [f64],
    samples: &[(usize, f64)],
    config: &EvolverConfig,
) -> PerturbResult<EvolutionReport> {
    let n = y.len();
    if n != system.dimension() {
        return Err(PerturbError::Numerical(format!(
            "state has {} variables but the system expects {}",
            n,
            system.dimension()
        )));
    }
    if !(t1 > t0) {
        return Err(PerturbError::Numerical(format!(
            "integration range [{:e}, {:e}] is empty",
            t0, t1
        )));
    }

    let mut report = EvolutionReport::default();
    let mut next_sample = 0;

    // samples at the start point
    while next_sample < samples.len() && samples[next_sample].1 <= t0 {
        let (index, _) = samples[next_sample];
        system.sample(index, t0, y)?;
        next_sample += 1;
        report.samples += 1;
    }

    let mut f0 = vec![0.0; n];
    let mut f1 = vec![0.0; n];
    let mut y_new = vec![0.0; n];
    let mut error = vec![0.0; n];
    let mut y_sample = vec![0.0; n];

    system.derivatives(t0, y, &mut f0)?;
    report.evaluations += 1;

    let mut t = t0;
    let mut h = config.max_step_fraction * system.timescale(t0, y)?;
    let exponent = -1.0 / (M::ERROR_ORDER + 1.0);

    while t < t1 {
        if report.accepted + report.rejected >= config.max_steps {
            return Err(PerturbError::Numerical(format!(
                "step budget of {} exhausted at t = {:e}",
                config.max_steps, t
            )));
        }

        let h_max = config.max_step_fraction * system.timescale(t, y)?;
        h = h.min(h_max);
        // land exactly on t1 rather than leaving a sliver
        let last = t + h * (1.0 + 1e-10) >= t1;
        if last {
            h = t1 - t;
        }
        if h <= config.smallest_allowed_variation * t.abs() {
            return Err(PerturbError::Precision(format!(
                "step size {:e} underflows at t = {:e}",
                h, t
            )));
        }

        report.evaluations += method.attempt(system, t, h, y, &f0, &mut y_new, &mut error)?;
        let norm = error_norm(&error, y, &y_new, config);

        if norm.is_finite() && norm <= 1.0 {
            let t_new = if last { t1 } else { t + h };
            system.derivatives(t_new, &y_new, &mut f1)?;
            report.evaluations += 1;

            while next_sample < samples.len() && samples[next_sample].1 <= t_new {
                let (index, at) = samples[next_sample];
                if at >= t_new {
                    system.sample(index, t_new, &y_new)?;
                } else {
                    dense_output(t, h, y, &f0, &y_new, &f1, system.used_in_sources(), at, &mut y_sample);
                    system.sample(index, at, &y_sample)?;
                }
                next_sample += 1;
                report.samples += 1;
            }

            system.accepted_step(t_new, &y_new)?;
            y.copy_from_slice(&y_new);
            f0.copy_from_slice(&f1);
            t = t_new;
            method.state_changed();
            report.accepted += 1;

            let factor = if norm > 0.0 { 0.9 * norm.powf(exponent) } else { 5.0 };
            h *= factor.clamp(0.2, 5.0);
        } else {
            report.rejected += 1;
            let factor = if norm.is_finite() { (0.9 * norm.powf(exponent)).max(0.2) } else { 0.2 };
            h *= factor.min(0.9);
        }
    }

    if next_sample < samples.len() {
        return Err(PerturbError::Numerical(format!(
            "{} sample points lie beyond the integration end {:e}",
            samples.len() - next_sample,
            t1
        )));
    }

    Ok(report)
}

#[cfg(test)]
pub(crate) mod test_systems {
    //! Small systems with known solutions shared by the method tests

    use super::*;

    /// y' = −λ y, one variable per rate
    pub struct Decay {
        pub rates: Vec<f64>,
        pub used: Vec<bool>,
        pub sampled: Vec<(usize, f64, Vec<f64>)>,
        pub accepted: usize,
    }

    impl Decay {
        pub fn new(rates: Vec<f64>) -> Self {
            let used = vec![true; rates.len()];
            Self {
                rates,
                used,
                sampled: Vec::new(),
                accepted: 0,
            }
        }
    }

    impl OdeSystem for Decay {
        fn dimension(&self) -> usize {
            self.rates.len()
        }

        fn derivatives(&mut self, _t: f64, y: &[f64], dy: &mut [f64]) -> PerturbResult<()> {
            for i in 0..y.len() {
                dy[i] = -self.rates[i] * y[i];
            }
            Ok(())
        }

        fn timescale(&mut self, _t: f64, _y: &[f64]) -> PerturbResult<f64> {
            Ok(10.0)
        }

        fn used_in_sources(&self) -> &[bool] {
            &self.used
        }

        fn sample(&mut self, index: usize, t: f64, y: &[f64]) -> PerturbResult<()> {
            self.sampled.push((index, t, y.to_vec()));
            Ok(())
        }

        fn accepted_step(&mut self, _t: f64, _y: &[f64]) -> PerturbResult<()> {
            self.accepted += 1;
            Ok(())
        }
    }

    /// y'' = −ω² y written as a first-order pair
    pub struct Oscillator {
        pub omega: f64,
        pub used: Vec<bool>,
    }

    impl OdeSystem for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn derivatives(&mut self, _t: f64, y: &[f64], dy: &mut [f64]) -> PerturbResult<()> {
            dy[0] = y[1];
            dy[1] = -self.omega * self.omega * y[0];
            Ok(())
        }

        fn timescale(&mut self, _t: f64, _y: &[f64]) -> PerturbResult<f64> {
            Ok(1.0 / self.omega)
        }

        fn used_in_sources(&self) -> &[bool] {
            &self.used
        }

        fn sample(&mut self, _index: usize, _t: f64, _y: &[f64]) -> PerturbResult<()> {
            Ok(())
        }
    }
}
