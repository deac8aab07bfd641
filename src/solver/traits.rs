//! Integrator traits and types
//!
//! # Design Philosophy
//!
//! The perturbation equations are handed to the integrator as an
//! [`OdeSystem`]: a right-hand side, a physical time scale bounding the step,
//! a sampling callback and a step callback. The integrator never knows which
//! variables it integrates.
//!
//! - `Evolver` trait: one adaptive integration from t₀ to t₁
//! - `EvolverType`: selection of the concrete method
//! - `EvolverConfig`: tolerances and step limits
//! - `EvolutionReport`: step statistics of one integration

use std::fmt;
use std::str::FromStr;

use crate::config::Precision;
use crate::error::{PerturbError, PerturbResult};

// =================================================================================================
// Evolver selection
// =================================================================================================

/// Integration method
///
/// # Examples
///
/// ```rust
/// use perturb_rs::solver::EvolverType;
///
/// let evolver: EvolverType = "rosenbrock".parse().unwrap();
/// assert_eq!(evolver, EvolverType::Rosenbrock);
/// assert_eq!(EvolverType::try_from(0).unwrap(), EvolverType::DormandPrince);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvolverType {
    /// Explicit Dormand-Prince 5(4), for non-stiff late-time evolution
    DormandPrince,
    /// Linearly implicit Rosenbrock 2(3), for stiff systems
    #[default]
    Rosenbrock,
}

impl EvolverType {
    pub fn name(&self) -> &'static str {
        match self {
            EvolverType::DormandPrince => "dormand_prince",
            EvolverType::Rosenbrock => "rosenbrock",
        }
    }
}

impl TryFrom<i32> for EvolverType {
    type Error = PerturbError;

    fn try_from(code: i32) -> PerturbResult<Self> {
        match code {
            0 => Ok(EvolverType::DormandPrince),
            1 => Ok(EvolverType::Rosenbrock),
            _ => Err(PerturbError::Configuration(format!(
                "evolver code {} out of range [0, 1]",
                code
            ))),
        }
    }
}

impl FromStr for EvolverType {
    type Err = PerturbError;

    fn from_str(name: &str) -> PerturbResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dormand_prince" | "dopri" | "rk" => Ok(EvolverType::DormandPrince),
            "rosenbrock" | "stiff" => Ok(EvolverType::Rosenbrock),
            other => Err(PerturbError::Configuration(format!(
                "unknown evolver '{}' (expected dormand_prince or rosenbrock)",
                other
            ))),
        }
    }
}

impl fmt::Display for EvolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =================================================================================================
// ODE system
// =================================================================================================

/// Right-hand side and callbacks of one integration
///
/// All methods take `&mut self`: the system owns its scratch space and is
/// driven by exactly one integrator at a time.
pub trait OdeSystem {
    /// Number of integrated variables
    fn dimension(&self) -> usize;

    /// Fill `dy` with dy/dt at `(t, y)`
    fn derivatives(&mut self, t: f64, y: &[f64], dy: &mut [f64]) -> PerturbResult<()>;

    /// Shortest physical time scale at `t`; steps never exceed a fraction of it
    fn timescale(&mut self, t: f64, y: &[f64]) -> PerturbResult<f64>;

    /// Mask of the variables needed at sample points
    ///
    /// Masked-out variables are interpolated linearly between steps, the
    /// others with the cubic Hermite interpolant.
    fn used_in_sources(&self) -> &[bool];

    /// Called once per requested sample point, in increasing `t`
    fn sample(&mut self, index: usize, t: f64, y: &[f64]) -> PerturbResult<()>;

    /// Called after every accepted step
    fn accepted_step(&mut self, _t: f64, _y: &[f64]) -> PerturbResult<()> {
        Ok(())
    }
}

// =================================================================================================
// Configuration and report
// =================================================================================================

/// Tolerances and step limits of one integration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvolverConfig {
    pub rtol: f64,
    pub atol: f64,
    /// Largest step as a fraction of the system time scale
    pub max_step_fraction: f64,
    /// Smallest step relative to |t| before the integration is abandoned
    pub smallest_allowed_variation: f64,
    pub max_steps: usize,
}

impl EvolverConfig {
    pub fn from_precision(precision: &Precision) -> Self {
        Self {
            rtol: precision.tol_perturbations_integration,
            atol: precision.perturbations_abs_tolerance,
            max_step_fraction: precision.perturbations_integration_stepsize,
            smallest_allowed_variation: precision.smallest_allowed_variation,
            max_steps: precision.max_steps_per_interval,
        }
    }

    pub fn validate(&self) -> PerturbResult<()> {
        if !(self.rtol > 0.0) || !(self.atol > 0.0) {
            return Err(PerturbError::Configuration(
                "integration tolerances must be positive".to_string(),
            ));
        }
        if !(self.max_step_fraction > 0.0) {
            return Err(PerturbError::Configuration(
                "maximum step fraction must be positive".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(PerturbError::Configuration("step budget must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for EvolverConfig {
    fn default() -> Self {
        Self::from_precision(&Precision::default())
    }
}

/// Step statistics of one integration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvolutionReport {
    pub accepted: usize,
    pub rejected: usize,
    pub evaluations: usize,
    pub samples: usize,
}

impl std::ops::AddAssign for EvolutionReport {
    fn add_assign(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.evaluations += other.evaluations;
        self.samples += other.samples;
    }
}

// =================================================================================================
// Evolver trait
// =================================================================================================

/// Adaptive integrator
///
/// `samples` lists `(index, t)` pairs in increasing `t`, all inside
/// `[t0, t1]`. Each one is reported through [`OdeSystem::sample`] exactly
/// once; on return `y` holds the state at `t1`.
pub trait Evolver: Send + Sync {
    fn name(&self) -> &str;

    fn evolve(
        &self,
        system: &mut dyn OdeSystem,
        t0: f64,
        t1: f64,
        y: &mut [f64],
        samples: &[(usize, f64)],
        config: &EvolverConfig,
    ) -> PerturbResult<EvolutionReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evolver_codes_and_names() {
        assert_eq!(EvolverType::try_from(1).unwrap(), EvolverType::Rosenbrock);
        assert!(EvolverType::try_from(2).unwrap_err().is_configuration());
        assert_eq!("DOPRI".parse::<EvolverType>().unwrap(), EvolverType::DormandPrince);
        assert!("euler".parse::<EvolverType>().is_err());
        assert_eq!(EvolverType::Rosenbrock.to_string(), "rosenbrock");
    }

    #[test]
    fn test_config_validation() {
        assert!(EvolverConfig::default().validate().is_ok());
        let config = EvolverConfig {
            rtol: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_report_accumulates() {
        let mut total = EvolutionReport::default();
        total += EvolutionReport { accepted: 3, rejected: 1, evaluations: 20, samples: 2 };
        total += EvolutionReport { accepted: 2, rejected: 0, evaluations: 12, samples: 1 };
        assert_eq!(total.accepted, 5);
        assert_eq!(total.evaluations, 32);
    }
}
