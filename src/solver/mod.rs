//! Numerical integration of the perturbation equations
//!
//! This module owns everything about *how* the equations of
//! [`models`](crate::models) are advanced in time. It never decides what the
//! variables mean.
//!
//! # Core Concepts
//!
//! ## Layers
//!
//! 1. **Evolver** ([`Evolver`]): one adaptive integration of an [`OdeSystem`]
//!    from t₀ to t₁, with dense output at requested sample times
//!    - [`DormandPrince`]: explicit 5(4) pair
//!    - [`Rosenbrock`]: linearly implicit 2(3) pair for stiff regimes
//!
//! 2. **Task** ([`solve_one`]): one (mode, initial condition, k). Finds the
//!    starting time, cuts the range into regime intervals, seeds and reseeds
//!    the state, and fills the source columns of that k.
//!
//! 3. **Scheduler** ([`run_tasks`]): every task of one (mode, initial
//!    condition), fanned out over a thread pool. Each task writes only its own
//!    k row of the table.
//!
//! # Workflow Diagram
//!
//! ```text
//! ┌──────────────────┐
//! │ run_tasks        │  (mode, ic): k descending, rayon
//! └────────┬─────────┘
//!          │ one row [type][τ] per k
//! ┌────────▼─────────┐
//! │ solve_one        │  τ_ini bisection, regime intervals
//! └────────┬─────────┘
//!          │ per interval
//! ┌────────▼─────────┐
//! │ Evolver::evolve  │  adaptive steps, dense output
//! └────────┬─────────┘
//!          │ callbacks
//! ┌────────▼─────────┐
//! │ OdeSystem        │  derivatives, timescale, sources
//! └──────────────────┘
//! ```
//!
//! # Choosing an Evolver
//!
//! - **Rosenbrock** (default): the photon-baryon slip relaxes on the Thomson
//!   time, far below the Hubble time before recombination. An explicit method
//!   would be limited by stability rather than accuracy there.
//! - **Dormand-Prince**: cheaper per step when every tight-coupled regime is
//!   handled by the approximations and the state is large (many ncdm momenta).
//!
//! # Error Handling
//!
//! Every failure is a [`PerturbError`](crate::error::PerturbError). Task
//! failures are wrapped with the (mode, ic, k) that produced them; the
//! scheduler reports the first one.

// =================================================================================================
// Module Declarations
// =================================================================================================
mod traits;
mod methods;
pub mod evolve;
pub mod scheduler;

// =================================================================================================
// Parallel Execution Threshold
// =================================================================================================
//
// Read once per (mode, initial condition) by run_tasks. Relaxed ordering:
// the value only picks sequential or pooled dispatch, results are identical.
// =================================================================================================

use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of tasks above which [`run_tasks`] switches to the pool
const DEFAULT_PARALLEL_THRESHOLD: usize = 4;

/// Current k count above which tasks go to the pool
static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

/// Smallest k grid integrated on the pool
///
/// [`run_tasks`] integrates the wavenumbers of one (mode, initial condition)
/// sequentially when there are at most this many of them, and on the
/// rayon pool otherwise (only with the `parallel` feature).
///
/// # Example
///
/// ```rust
/// use perturb_rs::solver::parallel_threshold;
///
/// assert!(parallel_threshold() > 0);
/// ```
pub fn parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Relaxed)
}

/// Change the k count at which [`run_tasks`] switches to the pool
///
/// # Panics
///
/// Panics when `threshold == 0`.
///
/// # Example
///
/// ```rust
/// use perturb_rs::solver::{parallel_threshold, set_parallel_threshold};
///
/// let previous = parallel_threshold();
/// set_parallel_threshold(64);
/// assert_eq!(parallel_threshold(), 64);
///
/// set_parallel_threshold(previous);
/// ```
pub fn set_parallel_threshold(threshold: usize) {
    assert!(threshold > 0, "parallel threshold must be at least 1");
    PARALLEL_THRESHOLD.store(threshold, Ordering::Relaxed);
}

/// Test-only: sets the threshold and puts the old value back when dropped
///
/// ```rust,ignore
/// let _guard = crate::solver::ThresholdGuard::save(1);
/// // every run_tasks call now uses the pool …
/// // … until _guard is dropped.
/// ```
#[cfg(test)]
pub(crate) struct ThresholdGuard {
    previous: usize,
}

#[cfg(test)]
impl ThresholdGuard {
    pub(crate) fn save(new_value: usize) -> Self {
        let previous = parallel_threshold();
        set_parallel_threshold(new_value);
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for ThresholdGuard {
    fn drop(&mut self) {
        PARALLEL_THRESHOLD.store(self.previous, Ordering::Relaxed);
    }
}

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use traits::{
    EvolutionReport,
    Evolver,
    EvolverConfig,
    EvolverType,
    OdeSystem,
};

pub use methods::{DormandPrince, Rosenbrock};

pub use evolve::{solve_one, TaskOutput, Trace};
pub use scheduler::{run_tasks, ModeTable};

/// Concrete evolver for `evolver`
///
/// # Example
///
/// ```rust
/// use perturb_rs::solver::{evolver_for, EvolverType};
///
/// assert_eq!(evolver_for(EvolverType::Rosenbrock).name(), "Rosenbrock 2(3)");
/// ```
pub fn evolver_for(evolver: EvolverType) -> Box<dyn Evolver> {
    match evolver {
        EvolverType::DormandPrince => Box::new(DormandPrince::new()),
        EvolverType::Rosenbrock => Box::new(Rosenbrock::new()),
    }
}

// =================================================================================================
// Helper Functions
// =================================================================================================

use crate::error::{PerturbError, PerturbResult};

/// Reject a state containing NaN or Inf
///
/// `what` names the state in the message (for example the regime interval).
pub(crate) fn validate_state(y: &[f64], tau: f64, what: &str) -> PerturbResult<()> {
    if let Some(index) = y.iter().position(|v| v.is_nan()) {
        return Err(PerturbError::Numerical(format!(
            "NaN in slot {} of {} at tau = {:e}",
            index, what, tau
        )));
    }
    if let Some(index) = y.iter().position(|v| v.is_infinite()) {
        return Err(PerturbError::Numerical(format!(
            "infinity in slot {} of {} at tau = {:e}",
            index, what, tau
        )));
    }
    Ok(())
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_value() {
        assert_eq!(DEFAULT_PARALLEL_THRESHOLD, 4);
    }

    #[test]
    fn test_get_and_set_threshold() {
        let _guard = ThresholdGuard::save(500);
        assert_eq!(parallel_threshold(), 500);
    }

    #[test]
    #[should_panic(expected = "parallel threshold must be at least 1")]
    fn test_zero_threshold_panics() {
        set_parallel_threshold(0);
    }

    #[test]
    fn test_threshold_guard_restores_previous_value() {
        let before = parallel_threshold();
        {
            let _guard = ThresholdGuard::save(42);
            assert_eq!(parallel_threshold(), 42);
        }
        assert_eq!(parallel_threshold(), before);
    }

    #[test]
    fn test_evolver_factory() {
        assert_eq!(evolver_for(EvolverType::DormandPrince).name(), "Dormand-Prince 5(4)");
        assert_eq!(evolver_for(EvolverType::Rosenbrock).name(), "Rosenbrock 2(3)");
    }

    #[test]
    fn test_validate_state_reports_slot() {
        assert!(validate_state(&[1.0, 2.0], 1.0, "state").is_ok());
        let error = validate_state(&[1.0, f64::NAN], 1.0, "state").unwrap_err();
        assert!(error.to_string().contains("slot 1"));
        assert!(validate_state(&[f64::INFINITY], 1.0, "state").is_err());
    }
}
