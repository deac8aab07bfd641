//! Numerical knobs of the perturbation stage
//!
//! Every field has a default tuned for percent-level source functions. The
//! struct is plain data: fill it with struct update syntax or the `with_*`
//! setters, then call [`Precision::validate`].
//!
//! ```rust
//! use perturb_rs::config::{Precision, TcaMethod};
//!
//! let precision = Precision {
//!     l_max_g: 16,
//!     tight_coupling_approximation: TcaMethod::SecondOrder,
//!     ..Default::default()
//! };
//! assert!(precision.validate().is_ok());
//! ```

use crate::error::{PerturbError, PerturbResult};
use crate::solver::EvolverType;
use super::settings::{NcdmFluidMethod, RsaMethod, TcaMethod, UfaMethod};

/// Approximation triggers, truncations, sampling densities and tolerances
#[derive(Debug, Clone)]
pub struct Precision {
    // ---------------------------------------------------------------------------------------------
    // Starting time
    // ---------------------------------------------------------------------------------------------
    /// Integration starts once τ_c/τ_h is below this (small k)
    pub start_small_k_at_tau_c_over_tau_h: f64,

    /// ... and τ_h/τ_k is below this (large k)
    pub start_large_k_at_tau_h_over_tau_k: f64,

    /// Source sampling starts when τ_c/τ_h crosses this value
    pub start_sources_at_tau_c_over_tau_h: f64,

    // ---------------------------------------------------------------------------------------------
    // Approximation triggers
    // ---------------------------------------------------------------------------------------------
    pub tight_coupling_trigger_tau_c_over_tau_h: f64,
    pub tight_coupling_trigger_tau_c_over_tau_k: f64,
    pub radiation_streaming_trigger_tau_over_tau_k: f64,
    pub ur_fluid_trigger_tau_over_tau_k: f64,
    pub ncdm_fluid_trigger_tau_over_tau_k: f64,
    pub idm_dr_tight_coupling_trigger_tau_c_over_tau_h: f64,
    pub idm_dr_tight_coupling_trigger_tau_c_over_tau_k: f64,
    pub idr_streaming_trigger_tau_over_tau_k: f64,

    pub tight_coupling_approximation: TcaMethod,
    pub radiation_streaming_approximation: RsaMethod,
    pub ur_fluid_approximation: UfaMethod,
    pub ncdm_fluid_approximation: NcdmFluidMethod,
    /// The idr streaming and idm–dr tight coupling switches
    pub idr_approximations: bool,

    /// Relative precision on approximation switch times
    pub tol_tau_approx: f64,

    // ---------------------------------------------------------------------------------------------
    // Hierarchy truncation
    // ---------------------------------------------------------------------------------------------
    pub l_max_g: usize,
    pub l_max_pol_g: usize,
    pub l_max_ur: usize,
    pub l_max_idr: usize,
    pub l_max_ncdm: usize,
    pub l_max_g_ten: usize,
    pub l_max_pol_g_ten: usize,

    // ---------------------------------------------------------------------------------------------
    // Time sampling
    // ---------------------------------------------------------------------------------------------
    /// Source sampling step in units of the variation time scale
    pub perturbations_sampling_stepsize: f64,

    /// Smallest step/τ accepted before declaring an underflow
    pub smallest_allowed_variation: f64,

    // ---------------------------------------------------------------------------------------------
    // Wavenumber sampling
    // ---------------------------------------------------------------------------------------------
    pub k_min_tau0: f64,
    pub k_max_tau0_over_l_max: f64,
    pub k_step_sub: f64,
    pub k_step_super: f64,
    pub k_step_transition: f64,
    pub k_step_super_reduction: f64,
    pub k_per_decade_for_pk: f64,
    pub k_per_decade_for_bao: f64,
    pub k_bao_center: f64,
    pub k_bao_width: f64,

    // ---------------------------------------------------------------------------------------------
    // Integration
    // ---------------------------------------------------------------------------------------------
    pub evolver: EvolverType,

    /// Relative tolerance of the embedded error estimate
    pub tol_perturbations_integration: f64,

    /// Absolute tolerance of the embedded error estimate
    pub perturbations_abs_tolerance: f64,

    /// Largest step in units of the shortest physical time scale
    pub perturbations_integration_stepsize: f64,

    /// Step budget per regime interval
    pub max_steps_per_interval: usize,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            start_small_k_at_tau_c_over_tau_h: 0.0015,
            start_large_k_at_tau_h_over_tau_k: 0.07,
            start_sources_at_tau_c_over_tau_h: 0.008,

            tight_coupling_trigger_tau_c_over_tau_h: 0.015,
            tight_coupling_trigger_tau_c_over_tau_k: 0.01,
            radiation_streaming_trigger_tau_over_tau_k: 45.0,
            ur_fluid_trigger_tau_over_tau_k: 30.0,
            ncdm_fluid_trigger_tau_over_tau_k: 31.0,
            idm_dr_tight_coupling_trigger_tau_c_over_tau_h: 0.015,
            idm_dr_tight_coupling_trigger_tau_c_over_tau_k: 0.01,
            idr_streaming_trigger_tau_over_tau_k: 50.0,

            tight_coupling_approximation: TcaMethod::FirstOrder,
            radiation_streaming_approximation: RsaMethod::MdWithReio,
            ur_fluid_approximation: UfaMethod::Class,
            ncdm_fluid_approximation: NcdmFluidMethod::Class,
            idr_approximations: true,

            tol_tau_approx: 1e-10,

            l_max_g: 12,
            l_max_pol_g: 10,
            l_max_ur: 17,
            l_max_idr: 17,
            l_max_ncdm: 17,
            l_max_g_ten: 5,
            l_max_pol_g_ten: 5,

            perturbations_sampling_stepsize: 0.10,
            smallest_allowed_variation: 1e-16,

            k_min_tau0: 0.1,
            k_max_tau0_over_l_max: 1.8,
            k_step_sub: 0.05,
            k_step_super: 0.002,
            k_step_transition: 0.2,
            k_step_super_reduction: 0.1,
            k_per_decade_for_pk: 10.0,
            k_per_decade_for_bao: 70.0,
            k_bao_center: 3.0,
            k_bao_width: 4.0,

            evolver: EvolverType::Rosenbrock,
            tol_perturbations_integration: 1e-5,
            perturbations_abs_tolerance: 1e-10,
            perturbations_integration_stepsize: 0.5,
            max_steps_per_interval: 200_000,
        }
    }
}

impl Precision {
    /// Coarser settings for quick runs (tests, demos)
    pub fn fast() -> Self {
        Self {
            l_max_g: 8,
            l_max_pol_g: 6,
            l_max_ur: 8,
            l_max_idr: 8,
            l_max_ncdm: 8,
            perturbations_sampling_stepsize: 0.3,
            tol_perturbations_integration: 1e-4,
            k_step_sub: 0.1,
            k_per_decade_for_pk: 5.0,
            k_per_decade_for_bao: 10.0,
            ..Default::default()
        }
    }

    pub fn with_evolver(mut self, evolver: EvolverType) -> Self {
        self.evolver = evolver;
        self
    }

    pub fn with_tca(mut self, method: TcaMethod) -> Self {
        self.tight_coupling_approximation = method;
        self
    }

    pub fn with_rsa(mut self, method: RsaMethod) -> Self {
        self.radiation_streaming_approximation = method;
        self
    }

    pub fn with_ufa(mut self, method: UfaMethod) -> Self {
        self.ur_fluid_approximation = method;
        self
    }

    pub fn with_ncdm_fluid(mut self, method: NcdmFluidMethod) -> Self {
        self.ncdm_fluid_approximation = method;
        self
    }

    pub fn with_sampling_stepsize(mut self, stepsize: f64) -> Self {
        self.perturbations_sampling_stepsize = stepsize;
        self
    }

    /// Validate that parameters are meaningful
    pub fn validate(&self) -> PerturbResult<()> {
        let positive = [
            ("start_small_k_at_tau_c_over_tau_h", self.start_small_k_at_tau_c_over_tau_h),
            ("start_large_k_at_tau_h_over_tau_k", self.start_large_k_at_tau_h_over_tau_k),
            ("start_sources_at_tau_c_over_tau_h", self.start_sources_at_tau_c_over_tau_h),
            ("tight_coupling_trigger_tau_c_over_tau_h", self.tight_coupling_trigger_tau_c_over_tau_h),
            ("tight_coupling_trigger_tau_c_over_tau_k", self.tight_coupling_trigger_tau_c_over_tau_k),
            ("radiation_streaming_trigger_tau_over_tau_k", self.radiation_streaming_trigger_tau_over_tau_k),
            ("ur_fluid_trigger_tau_over_tau_k", self.ur_fluid_trigger_tau_over_tau_k),
            ("ncdm_fluid_trigger_tau_over_tau_k", self.ncdm_fluid_trigger_tau_over_tau_k),
            ("idm_dr_tight_coupling_trigger_tau_c_over_tau_h", self.idm_dr_tight_coupling_trigger_tau_c_over_tau_h),
            ("idm_dr_tight_coupling_trigger_tau_c_over_tau_k", self.idm_dr_tight_coupling_trigger_tau_c_over_tau_k),
            ("idr_streaming_trigger_tau_over_tau_k", self.idr_streaming_trigger_tau_over_tau_k),
            ("tol_tau_approx", self.tol_tau_approx),
            ("perturbations_sampling_stepsize", self.perturbations_sampling_stepsize),
            ("smallest_allowed_variation", self.smallest_allowed_variation),
            ("k_min_tau0", self.k_min_tau0),
            ("k_max_tau0_over_l_max", self.k_max_tau0_over_l_max),
            ("k_step_sub", self.k_step_sub),
            ("k_step_super", self.k_step_super),
            ("k_step_transition", self.k_step_transition),
            ("k_step_super_reduction", self.k_step_super_reduction),
            ("k_per_decade_for_pk", self.k_per_decade_for_pk),
            ("k_per_decade_for_bao", self.k_per_decade_for_bao),
            ("k_bao_center", self.k_bao_center),
            ("tol_perturbations_integration", self.tol_perturbations_integration),
            ("perturbations_abs_tolerance", self.perturbations_abs_tolerance),
            ("perturbations_integration_stepsize", self.perturbations_integration_stepsize),
        ];
        for (name, value) in positive {
            if !(value > 0.0) || !value.is_finite() {
                return Err(PerturbError::Configuration(format!(
                    "{} must be positive and finite (got {})",
                    name, value
                )));
            }
        }

        // ln(k_bao_width) appears in a denominator
        if !(self.k_bao_width > 1.0) {
            return Err(PerturbError::Configuration(format!(
                "k_bao_width must be > 1 (got {})",
                self.k_bao_width
            )));
        }

        let truncations = [
            ("l_max_g", self.l_max_g),
            ("l_max_pol_g", self.l_max_pol_g),
            ("l_max_ur", self.l_max_ur),
            ("l_max_idr", self.l_max_idr),
            ("l_max_ncdm", self.l_max_ncdm),
            ("l_max_g_ten", self.l_max_g_ten),
            ("l_max_pol_g_ten", self.l_max_pol_g_ten),
        ];
        for (name, value) in truncations {
            if value < 4 {
                return Err(PerturbError::Configuration(format!(
                    "{} must be at least 4 (got {})",
                    name, value
                )));
            }
        }

        if self.max_steps_per_interval == 0 {
            return Err(PerturbError::Configuration(
                "max_steps_per_interval must be greater than 0".to_string(),
            ));
        }

        if self.start_sources_at_tau_c_over_tau_h <= self.start_small_k_at_tau_c_over_tau_h {
            return Err(PerturbError::Configuration(
                "sources cannot start before the integration (start_sources_at_tau_c_over_tau_h too small)"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
