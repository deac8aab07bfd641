//! Collaborator interfaces consumed by the perturbation core
//!
//! This module defines what the perturbation stage needs from the outside:
//! - `Background`: expansion history, queried by conformal time
//! - `Thermodynamics`: ionization history, queried by redshift
//! - `InterpolationCursor`: cheap repeated queries at nearby times
//!
//! Both traits are queried millions of times per run, so records are filled
//! in place instead of being returned by value.

use crate::error::{PerturbError, PerturbResult};
use super::quadrature::MomentumQuadrature;

// =================================================================================================
// Interpolation cursor
// =================================================================================================

/// Opaque state remembering the last bracketing index of a table lookup
///
/// Consecutive queries from one integration are close in time, so the
/// previous bracket is checked before falling back to a binary search.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolationCursor {
    last_index: usize,
}

impl InterpolationCursor {
    /// Create a cursor positioned at the beginning of any table
    pub fn new() -> Self {
        Self { last_index: 0 }
    }

    /// Forget the previous bracket
    pub fn reset(&mut self) {
        self.last_index = 0;
    }

    /// Find `i` such that `grid[i] <= x <= grid[i + 1]`
    ///
    /// `grid` must be strictly increasing with at least two entries.
    /// Returns `None` when `x` lies outside the table.
    pub fn locate(&mut self, grid: &[f64], x: f64) -> Option<usize> {
        let n = grid.len();
        if n < 2 || !(x >= grid[0] && x <= grid[n - 1]) {
            return None;
        }

        let guess = self.last_index.min(n - 2);
        for candidate in [guess, guess + 1, guess.saturating_sub(1)] {
            if candidate + 1 < n && grid[candidate] <= x && x <= grid[candidate + 1] {
                self.last_index = candidate;
                return Some(candidate);
            }
        }

        let upper = grid.partition_point(|&value| value <= x);
        let index = upper.saturating_sub(1).min(n - 2);
        self.last_index = index;
        Some(index)
    }
}

// =================================================================================================
// Species content
// =================================================================================================

/// Which species a cosmology contains, plus global constants
#[derive(Debug, Clone)]
pub struct SpeciesContent {
    /// Massless neutrinos (ultra-relativistic relics)
    pub has_ur: bool,

    /// Dark energy fluid with its own perturbations
    pub has_fld: bool,

    /// Use the parametrized post-Friedmann closure for the fluid
    pub use_ppf: bool,

    /// Rest-frame sound speed squared of the fluid
    pub cs2_fld: f64,

    /// PPF transition scale parameter c_Γ / c
    pub c_gamma_over_c_fld: f64,

    /// Cosmological constant (no perturbations)
    pub has_lambda: bool,

    /// Interacting dark radiation
    pub has_idr: bool,

    /// Dark matter interacting with the dark radiation
    pub has_idm_dr: bool,

    /// Number of non-cold species resolved on a momentum grid
    pub n_ncdm: usize,

    /// Spatial curvature K in Mpc^-2
    pub curvature: f64,

    /// Conformal age of the universe τ₀ in Mpc
    pub conformal_age: f64,

    /// Reduced Hubble constant
    pub h: f64,
}

impl SpeciesContent {
    /// Photons, baryons and CDM only, flat
    pub fn minimal(conformal_age: f64, h: f64) -> Self {
        Self {
            has_ur: false,
            has_fld: false,
            use_ppf: false,
            cs2_fld: 1.0,
            c_gamma_over_c_fld: 0.4,
            has_lambda: false,
            has_idr: false,
            has_idm_dr: false,
            n_ncdm: 0,
            curvature: 0.0,
            conformal_age,
            h,
        }
    }

    /// Sign of the spatial curvature (-1, 0, +1)
    pub fn curvature_sign(&self) -> i32 {
        if self.curvature > 0.0 {
            1
        } else if self.curvature < 0.0 {
            -1
        } else {
            0
        }
    }
}

// =================================================================================================
// Background record
// =================================================================================================

/// Background quantities at one conformal time
///
/// Densities are in units where H² = Σρ − K/a² (Mpc^-2).
#[derive(Debug, Clone, Default)]
pub struct BackgroundRecord {
    pub tau: f64,
    pub a: f64,
    /// Hubble rate H = (da/dt)/a in Mpc^-1
    pub hubble: f64,
    /// dH/dτ in Mpc^-2
    pub hubble_prime: f64,
    pub rho_g: f64,
    pub rho_b: f64,
    pub rho_cdm: f64,
    pub rho_ur: f64,
    pub rho_lambda: f64,
    pub rho_fld: f64,
    pub w_fld: f64,
    pub dw_over_da_fld: f64,
    pub rho_idr: f64,
    pub rho_idm: f64,
    pub rho_ncdm: Vec<f64>,
    pub p_ncdm: Vec<f64>,
    pub pseudo_p_ncdm: Vec<f64>,
    pub rho_tot: f64,
    pub p_tot: f64,
}

impl BackgroundRecord {
    /// Record with storage for `n_ncdm` non-cold species
    pub fn with_ncdm(n_ncdm: usize) -> Self {
        Self {
            rho_ncdm: vec![0.0; n_ncdm],
            p_ncdm: vec![0.0; n_ncdm],
            pseudo_p_ncdm: vec![0.0; n_ncdm],
            ..Default::default()
        }
    }

    /// Conformal Hubble rate a'/a = aH
    pub fn a_prime_over_a(&self) -> f64 {
        self.a * self.hubble
    }

    /// a''/a = 2(aH)² + a H'
    pub fn a_primeprime_over_a(&self) -> f64 {
        let aph = self.a_prime_over_a();
        2.0 * aph * aph + self.a * self.hubble_prime
    }

    /// Redshift z = 1/a − 1
    pub fn z(&self) -> f64 {
        1.0 / self.a - 1.0
    }

    /// Radiation-like density, counting the relativistic part of ncdm
    pub fn rho_radiation(&self) -> f64 {
        let ncdm: f64 = self.p_ncdm.iter().map(|p| 3.0 * p).sum();
        self.rho_g + self.rho_ur + self.rho_idr + ncdm
    }

    /// Matter-like density, counting the non-relativistic part of ncdm
    pub fn rho_matter(&self) -> f64 {
        let ncdm: f64 = self
            .rho_ncdm
            .iter()
            .zip(self.p_ncdm.iter())
            .map(|(rho, p)| rho - 3.0 * p)
            .sum();
        self.rho_b + self.rho_cdm + self.rho_idm + ncdm
    }
}

/// Fluid equation of state returned by `background_w_fld`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluidEos {
    pub w: f64,
    pub dw_over_da: f64,
    /// ∫ 3(1 + w) d ln a from a to today
    pub integral: f64,
}

// =================================================================================================
// Thermodynamics record
// =================================================================================================

/// Thermodynamic quantities at one redshift
#[derive(Debug, Clone, Copy, Default)]
pub struct ThermoRecord {
    /// Free electron fraction
    pub xe: f64,
    /// Thomson scattering rate κ' = a nₑ σ_T in Mpc^-1
    pub dkappa: f64,
    /// dκ'/dτ
    pub ddkappa: f64,
    /// e^{-κ}
    pub exp_m_kappa: f64,
    /// Visibility g = κ' e^{-κ}
    pub g: f64,
    /// dg/dτ
    pub dg: f64,
    /// Baryon sound speed squared
    pub cb2: f64,
    /// Variation rate of the thermodynamic quantities (Mpc^-1)
    pub rate: f64,
    /// Dark matter – dark radiation interaction rate
    pub dmu_idm_dr: f64,
    pub ddmu_idm_dr: f64,
    /// Dark radiation self-interaction rate
    pub dmu_idr: f64,
    /// Sound speed squared of interacting dark matter
    pub c2_idm: f64,
}

/// Scalar milestones of the thermal history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecombinationSummary {
    pub z_rec: f64,
    pub tau_rec: f64,
    /// Comoving sound horizon at recombination (Mpc)
    pub rs_rec: f64,
    /// Time after which photons may be treated as free-streaming
    pub tau_free_streaming: f64,
    /// Same for the interacting dark radiation
    pub tau_idr_free_streaming: f64,
    /// Earliest time at which the tables can be queried
    pub tau_ini: f64,
}

// =================================================================================================
// Collaborator traits
// =================================================================================================

/// Expansion history
///
/// # Responsibility
/// Answers interpolation queries; never integrates anything on behalf of
/// the perturbation core.
pub trait Background: Send + Sync {
    /// Fill `record` with the background at conformal time `tau`
    fn background_at(
        &self,
        tau: f64,
        cursor: &mut InterpolationCursor,
        record: &mut BackgroundRecord,
    ) -> PerturbResult<()>;

    /// Conformal time at redshift `z`
    fn background_tau_of_z(&self, z: f64) -> PerturbResult<f64>;

    /// Fluid equation of state at scale factor `a`
    fn background_w_fld(&self, a: f64) -> PerturbResult<FluidEos>;

    /// Species present and global constants
    fn content(&self) -> &SpeciesContent;

    /// Momentum quadrature of the non-cold species, if any
    fn quadrature(&self) -> Option<&dyn MomentumQuadrature> {
        None
    }

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Ionization and interaction history
pub trait Thermodynamics: Send + Sync {
    /// Fill `record` with the thermodynamics at redshift `z`
    fn thermodynamics_at(
        &self,
        z: f64,
        cursor: &mut InterpolationCursor,
        record: &mut ThermoRecord,
    ) -> PerturbResult<()>;

    /// Recombination milestones
    fn summary(&self) -> &RecombinationSummary;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Error for a query outside a tabulated range
pub(crate) fn out_of_table(what: &str, value: f64, min: f64, max: f64) -> PerturbError {
    PerturbError::Collaborator(format!(
        "{} = {:e} outside tabulated range [{:e}, {:e}]",
        what, value, min, max
    ))
}

// =================================================================================================
// Tests
// =================================================================================================
