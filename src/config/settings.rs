//! Physical and output requests, plus the approximation scheme enums
//!
//! Scheme enums carry the integer codes of the usual input files and parse
//! from their lowercase names; anything else is a configuration error.

use std::fmt;
use std::str::FromStr;

use crate::error::{PerturbError, PerturbResult};
use crate::physics::SpeciesContent;

// =================================================================================================
// Scheme enums
// =================================================================================================

/// Gauge in which the equations are integrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gauge {
    #[default]
    Synchronous,
    Newtonian,
}

/// Tight-coupling closure of the photon-baryon slip and photon shear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TcaMethod {
    /// Photon hierarchy integrated from the start
    None,
    #[default]
    FirstOrder,
    SecondOrder,
}

/// Radiation streaming approximation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RsaMethod {
    None,
    /// Matter-domination closure
    Md,
    /// Matter-domination closure with reionization opacity corrections
    #[default]
    MdWithReio,
}

/// Fluid approximation for massless neutrinos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UfaMethod {
    None,
    Mb,
    Hu,
    #[default]
    Class,
}

/// Fluid approximation for non-cold species
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NcdmFluidMethod {
    None,
    Mb,
    Hu,
    #[default]
    Class,
}

fn out_of_range(what: &str, code: i32, max: i32) -> PerturbError {
    PerturbError::Configuration(format!(
        "{} code {} out of range (expected 0..={})",
        what, code, max
    ))
}

fn unknown_name(what: &str, name: &str, allowed: &[&str]) -> PerturbError {
    PerturbError::Configuration(format!(
        "unknown {} '{}' (expected one of: {})",
        what,
        name,
        allowed.join(", ")
    ))
}

impl TryFrom<i32> for Gauge {
    type Error = PerturbError;

    fn try_from(code: i32) -> PerturbResult<Self> {
        match code {
            0 => Ok(Gauge::Synchronous),
            1 => Ok(Gauge::Newtonian),
            _ => Err(out_of_range("gauge", code, 1)),
        }
    }
}

impl FromStr for Gauge {
    type Err = PerturbError;

    fn from_str(name: &str) -> PerturbResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "synchronous" | "sync" => Ok(Gauge::Synchronous),
            "newtonian" | "newt" => Ok(Gauge::Newtonian),
            other => Err(unknown_name("gauge", other, &["synchronous", "newtonian"])),
        }
    }
}

impl fmt::Display for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gauge::Synchronous => write!(f, "synchronous"),
            Gauge::Newtonian => write!(f, "newtonian"),
        }
    }
}

impl TryFrom<i32> for TcaMethod {
    type Error = PerturbError;

    fn try_from(code: i32) -> PerturbResult<Self> {
        match code {
            0 => Ok(TcaMethod::None),
            1 => Ok(TcaMethod::FirstOrder),
            2 => Ok(TcaMethod::SecondOrder),
            _ => Err(out_of_range("tight coupling approximation", code, 2)),
        }
    }
}

impl FromStr for TcaMethod {
    type Err = PerturbError;

    fn from_str(name: &str) -> PerturbResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TcaMethod::None),
            "first_order" => Ok(TcaMethod::FirstOrder),
            "second_order" => Ok(TcaMethod::SecondOrder),
            other => Err(unknown_name(
                "tight coupling approximation",
                other,
                &["none", "first_order", "second_order"],
            )),
        }
    }
}

impl TryFrom<i32> for RsaMethod {
    type Error = PerturbError;

    fn try_from(code: i32) -> PerturbResult<Self> {
        match code {
            0 => Ok(RsaMethod::None),
            1 => Ok(RsaMethod::Md),
            2 => Ok(RsaMethod::MdWithReio),
            _ => Err(out_of_range("radiation streaming approximation", code, 2)),
        }
    }
}

impl FromStr for RsaMethod {
    type Err = PerturbError;

    fn from_str(name: &str) -> PerturbResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RsaMethod::None),
            "md" => Ok(RsaMethod::Md),
            "md_with_reio" => Ok(RsaMethod::MdWithReio),
            other => Err(unknown_name(
                "radiation streaming approximation",
                other,
                &["none", "md", "md_with_reio"],
            )),
        }
    }
}

impl TryFrom<i32> for UfaMethod {
    type Error = PerturbError;

    fn try_from(code: i32) -> PerturbResult<Self> {
        match code {
            0 => Ok(UfaMethod::None),
            1 => Ok(UfaMethod::Mb),
            2 => Ok(UfaMethod::Hu),
            3 => Ok(UfaMethod::Class),
            _ => Err(out_of_range("ur fluid approximation", code, 3)),
        }
    }
}

impl FromStr for UfaMethod {
    type Err = PerturbError;

    fn from_str(name: &str) -> PerturbResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(UfaMethod::None),
            "mb" => Ok(UfaMethod::Mb),
            "hu" => Ok(UfaMethod::Hu),
            "class" => Ok(UfaMethod::Class),
            other => Err(unknown_name("ur fluid approximation", other, &["none", "mb", "hu", "class"])),
        }
    }
}

impl TryFrom<i32> for NcdmFluidMethod {
    type Error = PerturbError;

    fn try_from(code: i32) -> PerturbResult<Self> {
        match code {
            0 => Ok(NcdmFluidMethod::None),
            1 => Ok(NcdmFluidMethod::Mb),
            2 => Ok(NcdmFluidMethod::Hu),
            3 => Ok(NcdmFluidMethod::Class),
            _ => Err(out_of_range("ncdm fluid approximation", code, 3)),
        }
    }
}

impl FromStr for NcdmFluidMethod {
    type Err = PerturbError;

    fn from_str(name: &str) -> PerturbResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(NcdmFluidMethod::None),
            "mb" => Ok(NcdmFluidMethod::Mb),
            "hu" => Ok(NcdmFluidMethod::Hu),
            "class" => Ok(NcdmFluidMethod::Class),
            other => Err(unknown_name("ncdm fluid approximation", other, &["none", "mb", "hu", "class"])),
        }
    }
}

// =================================================================================================
// Settings
// =================================================================================================

/// What to compute
///
/// # Example
///
/// ```rust
/// use perturb_rs::config::{Gauge, Settings};
///
/// let settings = Settings {
///     has_pk_matter: true,
///     z_max_pk: 2.0,
///     k_output_values: vec![0.01, 0.1],
///     ..Settings::cmb()
/// }
/// .with_gauge(Gauge::Newtonian);
///
/// assert!(settings.has_cmb() && settings.has_lss());
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    pub has_scalars: bool,
    pub has_vectors: bool,
    pub has_tensors: bool,

    /// Adiabatic initial condition
    pub has_ad: bool,
    /// Baryon isocurvature
    pub has_bi: bool,
    /// CDM isocurvature
    pub has_cdi: bool,
    /// Neutrino density isocurvature
    pub has_nid: bool,

    pub gauge: Gauge,

    pub has_cl_cmb_temperature: bool,
    pub has_cl_cmb_polarization: bool,
    pub has_cl_lensing_potential: bool,
    pub has_pk_matter: bool,
    pub has_density_transfers: bool,
    pub has_velocity_transfers: bool,
    pub has_metricpotential_transfers: bool,
    /// Density and velocity transfers in the N-body gauge (synchronous only)
    pub has_nbody_gauge_transfers: bool,

    pub l_scalar_max: usize,
    pub l_vector_max: usize,
    pub l_tensor_max: usize,
    /// Largest multipole of the lensing-potential spectrum
    pub l_lss_max: usize,

    /// Largest k needed for the matter power spectrum (Mpc^-1)
    pub k_max_for_pk: f64,

    /// Largest redshift at which P(k, z) will be interpolated
    pub z_max_pk: f64,

    /// Extra wavenumbers to include in the grid and to trace (Mpc^-1)
    pub k_output_values: Vec<f64>,

    pub switch_sw: f64,
    pub switch_eisw: f64,
    pub switch_lisw: f64,
    pub switch_dop: f64,
    pub switch_pol: f64,
    /// Redshift separating the early and late ISW terms
    pub eisw_lisw_split_z: f64,

    /// Size of the worker pool, `None` for the global pool
    pub threads: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            has_scalars: true,
            has_vectors: false,
            has_tensors: false,
            has_ad: true,
            has_bi: false,
            has_cdi: false,
            has_nid: false,
            gauge: Gauge::Synchronous,
            has_cl_cmb_temperature: false,
            has_cl_cmb_polarization: false,
            has_cl_lensing_potential: false,
            has_pk_matter: false,
            has_density_transfers: false,
            has_velocity_transfers: false,
            has_metricpotential_transfers: false,
            has_nbody_gauge_transfers: false,
            l_scalar_max: 2500,
            l_vector_max: 500,
            l_tensor_max: 500,
            l_lss_max: 300,
            k_max_for_pk: 1.0,
            z_max_pk: 0.0,
            k_output_values: Vec::new(),
            switch_sw: 1.0,
            switch_eisw: 1.0,
            switch_lisw: 1.0,
            switch_dop: 1.0,
            switch_pol: 1.0,
            eisw_lisw_split_z: 120.0,
            threads: None,
        }
    }
}

impl Settings {
    /// CMB temperature and polarization from scalar adiabatic modes
    pub fn cmb() -> Self {
        Self {
            has_cl_cmb_temperature: true,
            has_cl_cmb_polarization: true,
            ..Default::default()
        }
    }

    /// Matter power spectrum and density transfers only
    pub fn matter() -> Self {
        Self {
            has_pk_matter: true,
            has_density_transfers: true,
            ..Default::default()
        }
    }

    pub fn with_gauge(mut self, gauge: Gauge) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn with_modes(mut self, scalars: bool, vectors: bool, tensors: bool) -> Self {
        self.has_scalars = scalars;
        self.has_vectors = vectors;
        self.has_tensors = tensors;
        self
    }

    pub fn with_output_k(mut self, k_values: Vec<f64>) -> Self {
        self.k_output_values = k_values;
        self
    }

    pub fn with_z_max_pk(mut self, z_max_pk: f64) -> Self {
        self.z_max_pk = z_max_pk;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Any CMB anisotropy source requested
    pub fn has_cmb(&self) -> bool {
        self.has_cl_cmb_temperature || self.has_cl_cmb_polarization || self.has_cl_lensing_potential
    }

    /// Any large-scale-structure source requested
    pub fn has_lss(&self) -> bool {
        self.has_pk_matter
            || self.has_density_transfers
            || self.has_velocity_transfers
            || self.has_metricpotential_transfers
    }

    /// Validate the requests against the species content
    pub fn validate(&self, content: &SpeciesContent) -> PerturbResult<()> {
        if !self.has_cmb() && !self.has_lss() {
            return Err(PerturbError::Configuration(
                "no source requested: enable at least one CMB or matter output".to_string(),
            ));
        }
        if !self.has_scalars && !self.has_vectors && !self.has_tensors {
            return Err(PerturbError::Configuration("no perturbation mode requested".to_string()));
        }
        if self.has_scalars && !(self.has_ad || self.has_bi || self.has_cdi || self.has_nid) {
            return Err(PerturbError::Configuration(
                "scalar modes requested without any initial condition".to_string(),
            ));
        }
        if self.has_vectors && self.gauge == Gauge::Newtonian {
            return Err(PerturbError::Configuration(
                "vector modes are only implemented in the synchronous gauge".to_string(),
            ));
        }
        if (self.has_vectors || self.has_tensors)
            && !(self.has_cl_cmb_temperature || self.has_cl_cmb_polarization)
        {
            return Err(PerturbError::Configuration(
                "vector and tensor modes only source CMB anisotropies; request temperature or polarization"
                    .to_string(),
            ));
        }
        if self.has_nbody_gauge_transfers {
            if self.gauge == Gauge::Newtonian {
                return Err(PerturbError::Configuration(
                    "N-body gauge transfers need the synchronous gauge".to_string(),
                ));
            }
            if !(self.has_density_transfers || self.has_velocity_transfers) {
                return Err(PerturbError::Configuration(
                    "N-body gauge correction requested without density or velocity transfers".to_string(),
                ));
            }
        }
        if self.has_nid && !content.has_ur {
            return Err(PerturbError::Configuration(
                "neutrino density isocurvature needs massless neutrinos".to_string(),
            ));
        }
        if self.has_cmb() && self.l_scalar_max < 2 {
            return Err(PerturbError::Configuration("l_scalar_max must be at least 2".to_string()));
        }
        if !(self.z_max_pk >= 0.0) || !self.z_max_pk.is_finite() {
            return Err(PerturbError::Configuration(format!(
                "z_max_pk must be a non-negative number (got {})",
                self.z_max_pk
            )));
        }
        if self.has_lss() && !(self.k_max_for_pk > 0.0) {
            return Err(PerturbError::Configuration("k_max_for_pk must be positive".to_string()));
        }
        if let Some(k) = self.k_output_values.iter().find(|k| !(**k > 0.0) || !k.is_finite()) {
            return Err(PerturbError::Configuration(format!(
                "output wavenumbers must be positive (got {})",
                k
            )));
        }
        let switches = [self.switch_sw, self.switch_eisw, self.switch_lisw, self.switch_dop, self.switch_pol];
        if switches.iter().any(|s| !s.is_finite()) {
            return Err(PerturbError::Configuration("source switches must be finite".to_string()));
        }
        if self.threads == Some(0) {
            return Err(PerturbError::Configuration("threads must be at least 1".to_string()));
        }
        Ok(())
    }
}
