//! Modes, initial conditions and source types
//!
//! A run integrates a set of modes; each mode owns its list of initial
//! conditions and the ordered list of source types stored for it. The order
//! of `SourceType`s fixes the second axis of the source table.

use std::fmt;

use crate::config::{Gauge, Settings};
use crate::physics::SpeciesContent;

/// Perturbation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Scalar,
    Vector,
    Tensor,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Scalar => "scalar",
            Mode::Vector => "vector",
            Mode::Tensor => "tensor",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Analytic solution branch seeding the state at τ_ini
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitialCondition {
    Adiabatic,
    BaryonIsocurvature,
    CdmIsocurvature,
    NeutrinoDensityIsocurvature,
    Vector,
    Tensor,
}

impl InitialCondition {
    /// Short label used in logs, errors and file names
    pub fn short_name(&self) -> &'static str {
        match self {
            InitialCondition::Adiabatic => "ad",
            InitialCondition::BaryonIsocurvature => "bi",
            InitialCondition::CdmIsocurvature => "cdi",
            InitialCondition::NeutrinoDensityIsocurvature => "nid",
            InitialCondition::Vector => "vec",
            InitialCondition::Tensor => "ten",
        }
    }
}

impl fmt::Display for InitialCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Physical quantity stored in the source table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    /// Temperature monopole-like term (SW + ISW)
    T0,
    /// Temperature dipole-like term (Doppler)
    T1,
    /// Temperature quadrupole-like term (polarization feedback)
    T2,
    /// E-polarization
    P,
    /// Lensing potential φ + ψ
    PhiPlusPsi,
    DeltaM,
    DeltaCb,
    ThetaM,
    ThetaCb,
    Phi,
    Psi,
    PhiPrime,
    HPrime,
    Eta,
    EtaPrime,
    DeltaTot,
    DeltaG,
    DeltaB,
    DeltaCdm,
    DeltaIdm,
    DeltaFld,
    DeltaUr,
    DeltaIdr,
    DeltaNcdm(usize),
    ThetaTot,
    ThetaG,
    ThetaB,
    ThetaCdm,
    ThetaIdm,
    ThetaFld,
    ThetaUr,
    ThetaIdr,
    ThetaNcdm(usize),
}

impl SourceType {
    /// Stable short title used by exports
    pub fn title(&self) -> String {
        match self {
            SourceType::T0 => "t0".into(),
            SourceType::T1 => "t1".into(),
            SourceType::T2 => "t2".into(),
            SourceType::P => "p".into(),
            SourceType::PhiPlusPsi => "phi_plus_psi".into(),
            SourceType::DeltaM => "delta_m".into(),
            SourceType::DeltaCb => "delta_cb".into(),
            SourceType::ThetaM => "theta_m".into(),
            SourceType::ThetaCb => "theta_cb".into(),
            SourceType::Phi => "phi".into(),
            SourceType::Psi => "psi".into(),
            SourceType::PhiPrime => "phi_prime".into(),
            SourceType::HPrime => "h_prime".into(),
            SourceType::Eta => "eta".into(),
            SourceType::EtaPrime => "eta_prime".into(),
            SourceType::DeltaTot => "delta_tot".into(),
            SourceType::DeltaG => "delta_g".into(),
            SourceType::DeltaB => "delta_b".into(),
            SourceType::DeltaCdm => "delta_cdm".into(),
            SourceType::DeltaIdm => "delta_idm".into(),
            SourceType::DeltaFld => "delta_fld".into(),
            SourceType::DeltaUr => "delta_ur".into(),
            SourceType::DeltaIdr => "delta_idr".into(),
            SourceType::DeltaNcdm(n) => format!("delta_ncdm[{}]", n),
            SourceType::ThetaTot => "theta_tot".into(),
            SourceType::ThetaG => "theta_g".into(),
            SourceType::ThetaB => "theta_b".into(),
            SourceType::ThetaCdm => "theta_cdm".into(),
            SourceType::ThetaIdm => "theta_idm".into(),
            SourceType::ThetaFld => "theta_fld".into(),
            SourceType::ThetaUr => "theta_ur".into(),
            SourceType::ThetaIdr => "theta_idr".into(),
            SourceType::ThetaNcdm(n) => format!("theta_ncdm[{}]", n),
        }
    }
}

/// Initial conditions and source types of one mode
#[derive(Debug, Clone)]
pub struct ModeIndices {
    pub mode: Mode,
    pub initial_conditions: Vec<InitialCondition>,
    pub sources: Vec<SourceType>,
}

impl ModeIndices {
    /// Every requested mode, in scalar / vector / tensor order
    pub fn build_all(settings: &Settings, content: &SpeciesContent) -> Vec<ModeIndices> {
        let mut modes = Vec::new();
        if settings.has_scalars {
            modes.push(Self::build(Mode::Scalar, settings, content));
        }
        if settings.has_vectors {
            modes.push(Self::build(Mode::Vector, settings, content));
        }
        if settings.has_tensors {
            modes.push(Self::build(Mode::Tensor, settings, content));
        }
        modes
    }

    pub fn build(mode: Mode, settings: &Settings, content: &SpeciesContent) -> ModeIndices {
        let initial_conditions = match mode {
            Mode::Scalar => {
                let mut ics = Vec::new();
                if settings.has_ad {
                    ics.push(InitialCondition::Adiabatic);
                }
                if settings.has_bi {
                    ics.push(InitialCondition::BaryonIsocurvature);
                }
                if settings.has_cdi {
                    ics.push(InitialCondition::CdmIsocurvature);
                }
                if settings.has_nid {
                    ics.push(InitialCondition::NeutrinoDensityIsocurvature);
                }
                ics
            }
            Mode::Vector => vec![InitialCondition::Vector],
            Mode::Tensor => vec![InitialCondition::Tensor],
        };

        let sources = match mode {
            Mode::Scalar => scalar_sources(settings, content),
            Mode::Vector => {
                let mut sources = Vec::new();
                if settings.has_cl_cmb_temperature {
                    sources.push(SourceType::T1);
                    sources.push(SourceType::T2);
                }
                if settings.has_cl_cmb_polarization {
                    sources.push(SourceType::P);
                }
                sources
            }
            Mode::Tensor => {
                let mut sources = Vec::new();
                if settings.has_cl_cmb_temperature {
                    sources.push(SourceType::T2);
                }
                if settings.has_cl_cmb_polarization {
                    sources.push(SourceType::P);
                }
                sources
            }
        };

        ModeIndices {
            mode,
            initial_conditions,
            sources,
        }
    }

    /// Position of `source` along the type axis
    pub fn index_of(&self, source: SourceType) -> Option<usize> {
        self.sources.iter().position(|s| *s == source)
    }

    pub fn titles(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.title()).collect()
    }
}

fn scalar_sources(settings: &Settings, content: &SpeciesContent) -> Vec<SourceType> {
    let has_ncdm = content.n_ncdm > 0;
    let mut sources = Vec::new();

    if settings.has_cl_cmb_temperature {
        sources.extend([SourceType::T0, SourceType::T1, SourceType::T2]);
    }
    if settings.has_cl_cmb_polarization {
        sources.push(SourceType::P);
    }
    if settings.has_cl_lensing_potential {
        sources.push(SourceType::PhiPlusPsi);
    }
    if settings.has_pk_matter {
        sources.push(SourceType::DeltaM);
        if has_ncdm {
            sources.push(SourceType::DeltaCb);
        }
    }

    if settings.has_density_transfers {
        sources.extend([SourceType::DeltaTot, SourceType::DeltaG, SourceType::DeltaB]);
        sources.push(SourceType::DeltaCdm);
        if content.has_idm_dr {
            sources.push(SourceType::DeltaIdm);
        }
        if content.has_fld {
            sources.push(SourceType::DeltaFld);
        }
        if content.has_ur {
            sources.push(SourceType::DeltaUr);
        }
        if content.has_idr {
            sources.push(SourceType::DeltaIdr);
        }
        sources.extend((0..content.n_ncdm).map(SourceType::DeltaNcdm));
        if !settings.has_pk_matter {
            sources.push(SourceType::DeltaM);
            if has_ncdm {
                sources.push(SourceType::DeltaCb);
            }
        }
    }

    if settings.has_velocity_transfers {
        sources.extend([
            SourceType::ThetaTot,
            SourceType::ThetaM,
            SourceType::ThetaG,
            SourceType::ThetaB,
        ]);
        if has_ncdm {
            sources.push(SourceType::ThetaCb);
        }
        if settings.gauge == Gauge::Newtonian {
            sources.push(SourceType::ThetaCdm);
        }
        if content.has_idm_dr {
            sources.push(SourceType::ThetaIdm);
        }
        if content.has_fld {
            sources.push(SourceType::ThetaFld);
        }
        if content.has_ur {
            sources.push(SourceType::ThetaUr);
        }
        if content.has_idr {
            sources.push(SourceType::ThetaIdr);
        }
        sources.extend((0..content.n_ncdm).map(SourceType::ThetaNcdm));
    }

    if settings.has_metricpotential_transfers {
        sources.extend([SourceType::Phi, SourceType::Psi, SourceType::PhiPrime]);
        if settings.gauge == Gauge::Synchronous {
            sources.extend([SourceType::HPrime, SourceType::Eta, SourceType::EtaPrime]);
        }
    }

    sources
}
