//! State layout and state vector
//!
//! The set of integrated variables depends on the regime: tight coupling
//! removes the photon shear and higher multipoles, radiation streaming
//! removes the radiation hierarchies, fluid approximations collapse
//! hierarchies to three moments. A layout is therefore built at run time:
//!
//! 1. [`LayoutDescriptor::for_regime`] lists `(Field, multiplicity)` pairs
//! 2. [`StateLayout::build`] turns the list into offsets
//! 3. [`StateVector`] owns `y`, `dy` and the `used_in_sources` mask
//!
//! When the regime changes mid-integration, [`reseed`] builds the new state
//! from the old one: shared fields are copied, newly integrated fields are
//! seeded from the closure relations of the previous regime, and collapsed
//! hierarchies are reduced to their fluid moments.

use std::collections::HashMap;
use std::ops::Range;

use crate::config::{Gauge, Precision};
use crate::error::{PerturbError, PerturbResult};
use crate::physics::{QuadratureSpecies, SpeciesContent};
use super::approximations::RegimeFlags;
use super::indices::Mode;

// =================================================================================================
// Fields
// =================================================================================================

/// Symbolic name of a block of state variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    PhotonDensity,
    PhotonVelocity,
    PhotonShear,
    /// Photon temperature multipoles ℓ = 3 … ℓ_max
    PhotonMultipoles,
    /// Photon polarization multipoles ℓ = 0 … ℓ_max_pol
    PhotonPolarization,
    BaryonDensity,
    BaryonVelocity,
    CdmDensity,
    CdmVelocity,
    IdmDensity,
    IdmVelocity,
    FluidDensity,
    FluidVelocity,
    /// PPF Γ variable replacing the fluid density and velocity
    FluidGamma,
    UrDensity,
    UrVelocity,
    UrShear,
    /// Massless neutrino multipoles ℓ = 3 … ℓ_max
    UrMultipoles,
    IdrDensity,
    IdrVelocity,
    IdrShear,
    IdrMultipoles,
    /// ψ_ℓ(q) of one non-cold species, node-major
    NcdmHierarchy(usize),
    /// δ, θ, σ of one non-cold species
    NcdmFluid(usize),
    Eta,
    Phi,
    /// Tensor photon temperature ℓ = 0 … ℓ_max
    TensorTemperature,
    TensorPolarization,
    /// Tensor massless neutrino multipoles ℓ = 0 … ℓ_max
    UrTensor,
    /// Tensor amplitude h and h'
    GravitationalWave,
    /// Vector photon temperature ℓ = 1 … ℓ_max
    VectorTemperature,
    /// Vector photon polarization ℓ = 2 … ℓ_max_pol
    VectorPolarization,
    VectorMetric,
}

impl Field {
    /// Stable name used in trace titles and error messages
    pub fn name(&self) -> String {
        match self {
            Field::NcdmHierarchy(n) => format!("psi_ncdm[{}]", n),
            Field::NcdmFluid(n) => format!("fluid_ncdm[{}]", n),
            other => format!("{:?}", other),
        }
    }

    /// Whether slot `i` of this field is read by the source routine
    fn is_used(&self, i: usize, ncdm_l_count: usize) -> bool {
        match self {
            Field::PhotonMultipoles | Field::UrMultipoles | Field::IdrMultipoles => false,
            Field::PhotonPolarization => i < 3,
            Field::TensorTemperature | Field::TensorPolarization | Field::UrTensor => i < 5,
            Field::VectorTemperature => i < 2,
            Field::VectorPolarization => i < 1,
            Field::NcdmHierarchy(_) => i % ncdm_l_count.max(1) <= 2,
            _ => true,
        }
    }
}

// =================================================================================================
// Descriptor
// =================================================================================================

/// Ordered `(Field, multiplicity)` list for one regime
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutDescriptor {
    pub mode: Mode,
    pub entries: Vec<(Field, usize)>,
    /// ℓ_max + 1 of the ncdm hierarchies
    pub ncdm_l_count: usize,
}

impl LayoutDescriptor {
    /// Variables integrated in `flags` for `mode`
    ///
    /// `ncdm_q_sizes` gives the number of momentum nodes of each non-cold
    /// species.
    pub fn for_regime(
        mode: Mode,
        flags: &RegimeFlags,
        gauge: Gauge,
        content: &SpeciesContent,
        precision: &Precision,
        ncdm_q_sizes: &[usize],
    ) -> Self {
        let mut entries = Vec::new();
        let ncdm_l_count = precision.l_max_ncdm + 1;

        match mode {
            Mode::Scalar => {
                if !flags.rsa_on() {
                    entries.push((Field::PhotonDensity, 1));
                    entries.push((Field::PhotonVelocity, 1));
                    if !flags.tca_on() {
                        entries.push((Field::PhotonShear, 1));
                        entries.push((Field::PhotonMultipoles, precision.l_max_g - 2));
                        entries.push((Field::PhotonPolarization, precision.l_max_pol_g + 1));
                    }
                }

                entries.push((Field::BaryonDensity, 1));
                entries.push((Field::BaryonVelocity, 1));
                entries.push((Field::CdmDensity, 1));
                if gauge == Gauge::Newtonian {
                    entries.push((Field::CdmVelocity, 1));
                }

                if content.has_idm_dr {
                    entries.push((Field::IdmDensity, 1));
                    entries.push((Field::IdmVelocity, 1));
                }

                if content.has_fld {
                    if content.use_ppf {
                        entries.push((Field::FluidGamma, 1));
                    } else {
                        entries.push((Field::FluidDensity, 1));
                        entries.push((Field::FluidVelocity, 1));
                    }
                }

                if content.has_ur && !flags.rsa_on() {
                    entries.push((Field::UrDensity, 1));
                    entries.push((Field::UrVelocity, 1));
                    entries.push((Field::UrShear, 1));
                    if !flags.ufa_on() {
                        entries.push((Field::UrMultipoles, precision.l_max_ur - 2));
                    }
                }

                if content.has_idr && !flags.idr_rsa_on() {
                    entries.push((Field::IdrDensity, 1));
                    entries.push((Field::IdrVelocity, 1));
                    if !flags.idm_dr_tca_on() {
                        entries.push((Field::IdrShear, 1));
                        entries.push((Field::IdrMultipoles, precision.l_max_idr - 2));
                    }
                }

                for (n, q_size) in ncdm_q_sizes.iter().enumerate() {
                    if flags.ncdmfa_on() {
                        entries.push((Field::NcdmFluid(n), 3));
                    } else {
                        entries.push((Field::NcdmHierarchy(n), q_size * ncdm_l_count));
                    }
                }

                match gauge {
                    Gauge::Synchronous => entries.push((Field::Eta, 1)),
                    Gauge::Newtonian => entries.push((Field::Phi, 1)),
                }
            }

            Mode::Vector => {
                entries.push((Field::BaryonVelocity, 1));
                if !flags.rsa_on() && !flags.tca_on() {
                    entries.push((Field::VectorTemperature, precision.l_max_g));
                    entries.push((Field::VectorPolarization, precision.l_max_pol_g - 1));
                }
                entries.push((Field::VectorMetric, 1));
            }

            Mode::Tensor => {
                if !flags.rsa_on() {
                    if !flags.tca_on() {
                        entries.push((Field::TensorTemperature, precision.l_max_g_ten + 1));
                        entries.push((Field::TensorPolarization, precision.l_max_pol_g_ten + 1));
                    }
                    if content.has_ur {
                        entries.push((Field::UrTensor, precision.l_max_ur + 1));
                    }
                }
                entries.push((Field::GravitationalWave, 2));
            }
        }

        Self {
            mode,
            entries,
            ncdm_l_count,
        }
    }

    /// Total number of slots
    pub fn size(&self) -> usize {
        self.entries.iter().map(|(_, n)| n).sum()
    }
}

// =================================================================================================
// Layout
// =================================================================================================

/// Offsets of the frequently accessed single-slot fields and hierarchy starts
#[derive(Debug, Clone, Copy, Default)]
pub struct Slots {
    pub delta_g: Option<usize>,
    pub theta_g: Option<usize>,
    pub shear_g: Option<usize>,
    pub l3_g: Option<usize>,
    pub pol_g: Option<usize>,
    pub delta_b: Option<usize>,
    pub theta_b: Option<usize>,
    pub delta_cdm: Option<usize>,
    pub theta_cdm: Option<usize>,
    pub delta_idm: Option<usize>,
    pub theta_idm: Option<usize>,
    pub delta_fld: Option<usize>,
    pub theta_fld: Option<usize>,
    pub gamma_fld: Option<usize>,
    pub delta_ur: Option<usize>,
    pub theta_ur: Option<usize>,
    pub shear_ur: Option<usize>,
    pub l3_ur: Option<usize>,
    pub delta_idr: Option<usize>,
    pub theta_idr: Option<usize>,
    pub shear_idr: Option<usize>,
    pub l3_idr: Option<usize>,
    pub eta: Option<usize>,
    pub phi: Option<usize>,
    pub ten_g: Option<usize>,
    pub ten_pol: Option<usize>,
    pub ten_ur: Option<usize>,
    pub gw: Option<usize>,
    pub vec_g: Option<usize>,
    pub vec_pol: Option<usize>,
    pub vec_metric: Option<usize>,
}

/// Per-species ncdm block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcdmBlock {
    Hierarchy { start: usize, q_size: usize },
    Fluid { start: usize },
}

/// Name → offset map of one regime
#[derive(Debug, Clone)]
pub struct StateLayout {
    pub mode: Mode,
    entries: Vec<(Field, Range<usize>)>,
    index: HashMap<Field, usize>,
    slots: Slots,
    ncdm: Vec<NcdmBlock>,
    ncdm_l_count: usize,
    size: usize,
}

impl StateLayout {
    /// Assign consecutive offsets to the descriptor entries
    pub fn build(descriptor: &LayoutDescriptor) -> Self {
        let mut entries = Vec::with_capacity(descriptor.entries.len());
        let mut index = HashMap::with_capacity(descriptor.entries.len());
        let mut slots = Slots::default();
        let mut ncdm = Vec::new();
        let l_count = descriptor.ncdm_l_count;
        let mut offset = 0;

        for (field, multiplicity) in &descriptor.entries {
            let start = offset;
            offset += multiplicity;
            index.insert(*field, entries.len());
            entries.push((*field, start..offset));

            let slot = Some(start);
            match field {
                Field::PhotonDensity => slots.delta_g = slot,
                Field::PhotonVelocity => slots.theta_g = slot,
                Field::PhotonShear => slots.shear_g = slot,
                Field::PhotonMultipoles => slots.l3_g = slot,
                Field::PhotonPolarization => slots.pol_g = slot,
                Field::BaryonDensity => slots.delta_b = slot,
                Field::BaryonVelocity => slots.theta_b = slot,
                Field::CdmDensity => slots.delta_cdm = slot,
                Field::CdmVelocity => slots.theta_cdm = slot,
                Field::IdmDensity => slots.delta_idm = slot,
                Field::IdmVelocity => slots.theta_idm = slot,
                Field::FluidDensity => slots.delta_fld = slot,
                Field::FluidVelocity => slots.theta_fld = slot,
                Field::FluidGamma => slots.gamma_fld = slot,
                Field::UrDensity => slots.delta_ur = slot,
                Field::UrVelocity => slots.theta_ur = slot,
                Field::UrShear => slots.shear_ur = slot,
                Field::UrMultipoles => slots.l3_ur = slot,
                Field::IdrDensity => slots.delta_idr = slot,
                Field::IdrVelocity => slots.theta_idr = slot,
                Field::IdrShear => slots.shear_idr = slot,
                Field::IdrMultipoles => slots.l3_idr = slot,
                Field::Eta => slots.eta = slot,
                Field::Phi => slots.phi = slot,
                Field::TensorTemperature => slots.ten_g = slot,
                Field::TensorPolarization => slots.ten_pol = slot,
                Field::UrTensor => slots.ten_ur = slot,
                Field::GravitationalWave => slots.gw = slot,
                Field::VectorTemperature => slots.vec_g = slot,
                Field::VectorPolarization => slots.vec_pol = slot,
                Field::VectorMetric => slots.vec_metric = slot,
                Field::NcdmHierarchy(_) => ncdm.push(NcdmBlock::Hierarchy {
                    start,
                    q_size: multiplicity / l_count.max(1),
                }),
                Field::NcdmFluid(_) => ncdm.push(NcdmBlock::Fluid { start }),
            }
        }

        Self {
            mode: descriptor.mode,
            entries,
            index,
            slots,
            ncdm,
            ncdm_l_count: l_count,
            size: offset,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    /// ncdm blocks in species order
    pub fn ncdm(&self) -> &[NcdmBlock] {
        &self.ncdm
    }

    pub fn ncdm_l_count(&self) -> usize {
        self.ncdm_l_count
    }

    /// Slot range of `field`, if integrated in this regime
    pub fn range(&self, field: Field) -> Option<Range<usize>> {
        self.index.get(&field).map(|i| self.entries[*i].1.clone())
    }

    pub fn contains(&self, field: Field) -> bool {
        self.index.contains_key(&field)
    }

    /// Fields in storage order with their slot ranges
    pub fn entries(&self) -> impl Iterator<Item = (Field, Range<usize>)> + '_ {
        self.entries.iter().map(|(f, r)| (*f, r.clone()))
    }

    /// Mask of the slots the source routine reads
    pub fn used_in_sources(&self) -> Vec<bool> {
        let mut mask = vec![false; self.size];
        for (field, range) in &self.entries {
            for (i, slot) in range.clone().enumerate() {
                mask[slot] = field.is_used(i, self.ncdm_l_count);
            }
        }
        mask
    }
}

// =================================================================================================
// State vector
// =================================================================================================

/// Integrated values of one regime
#[derive(Debug, Clone)]
pub struct StateVector {
    pub layout: StateLayout,
    pub y: Vec<f64>,
    pub dy: Vec<f64>,
    pub used_in_sources: Vec<bool>,
}

impl StateVector {
    /// Zero state on `layout`
    pub fn zeros(layout: StateLayout) -> Self {
        let size = layout.size();
        let used_in_sources = layout.used_in_sources();
        Self {
            layout,
            y: vec![0.0; size],
            dy: vec![0.0; size],
            used_in_sources,
        }
    }

    /// Values of `field`
    pub fn field(&self, field: Field) -> Option<&[f64]> {
        self.layout.range(field).map(|r| &self.y[r])
    }

    pub fn field_mut(&mut self, field: Field) -> Option<&mut [f64]> {
        self.layout.range(field).map(move |r| &mut self.y[r])
    }

    /// First value of `field`
    pub fn value(&self, field: Field) -> Option<f64> {
        self.field(field).map(|v| v[0])
    }

    pub fn size(&self) -> usize {
        self.y.len()
    }
}

// =================================================================================================
// Reseeding
// =================================================================================================

/// Closure values of the previous regime at the switching time
#[derive(Debug, Clone)]
pub struct ReseedInputs<'a> {
    pub k: f64,
    pub a: f64,
    /// Photon interaction time 1/κ' (0 once the opacity vanished)
    pub tau_c: f64,
    /// Curvature factors s_ℓ
    pub s_l: &'a [f64],
    /// Tight-coupling photon shear of the previous regime
    pub tca_shear_g: f64,
    /// Tight-coupling idr shear of the previous regime
    pub tca_shear_idr: f64,
    pub ncdm: &'a [QuadratureSpecies],
    pub ncdm_rescaling: &'a [f64],
}

/// New state on `layout`, continued from `old`
pub fn reseed(old: &StateVector, layout: StateLayout, inputs: &ReseedInputs<'_>) -> PerturbResult<StateVector> {
    let mut state = StateVector::zeros(layout);
    let entries: Vec<(Field, Range<usize>)> = state.layout.entries().collect();

    for (field, range) in entries {
        if let Some(old_range) = old.layout.range(field)
            && old_range.len() == range.len()
        {
            state.y[range].copy_from_slice(&old.y[old_range]);
            continue;
        }

        let target = &mut state.y[range];
        match field {
            Field::PhotonShear => target[0] = inputs.tca_shear_g,
            Field::PhotonMultipoles => {
                target[0] = 6.0 / 7.0 * inputs.k * inputs.s_l[3] * inputs.tau_c * inputs.tca_shear_g;
            }
            Field::PhotonPolarization => {
                let shear = inputs.tca_shear_g;
                let l3 = 6.0 / 7.0 * inputs.k * inputs.s_l[3] * inputs.tau_c * shear;
                let seeds = [2.5 * shear, 7.0 / 12.0 * l3, 0.5 * shear, 0.25 * l3];
                for (slot, seed) in target.iter_mut().zip(seeds) {
                    *slot = seed;
                }
            }
            Field::IdrShear => target[0] = inputs.tca_shear_idr,
            Field::IdrMultipoles => {}
            Field::NcdmFluid(n) => {
                let psi = old.field(Field::NcdmHierarchy(n)).ok_or_else(|| {
                    PerturbError::Numerical(format!("ncdm species {} has no hierarchy to reduce", n))
                })?;
                let species = inputs.ncdm.get(n).ok_or_else(|| {
                    PerturbError::Numerical(format!("no momentum quadrature for ncdm species {}", n))
                })?;
                let rescale = inputs.ncdm_rescaling.get(n).copied().unwrap_or(1.0);
                let (rho, p, _) = species.integrals(inputs.a);
                let (rho, p) = (rho * rescale, p * rescale);
                let moments =
                    species.perturbed_moments(inputs.a, inputs.k, psi, old.layout.ncdm_l_count(), rescale);

                target[0] = moments.rho_delta / rho;
                target[1] = moments.rho_plus_p_theta / (rho + p);
                target[2] = moments.rho_plus_p_shear / (rho + p);
            }
            Field::TensorTemperature | Field::TensorPolarization => {
                let gw_prime = old
                    .field(Field::GravitationalWave)
                    .map(|gw| gw[1])
                    .unwrap_or(0.0);
                target[0] = if field == Field::TensorTemperature {
                    -4.0 / 3.0 * gw_prime * inputs.tau_c
                } else {
                    1.0 / 3.0 * gw_prime * inputs.tau_c
                };
            }
            Field::VectorTemperature => {
                target[0] = old.value(Field::BaryonVelocity).unwrap_or(0.0);
            }
            Field::VectorPolarization => {}
            other => {
                return Err(PerturbError::Numerical(format!(
                    "no rule to seed {} after a regime switch",
                    other.name()
                )));
            }
        }
    }

    Ok(state)
}
