//! Initial conditions deep in radiation domination
//!
//! Scalar modes are seeded from the leading terms of the super-horizon power
//! series in kτ, computed in the synchronous gauge. Newtonian-gauge initial
//! data follow from the gauge transformation with parameter
//! α = (h' + 6η')/2k², built from the synchronous-gauge totals.
//!
//! Normalization: the adiabatic mode has curvature perturbation η → 1 at
//! early times, isocurvature modes have unit entropy perturbation, tensors
//! start with h = 1 and vectors with V = 1.

use log::trace;

use crate::config::Gauge;
use crate::error::{PerturbError, PerturbResult};
use crate::physics::BackgroundRecord;
use super::indices::{InitialCondition, Mode};
use super::layout::{NcdmBlock, StateLayout, StateVector};
use super::metric::required;
use super::workspace::{TaskContext, Workspace};

/// Fluid variables of one species in the synchronous gauge
#[derive(Debug, Clone, Copy, Default)]
struct Seed {
    delta: f64,
    theta: f64,
    shear: f64,
    l3: f64,
}

/// Synchronous-gauge series solution at one time
#[derive(Debug, Clone, Copy, Default)]
struct SynchronousSeed {
    photons: Seed,
    baryons: Seed,
    cdm: Seed,
    ur: Seed,
    idr: Seed,
    idm: Seed,
    fld: Seed,
    eta: f64,
}

/// Build the initial state of `context` on `layout`
///
/// The workspace must have been refreshed at `tau`.
pub fn initial_conditions(
    context: &TaskContext<'_>,
    workspace: &Workspace,
    layout: StateLayout,
    tau: f64,
) -> PerturbResult<StateVector> {
    let mut state = StateVector::zeros(layout);
    match context.mode {
        Mode::Scalar => scalar_initial_conditions(context, workspace, &mut state, tau)?,
        Mode::Tensor => {
            let gw = required(state.layout.slots().gw, "gravitational wave")?;
            state.y[gw] = 1.0;
            state.y[gw + 1] = 0.0;
        }
        Mode::Vector => {
            let v = required(state.layout.slots().vec_metric, "vector metric")?;
            state.y[v] = 1.0;
        }
    }
    trace!(
        "initial conditions for {} {} at k = {:e}, tau = {:e}",
        context.mode,
        context.initial_condition,
        context.k,
        tau
    );
    Ok(state)
}

/// Radiation, matter and neutrino density fractions entering the series
struct Fractions {
    /// a ρ_m / sqrt(ρ_r)
    om: f64,
    fracnu: f64,
    fracg: f64,
    fracb: f64,
    fraccdm: f64,
}

impl Fractions {
    fn new(bg: &BackgroundRecord) -> Self {
        let relativistic_ncdm: f64 = bg.p_ncdm.iter().map(|p| 3.0 * p).sum();
        let rho_nu = bg.rho_ur + bg.rho_idr + relativistic_ncdm;
        let rho_r = bg.rho_g + rho_nu;
        let nonrelativistic_ncdm: f64 = bg
            .rho_ncdm
            .iter()
            .zip(&bg.p_ncdm)
            .map(|(rho, p)| rho - 3.0 * p)
            .sum();
        let rho_m = bg.rho_b + bg.rho_cdm + bg.rho_idm + nonrelativistic_ncdm;

        Self {
            om: bg.a * rho_m / rho_r.sqrt(),
            fracnu: rho_nu / rho_r,
            fracg: bg.rho_g / rho_r,
            fracb: bg.rho_b / rho_m,
            fraccdm: bg.rho_cdm / rho_m,
        }
    }
}

fn synchronous_seed(context: &TaskContext<'_>, workspace: &Workspace, tau: f64) -> PerturbResult<SynchronousSeed> {
    let bg = &workspace.background;
    let content = context.content();
    let k = context.k;
    let s2_squared = workspace.s2_squared();
    let Fractions {
        om,
        fracnu,
        fracg,
        fracb,
        fraccdm,
    } = Fractions::new(bg);

    let ktau_two = (k * tau) * (k * tau);
    let ktau_three = ktau_two * k * tau;

    let mut seed = SynchronousSeed::default();

    match context.initial_condition {
        InitialCondition::Adiabatic => {
            let delta_g = -ktau_two / 3.0 * (1.0 - om * tau / 5.0) * s2_squared;
            let theta_g = -k * ktau_three / 36.0 / (4.0 * fracnu + 15.0)
                * (4.0 * fracnu + 11.0 + 12.0 * s2_squared
                    - 3.0 * (8.0 * fracnu * fracnu + 50.0 * fracnu + 275.0) / 20.0 / (2.0 * fracnu + 15.0)
                        * tau
                        * om);
            seed.photons = Seed { delta: delta_g, theta: theta_g, ..Default::default() };
            seed.baryons = Seed { delta: 0.75 * delta_g, theta: theta_g, ..Default::default() };
            seed.cdm = Seed { delta: 0.75 * delta_g, ..Default::default() };
            seed.ur = Seed {
                delta: delta_g,
                theta: -k * ktau_three / 36.0 * (23.0 + 4.0 * fracnu) / (15.0 + 4.0 * fracnu),
                shear: 2.0 * ktau_two / (3.0 * (15.0 + 4.0 * fracnu)),
                l3: 2.0 * ktau_three / 7.0 / (12.0 * fracnu + 45.0),
            };
            seed.eta = 1.0
                - ktau_two / 12.0 / (15.0 + 4.0 * fracnu)
                    * (5.0 + 4.0 * s2_squared * fracnu
                        - (16.0 * fracnu * fracnu + 280.0 * fracnu + 325.0) / 10.0 / (2.0 * fracnu + 15.0)
                            * tau
                            * om);
        }

        InitialCondition::BaryonIsocurvature | InitialCondition::CdmIsocurvature => {
            let fraction = if context.initial_condition == InitialCondition::BaryonIsocurvature {
                fracb
            } else {
                fraccdm
            };
            let delta_g = fraction * om * tau * (-2.0 / 3.0 + om * tau / 4.0);
            let theta_g = -fraction * om * ktau_two / 12.0;
            seed.photons = Seed { delta: delta_g, theta: theta_g, ..Default::default() };
            seed.ur = Seed { delta: delta_g, theta: theta_g, ..Default::default() };
            seed.baryons = Seed { delta: 0.75 * delta_g, theta: theta_g, ..Default::default() };
            seed.cdm = Seed { delta: 0.75 * delta_g, ..Default::default() };
            if context.initial_condition == InitialCondition::BaryonIsocurvature {
                seed.baryons.delta = 1.0;
            } else {
                seed.cdm.delta = 1.0;
            }
            seed.eta = -fraction * om * tau * (1.0 / 6.0 - om * tau / 16.0);
        }

        InitialCondition::NeutrinoDensityIsocurvature => {
            if !content.has_ur {
                return Err(PerturbError::Configuration(
                    "neutrino density isocurvature needs massless neutrinos".into(),
                ));
            }
            let delta_g = -fracnu / fracg;
            let theta_g = -fracnu / fracg * k * k * tau / 4.0;
            seed.photons = Seed { delta: delta_g, theta: theta_g, ..Default::default() };
            seed.baryons = Seed { delta: 0.75 * delta_g, theta: theta_g, ..Default::default() };
            seed.cdm = Seed { delta: 0.75 * delta_g, ..Default::default() };
            seed.ur = Seed {
                delta: 1.0,
                theta: k * k * tau / 4.0,
                shear: ktau_two / (2.0 * (15.0 + 4.0 * fracg)),
                l3: 0.0,
            };
            seed.eta = -fracnu * ktau_two / (6.0 * (15.0 + 4.0 * fracg));
        }

        InitialCondition::Vector | InitialCondition::Tensor => {
            return Err(PerturbError::Configuration(format!(
                "initial condition '{}' is not a scalar mode",
                context.initial_condition
            )));
        }
    }

    // interacting dark sector follows the photon-baryon pattern
    seed.idr = seed.ur;
    seed.idm = Seed {
        delta: 0.75 * seed.photons.delta,
        theta: seed.ur.theta,
        ..Default::default()
    };

    if content.has_fld && !content.use_ppf {
        let w = bg.w_fld;
        let cs2 = content.cs2_fld;
        seed.fld = Seed {
            delta: -ktau_two / 4.0 * (1.0 + w) * (4.0 - 3.0 * cs2) / (4.0 - 6.0 * w + 3.0 * cs2),
            theta: -k * ktau_three / 4.0 * cs2 / (4.0 - 6.0 * w + 3.0 * cs2),
            ..Default::default()
        };
    }

    Ok(seed)
}

fn scalar_initial_conditions(
    context: &TaskContext<'_>,
    workspace: &Workspace,
    state: &mut StateVector,
    tau: f64,
) -> PerturbResult<()> {
    let seed = synchronous_seed(context, workspace, tau)?;
    let bg = &workspace.background;
    let content = context.content();
    let k = context.k;
    let k2 = k * k;
    let a = bg.a;
    let a2 = a * a;
    let a_prime_over_a = bg.a_prime_over_a();

    // gauge parameter from the synchronous totals
    let alpha = match context.gauge() {
        Gauge::Synchronous => 0.0,
        Gauge::Newtonian => {
            let (delta_rho, rho_plus_p_theta) = synchronous_totals(context, workspace, &seed);
            let s2_squared = workspace.s2_squared();
            let h_prime = (k2 * s2_squared * seed.eta + 1.5 * a2 * delta_rho) / (0.5 * a_prime_over_a);
            let eta_prime =
                (1.5 * a2 * rho_plus_p_theta + 0.5 * content.curvature * h_prime) / (k2 * s2_squared);
            (h_prime + 6.0 * eta_prime) / (2.0 * k2)
        }
    };
    let shift = a_prime_over_a * alpha;
    let theta_shift = k2 * alpha;

    let layout = state.layout.clone();
    let slots = layout.slots();
    let y = &mut state.y;

    let mut put = |slot: Option<usize>, value: f64| {
        if let Some(i) = slot {
            y[i] = value;
        }
    };

    put(slots.delta_g, seed.photons.delta - 4.0 * shift);
    put(slots.theta_g, seed.photons.theta + theta_shift);
    put(slots.delta_b, seed.baryons.delta - 3.0 * shift);
    put(slots.theta_b, seed.baryons.theta + theta_shift);
    put(slots.delta_cdm, seed.cdm.delta - 3.0 * shift);
    put(slots.theta_cdm, seed.cdm.theta + theta_shift);

    if content.has_idm_dr {
        put(slots.delta_idm, seed.idm.delta - 3.0 * shift);
        put(slots.theta_idm, seed.idm.theta + theta_shift);
    }
    if content.has_idr {
        put(slots.delta_idr, seed.idr.delta - 4.0 * shift);
        put(slots.theta_idr, seed.idr.theta + theta_shift);
        put(slots.shear_idr, seed.idr.shear);
        put(slots.l3_idr, seed.idr.l3);
    }

    if content.has_fld && !content.use_ppf {
        put(slots.delta_fld, seed.fld.delta - 3.0 * (1.0 + bg.w_fld) * shift);
        put(slots.theta_fld, seed.fld.theta + theta_shift);
    }
    // PPF Γ starts at zero in both gauges

    if content.has_ur {
        put(slots.delta_ur, seed.ur.delta - 4.0 * shift);
        put(slots.theta_ur, seed.ur.theta + theta_shift);
        put(slots.shear_ur, seed.ur.shear);
        put(slots.l3_ur, seed.ur.l3);
    }

    put(slots.eta, seed.eta);
    put(slots.phi, seed.eta - shift);

    // non-cold species follow the massless neutrinos
    for (n, block) in layout.ncdm().iter().enumerate() {
        match *block {
            NcdmBlock::Hierarchy { start, q_size } => {
                let species = context.ncdm().get(n).ok_or_else(|| {
                    PerturbError::Collaborator(format!("no momentum quadrature for ncdm species {}", n))
                })?;
                let l_count = layout.ncdm_l_count();
                for i in 0..q_size {
                    let q = species.q[i];
                    let eps = species.epsilon(i, a);
                    let dlnf0 = species.dlnf0_dlnq[i];
                    let base = start + i * l_count;
                    y[base] = (-0.25 * seed.ur.delta + shift) * dlnf0;
                    y[base + 1] = -eps / (3.0 * q * k) * (seed.ur.theta + theta_shift) * dlnf0;
                    y[base + 2] = -0.5 * seed.ur.shear * dlnf0;
                }
            }
            NcdmBlock::Fluid { start } => {
                let w = bg.p_ncdm[n] / bg.rho_ncdm[n];
                y[start] = seed.ur.delta - 3.0 * (1.0 + w) * shift;
                y[start + 1] = seed.ur.theta + theta_shift;
                y[start + 2] = seed.ur.shear;
            }
        }
    }

    Ok(())
}

/// δρ and (ρ+p)θ of the synchronous-gauge seed
fn synchronous_totals(context: &TaskContext<'_>, workspace: &Workspace, seed: &SynchronousSeed) -> (f64, f64) {
    let bg = &workspace.background;
    let content = context.content();

    let mut delta_rho = bg.rho_g * seed.photons.delta + bg.rho_b * seed.baryons.delta + bg.rho_cdm * seed.cdm.delta;
    let mut rho_plus_p_theta = 4.0 / 3.0 * bg.rho_g * seed.photons.theta + bg.rho_b * seed.baryons.theta;

    if content.has_ur {
        delta_rho += bg.rho_ur * seed.ur.delta;
        rho_plus_p_theta += 4.0 / 3.0 * bg.rho_ur * seed.ur.theta;
    }
    if content.has_idr {
        delta_rho += bg.rho_idr * seed.idr.delta;
        rho_plus_p_theta += 4.0 / 3.0 * bg.rho_idr * seed.idr.theta;
    }
    if content.has_idm_dr {
        delta_rho += bg.rho_idm * seed.idm.delta;
        rho_plus_p_theta += bg.rho_idm * seed.idm.theta;
    }
    if content.has_fld && !content.use_ppf {
        delta_rho += bg.rho_fld * seed.fld.delta;
        rho_plus_p_theta += (1.0 + bg.w_fld) * bg.rho_fld * seed.fld.theta;
    }
    for (rho, p) in bg.rho_ncdm.iter().zip(&bg.p_ncdm) {
        delta_rho += rho * seed.ur.delta;
        rho_plus_p_theta += (rho + p) * seed.ur.theta;
    }

    (delta_rho, rho_plus_p_theta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Precision, Settings};
    use crate::models::approximations::RegimeFlags;
    use crate::models::layout::{Field, LayoutDescriptor};
    use crate::physics::{Background, ToyCosmology};
    use approx::assert_relative_eq;

    fn seeded(cosmology: &ToyCosmology, settings: &Settings, ic: InitialCondition, k: f64, tau: f64) -> StateVector {
        let precision = Precision::default();
        let context = TaskContext {
            mode: Mode::Scalar,
            initial_condition: ic,
            k,
            settings,
            precision: &precision,
            background: cosmology,
            thermodynamics: cosmology,
        };
        let mut workspace = Workspace::new(&context);
        workspace.refresh(&context, tau).unwrap();
        let descriptor = LayoutDescriptor::for_regime(
            Mode::Scalar,
            &RegimeFlags::early(),
            settings.gauge,
            cosmology.content(),
            &precision,
            &context.ncdm_q_sizes(),
        );
        initial_conditions(&context, &workspace, StateLayout::build(&descriptor), tau).unwrap()
    }

    #[test]
    fn test_adiabatic_leading_order() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let (k, tau) = (1e-3, 0.1);
        let state = seeded(&cosmology, &settings, InitialCondition::Adiabatic, k, tau);

        let delta_g = state.value(Field::PhotonDensity).unwrap();
        assert_relative_eq!(delta_g, -(k * tau).powi(2) / 3.0, max_relative = 1e-3);
        assert_relative_eq!(state.value(Field::Eta).unwrap(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(state.value(Field::BaryonDensity).unwrap(), 0.75 * delta_g);
        assert_eq!(
            state.value(Field::BaryonVelocity).unwrap(),
            state.value(Field::PhotonVelocity).unwrap()
        );
    }

    #[test]
    fn test_newtonian_potential_is_constant_and_negative_density() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb().with_gauge(Gauge::Newtonian);
        let state = seeded(&cosmology, &settings, InitialCondition::Adiabatic, 1e-3, 0.1);

        let phi = state.value(Field::Phi).unwrap();
        let delta_g = state.value(Field::PhotonDensity).unwrap();
        // super-horizon radiation era: δ_γ = −2ψ with ψ ≈ φ of order 2/3
        assert!(phi > 0.5 && phi < 0.75, "phi = {}", phi);
        assert!(delta_g < 0.0);
    }

    #[test]
    fn test_cdm_isocurvature_unit_entropy() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let state = seeded(&cosmology, &settings, InitialCondition::CdmIsocurvature, 1e-3, 0.1);

        assert_eq!(state.value(Field::CdmDensity).unwrap(), 1.0);
        assert!(state.value(Field::PhotonDensity).unwrap().abs() < 0.1);
    }

    #[test]
    fn test_tensor_and_vector_normalization() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb().with_modes(true, true, true);
        let precision = Precision::default();
        for (mode, ic, field) in [
            (Mode::Tensor, InitialCondition::Tensor, Field::GravitationalWave),
            (Mode::Vector, InitialCondition::Vector, Field::VectorMetric),
        ] {
            let context = TaskContext {
                mode,
                initial_condition: ic,
                k: 0.01,
                settings: &settings,
                precision: &precision,
                background: &cosmology,
                thermodynamics: &cosmology,
            };
            let workspace = Workspace::new(&context);
            let mut flags = RegimeFlags::early();
            flags.set(crate::models::Approximation::IdmDrTightCoupling, 1);
            let descriptor =
                LayoutDescriptor::for_regime(mode, &flags, settings.gauge, cosmology.content(), &precision, &[]);
            let state = initial_conditions(&context, &workspace, StateLayout::build(&descriptor), 1.0).unwrap();
            assert_eq!(state.field(field).unwrap()[0], 1.0);
        }
    }
}
