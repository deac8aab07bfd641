//! Source functions S(k, τ) and per-step trace rows
//!
//! Sources are evaluated on the sampling grid from the integrated state, the
//! constraint solution, and θ_b' from the right-hand side. CMB sources use
//! the line-of-sight weights of the visibility function g and e^{−κ}.

use crate::config::Gauge;
use crate::error::PerturbResult;
use super::derivatives::derivatives;
use super::indices::{Mode, ModeIndices, SourceType};
use super::layout::StateLayout;
use super::metric::{required, solve_metric};
use super::workspace::{TaskContext, Workspace};

/// Evaluate every source of `indices` at `tau` into `out`
///
/// `scratch` receives dy/dτ and must have the layout size.
#[allow(clippy::too_many_arguments)]
pub fn compute_sources(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    indices: &ModeIndices,
    tau: f64,
    y: &[f64],
    scratch: &mut [f64],
    out: &mut [f64],
) -> PerturbResult<()> {
    derivatives(context, workspace, layout, tau, y, scratch)?;

    match context.mode {
        Mode::Scalar => scalar_sources(context, workspace, layout, indices, y, scratch, out),
        Mode::Tensor => {
            let th = &workspace.thermo;
            let m = &workspace.metric;
            let gw = required(layout.slots().gw, "gravitational wave")?;
            for (value, source) in out.iter_mut().zip(&indices.sources) {
                *value = match source {
                    SourceType::T2 => -th.exp_m_kappa * y[gw + 1] + th.g * m.tensor_psi,
                    SourceType::P => -th.g * m.tensor_psi,
                    _ => 0.0,
                };
            }
            Ok(())
        }
        Mode::Vector => {
            let th = &workspace.thermo;
            let m = &workspace.metric;
            let slots = layout.slots();
            let v = y[required(slots.vec_metric, "vector metric")?];
            let v_b = y[required(slots.theta_b, "baryon velocity")?];
            for (value, source) in out.iter_mut().zip(&indices.sources) {
                *value = match source {
                    SourceType::T1 => th.g * (v_b - v),
                    SourceType::T2 => th.g * m.vector_p,
                    SourceType::P => 6f64.sqrt() * th.g * m.vector_p,
                    _ => 0.0,
                };
            }
            Ok(())
        }
    }
}

fn scalar_sources(
    context: &TaskContext<'_>,
    workspace: &Workspace,
    layout: &StateLayout,
    indices: &ModeIndices,
    y: &[f64],
    dy: &[f64],
    out: &mut [f64],
) -> PerturbResult<()> {
    let settings = context.settings;
    let content = context.content();
    let gauge = context.gauge();
    let k = context.k;
    let k2 = k * k;
    let bg = &workspace.background;
    let th = &workspace.thermo;
    let m = &workspace.metric;
    let slots = layout.slots();

    let a_prime_over_a = bg.a_prime_over_a();
    let theta_b_slot = required(slots.theta_b, "baryon velocity")?;
    let delta_b = y[required(slots.delta_b, "baryon density")?];
    let theta_b = y[theta_b_slot];
    let theta_b_prime = dy[theta_b_slot];
    let delta_cdm = y[required(slots.delta_cdm, "cdm density")?];
    let theta_cdm = slots.theta_cdm.map(|i| y[i]).unwrap_or(0.0);

    let switch_isw = if bg.z() > settings.eisw_lisw_split_z {
        settings.switch_eisw
    } else {
        settings.switch_lisw
    };
    let (g, dg, e) = (th.g, th.dg, th.exp_m_kappa);

    // matter totals, converted to the comoving gauge in the Newtonian gauge
    let theta_m = m.rho_plus_p_theta_m / m.rho_plus_p_m;
    let theta_cb = m.rho_plus_p_theta_cb / m.rho_cb;
    let mut delta_m = m.delta_rho_m / m.rho_m;
    let mut delta_cb = m.delta_rho_cb / m.rho_cb;
    if gauge == Gauge::Newtonian {
        delta_m += 3.0 * a_prime_over_a * theta_m / k2;
        delta_cb += 3.0 * a_prime_over_a * theta_cb / k2;
    }

    let theta_tot = m.rho_plus_p_theta / m.rho_plus_p_tot;
    let nbody = gauge == Gauge::Synchronous && settings.has_nbody_gauge_transfers;
    let density = |delta: f64, w: f64| {
        if nbody {
            delta + 3.0 * (1.0 + w) * a_prime_over_a * theta_tot / k2
        } else {
            delta
        }
    };
    let velocity = |theta: f64| if nbody { theta + k2 * m.alpha } else { theta };

    let eta = slots.eta.map(|i| y[i]).unwrap_or(0.0);

    for (value, source) in out.iter_mut().zip(&indices.sources) {
        *value = match *source {
            SourceType::T0 => match gauge {
                Gauge::Newtonian => {
                    settings.switch_sw * g * (m.delta_g / 4.0 + m.psi)
                        + switch_isw * (g * (m.phi - m.psi) + e * 2.0 * m.phi_prime)
                        + settings.switch_dop / k2 * (g * theta_b_prime + dg * theta_b)
                }
                Gauge::Synchronous => {
                    settings.switch_sw * g * (m.delta_g / 4.0 + m.alpha_prime)
                        // φ − ψ = η − α' − 2(a'/a)α and φ' = η' − (a'/a)'α − (a'/a)α'
                        + switch_isw * (g * (m.phi - m.psi) + e * 2.0 * m.phi_prime)
                        + settings.switch_dop
                            * (g * (theta_b_prime / k2 + m.alpha_prime) + dg * (theta_b / k2 + m.alpha))
                }
            },
            SourceType::T1 => match gauge {
                Gauge::Newtonian => switch_isw * e * k * (m.psi - m.phi),
                Gauge::Synchronous => switch_isw * e * k * (m.alpha_prime + 2.0 * a_prime_over_a * m.alpha - eta),
            },
            SourceType::T2 => settings.switch_pol * g * m.pol_p,
            SourceType::P => 6f64.sqrt() * g * m.pol_p,
            SourceType::PhiPlusPsi => m.phi + m.psi,
            SourceType::DeltaM => density(delta_m, 0.0),
            SourceType::DeltaCb => density(delta_cb, 0.0),
            SourceType::ThetaM => velocity(theta_m),
            SourceType::ThetaCb => velocity(theta_cb),
            SourceType::Phi => m.phi,
            SourceType::Psi => m.psi,
            SourceType::PhiPrime => m.phi_prime,
            SourceType::HPrime => m.h_prime,
            SourceType::Eta => eta,
            SourceType::EtaPrime => m.eta_prime,
            SourceType::DeltaTot => density(m.delta_rho / bg.rho_tot, bg.p_tot / bg.rho_tot),
            SourceType::DeltaG => density(m.delta_g, 1.0 / 3.0),
            SourceType::DeltaB => density(delta_b, 0.0),
            SourceType::DeltaCdm => density(delta_cdm, 0.0),
            SourceType::DeltaIdm => density(slots.delta_idm.map(|i| y[i]).unwrap_or(0.0), 0.0),
            SourceType::DeltaFld => density(m.delta_fld, bg.w_fld),
            SourceType::DeltaUr => density(m.delta_ur, 1.0 / 3.0),
            SourceType::DeltaIdr => density(m.delta_idr, 1.0 / 3.0),
            SourceType::DeltaNcdm(n) => {
                let w = bg.p_ncdm[n] / bg.rho_ncdm[n];
                density(m.delta_ncdm[n], w)
            }
            SourceType::ThetaTot => velocity(theta_tot),
            SourceType::ThetaG => velocity(m.theta_g),
            SourceType::ThetaB => velocity(theta_b),
            SourceType::ThetaCdm => velocity(theta_cdm),
            SourceType::ThetaIdm => velocity(slots.theta_idm.map(|i| y[i]).unwrap_or(0.0)),
            SourceType::ThetaFld => velocity(if content.has_fld { m.theta_fld } else { 0.0 }),
            SourceType::ThetaUr => velocity(m.theta_ur),
            SourceType::ThetaIdr => velocity(m.theta_idr),
            SourceType::ThetaNcdm(n) => velocity(m.theta_ncdm[n]),
        };
    }

    Ok(())
}

/// Column titles of the per-step trace of one task
pub fn trace_titles(context: &TaskContext<'_>) -> Vec<String> {
    let content = context.content();
    let mut titles: Vec<String> = vec!["tau".into(), "a".into()];

    match context.mode {
        Mode::Scalar => {
            titles.extend(["delta_g", "theta_g", "shear_g", "pol_p", "delta_b", "theta_b", "delta_cdm"].map(String::from));
            if context.gauge() == Gauge::Newtonian {
                titles.push("theta_cdm".into());
            }
            if content.has_ur {
                titles.extend(["delta_ur", "theta_ur", "shear_ur"].map(String::from));
            }
            if content.has_fld {
                titles.extend(["delta_fld", "theta_fld"].map(String::from));
            }
            for n in 0..content.n_ncdm {
                titles.push(format!("delta_ncdm[{}]", n));
                titles.push(format!("theta_ncdm[{}]", n));
                titles.push(format!("shear_ncdm[{}]", n));
            }
            match context.gauge() {
                Gauge::Synchronous => titles.extend(["eta", "h_prime", "alpha"].map(String::from)),
                Gauge::Newtonian => titles.extend(["phi", "psi", "phi_prime"].map(String::from)),
            }
        }
        Mode::Tensor => titles.extend(["gw", "gw_prime", "delta_g", "tensor_psi", "gw_source"].map(String::from)),
        Mode::Vector => titles.extend(["vector_metric", "v_b", "theta_2", "vector_p"].map(String::from)),
    }
    titles
}

/// Row matching [`trace_titles`] for the state `y` at `tau`
pub fn trace_row(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    tau: f64,
    y: &[f64],
) -> PerturbResult<Vec<f64>> {
    workspace.refresh(context, tau)?;
    solve_metric(context, workspace, layout, y)?;

    let content = context.content();
    let slots = layout.slots();
    let m = &workspace.metric;
    let mut row = vec![tau, workspace.background.a];

    match context.mode {
        Mode::Scalar => {
            row.extend([
                m.delta_g,
                m.theta_g,
                m.shear_g,
                m.pol_p,
                y[required(slots.delta_b, "baryon density")?],
                y[required(slots.theta_b, "baryon velocity")?],
                y[required(slots.delta_cdm, "cdm density")?],
            ]);
            if context.gauge() == Gauge::Newtonian {
                row.push(slots.theta_cdm.map(|i| y[i]).unwrap_or(0.0));
            }
            if content.has_ur {
                row.extend([m.delta_ur, m.theta_ur, m.shear_ur]);
            }
            if content.has_fld {
                row.extend([m.delta_fld, m.theta_fld]);
            }
            for n in 0..content.n_ncdm {
                row.extend([m.delta_ncdm[n], m.theta_ncdm[n], m.shear_ncdm[n]]);
            }
            match context.gauge() {
                Gauge::Synchronous => row.extend([y[required(slots.eta, "eta")?], m.h_prime, m.alpha]),
                Gauge::Newtonian => row.extend([m.phi, m.psi, m.phi_prime]),
            }
        }
        Mode::Tensor => {
            let gw = required(slots.gw, "gravitational wave")?;
            row.extend([y[gw], y[gw + 1], m.delta_g, m.tensor_psi, m.gw_source]);
        }
        Mode::Vector => {
            row.extend([
                y[required(slots.vec_metric, "vector metric")?],
                y[required(slots.theta_b, "baryon velocity")?],
                m.shear_g,
                m.vector_p,
            ]);
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Precision, Settings};
    use crate::models::approximations::RegimeFlags;
    use crate::models::indices::InitialCondition;
    use crate::models::initial::initial_conditions;
    use crate::models::layout::{Field, LayoutDescriptor, StateVector};
    use crate::physics::{Background, Thermodynamics, ToyCosmology};
    use approx::assert_relative_eq;

    fn seeded(context: &TaskContext<'_>, workspace: &mut Workspace, tau: f64) -> StateVector {
        workspace.refresh(context, tau).unwrap();
        let descriptor = LayoutDescriptor::for_regime(
            context.mode,
            &RegimeFlags::early(),
            context.gauge(),
            context.content(),
            context.precision,
            &context.ncdm_q_sizes(),
        );
        initial_conditions(context, workspace, StateLayout::build(&descriptor), tau).unwrap()
    }

    #[test]
    fn test_trace_row_matches_titles() {
        let cosmology = ToyCosmology::new().unwrap();
        let precision = Precision::default();

        for gauge in [Gauge::Synchronous, Gauge::Newtonian] {
            let settings = Settings::cmb().with_gauge(gauge);
            let context = TaskContext {
                mode: Mode::Scalar,
                initial_condition: InitialCondition::Adiabatic,
                k: 0.01,
                settings: &settings,
                precision: &precision,
                background: &cosmology,
                thermodynamics: &cosmology,
            };
            let mut workspace = Workspace::new(&context);
            let state = seeded(&context, &mut workspace, 1.0);

            let titles = trace_titles(&context);
            let row = trace_row(&context, &mut workspace, &state.layout, 1.0, &state.y).unwrap();
            assert_eq!(titles.len(), row.len(), "{:?} gauge", gauge);
            assert_eq!(titles[0], "tau");
            assert_eq!(row[0], 1.0);
        }
    }

    #[test]
    fn test_metric_sources_copy_the_constraint_solution() {
        let cosmology = ToyCosmology::new().unwrap();
        let precision = Precision::default();
        let mut settings = Settings::cmb();
        settings.has_density_transfers = true;
        settings.has_metricpotential_transfers = true;
        settings.has_cl_lensing_potential = true;
        let context = TaskContext {
            mode: Mode::Scalar,
            initial_condition: InitialCondition::Adiabatic,
            k: 0.01,
            settings: &settings,
            precision: &precision,
            background: &cosmology,
            thermodynamics: &cosmology,
        };
        let indices = ModeIndices::build(Mode::Scalar, &settings, cosmology.content());
        let mut workspace = Workspace::new(&context);
        let tau = 1.0;
        let state = seeded(&context, &mut workspace, tau);

        let mut scratch = vec![0.0; state.size()];
        let mut out = vec![f64::NAN; indices.sources.len()];
        compute_sources(&context, &mut workspace, &state.layout, &indices, tau, &state.y, &mut scratch, &mut out)
            .unwrap();
        assert!(out.iter().all(|v| v.is_finite()));

        let m = &workspace.metric;
        let value = |source| out[indices.index_of(source).unwrap()];
        assert_eq!(value(SourceType::Phi), m.phi);
        assert_eq!(value(SourceType::Psi), m.psi);
        assert_eq!(value(SourceType::HPrime), m.h_prime);
        assert_eq!(value(SourceType::Eta), state.value(Field::Eta).unwrap());
        assert_eq!(value(SourceType::DeltaCdm), state.value(Field::CdmDensity).unwrap());
        assert_eq!(value(SourceType::PhiPlusPsi), m.phi + m.psi);
    }

    #[test]
    fn test_synchronous_isw_uses_newtonian_potentials() {
        let cosmology = ToyCosmology::new().unwrap();
        let precision = Precision::default();
        let mut settings = Settings::cmb();
        settings.switch_sw = 0.0;
        settings.switch_dop = 0.0;
        let k = 0.01;
        let context = TaskContext {
            mode: Mode::Scalar,
            initial_condition: InitialCondition::Adiabatic,
            k,
            settings: &settings,
            precision: &precision,
            background: &cosmology,
            thermodynamics: &cosmology,
        };
        let indices = ModeIndices::build(Mode::Scalar, &settings, cosmology.content());
        let mut workspace = Workspace::new(&context);
        let tau = cosmology.summary().tau_rec;
        let state = seeded(&context, &mut workspace, tau);

        let mut scratch = vec![0.0; state.size()];
        let mut out = vec![0.0; indices.sources.len()];
        compute_sources(&context, &mut workspace, &state.layout, &indices, tau, &state.y, &mut scratch, &mut out)
            .unwrap();

        let bg = &workspace.background;
        let th = &workspace.thermo;
        let m = &workspace.metric;
        let eta = state.value(Field::Eta).unwrap();
        let a_prime_over_a = bg.a_prime_over_a();
        let a_prime_over_a_prime = bg.a_primeprime_over_a() - a_prime_over_a * a_prime_over_a;
        let phi_minus_psi = eta - m.alpha_prime - 2.0 * a_prime_over_a * m.alpha;
        let phi_prime = m.eta_prime - a_prime_over_a_prime * m.alpha - a_prime_over_a * m.alpha_prime;
        let expected = th.g * phi_minus_psi + 2.0 * th.exp_m_kappa * phi_prime;

        assert!(th.exp_m_kappa * phi_prime.abs() > 0.0);
        assert_relative_eq!(out[indices.index_of(SourceType::T0).unwrap()], expected, max_relative = 1e-10);
    }
}
