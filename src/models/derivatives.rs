//! Right-hand side of the perturbation equations
//!
//! [`derivatives`] refreshes the background and thermodynamics at τ, solves
//! the constraint equations and fills dy/dτ for every slot of the current
//! layout. Slots absent from the layout (approximated species) never appear
//! in `dy`; their closed values come from [`MetricSolution`].
//!
//! [`MetricSolution`]: super::metric::MetricSolution

use crate::config::{Gauge, TcaMethod, UfaMethod, NcdmFluidMethod};
use crate::error::{PerturbError, PerturbResult};
use super::indices::Mode;
use super::layout::{NcdmBlock, StateLayout};
use super::metric::{fluid_adiabatic_sound_speed, ncdm_sound_speed, required, solve_metric, MetricSolution};
use super::workspace::{TaskContext, Workspace};

/// Fill `dy` with dy/dτ at `tau`
pub fn derivatives(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    tau: f64,
    y: &[f64],
    dy: &mut [f64],
) -> PerturbResult<()> {
    workspace.refresh(context, tau)?;
    solve_metric(context, workspace, layout, y)?;
    dy.fill(0.0);

    match context.mode {
        Mode::Scalar => scalar_derivatives(context, workspace, layout, tau, y, dy),
        Mode::Tensor => tensor_derivatives(context, workspace, layout, tau, y, dy),
        Mode::Vector => vector_derivatives(context, workspace, layout, tau, y, dy),
    }
}

/// Shortest physical time scale at `tau`
///
/// min(1/(a'/a), 1/k), and the photon mean free time when the photon
/// hierarchy is integrated.
pub fn timescale(context: &TaskContext<'_>, workspace: &mut Workspace, tau: f64) -> PerturbResult<f64> {
    workspace.refresh(context, tau)?;
    let a_prime_over_a = workspace.background.a_prime_over_a();
    let mut scale = (1.0 / a_prime_over_a).min(1.0 / context.k);

    let flags = workspace.flags;
    let dkappa = workspace.thermo.dkappa;
    if !flags.tca_on() && !flags.rsa_on() && dkappa > 0.0 {
        scale = scale.min(1.0 / dkappa);
    }
    Ok(scale)
}

/// Free-streaming Boltzmann hierarchy from multipole `l_start` upward
///
/// `below` is the multipole `l_start − 1`. The last multipole uses the
/// curvature-generalized truncation.
#[allow(clippy::too_many_arguments)]
fn free_streaming(
    rate: f64,
    s_l: &[f64],
    cot_k: f64,
    l_start: usize,
    below: f64,
    f: &[f64],
    damping: f64,
    df: &mut [f64],
) {
    let n = f.len();
    for j in 0..n {
        let l = l_start + j;
        let lf = l as f64;
        let previous = if j == 0 { below } else { f[j - 1] };
        df[j] = if j + 1 < n {
            rate / (2.0 * lf + 1.0) * (lf * s_l[l] * previous - (lf + 1.0) * s_l[l + 1] * f[j + 1]) - damping * f[j]
        } else {
            rate * s_l[l] * previous - (lf + 1.0) * cot_k * f[j] - damping * f[j]
        };
    }
}

fn scalar_derivatives(
    context: &TaskContext<'_>,
    workspace: &Workspace,
    layout: &StateLayout,
    tau: f64,
    y: &[f64],
    dy: &mut [f64],
) -> PerturbResult<()> {
    let content = context.content();
    let precision = context.precision;
    let k = context.k;
    let k2 = k * k;
    let bg = &workspace.background;
    let th = &workspace.thermo;
    let m: &MetricSolution = &workspace.metric;
    let flags = workspace.flags;
    let s_l = &workspace.s_l;
    let s2_squared = workspace.s2_squared();
    let cot_k = workspace.cot_k(tau);
    let slots = layout.slots();

    let a = bg.a;
    let a_prime_over_a = bg.a_prime_over_a();
    let a_primeprime_over_a = bg.a_primeprime_over_a();
    let mc = m.metric_continuity;
    let me = m.metric_euler;
    let ms = m.metric_shear;
    let dkappa = th.dkappa;

    // photons and baryons
    let delta_b = y[required(slots.delta_b, "baryon density")?];
    let theta_b_slot = required(slots.theta_b, "baryon velocity")?;
    let theta_b = y[theta_b_slot];
    dy[required(slots.delta_b, "baryon density")?] = -(theta_b + mc);

    let r = 4.0 * bg.rho_g / (3.0 * bg.rho_b);

    if flags.rsa_on() {
        dy[theta_b_slot] = -a_prime_over_a * theta_b + me + k2 * th.cb2 * delta_b + r * dkappa * (m.theta_g - theta_b);
    } else {
        let delta_g_slot = required(slots.delta_g, "photon density")?;
        let theta_g_slot = required(slots.theta_g, "photon velocity")?;
        let delta_g = y[delta_g_slot];
        let theta_g = y[theta_g_slot];
        dy[delta_g_slot] = -4.0 / 3.0 * (theta_g + mc);

        if flags.tca_on() {
            let tau_c = 1.0 / dkappa;
            let dtau_c = -th.ddkappa * tau_c * tau_c;
            let f = tau_c / (1.0 + r);
            let shear_g = m.tca_shear_g;

            let mut slip = (dtau_c / tau_c - 2.0 * a_prime_over_a / (1.0 + r)) * (theta_b - theta_g)
                + f * (-a_primeprime_over_a * theta_b
                    + k2 * (-a_prime_over_a * delta_g / 2.0 + th.cb2 * (-theta_b - mc)
                        - 4.0 / 3.0 * (-theta_g - mc) / 4.0)
                    - a_prime_over_a * me);

            if precision.tight_coupling_approximation == TcaMethod::SecondOrder {
                let shear_g_prime = 16.0 / 45.0 * dtau_c * (theta_g + ms);
                slip = (1.0 - 2.0 * a_prime_over_a * f) * slip
                    + f * k2 * (2.0 * a_prime_over_a * shear_g + shear_g_prime);
            }

            let theta_b_prime = (-a_prime_over_a * theta_b
                + k2 * (th.cb2 * delta_b + r * (delta_g / 4.0 - s2_squared * shear_g))
                + r * slip)
                / (1.0 + r)
                + me;
            dy[theta_b_slot] = theta_b_prime;
            dy[theta_g_slot] = -(theta_b_prime + a_prime_over_a * theta_b - k2 * th.cb2 * delta_b) / r
                + k2 * (delta_g / 4.0 - s2_squared * shear_g)
                + (1.0 + r) / r * me;
        } else {
            let shear_slot = required(slots.shear_g, "photon shear")?;
            let l3 = required(slots.l3_g, "photon multipoles")?;
            let pol = required(slots.pol_g, "photon polarization")?;
            let shear_g = y[shear_slot];
            let p0 = m.pol_p;

            dy[theta_b_slot] =
                -a_prime_over_a * theta_b + me + k2 * th.cb2 * delta_b + r * dkappa * (theta_g - theta_b);
            dy[theta_g_slot] = k2 * (delta_g / 4.0 - s2_squared * shear_g) + me + dkappa * (theta_b - theta_g);
            dy[shear_slot] = 0.5
                * (8.0 / 15.0 * (theta_g + ms) - 3.0 / 5.0 * k * s_l[3] / s_l[2] * y[l3]
                    - dkappa * (2.0 * shear_g - 4.0 / 5.0 / s_l[2] * p0));

            let n_l = precision.l_max_g - 2;
            free_streaming(k, s_l, cot_k, 3, 2.0 * shear_g, &y[l3..l3 + n_l], dkappa, &mut dy[l3..l3 + n_l]);

            let n_pol = precision.l_max_pol_g + 1;
            let g = &y[pol..pol + n_pol];
            dy[pol] = -k * g[1] - dkappa * (g[0] - 4.0 * p0);
            dy[pol + 1] = k / 3.0 * (g[0] - 2.0 * s_l[2] * g[2]) - dkappa * g[1];
            dy[pol + 2] = k / 5.0 * (2.0 * s_l[2] * g[1] - 3.0 * s_l[3] * g[3]) - dkappa * (g[2] - 4.0 / 5.0 * p0);
            free_streaming(k, s_l, cot_k, 3, g[2], &g[3..], dkappa, &mut dy[pol + 3..pol + n_pol]);
        }
    }

    // cold dark matter
    let delta_cdm_slot = required(slots.delta_cdm, "cdm density")?;
    let theta_cdm = slots.theta_cdm.map(|i| y[i]).unwrap_or(0.0);
    dy[delta_cdm_slot] = -(theta_cdm + mc);
    if let Some(i) = slots.theta_cdm {
        dy[i] = -a_prime_over_a * theta_cdm + me;
    }

    // interacting dark matter and dark radiation
    if content.has_idm_dr {
        let delta_slot = required(slots.delta_idm, "idm density")?;
        let theta_slot = required(slots.theta_idm, "idm velocity")?;
        let delta_idm = y[delta_slot];
        let theta_idm = y[theta_slot];
        let s_idm_dr = 4.0 * bg.rho_idr / (3.0 * bg.rho_idm);
        dy[delta_slot] = -(theta_idm + mc);

        if flags.idm_dr_tca_on() && !flags.idr_rsa_on() {
            let delta_idr = y[required(slots.delta_idr, "idr density")?];
            let theta_idr_slot = required(slots.theta_idr, "idr velocity")?;
            let theta_idm_prime = (-a_prime_over_a * theta_idm + k2 * th.c2_idm * delta_idm + s_idm_dr * k2 * delta_idr / 4.0)
                / (1.0 + s_idm_dr)
                + me;
            dy[theta_slot] = theta_idm_prime;
            dy[theta_idr_slot] = -(theta_idm_prime + a_prime_over_a * theta_idm - k2 * th.c2_idm * delta_idm) / s_idm_dr
                + k2 * delta_idr / 4.0
                + (1.0 + s_idm_dr) / s_idm_dr * me;
        } else {
            dy[theta_slot] = -a_prime_over_a * theta_idm + k2 * th.c2_idm * delta_idm + me
                + s_idm_dr * th.dmu_idm_dr * (m.theta_idr - theta_idm);
        }
    }

    if content.has_idr && !flags.idr_rsa_on() {
        let delta_slot = required(slots.delta_idr, "idr density")?;
        let theta_slot = required(slots.theta_idr, "idr velocity")?;
        let theta_idr = y[theta_slot];
        dy[delta_slot] = -4.0 / 3.0 * (theta_idr + mc);

        let coupled = content.has_idm_dr && flags.idm_dr_tca_on();
        if !coupled {
            let shear_slot = required(slots.shear_idr, "idr shear")?;
            let l3 = required(slots.l3_idr, "idr multipoles")?;
            let shear_idr = y[shear_slot];
            let (dmu_idm_dr, theta_idm) = if content.has_idm_dr {
                (th.dmu_idm_dr, y[required(slots.theta_idm, "idm velocity")?])
            } else {
                (0.0, 0.0)
            };
            let damping = dmu_idm_dr + th.dmu_idr;

            dy[theta_slot] = k2 * (y[delta_slot] / 4.0 - s2_squared * shear_idr) + me + dmu_idm_dr * (theta_idm - theta_idr);
            dy[shear_slot] = 0.5 * (8.0 / 15.0 * (theta_idr + ms) - 3.0 / 5.0 * k * s_l[3] / s_l[2] * y[l3])
                - damping * shear_idr;
            let n_l = precision.l_max_idr - 2;
            free_streaming(k, s_l, cot_k, 3, 2.0 * shear_idr, &y[l3..l3 + n_l], damping, &mut dy[l3..l3 + n_l]);
        }
    }

    // dark energy
    if content.has_fld {
        if content.use_ppf {
            dy[required(slots.gamma_fld, "PPF Gamma")?] = m.gamma_prime_fld;
        } else {
            let w = bg.w_fld;
            if (1.0 + w).abs() < 1e-10 {
                return Err(PerturbError::Numerical(format!(
                    "fluid equation of state w = {} crosses the phantom divide; use the PPF closure",
                    w
                )));
            }
            let delta_slot = required(slots.delta_fld, "fluid density")?;
            let theta_slot = required(slots.theta_fld, "fluid velocity")?;
            let delta = y[delta_slot];
            let theta = y[theta_slot];
            let cs2 = content.cs2_fld;
            let ca2 = fluid_adiabatic_sound_speed(w, bg.dw_over_da_fld, a);

            dy[delta_slot] = -(1.0 + w) * (theta + mc) - 3.0 * (cs2 - w) * a_prime_over_a * delta
                - 9.0 * (1.0 + w) * (cs2 - ca2) * a_prime_over_a * a_prime_over_a * theta / k2;
            dy[theta_slot] = -(1.0 - 3.0 * cs2) * a_prime_over_a * theta + cs2 * k2 / (1.0 + w) * delta + me;
        }
    }

    // massless neutrinos
    if content.has_ur && !flags.rsa_on() {
        let delta_slot = required(slots.delta_ur, "ur density")?;
        let theta_slot = required(slots.theta_ur, "ur velocity")?;
        let shear_slot = required(slots.shear_ur, "ur shear")?;
        let theta_ur = y[theta_slot];
        let shear_ur = y[shear_slot];

        dy[delta_slot] = -4.0 / 3.0 * (theta_ur + mc);
        dy[theta_slot] = k2 * (y[delta_slot] / 4.0 - s2_squared * shear_ur) + me;

        if flags.ufa_on() {
            let (rate, metric) = match precision.ur_fluid_approximation {
                UfaMethod::Mb | UfaMethod::None => (cot_k, ms),
                UfaMethod::Hu => (a_prime_over_a, ms),
                UfaMethod::Class => (cot_k, m.metric_ufa_class),
            };
            dy[shear_slot] = -3.0 * rate * shear_ur + 2.0 / 3.0 * (theta_ur + metric);
        } else {
            let l3 = required(slots.l3_ur, "ur multipoles")?;
            dy[shear_slot] = 0.5 * (8.0 / 15.0 * (theta_ur + ms) - 3.0 / 5.0 * k * s_l[3] / s_l[2] * y[l3]);
            let n_l = precision.l_max_ur - 2;
            free_streaming(k, s_l, cot_k, 3, 2.0 * shear_ur, &y[l3..l3 + n_l], 0.0, &mut dy[l3..l3 + n_l]);
        }
    }

    // non-cold species
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
                    let rate = q * k / eps;
                    let base = start + i * l_count;
                    let psi = &y[base..base + l_count];
                    let dpsi = &mut dy[base..base + l_count];

                    dpsi[0] = -rate * psi[1] + mc * dlnf0 / 3.0;
                    dpsi[1] = rate / 3.0 * (psi[0] - 2.0 * s_l[2] * psi[2]) - eps * me / (3.0 * q * k) * dlnf0;
                    dpsi[2] = rate / 5.0 * (2.0 * s_l[2] * psi[1] - 3.0 * s_l[3] * psi[3]) - ms * 2.0 / 15.0 * dlnf0;
                    free_streaming(rate, s_l, cot_k, 3, psi[2], &psi[3..], 0.0, &mut dpsi[3..]);
                }
            }
            NcdmBlock::Fluid { start } => {
                let rho = bg.rho_ncdm[n];
                let p = bg.p_ncdm[n];
                let w = p / rho;
                let ca2 = ncdm_sound_speed(w, bg.pseudo_p_ncdm[n], p);
                let ceff2 = ca2;
                let (delta, theta, shear) = (y[start], y[start + 1], y[start + 2]);

                let (rate, metric) = match precision.ncdm_fluid_approximation {
                    NcdmFluidMethod::Mb | NcdmFluidMethod::None => (cot_k, ms),
                    NcdmFluidMethod::Hu => (a_prime_over_a, ms),
                    NcdmFluidMethod::Class => (cot_k, m.metric_ufa_class),
                };

                dy[start] = -(1.0 + w) * (theta + mc) - 3.0 * a_prime_over_a * (ceff2 - w) * delta;
                dy[start + 1] = -a_prime_over_a * (1.0 - 3.0 * ca2) * theta + ceff2 / (1.0 + w) * k2 * delta
                    - k2 * shear
                    + me;
                dy[start + 2] = if w > 0.0 {
                    -3.0 * rate * ca2 / w * shear + 8.0 / 3.0 * ca2 / (1.0 + w) * (theta + metric)
                } else {
                    0.0
                };
            }
        }
    }

    match context.gauge() {
        Gauge::Synchronous => dy[required(slots.eta, "eta")?] = m.eta_prime,
        Gauge::Newtonian => dy[required(slots.phi, "phi")?] = m.phi_prime,
    }

    Ok(())
}

fn tensor_derivatives(
    context: &TaskContext<'_>,
    workspace: &Workspace,
    layout: &StateLayout,
    tau: f64,
    y: &[f64],
    dy: &mut [f64],
) -> PerturbResult<()> {
    let content = context.content();
    let precision = context.precision;
    let k = context.k;
    let bg = &workspace.background;
    let dkappa = workspace.thermo.dkappa;
    let m = &workspace.metric;
    let flags = workspace.flags;
    let s_l = &workspace.s_l;
    let cot_k = workspace.cot_k(tau);
    let slots = layout.slots();

    let gw = required(slots.gw, "gravitational wave")?;
    let gw_prime = y[gw + 1];
    let psi = m.tensor_psi;

    if !flags.rsa_on() {
        if !flags.tca_on() {
            let t = required(slots.ten_g, "tensor photon temperature")?;
            let p = required(slots.ten_pol, "tensor photon polarization")?;
            let n_t = precision.l_max_g_ten + 1;
            let n_p = precision.l_max_pol_g_ten + 1;

            let delta = &y[t..t + n_t];
            dy[t] = -k * delta[1] - dkappa * delta[0] - gw_prime + dkappa * psi;
            free_streaming(k, s_l, cot_k, 1, delta[0], &delta[1..], dkappa, &mut dy[t + 1..t + n_t]);

            let e = &y[p..p + n_p];
            dy[p] = -k * e[1] - dkappa * (e[0] + psi);
            free_streaming(k, s_l, cot_k, 1, e[0], &e[1..], dkappa, &mut dy[p + 1..p + n_p]);
        }

        if content.has_ur {
            let u = required(slots.ten_ur, "tensor ur multipoles")?;
            let n_u = precision.l_max_ur + 1;
            let delta = &y[u..u + n_u];
            dy[u] = -k * delta[1] - gw_prime;
            free_streaming(k, s_l, cot_k, 1, delta[0], &delta[1..], 0.0, &mut dy[u + 1..u + n_u]);
        }
    }

    dy[gw] = gw_prime;
    dy[gw + 1] = -2.0 * bg.a_prime_over_a() * gw_prime - (k * k + 2.0 * content.curvature) * y[gw] + m.gw_source;
    Ok(())
}

fn vector_derivatives(
    context: &TaskContext<'_>,
    workspace: &Workspace,
    layout: &StateLayout,
    tau: f64,
    y: &[f64],
    dy: &mut [f64],
) -> PerturbResult<()> {
    let precision = context.precision;
    let k = context.k;
    let bg = &workspace.background;
    let dkappa = workspace.thermo.dkappa;
    let m = &workspace.metric;
    let flags = workspace.flags;
    let slots = layout.slots();

    let a_prime_over_a = bg.a_prime_over_a();
    let v_slot = required(slots.vec_metric, "vector metric")?;
    let vb_slot = required(slots.theta_b, "baryon velocity")?;
    let v = y[v_slot];
    let v_b = y[vb_slot];
    let v_prime = m.vector_metric_prime;
    let r_hu = 3.0 * bg.rho_b / (4.0 * bg.rho_g);

    dy[v_slot] = v_prime;

    if flags.rsa_on() {
        dy[vb_slot] = v_prime - a_prime_over_a * (v_b - v) - dkappa * v_b / r_hu;
        return Ok(());
    }
    if flags.tca_on() {
        dy[vb_slot] = v_prime - a_prime_over_a * r_hu / (1.0 + r_hu) * (v_b - v);
        return Ok(());
    }

    let t = required(slots.vec_g, "vector photon temperature")?;
    let p = required(slots.vec_pol, "vector photon polarization")?;
    let n_t = precision.l_max_g;
    let n_p = precision.l_max_pol_g - 1;
    let theta = &y[t..t + n_t];
    let e = &y[p..p + n_p];
    let pol = m.vector_p;

    dy[vb_slot] = v_prime - a_prime_over_a * (v_b - v) + dkappa * (theta[0] - v_b) / r_hu;

    let c = |l: usize| ((l * l - 1) as f64).sqrt();
    for j in 0..n_t {
        let l = j + 1;
        let lf = l as f64;
        let lower = if j == 0 { 0.0 } else { c(l) * theta[j - 1] / (2.0 * lf - 1.0) };
        let source = match l {
            1 => dkappa * v_b + v_prime,
            2 => dkappa * pol,
            _ => 0.0,
        };
        dy[t + j] = if j + 1 < n_t {
            k * (lower - c(l + 1) * theta[j + 1] / (2.0 * lf + 3.0)) - dkappa * theta[j] + source
        } else {
            k * lower - (lf + 1.0) / tau * theta[j] - dkappa * theta[j] + source
        };
    }

    let e_coupling = |l: usize| {
        let l2 = (l * l) as f64;
        ((l2 - 1.0) * (l2 - 4.0)).sqrt() / l as f64
    };
    for j in 0..n_p {
        let l = j + 2;
        let lf = l as f64;
        let lower = if j == 0 { 0.0 } else { e_coupling(l) * e[j - 1] / (2.0 * lf - 1.0) };
        let source = if l == 2 { 6f64.sqrt() * pol } else { 0.0 };
        dy[p + j] = if j + 1 < n_p {
            k * (lower - e_coupling(l + 1) * e[j + 1] / (2.0 * lf + 3.0)) - dkappa * (e[j] + source)
        } else {
            k * lower - (lf + 1.0) / tau * e[j] - dkappa * (e[j] + source)
        };
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Precision, Settings};
    use crate::models::approximations::RegimeFlags;
    use crate::models::indices::InitialCondition;
    use crate::models::initial::initial_conditions;
    use crate::models::layout::{Field, LayoutDescriptor};
    use crate::physics::{Background, ToyCosmology};

    #[test]
    fn test_synchronous_right_hand_side_uses_constraints() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::default();
        let (k, tau) = (1e-3, 0.1);
        let context = TaskContext {
            mode: Mode::Scalar,
            initial_condition: InitialCondition::Adiabatic,
            k,
            settings: &settings,
            precision: &precision,
            background: &cosmology,
            thermodynamics: &cosmology,
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
        let state = initial_conditions(&context, &workspace, StateLayout::build(&descriptor), tau).unwrap();

        let mut dy = vec![f64::NAN; state.size()];
        derivatives(&context, &mut workspace, &state.layout, tau, &state.y, &mut dy).unwrap();
        assert!(dy.iter().all(|v| v.is_finite()));

        let m = &workspace.metric;
        let slot = |field| state.layout.range(field).unwrap().start;
        assert_eq!(dy[slot(Field::Eta)], m.eta_prime);
        assert_eq!(dy[slot(Field::CdmDensity)], -0.5 * m.h_prime);

        // tight coupling: photons and baryons move together
        let dtheta_g = dy[slot(Field::PhotonVelocity)];
        let dtheta_b = dy[slot(Field::BaryonVelocity)];
        assert!((dtheta_g - dtheta_b).abs() <= 1e-4 * dtheta_g.abs().max(dtheta_b.abs()));
    }

    #[test]
    fn test_timescale_bounded_by_hubble_and_wavelength() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::default();
        let tau0 = cosmology.content().conformal_age;

        for (k, tau) in [(1e-4, tau0 / 2.0), (10.0, tau0 / 2.0), (0.1, 1.0)] {
            let context = TaskContext {
                mode: Mode::Scalar,
                initial_condition: InitialCondition::Adiabatic,
                k,
                settings: &settings,
                precision: &precision,
                background: &cosmology,
                thermodynamics: &cosmology,
            };
            let mut workspace = Workspace::new(&context);
            let scale = timescale(&context, &mut workspace, tau).unwrap();
            let hubble = 1.0 / workspace.background.a_prime_over_a();
            assert!(scale > 0.0);
            assert!(scale <= hubble && scale <= 1.0 / k, "k = {}, tau = {}", k, tau);
        }
    }
}
