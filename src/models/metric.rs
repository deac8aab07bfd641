//! Einstein constraint equations
//!
//! Called at every right-hand-side and source evaluation. For scalars:
//!
//! 1. accumulate δρ, (ρ+p)θ, (ρ+p)σ, δp of every integrated species
//! 2. close the approximated species (tight-coupling photon shear, streaming
//!    radiation density and velocity)
//! 3. solve the 00 and 0i constraints for the gauge potentials
//!
//! In the synchronous gauge h' and η' come from the 00 and 0i equations and
//! α = (h' + 6η')/2k² feeds several closures. In the Newtonian gauge φ is
//! integrated, ψ follows from the total shear and φ' from the 0i equation.
//!
//! Streaming radiation has δ and θ depending on h' (or φ'), which in turn
//! depend on the total δρ (or θ); the resulting linear equation is solved
//! exactly.

use crate::config::{Gauge, RsaMethod};
use crate::error::{PerturbError, PerturbResult};
use super::indices::Mode;
use super::layout::{NcdmBlock, StateLayout};
use super::workspace::{TaskContext, Workspace};

/// Output of one constraint solve
#[derive(Debug, Clone, Default)]
pub struct MetricSolution {
    pub delta_rho: f64,
    pub rho_plus_p_theta: f64,
    pub rho_plus_p_shear: f64,
    pub delta_p: f64,
    pub rho_plus_p_tot: f64,

    /// Matter (baryons, CDM, idm, ncdm) totals
    pub delta_rho_m: f64,
    pub rho_m: f64,
    pub rho_plus_p_theta_m: f64,
    pub rho_plus_p_m: f64,
    /// Baryon + CDM totals
    pub delta_rho_cb: f64,
    pub rho_cb: f64,
    pub rho_plus_p_theta_cb: f64,

    pub h_prime: f64,
    pub eta_prime: f64,
    pub alpha: f64,
    pub alpha_prime: f64,
    pub phi: f64,
    pub psi: f64,
    pub phi_prime: f64,

    /// Source of the continuity equations (h'/2 or −3φ')
    pub metric_continuity: f64,
    /// Source of the Euler equations (0 or k²ψ)
    pub metric_euler: f64,
    /// Source of the shear equations (k²α or 0)
    pub metric_shear: f64,
    pub metric_ufa_class: f64,

    // Radiation variables, integrated or closed
    pub delta_g: f64,
    pub theta_g: f64,
    pub shear_g: f64,
    pub tca_shear_g: f64,
    /// Photon anisotropy combination (F₂ + G₀ + G₂)/8
    pub pol_p: f64,
    pub delta_ur: f64,
    pub theta_ur: f64,
    pub shear_ur: f64,
    pub delta_idr: f64,
    pub theta_idr: f64,
    pub shear_idr: f64,
    pub tca_shear_idr: f64,

    pub delta_fld: f64,
    pub theta_fld: f64,
    pub gamma_prime_fld: f64,

    pub delta_ncdm: Vec<f64>,
    pub theta_ncdm: Vec<f64>,
    pub shear_ncdm: Vec<f64>,
    pub delta_p_ncdm: Vec<f64>,

    /// Tensor anisotropic stress source of h''
    pub gw_source: f64,
    /// Tensor collision term Ψ
    pub tensor_psi: f64,
    pub vector_metric_prime: f64,
    /// Vector polarization source (Θ₂ − √6 E₂)/10
    pub vector_p: f64,
}

impl MetricSolution {
    pub fn with_ncdm(n_ncdm: usize) -> Self {
        Self {
            delta_ncdm: vec![0.0; n_ncdm],
            theta_ncdm: vec![0.0; n_ncdm],
            shear_ncdm: vec![0.0; n_ncdm],
            delta_p_ncdm: vec![0.0; n_ncdm],
            ..Default::default()
        }
    }

    fn clear(&mut self) {
        let delta_ncdm = std::mem::take(&mut self.delta_ncdm);
        let theta_ncdm = std::mem::take(&mut self.theta_ncdm);
        let shear_ncdm = std::mem::take(&mut self.shear_ncdm);
        let delta_p_ncdm = std::mem::take(&mut self.delta_p_ncdm);
        *self = Self {
            delta_ncdm,
            theta_ncdm,
            shear_ncdm,
            delta_p_ncdm,
            ..Default::default()
        };
        for v in self
            .delta_ncdm
            .iter_mut()
            .chain(self.theta_ncdm.iter_mut())
            .chain(self.shear_ncdm.iter_mut())
            .chain(self.delta_p_ncdm.iter_mut())
        {
            *v = 0.0;
        }
    }
}

/// Steady-state idr shear while dark radiation is tightly coupled to idm
fn close_idr_shear(m: &mut MetricSolution, totals: &mut Totals, dmu_idm_dr: f64, rho_idr: f64) -> PerturbResult<()> {
    if dmu_idm_dr <= 0.0 {
        return Err(PerturbError::Numerical(format!(
            "idm-dr tight coupling with non-positive interaction rate {}",
            dmu_idm_dr
        )));
    }
    m.tca_shear_idr = 0.5 * 8.0 / 15.0 / dmu_idm_dr * (m.theta_idr + m.metric_shear);
    m.shear_idr = m.tca_shear_idr;
    totals.rho_plus_p_shear += 4.0 / 3.0 * rho_idr * m.shear_idr;
    Ok(())
}

pub(crate) fn required(slot: Option<usize>, what: &str) -> PerturbResult<usize> {
    slot.ok_or_else(|| PerturbError::Numerical(format!("{} is not part of the current state layout", what)))
}

/// Solve the constraints for the state `y` on `layout`
///
/// The workspace must have been refreshed at the current time.
pub fn solve_metric(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    y: &[f64],
) -> PerturbResult<()> {
    match context.mode {
        Mode::Scalar => solve_scalar(context, workspace, layout, y),
        Mode::Vector => solve_vector(context, workspace, layout, y),
        Mode::Tensor => solve_tensor(context, workspace, layout, y),
    }
}

/// Streaming radiation entering the constraint equations through h' or φ'
#[derive(Debug, Clone, Copy, Default)]
struct Streaming {
    /// Total density of the species replaced by the streaming closure
    rho_r: f64,
    /// Photon density when photons are streaming, else zero
    photon_density: f64,
    /// Reionization corrections to the photon δ and θ
    extra_delta_g: f64,
    extra_theta_g: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    delta_rho: f64,
    rho_plus_p_theta: f64,
    rho_plus_p_shear: f64,
    delta_p: f64,
    rho_plus_p: f64,
}

impl Totals {
    fn add_radiation(&mut self, rho: f64, delta: f64, theta: f64) {
        self.delta_rho += rho * delta;
        self.rho_plus_p_theta += 4.0 / 3.0 * rho * theta;
        self.delta_p += rho * delta / 3.0;
        self.rho_plus_p += 4.0 / 3.0 * rho;
    }
}

fn solve_scalar(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    y: &[f64],
) -> PerturbResult<()> {
    let content = context.content();
    let precision = context.precision;
    let gauge = context.gauge();
    let k = context.k;
    let k2 = k * k;
    let s2_squared = workspace.s2_squared();
    let s2 = workspace.s_l[2];

    let bg = &workspace.background;
    let th = &workspace.thermo;
    let flags = workspace.flags;
    let rescaling = &workspace.ncdm_rescaling;
    let m = &mut workspace.metric;
    m.clear();

    let slots = layout.slots();
    let a = bg.a;
    let a2 = a * a;
    let a_prime_over_a = bg.a_prime_over_a();
    let tau_c = if th.dkappa > 0.0 { 1.0 / th.dkappa } else { 0.0 };
    let idr_coupled = content.has_idr && content.has_idm_dr && flags.idm_dr_tca_on() && !flags.idr_rsa_on();

    let mut totals = Totals::default();

    // baryons and cold dark matter
    let delta_b = y[required(slots.delta_b, "baryon density")?];
    let theta_b = y[required(slots.theta_b, "baryon velocity")?];
    totals.delta_rho += bg.rho_b * delta_b;
    totals.rho_plus_p_theta += bg.rho_b * theta_b;
    totals.delta_p += bg.rho_b * th.cb2 * delta_b;
    totals.rho_plus_p += bg.rho_b;

    let delta_cdm = y[required(slots.delta_cdm, "cdm density")?];
    let theta_cdm = slots.theta_cdm.map(|i| y[i]).unwrap_or(0.0);
    totals.delta_rho += bg.rho_cdm * delta_cdm;
    totals.rho_plus_p_theta += bg.rho_cdm * theta_cdm;
    totals.rho_plus_p += bg.rho_cdm;

    m.delta_rho_cb = bg.rho_b * delta_b + bg.rho_cdm * delta_cdm;
    m.rho_cb = bg.rho_b + bg.rho_cdm;
    m.rho_plus_p_theta_cb = bg.rho_b * theta_b + bg.rho_cdm * theta_cdm;
    m.delta_rho_m = m.delta_rho_cb;
    m.rho_m = m.rho_cb;
    m.rho_plus_p_theta_m = m.rho_plus_p_theta_cb;
    m.rho_plus_p_m = m.rho_cb;

    if content.has_idm_dr {
        let delta_idm = y[required(slots.delta_idm, "idm density")?];
        let theta_idm = y[required(slots.theta_idm, "idm velocity")?];
        totals.delta_rho += bg.rho_idm * delta_idm;
        totals.rho_plus_p_theta += bg.rho_idm * theta_idm;
        totals.delta_p += bg.rho_idm * th.c2_idm * delta_idm;
        totals.rho_plus_p += bg.rho_idm;
        m.delta_rho_m += bg.rho_idm * delta_idm;
        m.rho_m += bg.rho_idm;
        m.rho_plus_p_theta_m += bg.rho_idm * theta_idm;
        m.rho_plus_p_m += bg.rho_idm;
    }

    // dark energy fluid
    let w_fld = bg.w_fld;
    if content.has_fld && !content.use_ppf {
        let delta_fld = y[required(slots.delta_fld, "fluid density")?];
        let theta_fld = y[required(slots.theta_fld, "fluid velocity")?];
        let ca2 = fluid_adiabatic_sound_speed(w_fld, bg.dw_over_da_fld, a);
        let cs2 = content.cs2_fld;
        totals.delta_rho += bg.rho_fld * delta_fld;
        totals.rho_plus_p_theta += (1.0 + w_fld) * bg.rho_fld * theta_fld;
        totals.delta_p += cs2 * bg.rho_fld * delta_fld
            + (cs2 - ca2) * 3.0 * a_prime_over_a * (1.0 + w_fld) * bg.rho_fld * theta_fld / k2;
        totals.rho_plus_p += (1.0 + w_fld) * bg.rho_fld;
        m.delta_fld = delta_fld;
        m.theta_fld = theta_fld;
    }

    // non-cold species
    for (n, block) in layout.ncdm().iter().enumerate() {
        let rho = bg.rho_ncdm[n];
        let p = bg.p_ncdm[n];
        let (delta, theta, shear, delta_p) = match *block {
            NcdmBlock::Hierarchy { start, q_size } => {
                let l_count = layout.ncdm_l_count();
                let species = context.ncdm().get(n).ok_or_else(|| {
                    PerturbError::Collaborator(format!("no momentum quadrature for ncdm species {}", n))
                })?;
                let psi = &y[start..start + q_size * l_count];
                let moments = species.perturbed_moments(a, k, psi, l_count, rescaling[n]);
                (
                    moments.rho_delta / rho,
                    moments.rho_plus_p_theta / (rho + p),
                    moments.rho_plus_p_shear / (rho + p),
                    moments.delta_p,
                )
            }
            NcdmBlock::Fluid { start } => {
                let w = p / rho;
                let ca2 = ncdm_sound_speed(w, bg.pseudo_p_ncdm[n], p);
                (y[start], y[start + 1], y[start + 2], ca2 * rho * y[start])
            }
        };

        totals.delta_rho += rho * delta;
        totals.rho_plus_p_theta += (rho + p) * theta;
        totals.rho_plus_p_shear += (rho + p) * shear;
        totals.delta_p += delta_p;
        totals.rho_plus_p += rho + p;

        m.delta_rho_m += rho * delta;
        m.rho_m += rho;
        m.rho_plus_p_theta_m += (rho + p) * theta;
        m.rho_plus_p_m += rho + p;

        m.delta_ncdm[n] = delta;
        m.theta_ncdm[n] = theta;
        m.shear_ncdm[n] = shear;
        m.delta_p_ncdm[n] = delta_p;
    }

    // integrated radiation
    let mut streaming = Streaming::default();
    if flags.rsa_on() {
        streaming.rho_r += bg.rho_g;
        streaming.photon_density = bg.rho_g;
        if content.has_ur {
            streaming.rho_r += bg.rho_ur;
        }
    } else {
        m.delta_g = y[required(slots.delta_g, "photon density")?];
        m.theta_g = y[required(slots.theta_g, "photon velocity")?];
        totals.add_radiation(bg.rho_g, m.delta_g, m.theta_g);

        if let Some(i) = slots.shear_g {
            m.shear_g = y[i];
            let pol = required(slots.pol_g, "photon polarization")?;
            m.pol_p = (y[pol] + y[pol + 2] + 2.0 * s2 * m.shear_g) / 8.0;
            totals.rho_plus_p_shear += 4.0 / 3.0 * bg.rho_g * m.shear_g;
        }

        if content.has_ur {
            m.delta_ur = y[required(slots.delta_ur, "ur density")?];
            m.theta_ur = y[required(slots.theta_ur, "ur velocity")?];
            m.shear_ur = y[required(slots.shear_ur, "ur shear")?];
            totals.add_radiation(bg.rho_ur, m.delta_ur, m.theta_ur);
            totals.rho_plus_p_shear += 4.0 / 3.0 * bg.rho_ur * m.shear_ur;
        }
    }

    if content.has_idr {
        if flags.idr_rsa_on() {
            streaming.rho_r += bg.rho_idr;
        } else {
            m.delta_idr = y[required(slots.delta_idr, "idr density")?];
            m.theta_idr = y[required(slots.theta_idr, "idr velocity")?];
            m.shear_idr = slots.shear_idr.map(|i| y[i]).unwrap_or(0.0);
            totals.add_radiation(bg.rho_idr, m.delta_idr, m.theta_idr);
            totals.rho_plus_p_shear += 4.0 / 3.0 * bg.rho_idr * m.shear_idr;
        }
    }

    let reionization_correction =
        flags.rsa_on() && precision.radiation_streaming_approximation == RsaMethod::MdWithReio;
    if reionization_correction {
        streaming.extra_delta_g = -4.0 / k2 * th.dkappa * theta_b;
    }

    match gauge {
        Gauge::Synchronous => {
            let eta = y[required(slots.eta, "eta")?];

            // reionization θ correction with metric_euler = 0
            if reionization_correction {
                streaming.extra_theta_g = 3.0 / k2
                    * (th.ddkappa * theta_b + th.dkappa * (-a_prime_over_a * theta_b + th.cb2 * k2 * delta_b));
            }

            let mut solved = einstein_synchronous(&totals, &streaming, eta, a2, a_prime_over_a, k2, s2_squared, content.curvature)?;

            if content.has_fld && content.use_ppf {
                let gamma = y[required(slots.gamma_fld, "PPF Gamma")?];
                let theta_t = solved.totals.rho_plus_p_theta / solved.totals.rho_plus_p;
                let alpha_term = k2 * solved.alpha;
                let ppf = ppf_closure(
                    content.c_gamma_over_c_fld,
                    bg.rho_fld,
                    w_fld,
                    content.cs2_fld,
                    gamma,
                    theta_t,
                    alpha_term,
                    a2,
                    a_prime_over_a,
                    k2,
                    s2_squared,
                );
                totals.delta_rho += ppf.delta_rho;
                totals.rho_plus_p_theta += ppf.rho_plus_p_theta;
                totals.delta_p += ppf.delta_p;
                totals.rho_plus_p += (1.0 + w_fld) * bg.rho_fld;
                m.gamma_prime_fld = ppf.gamma_prime;
                m.delta_fld = ppf.delta_rho / bg.rho_fld;
                m.theta_fld = ppf.theta(w_fld, bg.rho_fld);
                solved = einstein_synchronous(&totals, &streaming, eta, a2, a_prime_over_a, k2, s2_squared, content.curvature)?;
            }

            m.h_prime = solved.h_prime;
            m.eta_prime = solved.eta_prime;
            m.alpha = solved.alpha;
            m.metric_continuity = 0.5 * solved.h_prime;
            m.metric_euler = 0.0;
            m.metric_shear = k2 * solved.alpha;
            m.metric_ufa_class = m.metric_continuity;

            if flags.rsa_on() {
                m.delta_g = solved.delta_r + streaming.extra_delta_g;
                m.theta_g = solved.theta_r + streaming.extra_theta_g;
                if content.has_ur {
                    m.delta_ur = solved.delta_r;
                    m.theta_ur = solved.theta_r;
                }
            }
            if content.has_idr && flags.idr_rsa_on() {
                m.delta_idr = solved.delta_r;
                m.theta_idr = solved.theta_r;
            }

            totals = solved.totals;

            if flags.tca_on() {
                m.tca_shear_g = 16.0 / 45.0 * tau_c * (m.theta_g + m.metric_shear);
                m.shear_g = m.tca_shear_g;
                m.pol_p = 5.0 * s2 * m.shear_g / 8.0;
                totals.rho_plus_p_shear += 4.0 / 3.0 * bg.rho_g * m.shear_g;
            }
            if idr_coupled {
                close_idr_shear(m, &mut totals, th.dmu_idm_dr, bg.rho_idr)?;
            }

            m.alpha_prime = -2.0 * a_prime_over_a * m.alpha + eta - 4.5 * (a2 / k2) * totals.rho_plus_p_shear;

            m.phi = eta - a_prime_over_a * m.alpha;
            m.psi = m.alpha_prime + a_prime_over_a * m.alpha;
            let a_prime_over_a_prime = bg.a_primeprime_over_a() - a_prime_over_a * a_prime_over_a;
            m.phi_prime = m.eta_prime - a_prime_over_a_prime * m.alpha - a_prime_over_a * m.alpha_prime;
        }

        Gauge::Newtonian => {
            let phi = y[required(slots.phi, "phi")?];

            if flags.tca_on() {
                m.tca_shear_g = 16.0 / 45.0 * tau_c * m.theta_g;
                m.shear_g = m.tca_shear_g;
                m.pol_p = 5.0 * s2 * m.shear_g / 8.0;
                totals.rho_plus_p_shear += 4.0 / 3.0 * bg.rho_g * m.shear_g;
            }
            if idr_coupled {
                close_idr_shear(m, &mut totals, th.dmu_idm_dr, bg.rho_idr)?;
            }

            let psi = phi - 4.5 * (a2 / k2) * totals.rho_plus_p_shear;
            m.phi = phi;
            m.psi = psi;
            m.metric_euler = k2 * psi;
            m.metric_shear = 0.0;

            if reionization_correction {
                streaming.extra_theta_g = 3.0 / k2
                    * (th.ddkappa * theta_b
                        + th.dkappa * (-a_prime_over_a * theta_b + th.cb2 * k2 * delta_b + m.metric_euler));
            }

            if content.has_fld && content.use_ppf {
                let gamma = y[required(slots.gamma_fld, "PPF Gamma")?];
                let theta_t = totals.rho_plus_p_theta / totals.rho_plus_p;
                let ppf = ppf_closure(
                    content.c_gamma_over_c_fld,
                    bg.rho_fld,
                    w_fld,
                    content.cs2_fld,
                    gamma,
                    theta_t,
                    0.0,
                    a2,
                    a_prime_over_a,
                    k2,
                    s2_squared,
                );
                totals.delta_rho += ppf.delta_rho;
                totals.rho_plus_p_theta += ppf.rho_plus_p_theta;
                totals.delta_p += ppf.delta_p;
                totals.rho_plus_p += (1.0 + w_fld) * bg.rho_fld;
                m.gamma_prime_fld = ppf.gamma_prime;
                m.delta_fld = ppf.delta_rho / bg.rho_fld;
                m.theta_fld = ppf.theta(w_fld, bg.rho_fld);
            }

            let denominator = 1.0 - 12.0 * a2 * streaming.rho_r / k2;
            if !(denominator > 0.0) {
                return Err(PerturbError::Numerical(format!(
                    "streaming radiation closure is singular at k = {:e}, a = {:e}",
                    k, a
                )));
            }
            let phi_prime = (-a_prime_over_a * psi
                + 1.5 * (a2 / k2) * (totals.rho_plus_p_theta + streaming.rho_plus_p_theta_extra()))
                / denominator;

            let delta_r = -4.0 * phi;
            let theta_r = 6.0 * phi_prime;
            if flags.rsa_on() {
                m.delta_g = delta_r + streaming.extra_delta_g;
                m.theta_g = theta_r + streaming.extra_theta_g;
                totals.add_radiation(bg.rho_g, m.delta_g, m.theta_g);
                if content.has_ur {
                    m.delta_ur = delta_r;
                    m.theta_ur = theta_r;
                    totals.add_radiation(bg.rho_ur, m.delta_ur, m.theta_ur);
                }
            }
            if content.has_idr && flags.idr_rsa_on() {
                m.delta_idr = delta_r;
                m.theta_idr = theta_r;
                totals.add_radiation(bg.rho_idr, m.delta_idr, m.theta_idr);
            }

            m.phi_prime = phi_prime;
            m.metric_continuity = -3.0 * phi_prime;
            m.metric_ufa_class = m.metric_continuity;
        }
    }

    m.delta_rho = totals.delta_rho;
    m.rho_plus_p_theta = totals.rho_plus_p_theta;
    m.rho_plus_p_shear = totals.rho_plus_p_shear;
    m.delta_p = totals.delta_p;
    m.rho_plus_p_tot = totals.rho_plus_p;

    Ok(())
}

struct SynchronousSolution {
    h_prime: f64,
    eta_prime: f64,
    alpha: f64,
    /// δ and θ of streaming radiation
    delta_r: f64,
    theta_r: f64,
    /// Totals including streaming radiation
    totals: Totals,
}

#[allow(clippy::too_many_arguments)]
fn einstein_synchronous(
    base: &Totals,
    streaming: &Streaming,
    eta: f64,
    a2: f64,
    a_prime_over_a: f64,
    k2: f64,
    s2_squared: f64,
    curvature: f64,
) -> PerturbResult<SynchronousSolution> {
    // δ_r = 4 a'/a h'/k² − 4η enters δρ, so the 00 equation is linear in h'
    let denominator = 0.5 * a_prime_over_a - 6.0 * a2 * streaming.rho_r * a_prime_over_a / k2;
    if !(denominator > 0.0) {
        return Err(PerturbError::Numerical(format!(
            "00 constraint is singular (a'/a = {:e}, streaming density = {:e})",
            a_prime_over_a, streaming.rho_r
        )));
    }

    let h_prime = (k2 * s2_squared * eta
        + 1.5 * a2 * (base.delta_rho - 4.0 * streaming.rho_r * eta + streaming.delta_rho_extra()))
        / denominator;

    let delta_r = 4.0 * a_prime_over_a * h_prime / k2 - 4.0 * eta;
    let theta_r = -0.5 * h_prime;

    let mut totals = *base;
    if streaming.rho_r > 0.0 {
        totals.delta_rho += streaming.rho_r * delta_r + streaming.delta_rho_extra();
        totals.rho_plus_p_theta += 4.0 / 3.0 * streaming.rho_r * theta_r + streaming.rho_plus_p_theta_extra();
        totals.delta_p += (streaming.rho_r * delta_r + streaming.delta_rho_extra()) / 3.0;
        totals.rho_plus_p += 4.0 / 3.0 * streaming.rho_r;
    }

    let eta_prime = (1.5 * a2 * totals.rho_plus_p_theta + 0.5 * curvature * h_prime) / (k2 * s2_squared);
    let alpha = (h_prime + 6.0 * eta_prime) / (2.0 * k2);

    Ok(SynchronousSolution {
        h_prime,
        eta_prime,
        alpha,
        delta_r,
        theta_r,
        totals,
    })
}

impl Streaming {
    /// ρ_γ δ carried by the reionization correction
    fn delta_rho_extra(&self) -> f64 {
        self.photon_density * self.extra_delta_g
    }

    fn rho_plus_p_theta_extra(&self) -> f64 {
        4.0 / 3.0 * self.photon_density * self.extra_theta_g
    }
}

/// PPF dark energy closure
struct PpfClosure {
    delta_rho: f64,
    rho_plus_p_theta: f64,
    delta_p: f64,
    gamma_prime: f64,
}

impl PpfClosure {
    fn theta(&self, w: f64, rho: f64) -> f64 {
        let rho_plus_p = (1.0 + w) * rho;
        if rho_plus_p.abs() > f64::EPSILON * rho.abs() {
            self.rho_plus_p_theta / rho_plus_p
        } else {
            0.0
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn ppf_closure(
    c_gamma_over_c: f64,
    rho_fld: f64,
    w: f64,
    cs2: f64,
    gamma: f64,
    theta_t: f64,
    alpha_term: f64,
    a2: f64,
    a_prime_over_a: f64,
    k2: f64,
    s2_squared: f64,
) -> PpfClosure {
    let rho_plus_p_fld = (1.0 + w) * rho_fld;
    let c_gamma_k_h_squared = c_gamma_over_c * c_gamma_over_c * k2 / (a_prime_over_a * a_prime_over_a);

    let source = rho_plus_p_fld * 1.5 * a2 / k2 / a_prime_over_a * (theta_t + alpha_term);
    let gamma_prime = a_prime_over_a
        * (source / (1.0 + c_gamma_k_h_squared) - (1.0 + c_gamma_k_h_squared) * gamma);
    let gamma_prime_plus_a_prime_over_a_gamma = gamma_prime + a_prime_over_a * gamma;

    let rho_plus_p_theta =
        rho_plus_p_fld * theta_t - 2.0 / 3.0 * k2 * s2_squared * gamma_prime_plus_a_prime_over_a_gamma / a2;
    let delta_rho = -2.0 / 3.0 * k2 * s2_squared / a2 * gamma - 3.0 * a_prime_over_a / k2 * rho_plus_p_theta;

    PpfClosure {
        delta_rho,
        rho_plus_p_theta,
        delta_p: cs2 * delta_rho,
        gamma_prime,
    }
}

/// c_a² = w − w'/(3 a'/a (1 + w)) with w' = a'/a · a dw/da
pub(crate) fn fluid_adiabatic_sound_speed(w: f64, dw_over_da: f64, a: f64) -> f64 {
    w - dw_over_da * a / (3.0 * (1.0 + w))
}

/// Adiabatic sound speed of a non-cold species from its pseudo-pressure
pub(crate) fn ncdm_sound_speed(w: f64, pseudo_p: f64, p: f64) -> f64 {
    if p > 0.0 {
        w / 3.0 / (1.0 + w) * (5.0 - pseudo_p / p)
    } else {
        0.0
    }
}

fn solve_tensor(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    y: &[f64],
) -> PerturbResult<()> {
    let content = context.content();
    let bg = &workspace.background;
    let th = &workspace.thermo;
    let flags = workspace.flags;
    let m = &mut workspace.metric;
    m.clear();

    let slots = layout.slots();
    let gw = required(slots.gw, "gravitational wave")?;
    let gw_prime = y[gw + 1];
    let a2 = bg.a * bg.a;

    let stress = |d: &[f64]| d[0] / 15.0 + 2.0 * d[2] / 21.0 + d[4] / 35.0;
    let mut anisotropic = 0.0;

    if flags.rsa_on() {
        m.tensor_psi = 0.0;
    } else if flags.tca_on() {
        let tau_c = if th.dkappa > 0.0 { 1.0 / th.dkappa } else { 0.0 };
        let delta_0 = -4.0 / 3.0 * gw_prime * tau_c;
        m.tensor_psi = -gw_prime * tau_c / 3.0;
        m.delta_g = delta_0;
        anisotropic += bg.rho_g * delta_0 / 15.0;
    } else {
        let t = required(slots.ten_g, "tensor photon temperature")?;
        let p = required(slots.ten_pol, "tensor photon polarization")?;
        let temperature = &y[t..t + 5];
        let polarization = &y[p..p + 5];
        m.tensor_psi = temperature[0] / 10.0 + temperature[2] / 7.0 + 3.0 * temperature[4] / 70.0
            - 3.0 * polarization[0] / 5.0
            + 6.0 * polarization[2] / 7.0
            - 3.0 * polarization[4] / 70.0;
        m.delta_g = temperature[0];
        anisotropic += bg.rho_g * stress(temperature);
    }

    if content.has_ur && !flags.rsa_on() {
        let u = required(slots.ten_ur, "tensor ur multipoles")?;
        anisotropic += bg.rho_ur * stress(&y[u..u + 5]);
        m.delta_ur = y[u];
    }

    m.gw_source = 24.0 * a2 * anisotropic;
    Ok(())
}

fn solve_vector(
    context: &TaskContext<'_>,
    workspace: &mut Workspace,
    layout: &StateLayout,
    y: &[f64],
) -> PerturbResult<()> {
    let bg = &workspace.background;
    let m = &mut workspace.metric;
    m.clear();

    let slots = layout.slots();
    let v = y[required(slots.vec_metric, "vector metric")?];
    let (theta_2, e_2) = match (slots.vec_g, slots.vec_pol) {
        (Some(t), Some(p)) => (y[t + 1], y[p]),
        _ => (0.0, 0.0),
    };

    m.vector_p = (theta_2 - 6f64.sqrt() * e_2) / 10.0;
    m.vector_metric_prime =
        -2.0 * bg.a_prime_over_a() * v - 12.0 / 5.0 * bg.a * bg.a * bg.rho_g * theta_2 / context.k;
    m.shear_g = theta_2;
    Ok(())
}
