//! Analytic toy cosmology implementing both collaborator traits
//!
//! The expansion history is exact for the chosen species (each density scales
//! as a power of `a`, massive species come from their momentum quadrature),
//! so only τ(a) and the optical depth need a table. Recombination and
//! reionization are smooth tanh steps in the free electron fraction.
//!
//! This is not a replacement for a real thermal history. It reproduces the
//! qualitative features the perturbation core reacts to: an optically thick
//! early universe, a visibility peak near z ≈ 1090, a residual ionization
//! after it and an optional late reionization bump.
//!
//! # Example
//!
//! ```rust
//! use perturb_rs::physics::{Background, ToyCosmology};
//!
//! let cosmology = ToyCosmology::builder()
//!     .n_ur(3.044)
//!     .reionization(None)
//!     .build()
//!     .unwrap();
//!
//! let tau0 = cosmology.content().conformal_age;
//! assert!(tau0 > 10_000.0 && tau0 < 20_000.0);
//! ```

use log::debug;

use crate::error::{PerturbError, PerturbResult};
use crate::output::interpolation::{spline_value, CubicSpline, SplineBoundary, fill_second_derivatives};
use super::quadrature::{MomentumQuadrature, NcdmSpecies, QuadratureSpecies};
use super::traits::{
    out_of_table, Background, BackgroundRecord, FluidEos, InterpolationCursor,
    RecombinationSummary, SpeciesContent, ThermoRecord, Thermodynamics,
};

// =================================================================================================
// Constants
// =================================================================================================

/// Speed of light in km/s
const C_KM_S: f64 = 299_792.458;

/// Ω_γ h² for T_cmb = 2.7255 K
const OMEGA_G_H2_REFERENCE: f64 = 2.4728e-5;
const T_CMB_REFERENCE: f64 = 2.7255;

/// 7/8 (4/11)^(4/3): density of one massless neutrino relative to photons
const NEUTRINO_TO_PHOTON: f64 = 0.227_107_317_660_239;

/// Massive neutrino temperature relative to the photons
const T_NCDM_OVER_T_CMB: f64 = 0.71611;

/// Hydrogen number density today per unit ω_b, in m^-3
const N_H_PER_OMEGA_B: f64 = 11.2236;

const SIGMA_THOMSON_M2: f64 = 6.652_458_732_1e-29;
const MPC_M: f64 = 3.085_677_581_49e22;
const K_B_EV: f64 = 8.617_333_262e-5;
const M_H_EV: f64 = 938.783e6;

/// τ_c/τ above which photons are considered free-streaming
const FREE_STREAMING_TAU_C_OVER_TAU: f64 = 5.0;

const LN_A_MIN: f64 = -23.025_850_929_940_457; // ln(1e-10)
const TABLE_SIZE: usize = 4000;

// =================================================================================================
// Builder
// =================================================================================================

/// Parameters of the toy cosmology
#[derive(Debug, Clone)]
pub struct ToyCosmologyBuilder {
    h: f64,
    omega_b: f64,
    omega_cdm: f64,
    t_cmb: f64,
    y_he: f64,
    n_ur: f64,
    omega_k: f64,
    ncdm: Option<(f64, usize)>,
    ncdm_decay: Option<f64>,
    fluid: Option<(f64, f64, f64)>,
    use_ppf: bool,
    dark_sector: Option<DarkSector>,
    z_reio: Option<f64>,
    z_rec: f64,
    delta_z_rec: f64,
}

#[derive(Debug, Clone, Copy)]
struct DarkSector {
    n_idr: f64,
    f_idm: f64,
    a_dark: f64,
    b_idr: f64,
    m_idm_gev: f64,
}

impl Default for ToyCosmologyBuilder {
    fn default() -> Self {
        Self {
            h: 0.6736,
            omega_b: 0.02237,
            omega_cdm: 0.1200,
            t_cmb: T_CMB_REFERENCE,
            y_he: 0.245,
            n_ur: 3.044,
            omega_k: 0.0,
            ncdm: None,
            ncdm_decay: None,
            fluid: None,
            use_ppf: false,
            dark_sector: None,
            z_reio: Some(7.67),
            z_rec: 1090.0,
            delta_z_rec: 80.0,
        }
    }
}

impl ToyCosmologyBuilder {
    pub fn hubble(mut self, h: f64) -> Self {
        self.h = h;
        self
    }

    /// Ω_b h²
    pub fn omega_b(mut self, omega_b: f64) -> Self {
        self.omega_b = omega_b;
        self
    }

    /// Ω_cdm h² (interacting dark matter included)
    pub fn omega_cdm(mut self, omega_cdm: f64) -> Self {
        self.omega_cdm = omega_cdm;
        self
    }

    pub fn t_cmb(mut self, t_cmb: f64) -> Self {
        self.t_cmb = t_cmb;
        self
    }

    /// Effective number of massless neutrinos (0 removes the species)
    pub fn n_ur(mut self, n_ur: f64) -> Self {
        self.n_ur = n_ur;
        self
    }

    /// Curvature density parameter Ω_k (K = −Ω_k H₀²)
    pub fn omega_k(mut self, omega_k: f64) -> Self {
        self.omega_k = omega_k;
        self
    }

    /// One massive neutrino of mass `m_ev` sampled on `n_q` momenta
    pub fn ncdm(mut self, m_ev: f64, n_q: usize) -> Self {
        self.ncdm = Some((m_ev, n_q));
        self
    }

    /// Let the massive species decay, losing its first e-fold at `a_decay`
    pub fn ncdm_decay(mut self, a_decay: f64) -> Self {
        self.ncdm_decay = Some(a_decay);
        self
    }

    /// Replace Λ by a fluid with w(a) = w₀ + w_a (1 − a)
    pub fn fluid(mut self, w0: f64, wa: f64, cs2: f64) -> Self {
        self.fluid = Some((w0, wa, cs2));
        self
    }

    /// Close the fluid perturbations with the PPF scheme
    pub fn ppf(mut self, use_ppf: bool) -> Self {
        self.use_ppf = use_ppf;
        self
    }

    /// Interacting dark radiation with `n_idr` effective species; a fraction
    /// `f_idm` of the dark matter scatters off it
    ///
    /// Rates scale as ((1 + z)/10⁷)⁴ ω with amplitudes `a_dark` (idm–idr)
    /// and `b_idr` (idr self-interaction), in Mpc^-1.
    pub fn interacting_dark_sector(mut self, n_idr: f64, f_idm: f64, a_dark: f64, b_idr: f64) -> Self {
        self.dark_sector = Some(DarkSector {
            n_idr,
            f_idm,
            a_dark,
            b_idr,
            m_idm_gev: 1.0,
        });
        self
    }

    /// Mid-point redshift of reionization, `None` for no reionization
    pub fn reionization(mut self, z_reio: Option<f64>) -> Self {
        self.z_reio = z_reio;
        self
    }

    /// Mid-point redshift and width of the recombination step
    pub fn recombination(mut self, z_rec: f64, delta_z: f64) -> Self {
        self.z_rec = z_rec;
        self.delta_z_rec = delta_z;
        self
    }

    pub fn build(self) -> PerturbResult<ToyCosmology> {
        ToyCosmology::from_builder(self)
    }
}

// =================================================================================================
// Toy cosmology
// =================================================================================================

/// Analytic background and thermodynamics
#[derive(Debug, Clone)]
pub struct ToyCosmology {
    params: ToyCosmologyBuilder,
    content: SpeciesContent,
    quadrature: NcdmSpecies,
    h0: f64,
    omega_g: f64,
    omega_b: f64,
    omega_cdm: f64,
    omega_idm: f64,
    omega_ur: f64,
    omega_idr: f64,
    omega_lambda: f64,
    omega_fld: f64,
    /// κ' today per unit free electron fraction (Mpc^-1)
    dkappa_today: f64,
    ln_a: Vec<f64>,
    ln_tau: Vec<f64>,
    ln_a_of_ln_tau: CubicSpline,
    ln_tau_of_ln_a: CubicSpline,
    kappa: Vec<f64>,
    kappa_dd: Vec<f64>,
    summary: RecombinationSummary,
}

/// Free electron fraction and its z derivative
#[derive(Debug, Clone, Copy)]
struct Ionization {
    xe: f64,
    dxe_dz: f64,
}

impl ToyCosmology {
    /// Default flat ΛCDM with massless neutrinos and reionization
    pub fn new() -> PerturbResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ToyCosmologyBuilder {
        ToyCosmologyBuilder::default()
    }

    fn from_builder(params: ToyCosmologyBuilder) -> PerturbResult<Self> {
        if !(params.h > 0.0) || params.omega_b <= 0.0 || params.omega_cdm < 0.0 || params.n_ur < 0.0 {
            return Err(PerturbError::Configuration(
                "toy cosmology needs h > 0, omega_b > 0, omega_cdm >= 0, n_ur >= 0".to_string(),
            ));
        }

        let h2 = params.h * params.h;
        let h0 = params.h * 100.0 / C_KM_S;
        let omega_g = OMEGA_G_H2_REFERENCE * (params.t_cmb / T_CMB_REFERENCE).powi(4) / h2;
        let omega_ur = params.n_ur * NEUTRINO_TO_PHOTON * omega_g;
        let omega_b = params.omega_b / h2;
        let mut omega_cdm = params.omega_cdm / h2;

        let (omega_idr, omega_idm) = match params.dark_sector {
            Some(dark) => {
                if dark.n_idr <= 0.0 || !(0.0..=1.0).contains(&dark.f_idm) {
                    return Err(PerturbError::Configuration(
                        "interacting dark sector needs n_idr > 0 and 0 <= f_idm <= 1".to_string(),
                    ));
                }
                let idm = dark.f_idm * omega_cdm;
                omega_cdm -= idm;
                (dark.n_idr * NEUTRINO_TO_PHOTON * omega_g, idm)
            }
            None => (0.0, 0.0),
        };

        let mut quadrature = NcdmSpecies::default();
        if let Some((m_ev, n_q)) = params.ncdm {
            let t_ncdm = T_NCDM_OVER_T_CMB * params.t_cmb;
            let mass = m_ev / (K_B_EV * t_ncdm);
            let mut species = QuadratureSpecies::fermi_dirac("ncdm[0]", mass, n_q, 15.0)?;
            let massless: f64 = species
                .q
                .iter()
                .zip(species.w.iter())
                .map(|(q, w)| q * q * q * w)
                .sum();
            species.factor = 7.0 / 8.0
                * T_NCDM_OVER_T_CMB.powi(4)
                * omega_g
                * h0
                * h0
                / massless;
            match params.ncdm_decay {
                Some(a_decay) => quadrature.push_decaying(species, a_decay)?,
                None => quadrature.push(species),
            }
        } else if params.ncdm_decay.is_some() {
            return Err(PerturbError::Configuration(
                "ncdm decay requested without a massive species".to_string(),
            ));
        }

        let omega_ncdm: f64 = quadrature
            .species()
            .iter()
            .enumerate()
            .map(|(n, s)| quadrature.rescaling(n, 1.0) * s.integrals(1.0).0 / (h0 * h0))
            .sum();

        let remainder = 1.0
            - omega_g
            - omega_b
            - omega_cdm
            - omega_idm
            - omega_ur
            - omega_idr
            - omega_ncdm
            - params.omega_k;
        if remainder < 0.0 {
            return Err(PerturbError::Configuration(format!(
                "toy cosmology densities exceed closure (Ω_Λ = {:.4})",
                remainder
            )));
        }
        let (omega_lambda, omega_fld) = match params.fluid {
            Some(_) => (0.0, remainder),
            None => (remainder, 0.0),
        };

        let dkappa_today = (1.0 - params.y_he) * params.omega_b * N_H_PER_OMEGA_B * SIGMA_THOMSON_M2 * MPC_M;

        let mut content = SpeciesContent::minimal(0.0, params.h);
        content.has_ur = omega_ur > 0.0;
        content.has_lambda = omega_lambda > 0.0;
        content.has_fld = params.fluid.is_some();
        content.use_ppf = params.fluid.is_some() && params.use_ppf;
        content.cs2_fld = params.fluid.map(|(_, _, cs2)| cs2).unwrap_or(1.0);
        content.has_idr = omega_idr > 0.0;
        content.has_idm_dr = omega_idr > 0.0 && omega_idm > 0.0;
        content.n_ncdm = quadrature.species().len();
        content.curvature = -params.omega_k * h0 * h0;

        let mut cosmology = Self {
            params,
            content,
            quadrature,
            h0,
            omega_g,
            omega_b,
            omega_cdm,
            omega_idm,
            omega_ur,
            omega_idr,
            omega_lambda,
            omega_fld,
            dkappa_today,
            ln_a: Vec::new(),
            ln_tau: Vec::new(),
            ln_a_of_ln_tau: CubicSpline::new(vec![0.0, 1.0], vec![0.0, 1.0], SplineBoundary::Natural)?,
            ln_tau_of_ln_a: CubicSpline::new(vec![0.0, 1.0], vec![0.0, 1.0], SplineBoundary::Natural)?,
            kappa: Vec::new(),
            kappa_dd: Vec::new(),
            summary: RecombinationSummary {
                z_rec: 0.0,
                tau_rec: 0.0,
                rs_rec: 0.0,
                tau_free_streaming: 0.0,
                tau_idr_free_streaming: 0.0,
                tau_ini: 0.0,
            },
        };

        cosmology.tabulate()?;

        debug!(
            "Toy cosmology: tau0 = {:.2} Mpc, z_rec = {:.1}, rs_rec = {:.2} Mpc, Omega_Lambda = {:.4}",
            cosmology.content.conformal_age,
            cosmology.summary.z_rec,
            cosmology.summary.rs_rec,
            cosmology.omega_lambda
        );

        Ok(cosmology)
    }

    // =============================================================================================
    // Tables
    // =============================================================================================

    fn tabulate(&mut self) -> PerturbResult<()> {
        let step = -LN_A_MIN / (TABLE_SIZE - 1) as f64;
        let ln_a: Vec<f64> = (0..TABLE_SIZE).map(|i| LN_A_MIN + i as f64 * step).collect();
        let mut record = BackgroundRecord::with_ncdm(self.content.n_ncdm);

        // dτ/d ln a = 1/(aH), started from the radiation-era value τ = 1/(aH)
        let mut inverse_ah = Vec::with_capacity(TABLE_SIZE);
        for &x in &ln_a {
            self.fill_record(x.exp(), &mut record)?;
            inverse_ah.push(1.0 / record.a_prime_over_a());
        }
        let mut tau = Vec::with_capacity(TABLE_SIZE);
        tau.push(inverse_ah[0]);
        for i in 1..TABLE_SIZE {
            let previous = tau[i - 1];
            tau.push(previous + 0.5 * step * (inverse_ah[i - 1] + inverse_ah[i]));
        }

        // optical depth from today, integrated backwards
        let mut dkappa = Vec::with_capacity(TABLE_SIZE);
        for (i, &x) in ln_a.iter().enumerate() {
            let a = x.exp();
            let ion = self.ionization(1.0 / a - 1.0);
            dkappa.push(ion.xe * self.dkappa_today / (a * a) * inverse_ah[i]);
        }
        let mut kappa = vec![0.0; TABLE_SIZE];
        for i in (0..TABLE_SIZE - 1).rev() {
            kappa[i] = kappa[i + 1] + 0.5 * step * (dkappa[i] + dkappa[i + 1]);
        }

        let ln_tau: Vec<f64> = tau.iter().map(|t| t.ln()).collect();
        self.ln_a_of_ln_tau = CubicSpline::new(ln_tau.clone(), ln_a.clone(), SplineBoundary::EstimatedDerivatives)?;
        self.ln_tau_of_ln_a = CubicSpline::new(ln_a.clone(), ln_tau.clone(), SplineBoundary::EstimatedDerivatives)?;

        let mut kappa_dd = vec![0.0; TABLE_SIZE];
        let mut scratch = Vec::new();
        fill_second_derivatives(&ln_a, &kappa, SplineBoundary::Natural, &mut kappa_dd, &mut scratch)?;

        self.content.conformal_age = tau[TABLE_SIZE - 1];
        self.ln_a = ln_a;
        self.ln_tau = ln_tau;
        self.kappa = kappa;
        self.kappa_dd = kappa_dd;

        self.summary = self.recombination_summary(&tau, &inverse_ah)?;
        Ok(())
    }

    fn recombination_summary(&self, tau: &[f64], inverse_ah: &[f64]) -> PerturbResult<RecombinationSummary> {
        let mut thermo = ThermoRecord::default();
        let mut cursor = InterpolationCursor::new();

        // visibility peak restricted to the recombination era
        let mut best = (0usize, 0.0_f64);
        for i in 0..TABLE_SIZE {
            let z = 1.0 / self.ln_a[i].exp() - 1.0;
            if !(200.0..=5000.0).contains(&z) {
                continue;
            }
            self.thermodynamics_at(z, &mut cursor, &mut thermo)?;
            if thermo.g > best.1 {
                best = (i, thermo.g);
            }
        }
        let index_rec = best.0;
        let z_rec = 1.0 / self.ln_a[index_rec].exp() - 1.0;
        let tau_rec = tau[index_rec];

        let step = self.ln_a[1] - self.ln_a[0];
        let mut rs_rec = 0.5 * tau[0] * self.sound_speed(self.ln_a[0].exp());
        for i in 1..=index_rec {
            let cs_prev = self.sound_speed(self.ln_a[i - 1].exp()) * inverse_ah[i - 1];
            let cs = self.sound_speed(self.ln_a[i].exp()) * inverse_ah[i];
            rs_rec += 0.5 * step * (cs_prev + cs);
        }

        let mut tau_free_streaming = tau[TABLE_SIZE - 1];
        cursor.reset();
        for i in index_rec..TABLE_SIZE {
            let z = 1.0 / self.ln_a[i].exp() - 1.0;
            self.thermodynamics_at(z.max(0.0), &mut cursor, &mut thermo)?;
            if 1.0 / (thermo.dkappa * tau[i]) > FREE_STREAMING_TAU_C_OVER_TAU {
                tau_free_streaming = tau[i];
                break;
            }
        }

        let mut tau_idr_free_streaming = 0.0;
        if self.content.has_idr {
            tau_idr_free_streaming = tau[TABLE_SIZE - 1];
            for i in 0..TABLE_SIZE {
                let z = 1.0 / self.ln_a[i].exp() - 1.0;
                let (dmu_idm_dr, _, dmu_idr) = self.dark_rates(z.max(0.0), 1.0 / inverse_ah[i]);
                let rate = dmu_idr + dmu_idm_dr;
                if rate <= 0.0 || 1.0 / (rate * tau[i]) > FREE_STREAMING_TAU_C_OVER_TAU {
                    tau_idr_free_streaming = tau[i];
                    break;
                }
            }
        }

        Ok(RecombinationSummary {
            z_rec,
            tau_rec,
            rs_rec,
            tau_free_streaming,
            tau_idr_free_streaming,
            tau_ini: tau[1],
        })
    }

    // =============================================================================================
    // Analytic pieces
    // =============================================================================================

    /// Background at scale factor `a`
    fn fill_record(&self, a: f64, record: &mut BackgroundRecord) -> PerturbResult<()> {
        let h02 = self.h0 * self.h0;
        let a3 = a * a * a;
        let a4 = a3 * a;

        record.a = a;
        record.rho_g = self.omega_g * h02 / a4;
        record.rho_b = self.omega_b * h02 / a3;
        record.rho_cdm = self.omega_cdm * h02 / a3;
        record.rho_idm = self.omega_idm * h02 / a3;
        record.rho_ur = self.omega_ur * h02 / a4;
        record.rho_idr = self.omega_idr * h02 / a4;
        record.rho_lambda = self.omega_lambda * h02;

        let mut rho = record.rho_g + record.rho_b + record.rho_cdm + record.rho_idm + record.rho_ur + record.rho_idr + record.rho_lambda;
        let mut p = (record.rho_g + record.rho_ur + record.rho_idr) / 3.0 - record.rho_lambda;

        if self.content.has_fld {
            let eos = self.background_w_fld(a)?;
            record.rho_fld = self.omega_fld * h02 * eos.integral.exp();
            record.w_fld = eos.w;
            record.dw_over_da_fld = eos.dw_over_da;
            rho += record.rho_fld;
            p += eos.w * record.rho_fld;
        } else {
            record.rho_fld = 0.0;
            record.w_fld = -1.0;
            record.dw_over_da_fld = 0.0;
        }

        // ρ' of a decaying species gains ρ d ln N/d ln a · a'/a on top of −3(a'/a)(ρ + p)
        let mut decay_drain = 0.0;
        for (n, species) in self.quadrature.species().iter().enumerate() {
            let scale = self.quadrature.rescaling(n, a);
            let (rho_n, p_n, pseudo_n) = species.integrals(a);
            record.rho_ncdm[n] = rho_n * scale;
            record.p_ncdm[n] = p_n * scale;
            record.pseudo_p_ncdm[n] = pseudo_n * scale;
            rho += rho_n * scale;
            p += p_n * scale;
            decay_drain += rho_n * scale * self.quadrature.rescaling_log_slope(n, a);
        }

        let curvature = self.content.curvature;
        let hubble2 = rho - curvature / (a * a);
        if !(hubble2 > 0.0) {
            return Err(PerturbError::Collaborator(format!(
                "negative H^2 at a = {:e} (recollapsing toy universe)",
                a
            )));
        }

        record.rho_tot = rho;
        record.p_tot = p;
        record.hubble = hubble2.sqrt();
        record.hubble_prime = -1.5 * a * (rho + p) + 0.5 * a * decay_drain + curvature / a;
        Ok(())
    }

    fn ionization(&self, z: f64) -> Ionization {
        let x_res = 2.0e-4;
        let width = self.params.delta_z_rec;
        let u = (z - self.params.z_rec) / width;
        let t = u.tanh();
        let x_rec = x_res + (1.0 - x_res) * 0.5 * (1.0 + t);
        let dx_rec = (1.0 - x_res) * 0.5 * (1.0 - t * t) / width;

        match self.params.z_reio {
            None => Ionization { xe: x_rec, dxe_dz: dx_rec },
            Some(z_reio) => {
                let y = (1.0 + z).powf(1.5);
                let y_reio = (1.0 + z_reio).powf(1.5);
                let delta_y = 1.5 * (1.0 + z_reio).sqrt() * 0.5;
                let v = ((y_reio - y) / delta_y).tanh();
                let fraction = 0.5 * (1.0 + v);
                let dfraction_dz = -0.5 * (1.0 - v * v) * 1.5 * (1.0 + z).sqrt() / delta_y;
                Ionization {
                    xe: x_rec + (1.0 - x_rec) * fraction,
                    dxe_dz: dx_rec * (1.0 - fraction) + (1.0 - x_rec) * dfraction_dz,
                }
            }
        }
    }

    fn sound_speed(&self, a: f64) -> f64 {
        let r = 0.75 * self.omega_b / self.omega_g * a;
        1.0 / (3.0 * (1.0 + r)).sqrt()
    }

    /// (dmu_idm_dr, ddmu_idm_dr, dmu_idr) at redshift `z`, given aH
    fn dark_rates(&self, z: f64, a_prime_over_a: f64) -> (f64, f64, f64) {
        match self.params.dark_sector {
            Some(dark) => {
                let h2 = self.params.h * self.params.h;
                let scaling = ((1.0 + z) / 1.0e7).powi(4);
                let dmu_idm_dr = dark.a_dark * scaling * self.omega_idm * h2;
                let dmu_idr = dark.b_idr * scaling * self.omega_idr * h2;
                (dmu_idm_dr, -4.0 * a_prime_over_a * dmu_idm_dr, dmu_idr)
            }
            None => (0.0, 0.0, 0.0),
        }
    }

    /// Scale factor at conformal time `tau`
    pub fn scale_factor(&self, tau: f64) -> PerturbResult<f64> {
        let mut cursor = InterpolationCursor::new();
        self.ln_a_of_ln_tau
            .eval(tau.ln(), &mut cursor)
            .map(f64::exp)
            .ok_or_else(|| out_of_table("tau", tau, self.ln_tau[0].exp(), self.content.conformal_age))
    }

    /// Conformal Hubble rate today in Mpc^-1
    pub fn h0(&self) -> f64 {
        self.h0
    }
}

impl Background for ToyCosmology {
    fn background_at(
        &self,
        tau: f64,
        cursor: &mut InterpolationCursor,
        record: &mut BackgroundRecord,
    ) -> PerturbResult<()> {
        let tau_max = self.content.conformal_age;
        let tau_eval = if tau > tau_max && tau <= tau_max * (1.0 + 1e-10) { tau_max } else { tau };

        let ln_a = self
            .ln_a_of_ln_tau
            .eval(tau_eval.ln(), cursor)
            .ok_or_else(|| out_of_table("tau", tau, self.ln_tau[0].exp(), tau_max))?;

        if record.rho_ncdm.len() != self.content.n_ncdm {
            *record = BackgroundRecord::with_ncdm(self.content.n_ncdm);
        }
        self.fill_record(ln_a.exp().min(1.0), record)?;
        record.tau = tau;
        Ok(())
    }

    fn background_tau_of_z(&self, z: f64) -> PerturbResult<f64> {
        let ln_a = -(1.0 + z).ln();
        let mut cursor = InterpolationCursor::new();
        self.ln_tau_of_ln_a
            .eval(ln_a.min(0.0), &mut cursor)
            .map(f64::exp)
            .ok_or_else(|| out_of_table("z", z, 0.0, (-LN_A_MIN).exp() - 1.0))
    }

    fn background_w_fld(&self, a: f64) -> PerturbResult<FluidEos> {
        let (w0, wa, _) = self.params.fluid.unwrap_or((-1.0, 0.0, 1.0));
        if !(a > 0.0) {
            return Err(PerturbError::Collaborator(format!("w_fld queried at a = {:e}", a)));
        }
        Ok(FluidEos {
            w: w0 + wa * (1.0 - a),
            dw_over_da: -wa,
            integral: -3.0 * (1.0 + w0 + wa) * a.ln() - 3.0 * wa * (1.0 - a),
        })
    }

    fn content(&self) -> &SpeciesContent {
        &self.content
    }

    fn quadrature(&self) -> Option<&dyn MomentumQuadrature> {
        if self.content.n_ncdm > 0 {
            Some(&self.quadrature)
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "Toy cosmology"
    }
}

impl Thermodynamics for ToyCosmology {
    fn thermodynamics_at(
        &self,
        z: f64,
        cursor: &mut InterpolationCursor,
        record: &mut ThermoRecord,
    ) -> PerturbResult<()> {
        let z = if z < 0.0 && z > -1e-8 { 0.0 } else { z };
        let a = 1.0 / (1.0 + z);
        let ln_a = a.ln();

        let i = cursor
            .locate(&self.ln_a, ln_a)
            .ok_or_else(|| out_of_table("z", z, 0.0, (-LN_A_MIN).exp() - 1.0))?;
        let kappa = spline_value(&self.ln_a, &self.kappa, &self.kappa_dd, i, ln_a).max(0.0);

        let mut background = BackgroundRecord::with_ncdm(self.content.n_ncdm);
        self.fill_record(a, &mut background)?;
        let a_prime_over_a = background.a_prime_over_a();

        let ion = self.ionization(z);
        let dkappa = ion.xe * self.dkappa_today / (a * a);
        // d/dτ = aH d/d ln a and d xe/d ln a = −(1 + z) d xe/dz
        let ddkappa = a_prime_over_a * (-(1.0 + z) * ion.dxe_dz * self.dkappa_today / (a * a) - 2.0 * dkappa);
        let exp_m_kappa = (-kappa).exp();

        let t_b = {
            let f = 1.0 + z;
            self.params.t_cmb * f * f / (f + 150.0)
        };
        let dlnt_dlnf = {
            let f = 1.0 + z;
            2.0 - f / (f + 150.0)
        };
        let inverse_mu = (1.0 - self.params.y_he) * (1.0 + ion.xe) + 0.25 * self.params.y_he;
        let cb2 = K_B_EV * t_b / M_H_EV * inverse_mu * (1.0 + dlnt_dlnf / 3.0);

        let (dmu_idm_dr, ddmu_idm_dr, dmu_idr) = self.dark_rates(z, a_prime_over_a);
        let c2_idm = match self.params.dark_sector {
            Some(dark) => 4.0 / 3.0 * K_B_EV * self.params.t_cmb * (1.0 + z) / (dark.m_idm_gev * 1.0e9),
            None => 0.0,
        };

        record.xe = ion.xe;
        record.dkappa = dkappa;
        record.ddkappa = ddkappa;
        record.exp_m_kappa = exp_m_kappa;
        record.g = dkappa * exp_m_kappa;
        record.dg = (ddkappa + dkappa * dkappa) * exp_m_kappa;
        record.cb2 = cb2;
        record.rate = (record.g * record.g + (ddkappa / dkappa).powi(2)).sqrt();
        record.dmu_idm_dr = dmu_idm_dr;
        record.ddmu_idm_dr = ddmu_idm_dr;
        record.dmu_idr = dmu_idr;
        record.c2_idm = c2_idm;
        Ok(())
    }

    fn summary(&self) -> &RecombinationSummary {
        &self.summary
    }

    fn name(&self) -> &str {
        "Toy recombination"
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_universe_closes() {
        let cosmology = ToyCosmology::new().unwrap();
        let mut record = BackgroundRecord::with_ncdm(0);
        let mut cursor = InterpolationCursor::new();
        let tau0 = cosmology.content().conformal_age;

        cosmology.background_at(tau0, &mut cursor, &mut record).unwrap();
        assert_relative_eq!(record.a, 1.0, epsilon = 1e-6);
        assert_relative_eq!(record.hubble, cosmology.h0(), max_relative = 1e-6);
    }

    #[test]
    fn test_conformal_age_is_realistic() {
        let cosmology = ToyCosmology::builder().reionization(None).build().unwrap();
        let tau0 = cosmology.content().conformal_age;
        assert!(tau0 > 13_000.0 && tau0 < 15_500.0, "tau0 = {}", tau0);
    }

    #[test]
    fn test_tau_of_z_inverts_background() {
        let cosmology = ToyCosmology::new().unwrap();
        let tau = cosmology.background_tau_of_z(1000.0).unwrap();
        let mut record = BackgroundRecord::default();
        let mut cursor = InterpolationCursor::new();
        cosmology.background_at(tau, &mut cursor, &mut record).unwrap();
        assert_relative_eq!(record.z(), 1000.0, max_relative = 1e-5);
    }

    #[test]
    fn test_radiation_era_conformal_time() {
        let cosmology = ToyCosmology::new().unwrap();
        let tau = cosmology.background_tau_of_z(1.0e7).unwrap();
        let mut record = BackgroundRecord::default();
        let mut cursor = InterpolationCursor::new();
        cosmology.background_at(tau, &mut cursor, &mut record).unwrap();
        // τ = 1/(aH) deep in radiation domination
        assert_relative_eq!(tau * record.a_prime_over_a(), 1.0, max_relative = 1e-3);
    }

    #[test]
    fn test_recombination_summary() {
        let cosmology = ToyCosmology::builder().reionization(None).build().unwrap();
        let summary = cosmology.summary();

        assert!(summary.z_rec > 1000.0 && summary.z_rec < 1150.0, "z_rec = {}", summary.z_rec);
        assert!(summary.rs_rec > 100.0 && summary.rs_rec < 200.0, "rs = {}", summary.rs_rec);
        assert!(summary.tau_free_streaming > summary.tau_rec);
        assert!(summary.tau_ini < summary.tau_rec);
    }

    #[test]
    fn test_visibility_is_consistent() {
        let cosmology = ToyCosmology::new().unwrap();
        let mut thermo = ThermoRecord::default();
        let mut cursor = InterpolationCursor::new();

        cosmology.thermodynamics_at(1100.0, &mut cursor, &mut thermo).unwrap();
        assert_relative_eq!(thermo.g, thermo.dkappa * thermo.exp_m_kappa, max_relative = 1e-12);
        assert!(thermo.cb2 > 0.0 && thermo.cb2 < 1e-8);

        cosmology.thermodynamics_at(0.0, &mut cursor, &mut thermo).unwrap();
        assert_relative_eq!(thermo.exp_m_kappa, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reionization_raises_today_opacity() {
        let with = ToyCosmology::new().unwrap();
        let without = ToyCosmology::builder().reionization(None).build().unwrap();
        let mut thermo = ThermoRecord::default();
        let mut cursor = InterpolationCursor::new();

        with.thermodynamics_at(1.0, &mut cursor, &mut thermo).unwrap();
        let reionized = thermo.xe;
        cursor.reset();
        without.thermodynamics_at(1.0, &mut cursor, &mut thermo).unwrap();
        assert!(reionized > 0.9);
        assert!(thermo.xe < 1e-3);
    }

    #[test]
    fn test_massive_neutrino_density() {
        let cosmology = ToyCosmology::builder().n_ur(2.0328).ncdm(0.06, 15).build().unwrap();
        let mut record = BackgroundRecord::default();
        let mut cursor = InterpolationCursor::new();
        cosmology
            .background_at(cosmology.content().conformal_age, &mut cursor, &mut record)
            .unwrap();

        // Ω_ν h² ≈ m / 93.14 eV
        let omega_nu_h2 = record.rho_ncdm[0] / (cosmology.h0() * cosmology.h0()) * 0.6736 * 0.6736;
        assert_relative_eq!(omega_nu_h2, 0.06 / 93.14, max_relative = 0.05);
        assert!(cosmology.quadrature().is_some());
    }

    #[test]
    fn test_decaying_ncdm_background() {
        let a_decay = 1e-3;
        let stable = ToyCosmology::builder().n_ur(2.0328).ncdm(0.06, 15).build().unwrap();
        let decaying = ToyCosmology::builder()
            .n_ur(2.0328)
            .ncdm(0.06, 15)
            .ncdm_decay(a_decay)
            .build()
            .unwrap();

        let mut reference = BackgroundRecord::with_ncdm(1);
        let mut record = BackgroundRecord::with_ncdm(1);
        stable.fill_record(a_decay, &mut reference).unwrap();
        decaying.fill_record(a_decay, &mut record).unwrap();
        let e_fold = (-1.0f64).exp();
        assert_relative_eq!(record.rho_ncdm[0], e_fold * reference.rho_ncdm[0], max_relative = 1e-12);
        assert_relative_eq!(record.p_ncdm[0], e_fold * reference.p_ncdm[0], max_relative = 1e-12);
        assert_relative_eq!(record.pseudo_p_ncdm[0], e_fold * reference.pseudo_p_ncdm[0], max_relative = 1e-12);

        // H' = a² H dH/da with the decay drain included
        let h = 1e-6;
        let mut lower = BackgroundRecord::with_ncdm(1);
        let mut upper = BackgroundRecord::with_ncdm(1);
        decaying.fill_record(a_decay * (1.0 - h), &mut lower).unwrap();
        decaying.fill_record(a_decay * (1.0 + h), &mut upper).unwrap();
        let dh_da = (upper.hubble - lower.hubble) / (2.0 * a_decay * h);
        assert_relative_eq!(record.hubble_prime, a_decay * a_decay * record.hubble * dh_da, max_relative = 1e-6);

        decaying.fill_record(1.0, &mut record).unwrap();
        assert_eq!(record.rho_ncdm[0], 0.0);
        assert!(ToyCosmology::builder().ncdm_decay(1e-3).build().is_err());
    }

    #[test]
    fn test_fluid_equation_of_state() {
        let cosmology = ToyCosmology::builder().fluid(-0.9, 0.1, 1.0).build().unwrap();
        let eos = cosmology.background_w_fld(0.5).unwrap();
        assert_relative_eq!(eos.w, -0.85);
        assert!(cosmology.content().has_fld);
        assert!(!cosmology.content().has_lambda);
    }

    #[test]
    fn test_out_of_range_query_fails() {
        let cosmology = ToyCosmology::new().unwrap();
        let mut record = BackgroundRecord::default();
        let mut cursor = InterpolationCursor::new();
        let result = cosmology.background_at(1.0e-12, &mut cursor, &mut record);
        assert!(matches!(result, Err(PerturbError::Collaborator(_))));
    }
}
