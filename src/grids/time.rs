//! Conformal-time sampling of the source functions
//!
//! The sampling starts at the first time sources can matter:
//! - with CMB outputs, when the photon interaction time τ_c = 1/κ' becomes a
//!   small fraction of the Hubble time (just before recombination)
//! - otherwise at τ(z_max_pk)
//!
//! and advances by `stepsize / rate(τ)` until today, where the rate combines
//! the variation of the thermal history with the late ISW rate. The last
//! sample is exactly τ₀.

use log::debug;

use crate::config::{Precision, Settings};
use crate::error::{PerturbError, PerturbResult};
use crate::physics::{Background, BackgroundRecord, InterpolationCursor, ThermoRecord, Thermodynamics};

/// Bisection precision on the starting time
const TAU_START_TOLERANCE: f64 = 1e-6;

/// Number of samples kept before τ(z_max_pk) in the ln τ window
const LN_TAU_MARGIN: usize = 4;

/// Source sampling times and the late-time ln τ window
#[derive(Debug, Clone)]
pub struct TimeSampling {
    /// Strictly increasing sampling times, ending at τ₀
    pub tau: Vec<f64>,
    /// ln τ of the samples from `index_ln_tau_start` to the end
    pub ln_tau: Vec<f64>,
    /// Index in `tau` of the first sample of the ln τ window
    pub index_ln_tau_start: usize,
}

impl TimeSampling {
    /// Build the sampling for the requested outputs
    pub fn build(
        background: &dyn Background,
        thermodynamics: &dyn Thermodynamics,
        settings: &Settings,
        precision: &Precision,
    ) -> PerturbResult<Self> {
        let tau0 = background.content().conformal_age;
        let n_ncdm = background.content().n_ncdm;
        let mut bg_cursor = InterpolationCursor::new();
        let mut th_cursor = InterpolationCursor::new();
        let mut record = BackgroundRecord::with_ncdm(n_ncdm);
        let mut thermo = ThermoRecord::default();

        let has_cmb = settings.has_cmb();

        if !has_cmb && settings.z_max_pk == 0.0 {
            debug!("Time sampling reduced to today only (z_max_pk = 0)");
            return Ok(Self {
                tau: vec![tau0],
                ln_tau: vec![tau0.ln()],
                index_ln_tau_start: 0,
            });
        }

        let tau_start = if has_cmb {
            sources_start(background, thermodynamics, precision)?
        } else {
            background.background_tau_of_z(settings.z_max_pk)?
        };

        let mut tau = vec![tau_start];
        let mut current = tau_start;

        loop {
            background.background_at(current, &mut bg_cursor, &mut record)?;
            let rate = if has_cmb {
                thermodynamics.thermodynamics_at(record.z().max(0.0), &mut th_cursor, &mut thermo)?;
                let a_prime_over_a = record.a_prime_over_a();
                let rate_isw_squared =
                    (record.a_primeprime_over_a() - a_prime_over_a * a_prime_over_a).abs();
                (thermo.rate * thermo.rate + rate_isw_squared).sqrt()
            } else {
                record.a_prime_over_a()
            };

            let step = precision.perturbations_sampling_stepsize / rate;
            if !(step / current >= precision.smallest_allowed_variation) {
                return Err(PerturbError::Precision(format!(
                    "source sampling step {:e} underflows at tau = {:e} (rate = {:e})",
                    step, current, rate
                )));
            }

            current += step;
            if current >= tau0 {
                break;
            }
            tau.push(current);
        }
        tau.push(tau0);

        let index_ln_tau_start = if settings.z_max_pk == 0.0 {
            tau.len() - 1
        } else {
            let tau_z_max = background.background_tau_of_z(settings.z_max_pk)?;
            let first_after = tau.partition_point(|t| *t <= tau_z_max);
            first_after.saturating_sub(LN_TAU_MARGIN)
        };
        let ln_tau = tau[index_ln_tau_start..].iter().map(|t| t.ln()).collect::<Vec<_>>();

        debug!(
            "Time sampling: {} samples from tau = {:.3} to {:.3} Mpc, ln tau window of {} samples",
            tau.len(),
            tau_start,
            tau0,
            ln_tau.len()
        );

        Ok(Self {
            tau,
            ln_tau,
            index_ln_tau_start,
        })
    }

    pub fn len(&self) -> usize {
        self.tau.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tau.is_empty()
    }

    pub fn ln_tau_size(&self) -> usize {
        self.ln_tau.len()
    }

    /// Last sampling time (τ₀)
    pub fn tau_today(&self) -> f64 {
        self.tau[self.tau.len() - 1]
    }
}

/// Time at which τ_c/τ_h crosses `start_sources_at_tau_c_over_tau_h`
fn sources_start(
    background: &dyn Background,
    thermodynamics: &dyn Thermodynamics,
    precision: &Precision,
) -> PerturbResult<f64> {
    let summary = thermodynamics.summary();
    let target = precision.start_sources_at_tau_c_over_tau_h;
    let mut bg_cursor = InterpolationCursor::new();
    let mut th_cursor = InterpolationCursor::new();
    let mut record = BackgroundRecord::with_ncdm(background.content().n_ncdm);
    let mut thermo = ThermoRecord::default();

    let mut ratio = |tau: f64| -> PerturbResult<f64> {
        background.background_at(tau, &mut bg_cursor, &mut record)?;
        thermodynamics.thermodynamics_at(record.z(), &mut th_cursor, &mut thermo)?;
        if thermo.dkappa == 0.0 {
            return Err(PerturbError::Numerical(format!(
                "vanishing opacity at tau = {:e} while locating the first source sample",
                tau
            )));
        }
        Ok(record.a_prime_over_a() / thermo.dkappa)
    };

    let mut lower = summary.tau_ini;
    let mut upper = summary.tau_rec;

    if ratio(lower)? > target {
        return Err(PerturbError::Precision(format!(
            "tau_c/tau_h = {:e} already above {:e} at the earliest tabulated time; \
             the thermal history starts too late",
            ratio(lower)?,
            target
        )));
    }
    if ratio(upper)? < target {
        return Err(PerturbError::Precision(format!(
            "tau_c/tau_h never reaches {:e} before recombination",
            target
        )));
    }

    while (upper - lower) / lower > TAU_START_TOLERANCE {
        let mid = 0.5 * (lower + upper);
        if ratio(mid)? > target {
            upper = mid;
        } else {
            lower = mid;
        }
    }

    Ok(lower)
}
