//! Per-task context and scratch space
//!
//! A [`TaskContext`] names one integration task, (mode, initial condition, k),
//! and holds the shared read-only inputs. A [`Workspace`] is owned by that
//! task alone: it caches the background and thermodynamics at the current
//! time, the regime flags, the last metric solution, and the single live
//! [`StateVector`].

use crate::config::{Gauge, Precision, Settings};
use crate::error::{PerturbError, PerturbResult};
use crate::physics::{
    Background,
    BackgroundRecord,
    InterpolationCursor,
    QuadratureSpecies,
    SpeciesContent,
    ThermoRecord,
    Thermodynamics,
};
use super::approximations::RegimeFlags;
use super::indices::{InitialCondition, Mode};
use super::layout::StateVector;
use super::metric::MetricSolution;

/// Inputs shared by every call of one integration task
#[derive(Clone, Copy)]
pub struct TaskContext<'a> {
    pub mode: Mode,
    pub initial_condition: InitialCondition,
    pub k: f64,
    pub settings: &'a Settings,
    pub precision: &'a Precision,
    pub background: &'a dyn Background,
    pub thermodynamics: &'a dyn Thermodynamics,
}

impl<'a> TaskContext<'a> {
    pub fn content(&self) -> &'a SpeciesContent {
        self.background.content()
    }

    pub fn gauge(&self) -> Gauge {
        self.settings.gauge
    }

    /// Momentum grids of the non-cold species (empty without ncdm)
    pub fn ncdm(&self) -> &'a [QuadratureSpecies] {
        match self.background.quadrature() {
            Some(quadrature) => quadrature.species(),
            None => &[],
        }
    }

    /// Number of momentum nodes per non-cold species
    pub fn ncdm_q_sizes(&self) -> Vec<usize> {
        self.ncdm().iter().map(|s| s.size()).collect()
    }
}

/// Scratch state of one task
#[derive(Debug)]
pub struct Workspace {
    pub background: BackgroundRecord,
    pub thermo: ThermoRecord,
    pub flags: RegimeFlags,
    pub metric: MetricSolution,
    /// Curvature factors s_ℓ = sqrt(1 − K(ℓ² − 1)/k²)
    pub s_l: Vec<f64>,
    /// Time-dependent normalization of each ncdm species
    pub ncdm_rescaling: Vec<f64>,
    pub tau: f64,
    k: f64,
    curvature: f64,
    bg_cursor: InterpolationCursor,
    th_cursor: InterpolationCursor,
    state: Option<StateVector>,
}

impl Workspace {
    pub fn new(context: &TaskContext<'_>) -> Self {
        let content = context.content();
        let precision = context.precision;
        let k = context.k;
        let curvature = content.curvature;

        let l_top = [
            precision.l_max_g,
            precision.l_max_pol_g,
            precision.l_max_ur,
            precision.l_max_idr,
            precision.l_max_ncdm,
            precision.l_max_g_ten,
            precision.l_max_pol_g_ten,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 2;

        let s_l = (0..=l_top)
            .map(|l| {
                let l = l as f64;
                (1.0 - curvature * (l * l - 1.0) / (k * k)).max(0.0).sqrt()
            })
            .collect();

        Self {
            background: BackgroundRecord::with_ncdm(content.n_ncdm),
            thermo: ThermoRecord::default(),
            flags: RegimeFlags::early(),
            metric: MetricSolution::with_ncdm(content.n_ncdm),
            s_l,
            ncdm_rescaling: vec![1.0; content.n_ncdm],
            tau: 0.0,
            k,
            curvature,
            bg_cursor: InterpolationCursor::new(),
            th_cursor: InterpolationCursor::new(),
            state: None,
        }
    }

    /// Query the collaborators at `tau`
    pub fn refresh(&mut self, context: &TaskContext<'_>, tau: f64) -> PerturbResult<()> {
        context
            .background
            .background_at(tau, &mut self.bg_cursor, &mut self.background)?;
        let z = self.background.z().max(0.0);
        context
            .thermodynamics
            .thermodynamics_at(z, &mut self.th_cursor, &mut self.thermo)?;

        if let Some(quadrature) = context.background.quadrature() {
            let a = self.background.a;
            for (n, rescale) in self.ncdm_rescaling.iter_mut().enumerate() {
                *rescale = quadrature.rescaling(n, a);
            }
        }

        self.tau = tau;
        Ok(())
    }

    /// Generalized cot(√K τ) closure factor of the hierarchies
    pub fn cot_k(&self, tau: f64) -> f64 {
        if self.curvature > 0.0 {
            let sqrt_k = self.curvature.sqrt();
            sqrt_k / (sqrt_k * tau).tan()
        } else if self.curvature < 0.0 {
            let sqrt_k = (-self.curvature).sqrt();
            sqrt_k / (sqrt_k * tau).tanh()
        } else {
            1.0 / tau
        }
    }

    /// 1 − 3K/k²
    pub fn s2_squared(&self) -> f64 {
        1.0 - 3.0 * self.curvature / (self.k * self.k)
    }

    /// Replace the live state, dropping the previous one
    pub fn install(&mut self, state: StateVector) {
        self.state = Some(state);
    }

    pub fn state(&self) -> PerturbResult<&StateVector> {
        self.state
            .as_ref()
            .ok_or_else(|| PerturbError::Numerical("workspace has no live state".into()))
    }

    pub fn take_state(&mut self) -> PerturbResult<StateVector> {
        self.state
            .take()
            .ok_or_else(|| PerturbError::Numerical("workspace has no live state".into()))
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ToyCosmology;
    use approx::assert_relative_eq;

    #[test]
    fn test_refresh_caches_background() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::default();
        let context = TaskContext {
            mode: Mode::Scalar,
            initial_condition: InitialCondition::Adiabatic,
            k: 0.05,
            settings: &settings,
            precision: &precision,
            background: &cosmology,
            thermodynamics: &cosmology,
        };
        let mut workspace = Workspace::new(&context);
        let tau_rec = cosmology.summary().tau_rec;
        workspace.refresh(&context, tau_rec).unwrap();

        assert_eq!(workspace.tau, tau_rec);
        assert!(workspace.thermo.dkappa > 0.0);
        assert_relative_eq!(workspace.cot_k(2.0), 0.5);
        assert!(workspace.s_l.iter().all(|s| *s == 1.0));
        assert!(!workspace.has_state());
    }

    #[test]
    fn test_closed_universe_curvature_factors() {
        let cosmology = ToyCosmology::builder().omega_k(-0.02).build().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::default();
        let k = 10.0 * cosmology.content().curvature.sqrt();
        let context = TaskContext {
            mode: Mode::Scalar,
            initial_condition: InitialCondition::Adiabatic,
            k,
            settings: &settings,
            precision: &precision,
            background: &cosmology,
            thermodynamics: &cosmology,
        };
        let workspace = Workspace::new(&context);

        assert_eq!(workspace.s_l[1], 1.0);
        assert!(workspace.s_l[2] < 1.0);
        assert!(workspace.s2_squared() < 1.0);
    }
}
