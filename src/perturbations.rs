//! Entry point: from background and thermodynamics to the source table
//!
//! [`Perturbations::compute`] runs the whole pipeline:
//!
//! 1. validate `Precision` and `Settings` (no integration happens on a bad
//!    configuration)
//! 2. build the conformal-time sampling, shared by all modes
//! 3. per mode: build the wavenumber grid and the source-type indices
//! 4. per (mode, initial condition): integrate every k ([`run_tasks`])
//! 5. build the late ln τ splines
//!
//! ```rust,no_run
//! use perturb_rs::config::{Precision, Settings};
//! use perturb_rs::models::{InitialCondition, Mode, SourceType};
//! use perturb_rs::perturbations::Perturbations;
//! use perturb_rs::physics::ToyCosmology;
//!
//! # fn main() -> Result<(), perturb_rs::error::PerturbError> {
//! let cosmology = ToyCosmology::new()?;
//! let perturbations = Perturbations::compute(&cosmology, &cosmology, Settings::cmb(), Precision::default())?;
//!
//! let tau_rec = perturbations.tau_sampling().tau[10];
//! let t0 = perturbations.source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::T0, tau_rec)?;
//! assert_eq!(t0.len(), perturbations.k_grid(Mode::Scalar)?.len());
//! # Ok(())
//! # }
//! ```

use std::time::Instant;

use log::{info, warn};
use ndarray::ArrayView3;

use crate::config::{NcdmFluidMethod, Precision, Settings};
use crate::error::PerturbResult;
use crate::grids::{TimeSampling, WavenumberGrid};
use crate::models::{InitialCondition, Mode, ModeIndices, SourceType};
use crate::output::table::{ModeSources, SourceTable};
use crate::physics::{Background, Thermodynamics};
use crate::solver::scheduler::{run_tasks, SharedInputs};
use crate::solver::{EvolutionReport, Trace};

/// Redshift above which the ncdm fluid approximation is flagged for P(k, z)
const NCDM_FLUID_Z_WARNING: f64 = 10.0;

/// Computed source functions with the configuration that produced them
#[derive(Debug, Clone)]
pub struct Perturbations {
    settings: Settings,
    precision: Precision,
    table: SourceTable,
}

impl Perturbations {
    /// Integrate every requested (mode, initial condition, k)
    ///
    /// # Errors
    ///
    /// - `Configuration` before any integration for rejected settings
    /// - the first failing task (in mode, initial condition, k order),
    ///   wrapped as `PerturbError::Task`
    pub fn compute(
        background: &dyn Background,
        thermodynamics: &dyn Thermodynamics,
        settings: Settings,
        precision: Precision,
    ) -> PerturbResult<Self> {
        let start = Instant::now();
        let content = background.content();

        precision.validate()?;
        settings.validate(content)?;
        consistency_warnings(background, thermodynamics, &settings, &precision);

        info!(
            "Computing perturbations with {} and {}",
            background.name(),
            thermodynamics.name()
        );

        let sampling = TimeSampling::build(background, thermodynamics, &settings, &precision)?;
        info!(
            "Time sampling: {} values, {} in the ln(tau) window",
            sampling.len(),
            sampling.ln_tau_size()
        );

        let inputs = SharedInputs {
            settings: &settings,
            precision: &precision,
            background,
            thermodynamics,
        };

        let mut modes = Vec::new();
        for indices in ModeIndices::build_all(&settings, content) {
            let grid = WavenumberGrid::build(indices.mode, background, thermodynamics, &settings, &precision)?;
            info!(
                "{} mode: {} wavenumbers in [{:e}, {:e}] Mpc^-1, {} source types",
                indices.mode,
                grid.len(),
                grid.k_min(),
                grid.k_max(),
                indices.sources.len()
            );

            let tables = indices
                .initial_conditions
                .iter()
                .map(|ic| run_tasks(inputs, &indices, *ic, &grid, &sampling))
                .collect::<PerturbResult<Vec<_>>>()?;

            modes.push(ModeSources::new(indices, grid, tables, &sampling)?);
        }
        info!("Late source splines built");

        let perturbations = Self {
            table: SourceTable::new(sampling, modes),
            settings,
            precision,
        };
        let report = perturbations.report();
        info!(
            "Perturbations done in {:.2?}: {} accepted steps, {} rejected",
            start.elapsed(),
            report.accepted,
            report.rejected
        );

        Ok(perturbations)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn precision(&self) -> &Precision {
        &self.precision
    }

    pub fn table(&self) -> &SourceTable {
        &self.table
    }

    pub fn into_table(self) -> SourceTable {
        self.table
    }

    pub fn tau_sampling(&self) -> &TimeSampling {
        self.table.tau_sampling()
    }

    pub fn k_grid(&self, mode: Mode) -> PerturbResult<&WavenumberGrid> {
        self.table.k_grid(mode)
    }

    /// S(k, τ) for every k of `mode`
    pub fn source_at(
        &self,
        mode: Mode,
        initial_condition: InitialCondition,
        source: SourceType,
        tau: f64,
    ) -> PerturbResult<Vec<f64>> {
        self.table.source_at(mode, initial_condition, source, tau)
    }

    /// `[k][type][τ]`
    pub fn raw(&self, mode: Mode, initial_condition: InitialCondition) -> PerturbResult<ArrayView3<'_, f64>> {
        self.table.raw(mode, initial_condition)
    }

    pub fn late_sources(&self, mode: Mode, initial_condition: InitialCondition) -> PerturbResult<ArrayView3<'_, f64>> {
        self.table.late_sources(mode, initial_condition)
    }

    pub fn traces(&self, mode: Mode, initial_condition: InitialCondition) -> PerturbResult<Vec<(f64, &Trace)>> {
        self.table.traces(mode, initial_condition)
    }

    /// Integrator statistics over every task
    pub fn report(&self) -> EvolutionReport {
        let mut total = EvolutionReport::default();
        for mode in self.table.modes() {
            if let Ok(sources) = self.table.mode(mode) {
                for table in &sources.tables {
                    total += table.report();
                }
            }
        }
        total
    }
}

/// Log the physical-consistency warnings of a valid configuration
fn consistency_warnings(
    background: &dyn Background,
    thermodynamics: &dyn Thermodynamics,
    settings: &Settings,
    precision: &Precision,
) {
    let content = background.content();
    let z_rec = thermodynamics.summary().z_rec;

    if settings.has_lss() && settings.z_max_pk > z_rec {
        warn!(
            "z_max_pk = {} is beyond recombination (z = {:.1}); matter sources there are not reliable",
            settings.z_max_pk, z_rec
        );
    }

    if settings.has_lss()
        && content.n_ncdm > 0
        && precision.ncdm_fluid_approximation != NcdmFluidMethod::None
        && settings.z_max_pk > NCDM_FLUID_Z_WARNING
    {
        warn!(
            "P(k, z) requested up to z = {} with the ncdm fluid approximation; \
             set it to none for accurate high-redshift spectra",
            settings.z_max_pk
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Gauge;
    use crate::error::PerturbError;
    use crate::physics::ToyCosmology;

    #[test]
    fn test_configuration_rejected_before_integration() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb().with_gauge(Gauge::Newtonian).with_modes(true, true, false);
        let error = Perturbations::compute(&cosmology, &cosmology, settings, Precision::fast()).unwrap_err();
        assert!(matches!(error, PerturbError::Configuration(_)));

        let mut precision = Precision::fast();
        precision.tol_perturbations_integration = -1.0;
        let error = Perturbations::compute(&cosmology, &cosmology, Settings::cmb(), precision).unwrap_err();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_matter_only_today() {
        let cosmology = ToyCosmology::new().unwrap();
        let mut settings = Settings::matter().with_z_max_pk(0.0);
        settings.k_max_for_pk = 0.1;
        let perturbations = Perturbations::compute(&cosmology, &cosmology, settings, Precision::fast()).unwrap();

        assert_eq!(perturbations.tau_sampling().len(), 1);
        let grid = perturbations.k_grid(Mode::Scalar).unwrap();
        let raw = perturbations.raw(Mode::Scalar, InitialCondition::Adiabatic).unwrap();
        assert_eq!(raw.dim().0, grid.len());
        assert_eq!(raw.dim().2, 1);
        assert!(perturbations.report().accepted > 0);
        assert!(perturbations.k_grid(Mode::Tensor).is_err());
    }
}
