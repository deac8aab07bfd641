//! Source table and its interpolation in time
//!
//! For every computed mode the table holds one `[k][type][τ]` array per
//! initial condition, the k grid of that mode, and the ln τ spline
//! coefficients of the late part of the sampling.
//!
//! [`SourceTable::source_at`] interpolates all wavenumbers at once:
//! - inside the ln τ window: cubic spline in ln τ
//! - before it: linear in τ
//! - with a single sample (no CMB, `z_max_pk = 0`): that sample

use ndarray::{s, Array3, ArrayView1, ArrayView3};

use crate::error::{PerturbError, PerturbResult};
use crate::grids::{TimeSampling, WavenumberGrid};
use crate::models::{InitialCondition, Mode, ModeIndices, SourceType};
use crate::solver::evolve::Trace;
use crate::solver::scheduler::{build_late_splines, ModeTable};
use super::interpolation::{linear_value, spline_value};

/// Everything computed for one mode
#[derive(Debug, Clone)]
pub struct ModeSources {
    pub indices: ModeIndices,
    pub grid: WavenumberGrid,
    /// One table per initial condition, in `indices.initial_conditions` order
    pub tables: Vec<ModeTable>,
    /// `[type][k][ln τ]` second derivatives, one per initial condition
    late_dd: Vec<Array3<f64>>,
}

impl ModeSources {
    /// Attach the late splines to freshly integrated tables
    pub fn new(
        indices: ModeIndices,
        grid: WavenumberGrid,
        tables: Vec<ModeTable>,
        sampling: &TimeSampling,
    ) -> PerturbResult<Self> {
        let late_dd = tables
            .iter()
            .map(|table| build_late_splines(table, sampling))
            .collect::<PerturbResult<Vec<_>>>()?;
        Ok(Self {
            indices,
            grid,
            tables,
            late_dd,
        })
    }

    fn position(&self, initial_condition: InitialCondition) -> PerturbResult<usize> {
        self.tables
            .iter()
            .position(|t| t.initial_condition == initial_condition)
            .ok_or_else(|| {
                PerturbError::Configuration(format!(
                    "initial condition {} was not computed for the {} mode",
                    initial_condition, self.indices.mode
                ))
            })
    }
}

/// Source functions S(k, τ) of every computed (mode, initial condition)
#[derive(Debug, Clone)]
pub struct SourceTable {
    sampling: TimeSampling,
    modes: Vec<ModeSources>,
}

impl SourceTable {
    pub fn new(sampling: TimeSampling, modes: Vec<ModeSources>) -> Self {
        Self { sampling, modes }
    }

    pub fn tau_sampling(&self) -> &TimeSampling {
        &self.sampling
    }

    /// Computed modes, in scalar / vector / tensor order
    pub fn modes(&self) -> impl Iterator<Item = Mode> + '_ {
        self.modes.iter().map(|m| m.indices.mode)
    }

    pub fn mode(&self, mode: Mode) -> PerturbResult<&ModeSources> {
        self.modes
            .iter()
            .find(|m| m.indices.mode == mode)
            .ok_or_else(|| PerturbError::Configuration(format!("the {} mode was not computed", mode)))
    }

    pub fn indices(&self, mode: Mode) -> PerturbResult<&ModeIndices> {
        Ok(&self.mode(mode)?.indices)
    }

    /// Wavenumbers of `mode` with their CMB / Cl boundaries
    pub fn k_grid(&self, mode: Mode) -> PerturbResult<&WavenumberGrid> {
        Ok(&self.mode(mode)?.grid)
    }

    /// Full `[k][type][τ]` array
    pub fn raw(&self, mode: Mode, initial_condition: InitialCondition) -> PerturbResult<ArrayView3<'_, f64>> {
        let sources = self.mode(mode)?;
        let position = sources.position(initial_condition)?;
        Ok(sources.tables[position].sources.view())
    }

    /// The ln τ window of [`raw`](Self::raw), as a view into the same storage
    pub fn late_sources(&self, mode: Mode, initial_condition: InitialCondition) -> PerturbResult<ArrayView3<'_, f64>> {
        let start = self.sampling.index_ln_tau_start;
        let raw = self.raw(mode, initial_condition)?;
        Ok(raw.slice_move(s![.., .., start..]))
    }

    /// S(τ) of one wavenumber on the sampling grid
    pub fn time_series(
        &self,
        mode: Mode,
        initial_condition: InitialCondition,
        source: SourceType,
        k_index: usize,
    ) -> PerturbResult<ArrayView1<'_, f64>> {
        let type_index = self.type_index(mode, source)?;
        let raw = self.raw(mode, initial_condition)?;
        if k_index >= raw.dim().0 {
            return Err(PerturbError::Configuration(format!(
                "k index {} out of range for the {} mode ({} wavenumbers)",
                k_index,
                mode,
                raw.dim().0
            )));
        }
        Ok(raw.slice_move(s![k_index, type_index, ..]))
    }

    /// Per-step traces of the output wavenumbers, as `(k, trace)`
    pub fn traces(&self, mode: Mode, initial_condition: InitialCondition) -> PerturbResult<Vec<(f64, &Trace)>> {
        let sources = self.mode(mode)?;
        let position = sources.position(initial_condition)?;
        Ok(sources.tables[position]
            .outputs
            .iter()
            .filter_map(|output| output.trace.as_ref().map(|trace| (output.k, trace)))
            .collect())
    }

    /// S(k, τ) for every k of `mode`
    pub fn source_at(
        &self,
        mode: Mode,
        initial_condition: InitialCondition,
        source: SourceType,
        tau: f64,
    ) -> PerturbResult<Vec<f64>> {
        let sources = self.mode(mode)?;
        let position = sources.position(initial_condition)?;
        let type_index = self.type_index(mode, source)?;
        let table = &sources.tables[position].sources;
        let k_size = table.dim().0;

        let taus = &self.sampling.tau;
        let n = taus.len();

        if n == 1 {
            return Ok((0..k_size).map(|k| table[[k, type_index, 0]]).collect());
        }

        if !(tau >= taus[0] && tau <= taus[n - 1]) {
            return Err(PerturbError::Numerical(format!(
                "tau = {:e} outside the sampled range [{:e}, {:e}]",
                tau,
                taus[0],
                taus[n - 1]
            )));
        }

        let start = self.sampling.index_ln_tau_start;
        let ln_tau = &self.sampling.ln_tau;

        if ln_tau.len() >= 2 && tau >= taus[start] {
            let x = tau.ln();
            let i = ln_tau.partition_point(|v| *v <= x).saturating_sub(1).min(ln_tau.len() - 2);
            let dd = &sources.late_dd[position];
            let mut y = Vec::with_capacity(ln_tau.len());
            let mut curvature = Vec::with_capacity(ln_tau.len());
            Ok((0..k_size)
                .map(|k| {
                    y.clear();
                    y.extend(table.slice(s![k, type_index, start..]).iter());
                    curvature.clear();
                    curvature.extend(dd.slice(s![type_index, k, ..]).iter());
                    spline_value(ln_tau, &y, &curvature, i, x)
                })
                .collect())
        } else {
            let i = taus.partition_point(|v| *v <= tau).saturating_sub(1).min(n - 2);
            let mut y = [0.0; 2];
            Ok((0..k_size)
                .map(|k| {
                    y[0] = table[[k, type_index, i]];
                    y[1] = table[[k, type_index, i + 1]];
                    linear_value(&taus[i..i + 2], &y, 0, tau)
                })
                .collect())
        }
    }

    fn type_index(&self, mode: Mode, source: SourceType) -> PerturbResult<usize> {
        self.indices(mode)?.index_of(source).ok_or_else(|| {
            PerturbError::Configuration(format!(
                "source {} was not requested for the {} mode",
                source.title(),
                mode
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two wavenumbers, sources a·τ² with a = 1, 2
    fn quadratic_table(tau: Vec<f64>, index_ln_tau_start: usize) -> SourceTable {
        let ln_tau = tau[index_ln_tau_start..].iter().map(|t| t.ln()).collect();
        let sampling = TimeSampling {
            tau: tau.clone(),
            ln_tau,
            index_ln_tau_start,
        };
        let indices = ModeIndices {
            mode: Mode::Scalar,
            initial_conditions: vec![InitialCondition::Adiabatic],
            sources: vec![SourceType::DeltaM],
        };
        let grid = WavenumberGrid {
            mode: Mode::Scalar,
            k: vec![0.01, 0.1],
            k_size_cmb: 0,
            k_size_cl: 0,
        };
        let mut sources = Array3::zeros((2, 1, tau.len()));
        for k in 0..2 {
            for (j, t) in tau.iter().enumerate() {
                sources[[k, 0, j]] = (k as f64 + 1.0) * t * t;
            }
        }
        let table = ModeTable {
            initial_condition: InitialCondition::Adiabatic,
            sources,
            outputs: Vec::new(),
        };
        let modes = vec![ModeSources::new(indices, grid, vec![table], &sampling).unwrap()];
        SourceTable::new(sampling, modes)
    }

    #[test]
    fn test_linear_before_window_and_spline_inside() {
        let tau: Vec<f64> = (1..=60).map(|i| i as f64).collect();
        let table = quadratic_table(tau, 20);

        // linear interpolation of τ² between 2 and 3
        let early = table
            .source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, 2.5)
            .unwrap();
        assert_relative_eq!(early[0], 6.5, epsilon = 1e-12);
        assert_relative_eq!(early[1], 13.0, epsilon = 1e-12);

        let late = table
            .source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, 40.5)
            .unwrap();
        assert_relative_eq!(late[0], 40.5 * 40.5, max_relative = 1e-4);
        assert_relative_eq!(late[1], 2.0 * 40.5 * 40.5, max_relative = 1e-4);
    }

    #[test]
    fn test_samples_are_reproduced() {
        let tau: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let table = quadratic_table(tau, 10);
        for t in [1.0, 10.0, 11.0, 30.0] {
            let values = table
                .source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, t)
                .unwrap();
            assert_relative_eq!(values[0], t * t, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_out_of_range_and_unknown_requests() {
        let table = quadratic_table(vec![1.0, 2.0, 3.0, 4.0], 1);
        let ad = InitialCondition::Adiabatic;
        assert!(table.source_at(Mode::Scalar, ad, SourceType::DeltaM, 0.5).is_err());
        assert!(table.source_at(Mode::Scalar, ad, SourceType::DeltaM, 4.5).is_err());
        assert!(table.source_at(Mode::Scalar, ad, SourceType::T0, 2.0).unwrap_err().is_configuration());
        assert!(table.source_at(Mode::Tensor, InitialCondition::Tensor, SourceType::T2, 2.0).is_err());
        assert!(table
            .source_at(Mode::Scalar, InitialCondition::CdmIsocurvature, SourceType::DeltaM, 2.0)
            .is_err());
    }

    #[test]
    fn test_single_sample_returns_today() {
        let table = quadratic_table(vec![5.0], 0);
        let values = table
            .source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, 1.0)
            .unwrap();
        assert_eq!(values, vec![25.0, 50.0]);
    }

    #[test]
    fn test_late_sources_share_storage() {
        let tau: Vec<f64> = (1..=10).map(|i| i as f64).collect();
        let table = quadratic_table(tau, 6);
        let ad = InitialCondition::Adiabatic;
        let raw = table.raw(Mode::Scalar, ad).unwrap();
        let late = table.late_sources(Mode::Scalar, ad).unwrap();

        assert_eq!(late.dim(), (2, 1, 4));
        assert!(std::ptr::eq(&late[[0, 0, 0]], &raw[[0, 0, 6]]));
        assert!(std::ptr::eq(&late[[1, 0, 3]], &raw[[1, 0, 9]]));
    }

    #[test]
    fn test_time_series_of_one_k() {
        let table = quadratic_table(vec![1.0, 2.0, 3.0], 1);
        let series = table
            .time_series(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, 1)
            .unwrap();
        assert_eq!(series.to_vec(), vec![2.0, 8.0, 18.0]);
        assert!(table
            .time_series(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, 2)
            .is_err());
    }
}
