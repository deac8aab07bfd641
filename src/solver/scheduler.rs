//! Fan-out of the per-k tasks and the late-spline phase
//!
//! Every (mode, initial condition) owns an `Array3` indexed `[k][type][τ]`.
//! Each task receives the `[type][τ]` block of its own k through
//! `axis_iter_mut`, so no two tasks can write the same element and no lock
//! is needed. The caller blocks until every task has returned; the first
//! failure in k order is reported.
//!
//! Once all blocks are filled, the second derivatives of the ln τ splines are
//! computed per source type, again with disjoint output rows.

use log::{debug, info};
use ndarray::{s, Array3, ArrayViewMut2, Axis};

use crate::config::{Precision, Settings};
use crate::error::{PerturbError, PerturbResult};
use crate::grids::{TimeSampling, WavenumberGrid};
use crate::models::{InitialCondition, ModeIndices, TaskContext};
use crate::output::interpolation::{fill_second_derivatives, SplineBoundary};
use crate::physics::{Background, Thermodynamics};
use super::evolve::{solve_one, TaskOutput};
use super::{evolver_for, parallel_threshold, EvolutionReport};

/// Read-only inputs shared by every task of a run
#[derive(Clone, Copy)]
pub struct SharedInputs<'a> {
    pub settings: &'a Settings,
    pub precision: &'a Precision,
    pub background: &'a dyn Background,
    pub thermodynamics: &'a dyn Thermodynamics,
}

/// Sources of one (mode, initial condition) over its whole k grid
#[derive(Debug, Clone)]
pub struct ModeTable {
    pub initial_condition: InitialCondition,
    /// `[k][type][τ]`
    pub sources: Array3<f64>,
    /// One entry per k, in grid order
    pub outputs: Vec<TaskOutput>,
}

impl ModeTable {
    /// Integrator statistics summed over k
    pub fn report(&self) -> EvolutionReport {
        let mut total = EvolutionReport::default();
        for output in &self.outputs {
            total += output.report;
        }
        total
    }
}

/// Integrate every k of `grid` for one (mode, initial condition)
pub fn run_tasks(
    inputs: SharedInputs<'_>,
    indices: &ModeIndices,
    initial_condition: InitialCondition,
    grid: &WavenumberGrid,
    sampling: &TimeSampling,
) -> PerturbResult<ModeTable> {
    let k_size = grid.len();
    let mut sources = Array3::<f64>::zeros((k_size, indices.sources.len(), sampling.len()));
    let evolver = evolver_for(inputs.precision.evolver);

    let traced: Vec<bool> = {
        let mut traced = vec![false; k_size];
        for value in &inputs.settings.k_output_values {
            if let Some(index) = grid.index_of(*value) {
                traced[index] = true;
            }
        }
        traced
    };

    info!(
        "Integrating {} {} task(s) with the {} evolver",
        k_size,
        indices.mode,
        evolver.name()
    );

    // Same kernel for both paths: one task, one disjoint [type][τ] block.
    let run_one = |index: usize, block: ArrayViewMut2<'_, f64>| -> PerturbResult<TaskOutput> {
        let context = TaskContext {
            mode: indices.mode,
            initial_condition,
            k: grid.k[index],
            settings: inputs.settings,
            precision: inputs.precision,
            background: inputs.background,
            thermodynamics: inputs.thermodynamics,
        };
        solve_one(&context, indices, sampling, evolver.as_ref(), traced[index], block)
    };

    // largest k first: they take longest
    let mut blocks: Vec<(usize, ArrayViewMut2<'_, f64>)> = sources.axis_iter_mut(Axis(0)).enumerate().collect();
    blocks.reverse();

    let mut results: Vec<(usize, PerturbResult<TaskOutput>)> = if k_size > parallel_threshold() {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            let fan_out = |blocks: Vec<(usize, ArrayViewMut2<'_, f64>)>| {
                blocks
                    .into_par_iter()
                    .map(|(index, block)| (index, run_one(index, block)))
                    .collect::<Vec<_>>()
            };

            match inputs.settings.threads {
                Some(threads) => {
                    let pool = rayon::ThreadPoolBuilder::new()
                        .num_threads(threads)
                        .build()
                        .map_err(|e| PerturbError::Configuration(format!("cannot build thread pool: {}", e)))?;
                    pool.install(|| fan_out(blocks))
                }
                None => fan_out(blocks),
            }
        }
        #[cfg(not(feature = "parallel"))]
        {
            blocks
                .into_iter()
                .map(|(index, block)| (index, run_one(index, block)))
                .collect()
        }
    } else {
        blocks
            .into_iter()
            .map(|(index, block)| (index, run_one(index, block)))
            .collect()
    };

    // join barrier: report the first failure in k order
    results.sort_by_key(|(index, _)| *index);
    let outputs = results
        .into_iter()
        .map(|(_, result)| result)
        .collect::<PerturbResult<Vec<_>>>()?;

    let table = ModeTable {
        initial_condition,
        sources,
        outputs,
    };
    let report = table.report();
    debug!(
        "{} mode, {} initial condition: {} accepted steps, {} rejected, {} evaluations",
        indices.mode,
        initial_condition,
        report.accepted,
        report.rejected,
        report.evaluations
    );

    Ok(table)
}

/// Second derivatives in ln τ of the late sources, `[type][k][ln τ]`
///
/// Empty along the last axis when the ln τ window has a single sample.
pub fn build_late_splines(table: &ModeTable, sampling: &TimeSampling) -> PerturbResult<Array3<f64>> {
    let (k_size, type_size, _) = table.sources.dim();
    let ln_tau_size = sampling.ln_tau_size();
    let start = sampling.index_ln_tau_start;

    if ln_tau_size < 2 {
        return Ok(Array3::zeros((type_size, k_size, 0)));
    }

    let mut dd = Array3::<f64>::zeros((type_size, k_size, ln_tau_size));

    let fill_type = |type_index: usize, mut rows: ArrayViewMut2<'_, f64>| -> PerturbResult<()> {
        let mut y = Vec::with_capacity(ln_tau_size);
        let mut out = vec![0.0; ln_tau_size];
        let mut scratch = Vec::new();
        for (k_index, mut row) in rows.axis_iter_mut(Axis(0)).enumerate() {
            y.clear();
            y.extend(table.sources.slice(s![k_index, type_index, start..]).iter());
            fill_second_derivatives(
                &sampling.ln_tau,
                &y,
                SplineBoundary::EstimatedDerivatives,
                &mut out,
                &mut scratch,
            )?;
            for (slot, value) in row.iter_mut().zip(&out) {
                *slot = *value;
            }
        }
        Ok(())
    };

    let rows: Vec<(usize, ArrayViewMut2<'_, f64>)> = dd.axis_iter_mut(Axis(0)).enumerate().collect();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        rows.into_par_iter()
            .map(|(type_index, block)| fill_type(type_index, block))
            .collect::<PerturbResult<Vec<()>>>()?;
    }
    #[cfg(not(feature = "parallel"))]
    {
        for (type_index, block) in rows {
            fill_type(type_index, block)?;
        }
    }

    Ok(dd)
}
