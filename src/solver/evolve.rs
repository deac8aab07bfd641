//! Integration of one (mode, initial condition, k) task
//!
//! [`solve_one`] runs the whole life of a wavenumber:
//!
//! 1. bisect for the starting time τ_ini, the latest time at which the mode is
//!    still outside the horizon and the photons still tightly coupled
//! 2. cut [τ_ini, τ₀] into intervals of constant regime
//! 3. seed the state on the first interval, reseed it at every switch
//! 4. integrate each interval, evaluating the sources at every sampling time
//!    it contains
//! 5. zero-fill sampling times that were never reached
//!
//! The task owns its [`Workspace`] and writes only the `[type][τ]` block it
//! is handed, so tasks never share mutable data.

use log::{debug, trace};
use ndarray::ArrayViewMut2;

use crate::error::{PerturbError, PerturbResult};
use crate::grids::TimeSampling;
use crate::models::{
    compute_sources,
    derivatives,
    find_regime_intervals,
    initial_conditions,
    reseed,
    solve_metric,
    timescale,
    trace_row,
    trace_titles,
    LayoutDescriptor,
    ModeIndices,
    RegimeClassifier,
    RegimeInterval,
    ReseedInputs,
    StateLayout,
    StateVector,
    TaskContext,
    Workspace,
};
use super::{validate_state, EvolutionReport, Evolver, EvolverConfig, OdeSystem};

/// Per-step time series of one task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub titles: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, if the title exists
    pub fn column(&self, title: &str) -> Option<Vec<f64>> {
        let index = self.titles.iter().position(|t| t == title)?;
        Some(self.rows.iter().map(|row| row[index]).collect())
    }
}

/// What one task reports besides the sources it wrote
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub k: f64,
    pub tau_ini: f64,
    pub intervals: Vec<RegimeInterval>,
    pub report: EvolutionReport,
    /// Number of sampling times zero-filled because they were not integrated
    pub zero_filled: usize,
    pub trace: Option<Trace>,
}

/// Right-hand side, time scale and source sampling of one regime interval
struct PerturbationSystem<'a, 'c> {
    context: &'a TaskContext<'c>,
    workspace: &'a mut Workspace,
    layout: &'a StateLayout,
    indices: &'a ModeIndices,
    used: &'a [bool],
    sources: ArrayViewMut2<'a, f64>,
    visited: &'a mut [bool],
    trace: Option<&'a mut Trace>,
    scratch: Vec<f64>,
    values: Vec<f64>,
}

impl OdeSystem for PerturbationSystem<'_, '_> {
    fn dimension(&self) -> usize {
        self.layout.size()
    }

    fn derivatives(&mut self, t: f64, y: &[f64], dy: &mut [f64]) -> PerturbResult<()> {
        derivatives(self.context, self.workspace, self.layout, t, y, dy)
    }

    fn timescale(&mut self, t: f64, _y: &[f64]) -> PerturbResult<f64> {
        timescale(self.context, self.workspace, t)
    }

    fn used_in_sources(&self) -> &[bool] {
        self.used
    }

    fn sample(&mut self, index: usize, t: f64, y: &[f64]) -> PerturbResult<()> {
        compute_sources(
            self.context,
            self.workspace,
            self.layout,
            self.indices,
            t,
            y,
            &mut self.scratch,
            &mut self.values,
        )?;
        for (slot, value) in self.sources.column_mut(index).iter_mut().zip(&self.values) {
            *slot = *value;
        }
        self.visited[index] = true;
        Ok(())
    }

    fn accepted_step(&mut self, t: f64, y: &[f64]) -> PerturbResult<()> {
        if let Some(trace) = self.trace.as_deref_mut() {
            let row = trace_row(self.context, self.workspace, self.layout, t, y)?;
            trace.rows.push(row);
        }
        Ok(())
    }
}

/// Integrate one task and fill its `[type][τ]` block of the source table
///
/// Errors are wrapped with the task identity.
pub fn solve_one(
    context: &TaskContext<'_>,
    indices: &ModeIndices,
    sampling: &TimeSampling,
    evolver: &dyn Evolver,
    record_trace: bool,
    sources: ArrayViewMut2<'_, f64>,
) -> PerturbResult<TaskOutput> {
    solve_task(context, indices, sampling, evolver, record_trace, sources).map_err(|error| {
        error.in_task(
            context.mode.name(),
            context.initial_condition.short_name(),
            context.k,
        )
    })
}

fn solve_task(
    context: &TaskContext<'_>,
    indices: &ModeIndices,
    sampling: &TimeSampling,
    evolver: &dyn Evolver,
    record_trace: bool,
    mut sources: ArrayViewMut2<'_, f64>,
) -> PerturbResult<TaskOutput> {
    let precision = context.precision;
    let content = context.content();
    let k = context.k;

    if sources.dim() != (indices.sources.len(), sampling.len()) {
        return Err(PerturbError::Numerical(format!(
            "source block has shape {:?}, expected ({}, {})",
            sources.dim(),
            indices.sources.len(),
            sampling.len()
        )));
    }

    let mut workspace = Workspace::new(context);
    let tau_end = sampling.tau_today();
    let tau_ini = start_time(context, &mut workspace, sampling.tau[0])?;

    let summary = *context.thermodynamics.summary();
    let classifier = RegimeClassifier::new(context.mode, precision, content, summary);
    let intervals = find_regime_intervals(tau_ini, tau_end, precision.tol_tau_approx, |tau| {
        workspace.refresh(context, tau)?;
        Ok(classifier.classify(k, tau, &workspace.background, &workspace.thermo))
    })?;

    debug!(
        "k = {:.4e}: tau_ini = {:.4e}, {} regime interval(s)",
        k,
        tau_ini,
        intervals.len()
    );

    let config = EvolverConfig::from_precision(precision);
    let q_sizes = context.ncdm_q_sizes();
    let mut visited = vec![false; sampling.len()];
    let mut report = EvolutionReport::default();
    let mut trace = record_trace.then(|| Trace {
        titles: trace_titles(context),
        rows: Vec::new(),
    });

    for (position, interval) in intervals.iter().enumerate() {
        let descriptor = LayoutDescriptor::for_regime(
            context.mode,
            &interval.flags,
            context.gauge(),
            content,
            precision,
            &q_sizes,
        );
        let layout = StateLayout::build(&descriptor);

        let state = if position == 0 {
            workspace.flags = interval.flags;
            workspace.refresh(context, interval.tau_start)?;
            initial_conditions(context, &workspace, layout, interval.tau_start)?
        } else {
            // closures of the old regime, evaluated with the old state at the switch
            let old = workspace.take_state()?;
            workspace.refresh(context, interval.tau_start)?;
            solve_metric(context, &mut workspace, &old.layout, &old.y)?;

            let dkappa = workspace.thermo.dkappa;
            let inputs = ReseedInputs {
                k,
                a: workspace.background.a,
                tau_c: if dkappa > 0.0 { 1.0 / dkappa } else { 0.0 },
                s_l: &workspace.s_l,
                tca_shear_g: workspace.metric.tca_shear_g,
                tca_shear_idr: workspace.metric.tca_shear_idr,
                ncdm: context.ncdm(),
                ncdm_rescaling: &workspace.ncdm_rescaling,
            };
            let state = reseed(&old, layout, &inputs)?;
            trace!(
                "k = {:.4e}: switch at tau = {:.6e}, {} -> {} ({} -> {} variables)",
                k,
                interval.tau_start,
                workspace.flags,
                interval.flags,
                old.size(),
                state.size()
            );
            workspace.flags = interval.flags;
            state
        };

        let first = position == 0;
        let samples: Vec<(usize, f64)> = sampling
            .tau
            .iter()
            .enumerate()
            .filter(|&(_, &tau)| {
                (tau > interval.tau_start || (first && tau == interval.tau_start)) && tau <= interval.tau_end
            })
            .map(|(index, &tau)| (index, tau))
            .collect();

        let StateVector {
            layout,
            mut y,
            dy,
            used_in_sources,
        } = state;

        let interval_report = {
            let mut system = PerturbationSystem {
                context,
                workspace: &mut workspace,
                layout: &layout,
                indices,
                used: &used_in_sources,
                sources: sources.view_mut(),
                visited: &mut visited,
                trace: trace.as_mut(),
                scratch: vec![0.0; layout.size()],
                values: vec![0.0; indices.sources.len()],
            };
            evolver.evolve(
                &mut system,
                interval.tau_start,
                interval.tau_end,
                &mut y,
                &samples,
                &config,
            )?
        };
        validate_state(&y, interval.tau_end, "the perturbation state")?;

        debug!(
            "k = {:.4e}: interval {} [{:.4e}, {:.4e}] with {}: {} steps ({} rejected), {} samples",
            k,
            position,
            interval.tau_start,
            interval.tau_end,
            interval.flags,
            interval_report.accepted,
            interval_report.rejected,
            interval_report.samples
        );
        report += interval_report;

        workspace.install(StateVector {
            layout,
            y,
            dy,
            used_in_sources,
        });
    }

    let mut zero_filled = 0;
    for (index, seen) in visited.iter().enumerate() {
        if !seen {
            sources.column_mut(index).fill(0.0);
            zero_filled += 1;
        }
    }

    Ok(TaskOutput {
        k,
        tau_ini,
        intervals,
        report,
        zero_filled,
        trace,
    })
}

/// Latest time at which the mode is super-horizon and tightly coupled
///
/// Bisects between the first tabulated time and the first sampling time.
/// The result stays strictly below the first sampling time.
pub(crate) fn start_time(context: &TaskContext<'_>, workspace: &mut Workspace, tau_first_sample: f64) -> PerturbResult<f64> {
    let precision = context.precision;
    let tau_lower_bound = context.thermodynamics.summary().tau_ini;

    let mut early_enough = |tau: f64| -> PerturbResult<bool> {
        workspace.refresh(context, tau)?;
        let tau_h = 1.0 / workspace.background.a_prime_over_a();
        let tau_k = 1.0 / context.k;
        let dkappa = workspace.thermo.dkappa;
        let tau_c = if dkappa > 0.0 { 1.0 / dkappa } else { f64::INFINITY };
        Ok(tau_c / tau_h < precision.start_small_k_at_tau_c_over_tau_h
            && tau_h / tau_k < precision.start_large_k_at_tau_h_over_tau_k)
    };

    let mut lower = tau_lower_bound;
    let mut upper = 0.99 * tau_first_sample;
    if !(upper > lower) {
        return Err(PerturbError::Precision(format!(
            "first sampling time {:e} precedes the earliest tabulated time {:e}",
            tau_first_sample, tau_lower_bound
        )));
    }

    if !early_enough(lower)? {
        return Err(PerturbError::Precision(format!(
            "k = {:e} is already inside the horizon or decoupled at the earliest tabulated time {:e}; \
             extend the background and thermodynamics tables to earlier times",
            context.k, lower
        )));
    }
    if early_enough(upper)? {
        return Ok(upper);
    }

    while (upper - lower) / lower > precision.tol_tau_approx {
        let mid = 0.5 * (lower + upper);
        if mid <= lower || mid >= upper {
            break;
        }
        if early_enough(mid)? {
            lower = mid;
        } else {
            upper = mid;
        }
    }

    Ok(lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Precision, Settings};
    use crate::models::{InitialCondition, Mode};
    use crate::physics::{Background, ToyCosmology};
    use crate::solver::{evolver_for, Rosenbrock};
    use ndarray::Array2;

    fn context<'a>(
        cosmology: &'a ToyCosmology,
        settings: &'a Settings,
        precision: &'a Precision,
        mode: Mode,
        k: f64,
    ) -> TaskContext<'a> {
        let initial_condition = match mode {
            Mode::Scalar => InitialCondition::Adiabatic,
            Mode::Vector => InitialCondition::Vector,
            Mode::Tensor => InitialCondition::Tensor,
        };
        TaskContext {
            mode,
            initial_condition,
            k,
            settings,
            precision,
            background: cosmology,
            thermodynamics: cosmology,
        }
    }

    #[test]
    fn test_start_time_conditions() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::fast();
        let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();

        for k in [1e-4, 1e-2, 0.2] {
            let context = context(&cosmology, &settings, &precision, Mode::Scalar, k);
            let mut workspace = Workspace::new(&context);
            let tau_ini = start_time(&context, &mut workspace, sampling.tau[0]).unwrap();
            assert!(tau_ini < sampling.tau[0]);

            workspace.refresh(&context, tau_ini).unwrap();
            let tau_h = 1.0 / workspace.background.a_prime_over_a();
            assert!(tau_h * k <= precision.start_large_k_at_tau_h_over_tau_k * (1.0 + 1e-6));
        }
    }

    #[test]
    fn test_start_time_with_tolerance_below_float_resolution() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let mut precision = Precision::fast();
        let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();
        precision.tol_tau_approx = 1e-20;

        let context = context(&cosmology, &settings, &precision, Mode::Scalar, 0.05);
        let mut workspace = Workspace::new(&context);
        let tau_ini = start_time(&context, &mut workspace, sampling.tau[0]).unwrap();
        assert!(tau_ini > 0.0 && tau_ini < sampling.tau[0]);
    }

    #[test]
    fn test_larger_k_starts_earlier() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::fast();
        let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();

        let start = |k: f64| {
            let context = context(&cosmology, &settings, &precision, Mode::Scalar, k);
            let mut workspace = Workspace::new(&context);
            start_time(&context, &mut workspace, sampling.tau[0]).unwrap()
        };
        assert!(start(0.5) < start(0.05));
    }

    #[test]
    fn test_scalar_task_fills_its_block() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::fast();
        let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();
        let indices = ModeIndices::build(Mode::Scalar, &settings, cosmology.content());
        let context = context(&cosmology, &settings, &precision, Mode::Scalar, 0.01);

        let mut block = Array2::from_elem((indices.sources.len(), sampling.len()), f64::NAN);
        let output = solve_one(&context, &indices, &sampling, &Rosenbrock::new(), true, block.view_mut()).unwrap();

        assert!(block.iter().all(|v| v.is_finite()));
        assert_eq!(output.zero_filled, 0);
        assert_eq!(output.report.samples, sampling.len());
        assert!(output.intervals.len() >= 2);

        let trace = output.trace.unwrap();
        assert_eq!(trace.rows.len(), output.report.accepted);
        assert!(trace.rows.iter().all(|row| row.len() == trace.titles.len()));

        assert!(block.iter().any(|v| v.abs() > 0.0));
    }

    #[test]
    fn test_tensor_task_runs() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb().with_modes(false, false, true);
        let precision = Precision::fast();
        let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();
        let indices = ModeIndices::build(Mode::Tensor, &settings, cosmology.content());
        let context = context(&cosmology, &settings, &precision, Mode::Tensor, 0.005);
        let evolver = evolver_for(precision.evolver);

        let mut block = Array2::zeros((indices.sources.len(), sampling.len()));
        let output = solve_one(&context, &indices, &sampling, evolver.as_ref(), false, block.view_mut()).unwrap();
        assert!(output.trace.is_none());
        assert!(block.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_wrong_block_shape_is_reported_with_task() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb();
        let precision = Precision::fast();
        let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();
        let indices = ModeIndices::build(Mode::Scalar, &settings, cosmology.content());
        let context = context(&cosmology, &settings, &precision, Mode::Scalar, 0.01);

        let mut block = Array2::zeros((1, 1));
        let error = solve_one(&context, &indices, &sampling, &Rosenbrock::new(), false, block.view_mut()).unwrap_err();
        assert!(matches!(error, PerturbError::Task { .. }));
        assert!(matches!(error.root(), PerturbError::Numerical(_)));
        assert!(error.to_string().contains("scalar mode"));
    }

    #[test]
    fn test_trace_column_lookup() {
        let trace = Trace {
            titles: vec!["tau".into(), "a".into()],
            rows: vec![vec![1.0, 0.1], vec![2.0, 0.2]],
        };
        assert_eq!(trace.column("a"), Some(vec![0.1, 0.2]));
        assert_eq!(trace.column("missing"), None);
        assert_eq!(trace.len(), 2);
    }
}
