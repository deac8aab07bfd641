//! Integration tests: full runs of the perturbation pipeline
//!
//! Each test calls `Perturbations::compute` (or one task through
//! `solve_one`) on the analytic toy cosmology and checks a property of the
//! resulting source table.

use approx::assert_relative_eq;
use ndarray::{s, Array2};

use perturb_rs::config::{Gauge, Precision, Settings};
use perturb_rs::error::PerturbError;
use perturb_rs::grids::{TimeSampling, WavenumberGrid};
use perturb_rs::models::{InitialCondition, Mode, ModeIndices, SourceType};
use perturb_rs::perturbations::Perturbations;
use perturb_rs::physics::{
    Background, BackgroundRecord, InterpolationCursor, Thermodynamics, ThermoRecord, ToyCosmology,
};
use perturb_rs::solver::{evolver_for, solve_one, EvolverType};

mod common;
use common::{cosmology, relative_error, small_cmb_settings, small_matter_settings, task_context};

// =================================================================================================
// Configuration errors
// =================================================================================================

#[test]
fn test_configuration_errors_surface_before_integration() {
    let cosmology = cosmology();

    let vectors = small_cmb_settings().with_gauge(Gauge::Newtonian).with_modes(true, true, false);
    let error = Perturbations::compute(&cosmology, &cosmology, vectors, Precision::fast()).unwrap_err();
    assert!(error.is_configuration(), "{}", error);

    let mut nbody = small_matter_settings().with_gauge(Gauge::Newtonian);
    nbody.has_nbody_gauge_transfers = true;
    let error = Perturbations::compute(&cosmology, &cosmology, nbody, Precision::fast()).unwrap_err();
    assert!(error.is_configuration(), "{}", error);

    let no_neutrinos = ToyCosmology::builder().n_ur(0.0).build().unwrap();
    let mut nid = small_cmb_settings();
    nid.has_nid = true;
    let error = Perturbations::compute(&no_neutrinos, &no_neutrinos, nid, Precision::fast()).unwrap_err();
    assert!(matches!(error, PerturbError::Configuration(_)));
}

// =================================================================================================
// Determinism and storage
// =================================================================================================

#[test]
fn test_repeated_runs_reproduce_the_table() {
    let cosmology = cosmology();
    let first = Perturbations::compute(&cosmology, &cosmology, small_cmb_settings(), Precision::fast()).unwrap();
    let second = Perturbations::compute(&cosmology, &cosmology, small_cmb_settings(), Precision::fast()).unwrap();

    let a = first.raw(Mode::Scalar, InitialCondition::Adiabatic).unwrap();
    let b = second.raw(Mode::Scalar, InitialCondition::Adiabatic).unwrap();
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_relative_eq!(*x, *y, epsilon = 1e-14, max_relative = 1e-12);
    }
}

#[test]
fn test_late_sources_view_the_raw_table() {
    let cosmology = cosmology();
    let settings = small_cmb_settings();
    let perturbations = Perturbations::compute(&cosmology, &cosmology, settings, Precision::fast()).unwrap();

    let start = perturbations.tau_sampling().index_ln_tau_start;
    let raw = perturbations.raw(Mode::Scalar, InitialCondition::Adiabatic).unwrap();
    let late = perturbations.late_sources(Mode::Scalar, InitialCondition::Adiabatic).unwrap();

    assert_eq!(late.dim().2, perturbations.tau_sampling().ln_tau_size());
    assert!(std::ptr::eq(&raw[[0, 0, start]], &late[[0, 0, 0]]));
    assert_eq!(late.slice(s![.., .., 0]), raw.slice(s![.., .., start]));
}

// =================================================================================================
// Scenarios
// =================================================================================================

#[test]
fn test_newtonian_sachs_wolfe_term() {
    let cosmology = cosmology();
    let mut settings = small_cmb_settings().with_gauge(Gauge::Newtonian);
    settings.has_cl_cmb_polarization = false;
    settings.has_density_transfers = true;
    settings.has_metricpotential_transfers = true;
    settings.switch_eisw = 0.0;
    settings.switch_lisw = 0.0;
    settings.switch_dop = 0.0;
    let k = 1e-3;
    settings.k_output_values = vec![k];

    let perturbations = Perturbations::compute(&cosmology, &cosmology, settings, Precision::fast()).unwrap();
    let grid = perturbations.k_grid(Mode::Scalar).unwrap();
    let k_index = grid.index_of(k).unwrap();
    let table = perturbations.table();

    // sample closest to recombination
    let tau_rec = cosmology.summary().tau_rec;
    let taus = &perturbations.tau_sampling().tau;
    let j = taus
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - tau_rec).abs().total_cmp(&(b.1 - tau_rec).abs()))
        .map(|(j, _)| j)
        .unwrap();
    let tau = taus[j];

    let at = |source| table.time_series(Mode::Scalar, InitialCondition::Adiabatic, source, k_index).unwrap()[j];
    let (t0, delta_g, psi) = (at(SourceType::T0), at(SourceType::DeltaG), at(SourceType::Psi));
    let delta_b = at(SourceType::DeltaB);

    let mut cursor = InterpolationCursor::new();
    let mut background = BackgroundRecord::with_ncdm(0);
    cosmology.background_at(tau, &mut cursor, &mut background).unwrap();
    let mut thermo = ThermoRecord::default();
    cosmology
        .thermodynamics_at(background.z(), &mut InterpolationCursor::new(), &mut thermo)
        .unwrap();

    assert_relative_eq!(t0, thermo.g * (delta_g / 4.0 + psi), max_relative = 1e-10);

    // tightly coupled baryons and photons keep the adiabatic entropy δ_b − 3δ_γ/4 at zero
    assert_relative_eq!(delta_b, 0.75 * delta_g, max_relative = 1e-2);

    // super-horizon plateau: δ_γ/4 + ψ sits between the radiation (ψ/2) and matter (ψ/3) values
    let ratio = (delta_g / 4.0 + psi) / psi;
    assert!(ratio > 0.25 && ratio < 0.55, "ratio = {}", ratio);
    assert!(ratio < 0.5 - 0.01, "ratio = {} has not left the radiation value", ratio);
}

#[test]
fn test_k_grid_steps_in_units_of_recombination_time() {
    let cosmology = cosmology();
    let mut settings = Settings::cmb();
    settings.has_pk_matter = true;
    settings.k_max_for_pk = 5.0;
    let precision = Precision::default();
    let grid = WavenumberGrid::build(Mode::Scalar, &cosmology, &cosmology, &settings, &precision).unwrap();

    let summary = cosmology.summary();
    let k_rec = 2.0 * std::f64::consts::PI / summary.rs_rec;
    // Δk τ_rec: phase drift of a mode across one step by recombination
    let step = |i: usize| (grid.k[i + 1] - grid.k[i]) * summary.tau_rec;

    let linear: Vec<f64> = (0..grid.k_size_cmb - 1).map(step).collect();
    let near = grid.k.iter().position(|k| *k >= k_rec).unwrap();
    let super_horizon = step(0);
    let sub_horizon = step(grid.k_size_cmb - 2);
    let logarithmic = step(grid.len() - 2);

    assert!(grid.k_size_cmb <= grid.k_size_cl && grid.k_size_cl <= grid.len());
    assert!(grid.len() > grid.k_size_cl);

    // fine below the sound-horizon scale, coarsening through it, never beyond k_step_sub
    assert!(super_horizon < step(near) && step(near) < sub_horizon);
    let ceiling = precision.k_step_sub * k_rec * summary.tau_rec * (1.0 + 1e-9);
    assert!(linear.iter().all(|s| *s <= ceiling));
    assert!(super_horizon <= precision.k_step_super * k_rec * summary.tau_rec);

    // acoustic oscillations are resolved: a step moves kτ_rec by under half a radian there
    assert!(step(near) < 0.5);
    assert!(logarithmic > 10.0 * sub_horizon);
}

#[test]
fn test_today_only_sampling_returns_that_row() {
    let cosmology = cosmology();
    let perturbations =
        Perturbations::compute(&cosmology, &cosmology, small_matter_settings(), Precision::fast()).unwrap();

    let sampling = perturbations.tau_sampling();
    assert_eq!(sampling.len(), 1);
    assert_eq!(sampling.ln_tau_size(), 1);

    let raw = perturbations.raw(Mode::Scalar, InitialCondition::Adiabatic).unwrap();
    let indices = perturbations.table().indices(Mode::Scalar).unwrap();
    let type_index = indices.index_of(SourceType::DeltaM).unwrap();

    // any τ maps to the single stored row
    for tau in [1.0, sampling.tau_today()] {
        let values = perturbations
            .source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::DeltaM, tau)
            .unwrap();
        for (k_index, value) in values.iter().enumerate() {
            assert_eq!(*value, raw[[k_index, type_index, 0]]);
        }
    }

    // matter grows with k today
    let first = raw[[0, type_index, 0]].abs();
    let last = raw[[raw.dim().0 - 1, type_index, 0]].abs();
    assert!(last > first);
}

// =================================================================================================
// Single tasks
// =================================================================================================

#[test]
fn test_tensor_amplitude_frozen_then_decaying() {
    let cosmology = cosmology();
    let settings = small_cmb_settings().with_modes(false, false, true);
    let precision = Precision::fast();
    let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();
    let indices = ModeIndices::build(Mode::Tensor, &settings, cosmology.content());
    let evolver = evolver_for(precision.evolver);
    let tau0 = cosmology.content().conformal_age;

    let gw_history = |k: f64| {
        let context = task_context(&cosmology, &settings, &precision, Mode::Tensor, InitialCondition::Tensor, k);
        let mut block = Array2::zeros((indices.sources.len(), sampling.len()));
        let output = solve_one(&context, &indices, &sampling, evolver.as_ref(), true, block.view_mut()).unwrap();
        let trace = output.trace.unwrap();
        (trace.column("tau").unwrap(), trace.column("gw").unwrap())
    };

    // outside the horizon (kτ < 0.1) h stays at its initial value
    let k = 1e-5;
    let (taus, gw) = gw_history(k);
    for (tau, h) in taus.iter().zip(&gw) {
        if k * tau < 0.1 {
            assert!(relative_error(*h, 1.0) < 1e-2, "h = {} at tau = {}", h, tau);
        }
    }

    // deep inside it has decayed
    let (taus, gw) = gw_history(0.1);
    assert_relative_eq!(*taus.last().unwrap(), tau0, max_relative = 1e-10);
    assert!(gw.last().unwrap().abs() < 0.05);
}

#[test]
fn test_evolvers_agree_on_one_wavenumber() {
    let cosmology = cosmology();
    let settings = small_cmb_settings();
    let precision = Precision::fast();
    let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision).unwrap();
    let indices = ModeIndices::build(Mode::Scalar, &settings, cosmology.content());
    let context = task_context(&cosmology, &settings, &precision, Mode::Scalar, InitialCondition::Adiabatic, 0.02);

    let run = |evolver: EvolverType| {
        let mut block = Array2::zeros((indices.sources.len(), sampling.len()));
        solve_one(&context, &indices, &sampling, evolver_for(evolver).as_ref(), false, block.view_mut()).unwrap();
        block
    };
    let rosenbrock = run(EvolverType::Rosenbrock);
    let dopri = run(EvolverType::DormandPrince);

    for row in 0..indices.sources.len() {
        let scale = rosenbrock.row(row).iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1e-30);
        for (a, b) in rosenbrock.row(row).iter().zip(dopri.row(row).iter()) {
            assert!((a - b).abs() / scale < 2e-2, "{} differs: {} vs {}", indices.sources[row].title(), a, b);
        }
    }
}
