//! Example: Source functions of a toy ΛCDM cosmology
//!
//! Computes the scalar adiabatic sources for CMB temperature and
//! polarization, then:
//!
//! - compares the two evolvers on a single wavenumber
//! - exports S(k, τ) of one k and the full trace of another to CSV
//! - plots the temperature source at three scales and the fluid densities
//!
//! **Cosmology** (analytic toy background and recombination):
//! - h = 0.6736, ω_b = 0.02237, ω_cdm = 0.12
//! - N_ur = 3.044 massless neutrinos
//! - flat, Λ fills the rest
//! - recombination at z = 1090, reionization at z = 7.67

use perturb_rs::{
    config::{Precision,
             Settings},
    grids::TimeSampling,
    models::{InitialCondition,
             Mode,
             ModeIndices,
             SourceType,
             TaskContext},
    output::{export_sources_csv,
             export_trace_csv,
             plot_source_evolution,
             plot_trace,
             CsvConfig,
             CsvMetadata},
    perturbations::Perturbations,
    physics::{Background,
              ToyCosmology},
    solver::{evolver_for,
             solve_one,
             EvolverType},
};

use ndarray::Array2;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {

    println!("═══════════════════════════════════════════════════════");
    println!("  Source functions: scalar adiabatic modes");
    println!("═══════════════════════════════════════════════════════\n");

    let cosmology = ToyCosmology::new()?;
    let content = cosmology.content();
    println!("Cosmology:");
    println!("  conformal age : {:.1} Mpc", content.conformal_age);
    println!("  h             : {}", content.h);
    println!("  neutrinos     : {}", if content.has_ur { "massless" } else { "none" });
    println!("  N_ncdm        : {}\n", content.n_ncdm);

    // ====== One wavenumber, both evolvers ======

    let k_single = 0.05;
    let settings = Settings::cmb();
    let precision = Precision::default();
    let sampling = TimeSampling::build(&cosmology, &cosmology, &settings, &precision)?;
    let indices = ModeIndices::build(Mode::Scalar, &settings, content);
    let context = TaskContext {
        mode: Mode::Scalar,
        initial_condition: InitialCondition::Adiabatic,
        k: k_single,
        settings: &settings,
        precision: &precision,
        background: &cosmology,
        thermodynamics: &cosmology,
    };

    println!("Single task at k = {} Mpc^-1:", k_single);
    for evolver in [EvolverType::Rosenbrock, EvolverType::DormandPrince] {
        let mut block = Array2::zeros((indices.sources.len(), sampling.len()));
        let start = Instant::now();
        let output = solve_one(&context, &indices, &sampling, evolver_for(evolver).as_ref(), false, block.view_mut())?;
        println!(
            "  {:<15} {:>8.1} ms  {:>6} accepted  {:>5} rejected  {:>7} evaluations",
            evolver.name(),
            start.elapsed().as_secs_f64() * 1e3,
            output.report.accepted,
            output.report.rejected,
            output.report.evaluations
        );
    }

    // ====== Full run ======

    let k_trace = 0.01;
    let settings = settings.with_output_k(vec![k_trace]);

    println!("\nFull run...");
    let start = Instant::now();
    let perturbations = Perturbations::compute(&cosmology, &cosmology, settings, precision)?;
    let grid = perturbations.k_grid(Mode::Scalar)?;
    let report = perturbations.report();
    println!("  time        : {:.2} s", start.elapsed().as_secs_f64());
    println!("  wavenumbers : {} in [{:.2e}, {:.2e}] Mpc^-1", grid.len(), grid.k_min(), grid.k_max());
    println!("  τ samples   : {}", perturbations.tau_sampling().len());
    println!("  steps       : {} accepted, {} rejected\n", report.accepted, report.rejected);

    // ====== Export ======

    let out_dir = std::env::temp_dir().join("perturb_rs_demo");
    std::fs::create_dir_all(&out_dir)?;

    let table = perturbations.table();
    let k_middle = grid.len() / 2;
    let sources_path = out_dir.join("sources.csv");
    let metadata = CsvMetadata::for_task("scalar", "ad", grid.k[k_middle]).with_evolver("rosenbrock");
    export_sources_csv(
        table,
        Mode::Scalar,
        InitialCondition::Adiabatic,
        k_middle,
        path_str(&sources_path)?,
        Some(&CsvConfig::default().with_metadata(metadata)),
    )?;

    let traces = perturbations.traces(Mode::Scalar, InitialCondition::Adiabatic)?;
    let trace_path = out_dir.join("trace.csv");
    if let Some((k, trace)) = traces.first() {
        let metadata = CsvMetadata::for_task("scalar", "ad", *k);
        export_trace_csv(trace, path_str(&trace_path)?, Some(&CsvConfig::high_precision().with_metadata(metadata)))?;
    }

    // ====== Plots ======

    let t0_path = out_dir.join("t0.png");
    plot_source_evolution(
        table,
        Mode::Scalar,
        InitialCondition::Adiabatic,
        SourceType::T0,
        &[0, k_middle, grid.len() - 1],
        path_str(&t0_path)?,
        None,
    )?;

    let densities_path = out_dir.join("densities.svg");
    if let Some((_, trace)) = traces.first() {
        plot_trace(trace, &["delta_g", "delta_b", "delta_cdm"], path_str(&densities_path)?, None)?;
    }

    println!("Files written to {}:", out_dir.display());
    for path in [&sources_path, &trace_path, &t0_path, &densities_path] {
        println!("  {}", path.display());
    }

    Ok(())
}

fn path_str(path: &std::path::Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.to_str().ok_or_else(|| format!("non UTF-8 path: {}", path.display()).into())
}
