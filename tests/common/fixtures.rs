//! Cosmologies and settings shared by the integration tests
//!
//! The settings keep the k grids short (low ℓ_max, low k_max) so that full
//! runs stay fast in debug builds.

use perturb_rs::config::{Precision, Settings};
use perturb_rs::models::{InitialCondition, Mode, TaskContext};
use perturb_rs::physics::ToyCosmology;

/// Flat ΛCDM with photons, baryons, CDM and massless neutrinos
pub fn cosmology() -> ToyCosmology {
    ToyCosmology::new().expect("default toy cosmology")
}

/// Temperature and polarization up to ℓ = 30
pub fn small_cmb_settings() -> Settings {
    let mut settings = Settings::cmb();
    settings.l_scalar_max = 30;
    settings.l_tensor_max = 30;
    settings
}

/// Matter density transfers up to k = 0.1 Mpc^-1, today only
pub fn small_matter_settings() -> Settings {
    let mut settings = Settings::matter();
    settings.k_max_for_pk = 0.1;
    settings
}

/// Context of one scalar task
pub fn task_context<'a>(
    cosmology: &'a ToyCosmology,
    settings: &'a Settings,
    precision: &'a Precision,
    mode: Mode,
    initial_condition: InitialCondition,
    k: f64,
) -> TaskContext<'a> {
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
