//! Collaborators of the perturbation core
//!
//! The perturbation equations need the expansion history and the thermal
//! history of the universe, but they never compute either. This module holds
//! the narrow interfaces through which they are queried.
//!
//! # Core Concepts
//!
//! - **Background**: a(τ), H(τ), H'(τ) and every species density/pressure
//! - **Thermodynamics**: opacity, visibility, baryon sound speed, dark-sector
//!   interaction rates as functions of redshift
//! - **Momentum quadrature**: momentum nodes, weights and d ln f₀/d ln q of
//!   the non-cold species
//!
//! # Architecture
//!
//! Physics collaborators are **separate from the perturbation core**:
//! - The collaborator provides **tabulated history** (background, recombination)
//! - The core provides the **linear evolution** on top of it
//!
//! Any pair of types implementing [`Background`] and [`Thermodynamics`] can be
//! plugged in; [`ToyCosmology`] is an analytic implementation of both used by
//! the tests, benches and demos.
//!
//! # Example
//!
//! ```rust
//! use perturb_rs::physics::{Background, BackgroundRecord, InterpolationCursor, ToyCosmology};
//!
//! let cosmology = ToyCosmology::new().unwrap();
//! let mut cursor = InterpolationCursor::new();
//! let mut record = BackgroundRecord::default();
//!
//! let tau_rec = cosmology.background_tau_of_z(1100.0).unwrap();
//! cosmology.background_at(tau_rec, &mut cursor, &mut record).unwrap();
//! assert!((record.z() - 1100.0).abs() < 0.1);
//! ```

pub mod traits;
pub mod quadrature;
pub mod analytic;

pub use analytic::{ToyCosmology, ToyCosmologyBuilder};
pub use quadrature::{MomentumQuadrature, NcdmSpecies, PerturbedMoments, QuadratureSpecies};
pub use traits::{
    Background,
    BackgroundRecord,
    FluidEos,
    InterpolationCursor,
    RecombinationSummary,
    SpeciesContent,
    ThermoRecord,
    Thermodynamics,
};
