//! perturb-rs: linear cosmological perturbations and their source functions
//!
//! Integrates the linearised Einstein-Boltzmann equations for every
//! requested (mode, initial condition, wavenumber) and stores the source
//! functions S(k, τ) used downstream by transfer and spectrum codes.
//! Background expansion and recombination history are inputs, behind the
//! [`physics::Background`] and [`physics::Thermodynamics`] traits.
//!
//! # Architecture
//!
//! perturb-rs is built on two core principles:
//!
//! 1. **Separation of Physics and Numerics**
//!    - [`models`] defines the equations: state layouts per regime, metric,
//!      right-hand sides, initial conditions and sources
//!    - [`solver`] advances them: adaptive evolvers, the per-k state machine
//!      and the parallel scheduler
//!
//! 2. **Explicit regimes**
//!    - The approximation regime of a task is a value ([`models::RegimeFlags`])
//!    - The variable layout is computed from it at runtime, and the state is
//!      moved into the new layout at every switch
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use perturb_rs::prelude::*;
//!
//! # fn main() -> Result<(), PerturbError> {
//! // 1. Collaborators: background and thermodynamics
//! let cosmology = ToyCosmology::new()?;
//!
//! // 2. Requests and numerical knobs
//! let settings = Settings::cmb().with_output_k(vec![0.05]);
//! let precision = Precision::default();
//!
//! // 3. Run
//! let perturbations = Perturbations::compute(&cosmology, &cosmology, settings, precision)?;
//!
//! // 4. Access results
//! let tau_today = perturbations.tau_sampling().tau_today();
//! let t0 = perturbations.source_at(Mode::Scalar, InitialCondition::Adiabatic, SourceType::T0, tau_today)?;
//! println!("{} wavenumbers", t0.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Precision parameters and output requests
//! - [`physics`]: Collaborator traits and an analytic toy cosmology
//! - [`grids`]: Conformal-time sampling and wavenumber grids
//! - [`models`]: Perturbation equations (what to solve)
//! - [`solver`]: Integration and scheduling (how to solve)
//! - [`output`]: Source table, interpolation, CSV export and plots
//! - [`perturbations`]: The full pipeline

pub mod error;
pub mod config;
pub mod physics;
pub mod grids;

pub mod models;
pub mod solver;

pub mod output;
pub mod perturbations;

pub mod prelude {
    //! Convenient imports for common usage
    //!
    //! ```rust
    //! use perturb_rs::prelude::*;
    //! ```
    pub use crate::config::{Gauge,
                            Precision,
                            Settings};
    pub use crate::error::{PerturbError,
                           PerturbResult};
    pub use crate::models::{InitialCondition,
                            Mode,
                            SourceType};
    pub use crate::output::SourceTable;
    pub use crate::perturbations::Perturbations;
    pub use crate::physics::{Background,
                             Thermodynamics,
                             ToyCosmology};
    pub use crate::solver::{EvolverType,
                            Trace};
}
