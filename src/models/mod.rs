//! Linear perturbation equations
//!
//! Everything that defines *what* is integrated for one (mode, initial
//! condition, k) task. The solver module decides *how*.
//!
//! # Building blocks
//!
//! ## [`indices`]: modes, initial conditions and source types
//!
//! Which tasks exist and which rows of the source table they fill.
//!
//! ## [`approximations`] and [`switches`]: regimes
//!
//! Tight coupling, radiation streaming and the fluid approximations each
//! remove part of the hierarchy. [`RegimeClassifier`] decides which are active
//! at a given (k, τ); [`find_regime_intervals`] cuts the integration range into
//! intervals of constant regime.
//!
//! ## [`layout`]: the state vector
//!
//! Maps the integrated variables of one regime onto offsets, and rebuilds the
//! state when the regime changes.
//!
//! ## Equations
//!
//! - [`initial`]: super-horizon initial conditions
//! - [`metric`]: Einstein constraints and closures of approximated species
//! - [`derivatives`]: Boltzmann and fluid equations
//! - [`sources`]: source functions and per-step trace rows

// =================================================================================================
// Module Declarations
// =================================================================================================

pub mod indices;
pub mod approximations;
pub mod switches;
pub mod layout;
pub mod workspace;
pub mod metric;
pub mod initial;
pub mod derivatives;
pub mod sources;

// =================================================================================================
// Public Re-exports
// =================================================================================================

pub use approximations::{Approximation, RegimeClassifier, RegimeFlags};
pub use derivatives::{derivatives, timescale};
pub use indices::{InitialCondition, Mode, ModeIndices, SourceType};
pub use initial::initial_conditions;
pub use layout::{reseed, Field, LayoutDescriptor, ReseedInputs, StateLayout, StateVector};
pub use metric::{solve_metric, MetricSolution};
pub use sources::{compute_sources, trace_row, trace_titles};
pub use switches::{count_transitions, find_regime_intervals, RegimeInterval};
pub use workspace::{TaskContext, Workspace};
