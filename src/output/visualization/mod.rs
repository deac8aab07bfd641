//! Static plots of computed sources and traces, using the `plotters` library
//!
//! # Organization
//!
//! - **config**: Shared plot configuration (`PlotConfig`)
//! - **curves**: Curves against conformal time (sources at fixed k, traces)
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use perturb_rs::output::visualization::{plot_source_evolution, plot_trace, PlotConfig};
//!
//! plot_source_evolution(&table, Mode::Scalar, InitialCondition::Adiabatic, SourceType::T0, &[10, 60], "t0.png", None)?;
//!
//! let config = PlotConfig::trace("Photon density");
//! for (k, trace) in table.traces(Mode::Scalar, InitialCondition::Adiabatic)? {
//!     plot_trace(trace, &["delta_g", "delta_b"], &format!("trace_{:.3}.svg", k), Some(&config))?;
//! }
//! ```
//!
//! # When to Use Which Function
//!
//! | Use Case | Function |
//! |----------|----------|
//! | One source type, several k | `plot_source_evolution` |
//! | Species of one output k | `plot_trace` |

pub mod config;
pub mod curves;

pub use config::{PlotConfig, NO_TITLE};

pub use curves::{plot_source_evolution, plot_trace};
