//! Storage and output of computed sources
//!
//! - **table**: The source table and its queries (raw, late view, S(k, τ))
//! - **interpolation**: Cubic and linear interpolation on sampled data
//! - **visualization**: PNG/SVG plots using plotters
//! - **export**: CSV export for external analysis
//!
//! # Architecture
//!
//! ```text
//! output/
//! ├── mod.rs              ← This file
//! ├── table.rs            ← SourceTable, ModeSources
//! ├── interpolation.rs    ← splines
//! ├── visualization/      ← Plots
//! │   ├── config.rs
//! │   └── curves.rs
//! └── export/             ← Data export
//!     └── csv.rs
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use perturb_rs::output::{export_sources_csv, plot_source_evolution};
//!
//! export_sources_csv(&table, Mode::Scalar, InitialCondition::Adiabatic, 3, "k3.csv", None)?;
//! plot_source_evolution(&table, Mode::Scalar, InitialCondition::Adiabatic, SourceType::T0, &[3], "k3.png", None)?;
//! ```

pub mod table;
pub mod interpolation;
pub mod visualization;
pub mod export;

pub use table::{ModeSources, SourceTable};

pub use visualization::{plot_source_evolution, plot_trace, PlotConfig};

pub use export::{export_sources_csv, export_trace_csv, CsvConfig, CsvMetadata};
