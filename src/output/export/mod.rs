//! Export of computed sources and traces
//!
//! # Architecture
//!
//! The [`Exporter`] trait abstracts the export format. Each format is an
//! independent implementation in its own sub-module.
//!
//! # Available formats
//!
//! | Format  | Module          |
//! |---------|-----------------|
//! | CSV     | [`csv`]         |
//!
//! # Usage example
//!
//! ```rust,ignore
//! use perturb_rs::output::export::{CsvExporter, Exporter};
//!
//! let exporter = CsvExporter::default();
//! exporter.export_sources(&table, Mode::Scalar, InitialCondition::Adiabatic, 0, "k0.csv")?;
//! ```

pub mod csv;

pub use csv::{export_columns_csv, export_sources_csv, export_trace_csv, CsvConfig, CsvExporter, CsvMetadata};

use std::error::Error;

use crate::models::{InitialCondition, Mode};
use crate::output::table::SourceTable;
use crate::solver::Trace;

/// Abstraction trait for all export formats
pub trait Exporter {
    /// Exports every source type of one wavenumber against τ
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the mode, initial condition or `k_index` is not in `table`
    /// - the path is invalid or the directory does not exist
    fn export_sources(
        &self,
        table: &SourceTable,
        mode: Mode,
        initial_condition: InitialCondition,
        k_index: usize,
        path: &str,
    ) -> Result<(), Box<dyn Error>>;

    /// Exports a per-step trace, one column per title
    fn export_trace(&self, trace: &Trace, path: &str) -> Result<(), Box<dyn Error>>;
}
