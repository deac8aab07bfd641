//! CSV export of source functions and diagnostic traces
//!
//! Files are plain delimited text readable by pandas, numpy or a spreadsheet.
//! Values are written in scientific notation since sources span many
//! decades over the sampling.
//!
//! # Quick Examples
//!
//! ## Sources of one wavenumber
//!
//! ```rust,ignore
//! use perturb_rs::output::export::export_sources_csv;
//!
//! export_sources_csv(&table, Mode::Scalar, InitialCondition::Adiabatic, 12, "k12.csv", None)?;
//! ```
//!
//! **Output** (`k12.csv`):
//! ```csv
//! tau,t0,t1,t2,p
//! 2.741000e2,1.203311e-3,...
//! ```
//!
//! ## With Metadata
//!
//! ```rust,ignore
//! use perturb_rs::output::export::{export_trace_csv, CsvConfig, CsvMetadata};
//!
//! let metadata = CsvMetadata::for_task("scalar", "ad", 0.05).with_gauge("synchronous");
//! let config = CsvConfig::default().with_metadata(metadata);
//! export_trace_csv(trace, "trace.csv", Some(&config))?;
//! ```
//!
//! **Output** (`trace.csv`):
//! ```csv
//! # Perturbation Data
//! # Generated: 2026-10-19T10:30:00+00:00
//! # Mode: scalar
//! # Initial condition: ad
//! # k: 5.000000e-2 Mpc^-1
//! # Gauge: synchronous
//! #
//! tau,a,delta_g,...
//! ```

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::models::{InitialCondition, Mode};
use crate::output::table::SourceTable;
use crate::solver::Trace;
use super::Exporter;

// =============================================================================
// Configuration Structures
// =============================================================================

/// Configuration for CSV export
///
/// # Example
///
/// ```rust,ignore
/// let config = CsvConfig {
///     delimiter: ';',
///     precision: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Column delimiter (default: ',')
    pub delimiter: char,

    /// Digits after the decimal point of the mantissa (default: 6)
    pub precision: usize,

    /// Include metadata header comments (default: false)
    pub include_metadata: bool,

    /// Metadata to include in header
    pub metadata: Option<CsvMetadata>,

    /// Header of the time column of source files (default: "tau")
    pub time_header: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            precision: 6,
            include_metadata: false,
            metadata: None,
            time_header: "tau".to_string(),
        }
    }
}

impl CsvConfig {
    /// Create config with high precision (12 digits)
    pub fn high_precision() -> Self {
        Self {
            precision: 12,
            ..Default::default()
        }
    }

    /// Builder pattern: set delimiter
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Builder pattern: set precision
    pub fn precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Builder pattern: enable metadata
    pub fn with_metadata(mut self, metadata: CsvMetadata) -> Self {
        self.include_metadata = true;
        self.metadata = Some(metadata);
        self
    }
}

/// Metadata for CSV header comments
///
/// Only the fields that are set are written.
#[derive(Debug, Clone, Default)]
pub struct CsvMetadata {
    pub mode: Option<String>,
    pub initial_condition: Option<String>,
    /// Wavenumber (Mpc^-1)
    pub k: Option<f64>,
    pub gauge: Option<String>,
    pub evolver: Option<String>,
    /// Additional custom parameters
    pub custom: Vec<(String, String)>,
}

impl CsvMetadata {
    /// Metadata naming one (mode, initial condition, k) task
    pub fn for_task(mode: &str, initial_condition: &str, k: f64) -> Self {
        Self {
            mode: Some(mode.to_string()),
            initial_condition: Some(initial_condition.to_string()),
            k: Some(k),
            ..Default::default()
        }
    }

    pub fn with_gauge(mut self, gauge: &str) -> Self {
        self.gauge = Some(gauge.to_string());
        self
    }

    pub fn with_evolver(mut self, evolver: &str) -> Self {
        self.evolver = Some(evolver.to_string());
        self
    }

    /// Add custom parameter
    pub fn add_custom(&mut self, key: String, value: String) {
        self.custom.push((key, value));
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn write_metadata_header<W: Write>(out: &mut W, metadata: &CsvMetadata) -> Result<(), Box<dyn Error>> {
    writeln!(out, "# Perturbation Data")?;

    let now = chrono::Utc::now();
    writeln!(out, "# Generated: {}", now.to_rfc3339())?;

    if let Some(mode) = &metadata.mode {
        writeln!(out, "# Mode: {}", mode)?;
    }
    if let Some(ic) = &metadata.initial_condition {
        writeln!(out, "# Initial condition: {}", ic)?;
    }
    if let Some(k) = metadata.k {
        writeln!(out, "# k: {:e} Mpc^-1", k)?;
    }
    if let Some(gauge) = &metadata.gauge {
        writeln!(out, "# Gauge: {}", gauge)?;
    }
    if let Some(evolver) = &metadata.evolver {
        writeln!(out, "# Evolver: {}", evolver)?;
    }
    for (key, value) in &metadata.custom {
        writeln!(out, "# {}: {}", key, value)?;
    }
    writeln!(out, "#")?;

    Ok(())
}

fn format_number(value: f64, config: &CsvConfig) -> String {
    format!("{:.prec$e}", value, prec = config.precision)
}

/// Write `headers` and the rows of `columns` (all the same length)
pub fn export_columns_csv(
    headers: &[String],
    columns: &[Vec<f64>],
    output_path: &str,
    configuration: Option<&CsvConfig>,
) -> Result<(), Box<dyn Error>> {
    // ============================= Validation =============================

    if columns.is_empty() || columns[0].is_empty() {
        return Err("Empty data: nothing to export".into());
    }
    if headers.len() != columns.len() {
        return Err(format!(
            "Data length mismatch: {} headers versus {} columns",
            headers.len(),
            columns.len()
        )
        .into());
    }
    let rows = columns[0].len();
    for (header, column) in headers.iter().zip(columns) {
        if column.len() != rows {
            return Err(format!(
                "Column {} has {} values, expected {}",
                header,
                column.len(),
                rows
            )
            .into());
        }
        if column.iter().any(|v| !v.is_finite()) {
            return Err(format!("Invalid data: NaN or Inf detected in column {}", header).into());
        }
    }

    let binding = CsvConfig::default();
    let configuration = configuration.unwrap_or(&binding);

    // ============================= Write ==================================

    let mut out = BufWriter::new(File::create(output_path)?);

    if configuration.include_metadata
        && let Some(metadata) = &configuration.metadata
    {
        write_metadata_header(&mut out, metadata)?;
    }

    let delimiter = configuration.delimiter.to_string();
    writeln!(out, "{}", headers.join(&delimiter))?;

    for i in 0..rows {
        let line: Vec<String> = columns.iter().map(|c| format_number(c[i], configuration)).collect();
        writeln!(out, "{}", line.join(&delimiter))?;
    }
    out.flush()?;

    Ok(())
}

// =============================================================================
// Export Functions
// =============================================================================

/// Export every source type of one wavenumber as a function of τ
///
/// # Errors
///
/// - unknown mode or initial condition, `k_index` out of range
/// - non-finite values
/// - file creation errors
pub fn export_sources_csv(
    table: &SourceTable,
    mode: Mode,
    initial_condition: InitialCondition,
    k_index: usize,
    output_path: &str,
    configuration: Option<&CsvConfig>,
) -> Result<(), Box<dyn Error>> {
    let binding = CsvConfig::default();
    let configuration = configuration.unwrap_or(&binding);

    let indices = table.indices(mode)?;
    let mut headers = vec![configuration.time_header.clone()];
    let mut columns = vec![table.tau_sampling().tau.clone()];
    for source in &indices.sources {
        headers.push(source.title());
        columns.push(table.time_series(mode, initial_condition, *source, k_index)?.to_vec());
    }

    export_columns_csv(&headers, &columns, output_path, Some(configuration))
}

/// Export a per-step trace with its own column titles
pub fn export_trace_csv(
    trace: &Trace,
    output_path: &str,
    configuration: Option<&CsvConfig>,
) -> Result<(), Box<dyn Error>> {
    if trace.is_empty() {
        return Err("Empty data: the trace has no rows".into());
    }
    let columns: Vec<Vec<f64>> = (0..trace.titles.len())
        .map(|c| trace.rows.iter().map(|row| row[c]).collect())
        .collect();

    export_columns_csv(&trace.titles, &columns, output_path, configuration)
}

// =============================================================================
// Exporter implementation
// =============================================================================

/// CSV implementation of [`Exporter`]
#[derive(Debug, Clone, Default)]
pub struct CsvExporter {
    pub config: CsvConfig,
}

impl CsvExporter {
    pub fn new(config: CsvConfig) -> Self {
        Self { config }
    }
}

impl Exporter for CsvExporter {
    fn export_sources(
        &self,
        table: &SourceTable,
        mode: Mode,
        initial_condition: InitialCondition,
        k_index: usize,
        path: &str,
    ) -> Result<(), Box<dyn Error>> {
        export_sources_csv(table, mode, initial_condition, k_index, path, Some(&self.config))
    }

    fn export_trace(&self, trace: &Trace, path: &str) -> Result<(), Box<dyn Error>> {
        export_trace_csv(trace, path, Some(&self.config))
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::NamedTempFile;

    fn trace() -> Trace {
        Trace {
            titles: vec!["tau".into(), "a".into(), "delta_g".into()],
            rows: vec![vec![1.0, 1e-5, -0.5], vec![2.0, 2e-5, -0.25]],
        }
    }

    fn temp_path() -> (NamedTempFile, String) {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        (file, path)
    }

    #[test]
    fn test_trace_export_layout() {
        let (_file, path) = temp_path();
        export_trace_csv(&trace(), &path, None).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "tau,a,delta_g");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("1.000000e0,1.000000e-5,"));
        assert!(lines[2].ends_with("-2.500000e-1"));
    }

    #[test]
    fn test_metadata_header() {
        let (_file, path) = temp_path();
        let metadata = CsvMetadata::for_task("scalar", "ad", 0.05)
            .with_gauge("synchronous")
            .with_evolver("rosenbrock");
        let config = CsvConfig::default().delimiter(';').with_metadata(metadata);
        export_trace_csv(&trace(), &path, Some(&config)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Perturbation Data\n# Generated: "));
        assert!(content.contains("# Mode: scalar"));
        assert!(content.contains("# k: 5e-2 Mpc^-1"));
        assert!(content.contains("# Gauge: synchronous"));
        assert!(content.contains("tau;a;delta_g"));
    }

    #[test]
    fn test_rejects_bad_columns() {
        let (_file, path) = temp_path();
        let headers = vec!["x".to_string(), "y".to_string()];

        assert!(export_columns_csv(&headers, &[vec![1.0]], &path, None).is_err());
        assert!(export_columns_csv(&headers, &[vec![1.0, 2.0], vec![1.0]], &path, None).is_err());
        assert!(export_columns_csv(&headers, &[vec![1.0], vec![f64::NAN]], &path, None).is_err());
        assert!(export_columns_csv(&[], &[], &path, None).is_err());
        assert!(export_trace_csv(&Trace::default(), &path, None).is_err());
    }

    #[test]
    fn test_exporter_uses_its_config() {
        let (_file, path) = temp_path();
        let exporter = CsvExporter::new(CsvConfig::high_precision());
        exporter.export_trace(&trace(), &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.lines().nth(1).unwrap().starts_with("1.000000000000e0"));
    }
}
