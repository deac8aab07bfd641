//! Curves against conformal time: sources at fixed k and per-step traces
//!
//! Both plot kinds reduce to a set of labelled `(τ, value)` curves drawn by
//! [`plot_curves_impl`] on either backend. The extension of the output path
//! selects the backend (`.svg` → vector, anything else → bitmap).

use plotters::prelude::*;
use std::error::Error;

use super::config::{PlotConfig, NO_TITLE};
use crate::models::{InitialCondition, Mode, SourceType};
use crate::output::table::SourceTable;
use crate::solver::Trace;

/// One labelled curve
struct Curve {
    label: String,
    points: Vec<(f64, f64)>,
}

/// Plot S(τ) of one source type at several wavenumbers
///
/// # Arguments
///
/// * `table`      : Computed sources
/// * `k_indices`  : Indices into the k grid of `mode`, one curve each
/// * `output_path`: Output file path (`.png` → bitmap, `.svg` → vector)
/// * `config`     : Optional plot configuration; `None` uses defaults
///
/// # Errors
///
/// Returns `Err` if the request does not match the table or the backend
/// cannot write to `output_path`.
///
/// # Example
///
/// ```rust,ignore
/// use perturb_rs::output::visualization::plot_source_evolution;
///
/// plot_source_evolution(&table, Mode::Scalar, InitialCondition::Adiabatic, SourceType::T0, &[0, 40, 80], "t0.png", None)?;
/// ```
pub fn plot_source_evolution(
    table: &SourceTable,
    mode: Mode,
    initial_condition: InitialCondition,
    source: SourceType,
    k_indices: &[usize],
    output_path: &str,
    config: Option<&PlotConfig>,
) -> Result<(), Box<dyn Error>> {
    if k_indices.is_empty() {
        return Err("No wavenumber selected".into());
    }

    let default_config = PlotConfig::source_evolution(format!("{} ({} mode, {})", source.title(), mode, initial_condition));
    let config = config.unwrap_or(&default_config);

    let grid = table.k_grid(mode)?;
    let taus = &table.tau_sampling().tau;

    let mut curves = Vec::with_capacity(k_indices.len());
    for &k_index in k_indices {
        let values = table.time_series(mode, initial_condition, source, k_index)?;
        curves.push(Curve {
            label: format!("k = {:.3e}", grid.k[k_index]),
            points: taus.iter().zip(values.iter()).map(|(t, s)| (*t, *s)).collect(),
        });
    }

    draw(curves, output_path, config)
}

/// Plot selected columns of a trace against τ
///
/// The trace must contain a `tau` column.
pub fn plot_trace(
    trace: &Trace,
    columns: &[&str],
    output_path: &str,
    config: Option<&PlotConfig>,
) -> Result<(), Box<dyn Error>> {
    if columns.is_empty() {
        return Err("No trace column selected".into());
    }
    let taus = trace.column("tau").ok_or("Trace has no tau column")?;

    let default_config = PlotConfig::trace(NO_TITLE);
    let config = config.unwrap_or(&default_config);

    let mut curves = Vec::with_capacity(columns.len());
    for name in columns {
        let values = trace
            .column(name)
            .ok_or_else(|| format!("Trace has no column {}", name))?;
        curves.push(Curve {
            label: name.to_string(),
            points: taus.iter().zip(&values).map(|(t, v)| (*t, *v)).collect(),
        });
    }

    draw(curves, output_path, config)
}

// =================================================================================================
// Rendering
// =================================================================================================

fn draw(mut curves: Vec<Curve>, output_path: &str, config: &PlotConfig) -> Result<(), Box<dyn Error>> {
    if config.log_tau {
        for curve in &mut curves {
            curve.points.retain(|(t, _)| *t > 0.0);
            for point in &mut curve.points {
                point.0 = point.0.log10();
            }
        }
    }

    let values = curves.iter().flat_map(|c| c.points.iter());
    let (mut x_min, mut x_max, mut y_min, mut y_max) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in values {
        if !x.is_finite() || !y.is_finite() {
            return Err("Invalid data: NaN or Inf detected".into());
        }
        x_min = x_min.min(*x);
        x_max = x_max.max(*x);
        y_min = y_min.min(*y);
        y_max = y_max.max(*y);
    }
    if x_min > x_max {
        return Err("Empty data: nothing to plot".into());
    }
    if x_max == x_min {
        x_max = x_min + 1.0;
    }
    let pad = if y_max > y_min { 0.05 * (y_max - y_min) } else { y_max.abs().max(1e-10) };
    let y_range = (y_min - pad)..(y_max + pad);

    let ext = std::path::Path::new(output_path)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("png");

    match ext {
        "svg" => {
            let backend = SVGBackend::new(output_path, (config.width, config.height));
            plot_curves_impl(backend, &curves, config, x_min..x_max, y_range)
        }
        _ => {
            let backend = BitMapBackend::new(output_path, (config.width, config.height));
            plot_curves_impl(backend, &curves, config, x_min..x_max, y_range)
        }
    }
}

fn plot_curves_impl<DB: DrawingBackend>(
    backend: DB,
    curves: &[Curve],
    config: &PlotConfig,
    x_range: std::ops::Range<f64>,
    y_range: std::ops::Range<f64>,
) -> Result<(), Box<dyn Error>>
where
    DB::ErrorType: 'static,
{
    let root = backend.into_drawing_area();
    root.fill(&config.background)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(&config.title, ("sans-serif", 32).into_font())
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range, y_range)?;

    let xlabel = if config.log_tau {
        format!("log10 {}", config.xlabel)
    } else {
        config.xlabel.clone()
    };

    if config.show_grid {
        chart
            .configure_mesh()
            .x_desc(xlabel)
            .y_desc(&config.ylabel)
            .y_label_formatter(&|y| format!("{:.2e}", y))
            .draw()?;
    }

    for (index, curve) in curves.iter().enumerate() {
        let color = config.series_color(index);
        chart
            .draw_series(LineSeries::new(
                curve.points.iter().copied(),
                ShapeStyle::from(&color).stroke_width(config.line_width),
            ))?
            .label(curve.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> Trace {
        Trace {
            titles: vec!["tau".into(), "delta_g".into(), "theta_b".into()],
            rows: (1..50)
                .map(|i| {
                    let tau = i as f64;
                    vec![tau, (0.3 * tau).cos(), 0.1 * tau]
                })
                .collect(),
        }
    }

    #[test]
    fn test_plot_trace_svg() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().with_extension("svg");
        plot_trace(&trace(), &["delta_g", "theta_b"], path.to_str().unwrap(), None).unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_plot_trace_png_linear_axis() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().with_extension("png");
        let mut config = PlotConfig::trace("photons");
        config.log_tau = false;
        plot_trace(&trace(), &["delta_g"], path.to_str().unwrap(), Some(&config)).unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_plot_trace_rejects_unknown_column() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().with_extension("svg");
        assert!(plot_trace(&trace(), &["phi"], path.to_str().unwrap(), None).is_err());
        assert!(plot_trace(&trace(), &[], path.to_str().unwrap(), None).is_err());
        assert!(plot_trace(&Trace::default(), &["delta_g"], path.to_str().unwrap(), None).is_err());
    }

    #[test]
    fn test_flat_curve_gets_a_range() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().with_extension("svg");
        let flat = Trace {
            titles: vec!["tau".into(), "h".into()],
            rows: vec![vec![1.0, 1.0], vec![2.0, 1.0]],
        };
        plot_trace(&flat, &["h"], path.to_str().unwrap(), None).unwrap();
        let _ = std::fs::remove_file(path);
    }
}
