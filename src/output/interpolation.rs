//! Cubic spline and linear interpolation on strictly increasing grids
//!
//! Used for the late-time source splines in ln τ and for the tabulated
//! quantities of the analytic cosmology.

use crate::error::{PerturbError, PerturbResult};
use crate::physics::InterpolationCursor;

/// End conditions of a cubic spline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplineBoundary {
    /// Vanishing second derivative at both ends
    Natural,
    /// First derivative at both ends estimated from a local parabola
    #[default]
    EstimatedDerivatives,
}

/// Fill `dd` with the second derivatives of the spline through `(x, y)`
///
/// `x`, `y` and `dd` must have the same length, `x` strictly increasing.
/// `scratch` is resized as needed so that repeated calls do not allocate.
pub fn fill_second_derivatives(
    x: &[f64],
    y: &[f64],
    boundary: SplineBoundary,
    dd: &mut [f64],
    scratch: &mut Vec<f64>,
) -> PerturbResult<()> {
    let n = x.len();
    if y.len() != n || dd.len() != n {
        return Err(PerturbError::Numerical(format!(
            "spline arrays of mismatched length ({}, {}, {})",
            n,
            y.len(),
            dd.len()
        )));
    }
    if n < 2 {
        return Err(PerturbError::Numerical(
            "spline needs at least two nodes".to_string(),
        ));
    }
    if n == 2 {
        dd.fill(0.0);
        return Ok(());
    }

    scratch.clear();
    scratch.resize(n, 0.0);
    let u = scratch;

    match boundary {
        SplineBoundary::Natural => {
            dd[0] = 0.0;
            u[0] = 0.0;
        }
        SplineBoundary::EstimatedDerivatives => {
            let yp = parabola_slope(x[0], x[1], x[2], y[0], y[1], y[2], x[0]);
            let h = x[1] - x[0];
            dd[0] = -0.5;
            u[0] = (3.0 / h) * ((y[1] - y[0]) / h - yp);
        }
    }

    for i in 1..n - 1 {
        let span = x[i + 1] - x[i - 1];
        if !(span > 0.0) {
            return Err(PerturbError::Numerical(format!(
                "spline abscissae not increasing at index {}",
                i
            )));
        }
        let sig = (x[i] - x[i - 1]) / span;
        let p = sig * dd[i - 1] + 2.0;
        dd[i] = (sig - 1.0) / p;
        let slope_diff = (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
        u[i] = (6.0 * slope_diff / span - sig * u[i - 1]) / p;
    }

    let (qn, un) = match boundary {
        SplineBoundary::Natural => (0.0, 0.0),
        SplineBoundary::EstimatedDerivatives => {
            let yp = parabola_slope(
                x[n - 3],
                x[n - 2],
                x[n - 1],
                y[n - 3],
                y[n - 2],
                y[n - 1],
                x[n - 1],
            );
            let h = x[n - 1] - x[n - 2];
            (0.5, (3.0 / h) * (yp - (y[n - 1] - y[n - 2]) / h))
        }
    };

    dd[n - 1] = (un - qn * u[n - 2]) / (qn * dd[n - 2] + 1.0);
    for i in (0..n - 1).rev() {
        dd[i] = dd[i] * dd[i + 1] + u[i];
    }

    Ok(())
}

/// Slope at `at` of the parabola through three points
fn parabola_slope(x0: f64, x1: f64, x2: f64, y0: f64, y1: f64, y2: f64, at: f64) -> f64 {
    y0 * ((at - x1) + (at - x2)) / ((x0 - x1) * (x0 - x2))
        + y1 * ((at - x0) + (at - x2)) / ((x1 - x0) * (x1 - x2))
        + y2 * ((at - x0) + (at - x1)) / ((x2 - x0) * (x2 - x1))
}

/// Evaluate the spline on interval `i` (between nodes `i` and `i + 1`)
#[inline]
pub fn spline_value(x: &[f64], y: &[f64], dd: &[f64], i: usize, at: f64) -> f64 {
    let h = x[i + 1] - x[i];
    let a = (x[i + 1] - at) / h;
    let b = (at - x[i]) / h;
    a * y[i] + b * y[i + 1] + ((a * a * a - a) * dd[i] + (b * b * b - b) * dd[i + 1]) * h * h / 6.0
}

/// First derivative of the spline on interval `i`
#[inline]
pub fn spline_slope(x: &[f64], y: &[f64], dd: &[f64], i: usize, at: f64) -> f64 {
    let h = x[i + 1] - x[i];
    let a = (x[i + 1] - at) / h;
    let b = (at - x[i]) / h;
    (y[i + 1] - y[i]) / h - (3.0 * a * a - 1.0) / 6.0 * h * dd[i]
        + (3.0 * b * b - 1.0) / 6.0 * h * dd[i + 1]
}

/// Linear interpolation on interval `i`
#[inline]
pub fn linear_value(x: &[f64], y: &[f64], i: usize, at: f64) -> f64 {
    let t = (at - x[i]) / (x[i + 1] - x[i]);
    y[i] * (1.0 - t) + y[i + 1] * t
}

/// Owned cubic spline
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    dd: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: Vec<f64>, y: Vec<f64>, boundary: SplineBoundary) -> PerturbResult<Self> {
        let mut dd = vec![0.0; x.len()];
        let mut scratch = Vec::new();
        fill_second_derivatives(&x, &y, boundary, &mut dd, &mut scratch)?;
        Ok(Self { x, y, dd })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// Value at `at`, or `None` outside the node range
    pub fn eval(&self, at: f64, cursor: &mut InterpolationCursor) -> Option<f64> {
        let i = cursor.locate(&self.x, at)?;
        Some(spline_value(&self.x, &self.y, &self.dd, i, at))
    }

    /// Derivative at `at`, or `None` outside the node range
    pub fn slope(&self, at: f64, cursor: &mut InterpolationCursor) -> Option<f64> {
        let i = cursor.locate(&self.x, at)?;
        Some(spline_slope(&self.x, &self.y, &self.dd, i, at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_spline_reproduces_cubic_interior() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let spline = CubicSpline::new(x, y, SplineBoundary::EstimatedDerivatives).unwrap();
        let mut cursor = InterpolationCursor::new();

        for &at in &[0.55, 1.234, 2.5, 3.71] {
            let value = spline.eval(at, &mut cursor).unwrap();
            assert_relative_eq!(value, f64::sin(at), epsilon = 1e-5);
            let slope = spline.slope(at, &mut cursor).unwrap();
            assert_relative_eq!(slope, f64::cos(at), epsilon = 1e-3);
        }
    }

    #[test]
    fn test_natural_spline_on_line_is_exact() {
        let x = vec![0.0, 1.0, 3.0, 4.0];
        let y = vec![1.0, 3.0, 7.0, 9.0];
        let spline = CubicSpline::new(x, y, SplineBoundary::Natural).unwrap();
        let mut cursor = InterpolationCursor::new();

        assert_relative_eq!(spline.eval(2.0, &mut cursor).unwrap(), 5.0, epsilon = 1e-12);
        assert!(spline.eval(4.5, &mut cursor).is_none());
    }

    #[test]
    fn test_two_nodes_degenerate_to_linear() {
        let x = [0.0, 2.0];
        let y = [1.0, 5.0];
        let mut dd = [1.0, 1.0];
        let mut scratch = Vec::new();
        fill_second_derivatives(&x, &y, SplineBoundary::Natural, &mut dd, &mut scratch).unwrap();

        assert_eq!(dd, [0.0, 0.0]);
        assert_relative_eq!(spline_value(&x, &y, &dd, 0, 0.5), 2.0);
        assert_relative_eq!(linear_value(&x, &y, 0, 0.5), 2.0);
    }

    #[test]
    fn test_rejects_mismatched_lengths() {
        let mut dd = [0.0; 3];
        let mut scratch = Vec::new();
        let result = fill_second_derivatives(
            &[0.0, 1.0, 2.0],
            &[0.0, 1.0],
            SplineBoundary::Natural,
            &mut dd,
            &mut scratch,
        );
        assert!(result.is_err());
    }
}
