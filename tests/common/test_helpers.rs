//! Tolerance helpers shared by the integration tests

/// |actual − expected| / |expected|, absolute when `expected` is near zero
pub fn relative_error(actual: f64, expected: f64) -> f64 {
    if expected.abs() < 1e-30 {
        (actual - expected).abs()
    } else {
        (actual - expected).abs() / expected.abs()
    }
}

/// Assert that `values` is strictly increasing
pub fn assert_strictly_increasing(values: &[f64], message: &str) {
    for (i, pair) in values.windows(2).enumerate() {
        assert!(
            pair[1] > pair[0],
            "{}: element {} ({}) is not above element {} ({})",
            message,
            i + 1,
            pair[1],
            i,
            pair[0]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_error_scales_with_expected() {
        assert_eq!(relative_error(2.0, 2.0), 0.0);
        assert!((relative_error(1e-5, 2e-5) - 0.5).abs() < 1e-12);
        assert_eq!(relative_error(1e-40, 0.0), 1e-40);
    }

    #[test]
    #[should_panic(expected = "not above")]
    fn test_repeated_value_is_not_increasing() {
        assert_strictly_increasing(&[1.0, 2.0, 2.0], "grid");
    }
}
