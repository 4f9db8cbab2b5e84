//! Software oracle for the accelerator's kernel.
//!
//! Used to validate results read back from the hardware; it has no hardware
//! dependency and no side effects.

/// Sum of squared element-wise differences of `a` and `b`.
///
/// # Panics
///
/// Panics if the vectors differ in length.
pub fn distance_squared(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "vectors must have the same length");
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Relative error of `actual` against `expected`, falling back to the
/// absolute error when `expected` is zero.
pub fn relative_error(actual: f64, expected: f64) -> f64 {
    let diff = (actual - expected).abs();
    if expected == 0.0 {
        diff
    } else {
        diff / expected.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn ramp_against_doubled_ramp() {
        let a: Vec<f64> = (0..256).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..256).map(|i| (2 * i) as f64).collect();
        assert_eq!(distance_squared(&a, &b), 5_559_680.0);
    }

    #[test]
    fn empty_vectors_are_at_distance_zero() {
        assert_eq!(distance_squared(&[], &[]), 0.0);
    }

    #[test]
    #[should_panic]
    fn length_mismatch_panics() {
        distance_squared(&[1.0], &[1.0, 2.0]);
    }

    #[test]
    fn relative_error_handles_zero_expectation() {
        assert_eq!(relative_error(0.5, 0.0), 0.5);
        assert!(relative_error(100.0 + 1e-8, 100.0) < 1e-9);
    }
}
