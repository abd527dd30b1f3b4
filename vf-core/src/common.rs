//! Common

use float_cmp::approx_eq;

/// Use 64-bit precision for floating point numbers. View factor normalization
/// is expected to hold to 1e-10, which rules out single precision.
pub type Float = f64;

/// Infinty (∞)
pub const INFINITY: Float = Float::INFINITY;

/// PI (π)
pub const PI: Float = std::f64::consts::PI;

/// PI/2 (π/2)
pub const PI_OVER_TWO: Float = PI * 0.5;

/// 2*PI (2π)
pub const TWO_PI: Float = PI * 2.0;

/// Default absolute tolerance for geometric fuzzy comparisons (mesh units).
pub const TRACE_TOLERANCE: Float = 1e-9;

/// Returns true if `a` and `b` are equal within the absolute tolerance `tol`.
///
/// * `a`   - First value.
/// * `b`   - Second value.
/// * `tol` - Absolute tolerance.
#[inline(always)]
pub fn absolute_fuzzy_equal(a: Float, b: Float, tol: Float) -> bool {
    approx_eq!(Float, a, b, epsilon = tol)
}
