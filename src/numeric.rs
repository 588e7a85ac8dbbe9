//! Floating point comparison helpers built on the `approx` crate.

use approx::{AbsDiffEq, RelativeEq};

/// Relative slack allowed between the initial compartments and the total population.
pub const POPULATION_ACC: f64 = 1e-9;

/// Compares if two floats are close via `approx::abs_diff_eq` using a maximum absolute difference
/// (epsilon) of `acc`.
#[must_use]
pub fn almost_eq(a: f64, b: f64, acc: f64) -> bool {
    if a.is_infinite() && b.is_infinite() {
        return a == b;
    }
    a.abs_diff_eq(&b, acc)
}

/// Compares if two floats are close relative to the larger of their magnitudes.
#[must_use]
pub fn relative_eq(a: f64, b: f64, max_relative: f64) -> bool {
    a.relative_eq(&b, f64::EPSILON, max_relative)
}

/// Panics unless `abs(left - right) < prec`.
#[macro_export]
macro_rules! assert_almost_eq {
    ($a:expr, $b:expr, $prec:expr $(,)?) => {
        if !$crate::numeric::almost_eq($a, $b, $prec) {
            panic!(
                "assertion failed: `abs(left - right) < {:e}`, (left: `{}`, right: `{}`)",
                $prec, $a, $b
            );
        }
    };
}
pub use assert_almost_eq;
