//! The host reference computation and the comparison against device results.

use rayon::prelude::*;

use crate::error::ValidationError;

/// How device results are compared against the host reference.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Comparison {
    /// Bitwise identical results, compared with `==`.
    #[default]
    Exact,
    /// Results may differ by at most that many units in the last place.
    Ulps(u32),
}

impl Comparison {
    fn accepts(&self, expected: f32, actual: f32) -> bool {
        match self {
            Self::Exact => expected == actual,
            Self::Ulps(max) => ulps_distance(expected, actual) <= u64::from(*max),
        }
    }
}

/// Maps the bits of a float to an integer whose ordering matches the ordering of the floats.
fn ordered(value: f32) -> i64 {
    let bits = i64::from(value.to_bits() as i32);
    if bits < 0 {
        i64::from(i32::MIN) - bits
    } else {
        bits
    }
}

/// The number of representable floats between `a` and `b`.
fn ulps_distance(a: f32, b: f32) -> u64 {
    if a == b {
        return 0;
    }
    if a.is_nan() || b.is_nan() {
        return u64::MAX;
    }
    (ordered(a) - ordered(b)).unsigned_abs()
}

/// Computes `a * x[i] + y[i]` for every element on the host.
///
/// The multiplication and addition are rounded separately, the same way the kernels do it.
/// There's no reduction, so the result doesn't depend on how the work is split across threads.
pub fn host_saxpy(a: f32, x: &[f32], y: &[f32]) -> Vec<f32> {
    x.par_iter()
        .zip(y.par_iter())
        .map(|(x, y)| a * x + y)
        .collect()
}

/// Checks that the device result matches the host reference.
///
/// On failure the first mismatching position is returned. If one sequence is a prefix of the
/// other, the position is the length of the shorter one.
pub fn validate(
    expected: &[f32],
    actual: &[f32],
    comparison: Comparison,
) -> Result<(), ValidationError> {
    let mismatch = expected
        .par_iter()
        .zip(actual.par_iter())
        .position_first(|(expected, actual)| !comparison.accepts(*expected, *actual));
    if let Some(index) = mismatch {
        return Err(ValidationError {
            index,
            expected: Some(expected[index]),
            actual: Some(actual[index]),
        });
    }
    if expected.len() != actual.len() {
        let index = expected.len().min(actual.len());
        return Err(ValidationError {
            index,
            expected: expected.get(index).copied(),
            actual: actual.get(index).copied(),
        });
    }
    Ok(())
}
