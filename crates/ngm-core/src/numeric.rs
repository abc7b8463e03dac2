use crate::{NgmError, NgmResult};

/// Floating point type used throughout system
pub type Real = f64;

/// One tolerance for everything
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> NgmResult<Real> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(NgmError::NonFinite { what, value: v })
    }
}

/// Check every entry of a slice is finite.
pub fn ensure_all_finite(values: &[Real], what: &'static str) -> NgmResult<()> {
    for &v in values {
        ensure_finite(v, what)?;
    }
    Ok(())
}

/// Check a slice has the expected length.
pub fn ensure_len(values: &[Real], expected: usize, what: &'static str) -> NgmResult<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(NgmError::LengthMismatch {
            what,
            expected,
            actual: values.len(),
        })
    }
}

/// Divide a slice by its sum. Returns `None` when the sum is not positive.
pub fn normalized(values: &[Real]) -> Option<Vec<Real>> {
    let sum: Real = values.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return None;
    }
    Some(values.iter().map(|v| v / sum).collect())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn normalized_sum_is_one(values in prop::collection::vec(0.01_f64..10.0_f64, 1..8)) {
            let n = normalized(&values).unwrap();
            let sum: f64 = n.iter().sum();
            let tol = Tolerances { abs: 1e-9, rel: 1e-9 };
            prop_assert!(nearly_equal(sum, 1.0, tol));
        }
    }
}
