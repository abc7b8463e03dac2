//! Dominant eigenvalue extraction.

use nalgebra::DMatrix;
use ngm_core::Real;

use crate::error::{EngineError, EngineResult};

/// Largest eigenvalue modulus of a square matrix.
///
/// The next-generation matrix is not symmetric in general, so eigenvalues
/// may be complex; only their magnitude is reported.
pub fn spectral_radius(m: &DMatrix<Real>) -> EngineResult<Real> {
    if !m.is_square() {
        return Err(EngineError::ShapeMismatch {
            what: "eigenvalue input",
            expected: "square matrix".to_string(),
            actual: format!("{}x{}", m.nrows(), m.ncols()),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::Numeric {
            what: "next-generation matrix has non-finite entries".to_string(),
        });
    }
    if m.nrows() == 1 {
        return Ok(m[(0, 0)].abs());
    }

    let radius = m
        .complex_eigenvalues()
        .iter()
        .map(|c| c.norm())
        .fold(0.0, Real::max);
    Ok(radius)
}
