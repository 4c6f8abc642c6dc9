//! Dense linear algebra on small design matrices
//!
//! Pseudo-inverse and rank via SVD, with the usual numerical tolerances:
//! `σ_max · max(m, n) · ε` for rank and `1e-15 · σ_max` for the
//! pseudo-inverse cutoff.

use nalgebra::DMatrix;

use crate::error::{invalid, Result};

fn max_singular(sv: &nalgebra::DVector<f64>) -> f64 {
    sv.iter().cloned().fold(0.0, f64::max)
}

/// Numerical rank of `m`
pub fn rank(m: &DMatrix<f64>) -> usize {
    if m.is_empty() {
        return 0;
    }
    let sv = m.clone().singular_values();
    let tol = max_singular(&sv) * m.nrows().max(m.ncols()) as f64 * f64::EPSILON;
    sv.iter().filter(|&&s| s > tol).count()
}

/// Moore-Penrose pseudo-inverse of `m`
pub fn pinv(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if m.is_empty() {
        return Ok(DMatrix::zeros(m.ncols(), m.nrows()));
    }
    let svd = m.clone().svd(true, true);
    let cutoff = 1e-15 * max_singular(&svd.singular_values);
    svd.pseudo_inverse(cutoff).map_err(|e| invalid(format!("pseudo-inverse failed: {}", e)))
}

/// Inverse of a square matrix, falling back to the pseudo-inverse when it
/// is rank deficient
pub fn inverse_or_pinv(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if m.is_square() && rank(m) == m.ncols() {
        if let Some(inv) = m.clone().try_inverse() {
            return Ok(inv);
        }
    }
    pinv(m)
}
