//! # Linear Algebra Guards
//!
//! $$
//! \kappa(\Sigma) = \frac{\lambda_{\max}}{\lambda_{\min}}
//! $$
//!
//! Inversion of symmetric positive-definite matrices that refuses ill-conditioned input.

use nalgebra::DMatrix;

use crate::error::PortfolioError;
use crate::error::Result;

/// Smallest admissible `lambda_min / lambda_max` before a matrix counts as singular.
pub const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

/// Invert a symmetric positive-definite matrix.
///
/// `what` names the matrix in the error message.
pub fn spd_inverse(m: &DMatrix<f64>, what: &str) -> Result<DMatrix<f64>> {
  if !m.is_square() || m.nrows() == 0 {
    return Err(PortfolioError::config(format!(
      "{what} must be a non-empty square matrix"
    )));
  }
  if m.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::degenerate(format!(
      "{what} contains non-finite entries"
    )));
  }

  let sym = (m + m.transpose()) * 0.5;
  let eig = sym.symmetric_eigenvalues();
  let max = eig.iter().copied().fold(f64::NEG_INFINITY, f64::max);
  let min = eig.iter().copied().fold(f64::INFINITY, f64::min);
  if max <= 0.0 || min <= max * MIN_RECIPROCAL_CONDITION {
    return Err(PortfolioError::degenerate(format!(
      "{what} is singular or not positive definite (eigenvalues in [{min:e}, {max:e}])"
    )));
  }

  let inv = sym
    .cholesky()
    .ok_or_else(|| PortfolioError::degenerate(format!("{what} has no Cholesky factor")))?
    .inverse();
  if inv.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::degenerate(format!(
      "inverse of {what} is not finite"
    )));
  }

  Ok(inv)
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;

  use super::*;

  #[test]
  fn inverts_well_conditioned_matrix() {
    let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
    let inv = spd_inverse(&m, "m").unwrap();
    assert_relative_eq!(&m * inv, DMatrix::identity(2, 2), epsilon = 1e-12);
  }

  #[test]
  fn rejects_singular_matrix() {
    let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
    let err = spd_inverse(&m, "covariance").unwrap_err();
    assert!(matches!(err, PortfolioError::DegenerateOptimization(_)));
  }

  #[test]
  fn rejects_indefinite_matrix() {
    let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
    assert!(spd_inverse(&m, "m").is_err());
  }
}
