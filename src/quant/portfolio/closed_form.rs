//! # Closed-Form Target-Return Portfolio
//!
//! $$
//! \min_{\mathbf{w}} \mathbf{w}^\top\Sigma\mathbf{w}\quad\text{s.t.}\quad
//! \mathbf{w}^\top\mathbf{1}=1,\ \mathbf{w}^\top\mu=r
//! $$
//!
//! Two-fund Lagrangian solution. Weights are unconstrained in sign.

use nalgebra::DVector;
use serde::Serialize;
use tracing::info;

use super::linalg::spd_inverse;
use super::types::PortfolioResult;
use super::types::ReturnModel;
use crate::error::PortfolioError;
use crate::error::Result;

/// Relative size of `AC - B^2` below which expected returns count as collinear with `1`.
pub const DEGENERACY_TOL: f64 = 1e-10;

/// Lagrangian quantities of the target-return problem.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetReturnSolution {
  /// `1' S^-1 1`
  pub a: f64,
  /// `mu' S^-1 1`
  pub b: f64,
  /// `mu' S^-1 mu`
  pub c: f64,
  pub lambda: f64,
  pub gamma: f64,
  /// Per-period target the weights were solved for.
  pub target: f64,
  pub weights: Vec<f64>,
}

/// Solve the target-return problem on per-period moments.
///
/// `target` must be in the same units as `model.mean` (for daily moments, the annual
/// target divided by the trading days).
pub fn solve_target_return(model: &ReturnModel, target: f64) -> Result<TargetReturnSolution> {
  if !target.is_finite() {
    return Err(PortfolioError::config(format!(
      "target return must be finite, got {target}"
    )));
  }

  let n = model.len();
  let inv = spd_inverse(&model.covariance, "covariance matrix")?;
  let ones = DVector::from_element(n, 1.0);
  let mu = &model.mean;

  let inv_ones = &inv * &ones;
  let inv_mu = &inv * mu;
  let a = ones.dot(&inv_ones);
  let b = mu.dot(&inv_ones);
  let c = mu.dot(&inv_mu);

  let denominator = a * c - b * b;
  if !denominator.is_finite() || denominator.abs() <= DEGENERACY_TOL * (a * c).abs() {
    return Err(PortfolioError::degenerate(format!(
      "A*C - B^2 = {denominator:e}: expected returns are collinear with the constant vector"
    )));
  }

  let lambda = (target * a - b) / denominator;
  let gamma = (c - target * b) / denominator;
  let w = inv * (mu * lambda + ones * gamma);
  if w.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::degenerate(
      "target-return weights are not finite",
    ));
  }

  Ok(TargetReturnSolution {
    a,
    b,
    c,
    lambda,
    gamma,
    target,
    weights: w.iter().copied().collect(),
  })
}

/// Minimum-variance weights for an annual return target.
///
/// The target is converted to the model's period (`annual / periods_per_year`) before
/// solving; the reported statistics are annualized.
pub fn optimize_target_return(
  model: &ReturnModel,
  target_annual_return: f64,
  risk_free: f64,
) -> Result<PortfolioResult> {
  let target = target_annual_return / model.periods_per_year;
  let solution = solve_target_return(model, target)?;
  let result = model.result(DVector::from_vec(solution.weights), risk_free);

  info!(
    target_annual_return,
    expected_return = result.stats.expected_return,
    volatility = result.stats.volatility,
    "closed-form target-return portfolio"
  );

  Ok(result)
}
