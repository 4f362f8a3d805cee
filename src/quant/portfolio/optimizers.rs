//! # Portfolio Optimizers
//!
//! $$
//! \mathbf{w}^\* = \arg\min_{\mathbf{w}\in\Delta} f(\mathbf{w}),\qquad
//! \Delta = \{\mathbf{w} : \mathbf{1}^\top\mathbf{w} = 1,\ 0 \le w_i \le 1\}
//! $$
//!
//! Long-only allocation optimizers solved by SQP on annualized moments.

use tracing::info;

use super::objective::MinVolatility;
use super::objective::NegativeSharpe;
use super::sqp::SqpSettings;
use super::sqp::minimize_on_simplex;
use super::types::PortfolioResult;
use super::types::ReturnModel;
use crate::error::PortfolioError;
use crate::error::Result;

/// Long-only minimum volatility portfolio.
pub fn optimize_min_volatility(
  model: &ReturnModel,
  risk_free: f64,
  settings: &SqpSettings,
) -> Result<PortfolioResult> {
  let annual = model.annualized();
  let cost = MinVolatility {
    cov: annual.covariance.clone(),
  };
  let solution = minimize_on_simplex(&cost, annual.len(), settings)?;
  let result = annual.result(solution.weights, risk_free);

  info!(
    iterations = solution.iterations,
    expected_return = result.stats.expected_return,
    volatility = result.stats.volatility,
    sharpe = result.stats.sharpe,
    "minimum volatility portfolio"
  );
  Ok(result)
}

/// Long-only maximum Sharpe ratio portfolio.
///
/// `l2_gamma > 0` adds `gamma * |w|^2` to the negative Sharpe ratio, which spreads weight
/// across more assets.
pub fn optimize_max_sharpe(
  model: &ReturnModel,
  risk_free: f64,
  l2_gamma: f64,
  settings: &SqpSettings,
) -> Result<PortfolioResult> {
  if !(l2_gamma.is_finite() && l2_gamma >= 0.0) {
    return Err(PortfolioError::config(format!(
      "L2 penalty must be non-negative, got {l2_gamma}"
    )));
  }

  let annual = model.annualized();
  let cost = NegativeSharpe {
    mean: annual.mean.clone(),
    cov: annual.covariance.clone(),
    risk_free,
    l2_gamma,
  };
  let solution = minimize_on_simplex(&cost, annual.len(), settings)?;
  let result = annual.result(solution.weights, risk_free);

  info!(
    iterations = solution.iterations,
    l2_gamma,
    expected_return = result.stats.expected_return,
    volatility = result.stats.volatility,
    sharpe = result.stats.sharpe,
    "maximum sharpe portfolio"
  );
  Ok(result)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::Distribution;
  use rand_distr::Uniform;
  use tracing_test::traced_test;

  use super::*;
  use crate::quant::portfolio::types::TRADING_DAYS;

  fn model() -> ReturnModel {
    ReturnModel::from_slices(
      &["EMB", "XLE", "SPXL", "EEM"],
      &[0.0002, 0.0004, 0.0009, 0.0001],
      &[
        vec![0.00004, 0.00001, 0.00002, 0.00001],
        vec![0.00001, 0.0003, 0.0002, 0.0001],
        vec![0.00002, 0.0002, 0.001, 0.0002],
        vec![0.00001, 0.0001, 0.0002, 0.0002],
      ],
      TRADING_DAYS,
    )
    .unwrap()
  }

  fn random_simplex_points(n: usize, count: usize) -> Vec<nalgebra::DVector<f64>> {
    let mut rng = StdRng::seed_from_u64(5);
    let uniform = Uniform::new(0.0, 1.0);
    (0..count)
      .map(|_| {
        let raw = nalgebra::DVector::from_fn(n, |_, _| uniform.sample(&mut rng));
        let sum = raw.sum();
        raw / sum
      })
      .collect()
  }

  #[test]
  #[traced_test]
  fn min_volatility_beats_random_portfolios() {
    let m = model();
    let result = optimize_min_volatility(&m, 0.0, &SqpSettings::default()).unwrap();

    assert_abs_diff_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    assert!(result.weights.iter().all(|w| (0.0..=1.0).contains(w)));
    for w in random_simplex_points(4, 2_000) {
      assert!(m.stats(&w, 0.0).volatility >= result.stats.volatility - 1e-9);
    }
    assert!(logs_contain("minimum volatility portfolio"));
  }

  #[test]
  fn min_volatility_of_low_variance_basket() {
    let vols = [2e-5, 3e-5, 1e-5];
    let cov: Vec<Vec<f64>> = (0..3)
      .map(|i| (0..3).map(|j| if i == j { vols[i] * vols[i] } else { 0.0 }).collect())
      .collect();
    let m = ReturnModel::from_slices(&["EMB", "SHV", "BIL"], &[1e-5; 3], &cov, TRADING_DAYS)
      .unwrap();

    let result = optimize_min_volatility(&m, 0.0, &SqpSettings::default()).unwrap();

    let inv: Vec<f64> = vols.iter().map(|v| 1.0 / (v * v)).collect();
    let total: f64 = inv.iter().sum();
    for (w, x) in result.weights.iter().zip(&inv) {
      assert_abs_diff_eq!(*w, x / total, epsilon = 1e-6);
    }
    let optimal = (TRADING_DAYS / total).sqrt();
    assert_abs_diff_eq!(result.stats.volatility, optimal, epsilon = 1e-9);
  }

  #[test]
  fn max_sharpe_beats_random_portfolios() {
    let m = model();
    let result = optimize_max_sharpe(&m, 0.01, 0.0, &SqpSettings::default()).unwrap();

    assert_abs_diff_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    assert!(result.weights.iter().all(|w| (0.0..=1.0).contains(w)));
    for w in random_simplex_points(4, 2_000) {
      assert!(m.stats(&w, 0.01).sharpe <= result.stats.sharpe + 1e-7);
    }
  }

  #[test]
  fn l2_penalty_diversifies() {
    let m = model();
    let plain = optimize_max_sharpe(&m, 0.0, 0.0, &SqpSettings::default()).unwrap();
    let penalized = optimize_max_sharpe(&m, 0.0, 1.0, &SqpSettings::default()).unwrap();

    let hhi = |w: &[f64]| w.iter().map(|x| x * x).sum::<f64>();
    assert!(hhi(&penalized.weights) < hhi(&plain.weights));
    assert!(penalized.stats.sharpe <= plain.stats.sharpe + 1e-9);
  }

  #[test]
  fn repeated_runs_are_identical() {
    let m = model();
    let a = optimize_max_sharpe(&m, 0.02, 0.5, &SqpSettings::default()).unwrap();
    let b = optimize_max_sharpe(&m, 0.02, 0.5, &SqpSettings::default()).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn negative_penalty_is_rejected() {
    let err = optimize_max_sharpe(&model(), 0.0, -1.0, &SqpSettings::default()).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }
}
