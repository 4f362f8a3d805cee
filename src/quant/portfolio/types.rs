//! # Portfolio Types
//!
//! $$
//! \mu_p = \mathbf{w}^\top\mu,\qquad \sigma_p = \sqrt{\mathbf{w}^\top \Sigma \mathbf{w}},\qquad
//! S = \frac{\mu_p - r_f}{\sigma_p}
//! $$
//!
//! Shared enums, the return model every optimizer consumes and result containers.

use std::collections::BTreeMap;
use std::str::FromStr;

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Trading days used to annualize daily statistics.
pub const TRADING_DAYS: f64 = 252.0;

/// Supported portfolio construction methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerMethod {
  /// Closed-form minimum variance for a fixed target return (short sales allowed).
  TargetReturn,
  /// Best Sharpe ratio among uniformly drawn simplex portfolios.
  MonteCarlo,
  /// Long-only minimum volatility via SQP.
  MinVolatility,
  /// Long-only maximum Sharpe ratio via SQP.
  MaxSharpe,
  /// Black-Litterman posterior returns followed by a maximum Sharpe solve.
  BlackLitterman,
}

impl FromStr for OptimizerMethod {
  type Err = PortfolioError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_lowercase().as_str() {
      "target" | "target-return" | "closed-form" | "lagrange" => Ok(Self::TargetReturn),
      "mc" | "monte-carlo" | "montecarlo" | "simulation" => Ok(Self::MonteCarlo),
      "min-vol" | "min-volatility" | "minvol" | "min-variance" => Ok(Self::MinVolatility),
      "max-sharpe" | "maxsharpe" | "sharpe" | "tangency" => Ok(Self::MaxSharpe),
      "bl" | "black-litterman" | "blacklitterman" => Ok(Self::BlackLitterman),
      other => Err(PortfolioError::config(format!("unknown optimizer method `{other}`"))),
    }
  }
}

/// Annualized performance of one weight vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PortfolioStats {
  /// Annualized expected return.
  pub expected_return: f64,
  /// Annualized volatility.
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, zero for a riskless portfolio.
  pub sharpe: f64,
}

impl PortfolioStats {
  /// Evaluate `w` against per-period moments, scaling by `periods_per_year`.
  pub fn compute(
    weights: &DVector<f64>,
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    risk_free: f64,
    periods_per_year: f64,
  ) -> Self {
    let expected_return = weights.dot(mean) * periods_per_year;
    let variance = weights.dot(&(cov * weights)) * periods_per_year;
    let volatility = variance.max(0.0).sqrt();
    let sharpe = if volatility > 1e-15 {
      (expected_return - risk_free) / volatility
    } else {
      0.0
    };

    Self {
      expected_return,
      volatility,
      sharpe,
    }
  }
}

/// Expected returns and covariance over a fixed asset ordering.
///
/// `mean` and `covariance` are per period (daily for price panels); `periods_per_year`
/// converts them to annual figures.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnModel {
  pub assets: Vec<String>,
  pub mean: DVector<f64>,
  pub covariance: DMatrix<f64>,
  pub periods_per_year: f64,
}

impl ReturnModel {
  pub fn new(
    assets: Vec<String>,
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    periods_per_year: f64,
  ) -> Result<Self> {
    let n = assets.len();
    if n == 0 {
      return Err(PortfolioError::config("return model needs at least one asset"));
    }
    if mean.len() != n || covariance.nrows() != n || covariance.ncols() != n {
      return Err(PortfolioError::config(format!(
        "{n} assets but mean has {} entries and covariance is {}x{}",
        mean.len(),
        covariance.nrows(),
        covariance.ncols()
      )));
    }
    if !(periods_per_year.is_finite() && periods_per_year > 0.0) {
      return Err(PortfolioError::config(format!(
        "periods per year must be positive, got {periods_per_year}"
      )));
    }
    if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
      return Err(PortfolioError::degenerate(
        "return model contains non-finite moments",
      ));
    }
    if (0..n).any(|i| covariance[(i, i)] < 0.0) {
      return Err(PortfolioError::degenerate(
        "covariance has a negative variance on its diagonal",
      ));
    }

    Ok(Self {
      assets,
      mean,
      covariance,
      periods_per_year,
    })
  }

  /// Build from plain slices, as in the rest of the quant module.
  pub fn from_slices(
    assets: &[&str],
    mean: &[f64],
    cov: &[Vec<f64>],
    periods_per_year: f64,
  ) -> Result<Self> {
    let n = mean.len();
    if cov.len() != n || cov.iter().any(|row| row.len() != n) {
      return Err(PortfolioError::config("covariance must be square and match mean"));
    }
    Self::new(
      assets.iter().map(|a| a.to_string()).collect(),
      DVector::from_column_slice(mean),
      DMatrix::from_fn(n, n, |i, j| cov[i][j]),
      periods_per_year,
    )
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  /// Same model expressed in annual units (`periods_per_year == 1`).
  pub fn annualized(&self) -> Self {
    Self {
      assets: self.assets.clone(),
      mean: &self.mean * self.periods_per_year,
      covariance: &self.covariance * self.periods_per_year,
      periods_per_year: 1.0,
    }
  }

  /// Annualized statistics of `weights` under this model.
  pub fn stats(&self, weights: &DVector<f64>, risk_free: f64) -> PortfolioStats {
    PortfolioStats::compute(
      weights,
      &self.mean,
      &self.covariance,
      risk_free,
      self.periods_per_year,
    )
  }

  /// Wrap a weight vector into a result with its statistics.
  pub fn result(&self, weights: DVector<f64>, risk_free: f64) -> PortfolioResult {
    let stats = self.stats(&weights, risk_free);
    PortfolioResult {
      assets: self.assets.clone(),
      weights: weights.iter().copied().collect(),
      stats,
    }
  }
}

/// Output of a portfolio optimization run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PortfolioResult {
  /// Asset ordering of `weights`.
  pub assets: Vec<String>,
  /// Final portfolio weights (fractions, not percent).
  pub weights: Vec<f64>,
  /// Annualized performance of `weights`.
  pub stats: PortfolioStats,
}

impl PortfolioResult {
  pub fn weight(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.weights[i])
  }

  /// Asset → weight table for the presentation layer.
  pub fn allocation(&self) -> BTreeMap<String, f64> {
    self
      .assets
      .iter()
      .cloned()
      .zip(self.weights.iter().copied())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn method_names_parse() {
    let parse = |s: &str| s.parse::<OptimizerMethod>().unwrap();
    assert_eq!(parse("Black-Litterman"), OptimizerMethod::BlackLitterman);
    assert_eq!(parse("min-vol"), OptimizerMethod::MinVolatility);
    assert_eq!(parse("mc"), OptimizerMethod::MonteCarlo);
    assert_eq!(parse("target"), OptimizerMethod::TargetReturn);
    assert_eq!(parse("MAX-SHARPE"), OptimizerMethod::MaxSharpe);
  }

  #[test]
  fn misspelled_method_is_rejected() {
    let err = "min-volatilty".parse::<OptimizerMethod>().unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }

  #[test]
  fn stats_are_annualized() {
    let model = ReturnModel::from_slices(
      &["A", "B"],
      &[0.001, 0.0005],
      &[vec![0.0001, 0.0], vec![0.0, 0.0004]],
      TRADING_DAYS,
    )
    .unwrap();
    let w = DVector::from_vec(vec![0.5, 0.5]);
    let stats = model.stats(&w, 0.02);

    assert_abs_diff_eq!(stats.expected_return, 0.189, epsilon = 1e-12);
    let vol = (0.25 * 0.0005_f64 * 252.0).sqrt();
    assert_abs_diff_eq!(stats.volatility, vol, epsilon = 1e-12);
    assert_abs_diff_eq!(stats.sharpe, (0.189 - 0.02) / vol, epsilon = 1e-12);

    let annual = model.annualized().stats(&w, 0.02);
    assert_abs_diff_eq!(annual.sharpe, stats.sharpe, epsilon = 1e-12);
  }

  #[test]
  fn riskless_portfolio_has_zero_sharpe() {
    let model = ReturnModel::from_slices(&["CASH"], &[0.0001], &[vec![0.0]], TRADING_DAYS).unwrap();
    let stats = model.stats(&DVector::from_vec(vec![1.0]), 0.0);
    assert_eq!(stats.volatility, 0.0);
    assert_eq!(stats.sharpe, 0.0);
  }

  #[test]
  fn mismatched_dimensions_are_rejected() {
    let err = ReturnModel::from_slices(&["A", "B"], &[0.1, 0.2], &[vec![0.1]], 1.0).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }

  #[test]
  fn allocation_maps_assets_to_weights() {
    let result = PortfolioResult {
      assets: vec!["A".into(), "B".into()],
      weights: vec![0.25, 0.75],
      stats: PortfolioStats::default(),
    };
    assert_eq!(result.weight("B"), Some(0.75));
    assert_eq!(result.allocation().get("A"), Some(&0.25));
  }
}
