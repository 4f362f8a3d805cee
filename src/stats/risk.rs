use serde::Serialize;
use statrs::statistics::Statistics;

use crate::error::PortfolioError;
use crate::error::Result;

/// Configuration for [`risk_metrics`].
#[derive(Debug, Clone, Copy)]
pub struct RiskConfig {
  /// Tail probability for VaR/CVaR (0.05 = 95% confidence).
  pub alpha: f64,
  /// Risk-free rate per period of the return series.
  pub risk_free: f64,
}

impl Default for RiskConfig {
  fn default() -> Self {
    Self {
      alpha: 0.05,
      risk_free: 0.0,
    }
  }
}

/// Descriptive risk/return statistics of one return series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskMetrics {
  pub mean: f64,
  /// Sample standard deviation (`n - 1`).
  pub std_dev: f64,
  /// Bias-corrected sample skewness.
  pub skewness: f64,
  /// Bias-corrected sample excess kurtosis.
  pub excess_kurtosis: f64,
  /// `alpha`-quantile of the returns (a return, so losses are negative).
  pub var: f64,
  /// Mean of the returns at or below `var`.
  pub cvar: f64,
  /// `(mean - risk_free) / std_dev`.
  pub sharpe: f64,
  /// `(mean - risk_free) / std(negative returns)`; `None` with fewer than two losses.
  pub sortino: Option<f64>,
}

/// Quantile with linear interpolation between order statistics.
pub fn percentile(xs: &[f64], q: f64) -> f64 {
  if xs.is_empty() {
    return f64::NAN;
  }
  let mut sorted = xs.to_vec();
  sorted.sort_by(|a, b| a.total_cmp(b));

  let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
  let lo = h.floor() as usize;
  let hi = h.ceil() as usize;
  sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Historical value at risk: the `alpha`-quantile of the returns.
pub fn historical_var(returns: &[f64], alpha: f64) -> f64 {
  percentile(returns, alpha)
}

/// Historical conditional VaR: mean return in the tail at or below the VaR.
pub fn historical_cvar(returns: &[f64], alpha: f64) -> f64 {
  let var = historical_var(returns, alpha);
  returns.iter().filter(|r| **r <= var).mean()
}

fn central_moments(xs: &[f64]) -> (f64, f64, f64) {
  let n = xs.len() as f64;
  let mean = xs.iter().mean();
  let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
  for &x in xs {
    let d = x - mean;
    let d2 = d * d;
    m2 += d2;
    m3 += d2 * d;
    m4 += d2 * d2;
  }
  (m2 / n, m3 / n, m4 / n)
}

/// Adjusted Fisher-Pearson skewness `G1`.
pub fn skewness(xs: &[f64]) -> f64 {
  let n = xs.len() as f64;
  let (m2, m3, _) = central_moments(xs);
  let g1 = m3 / m2.powf(1.5);
  g1 * (n * (n - 1.0)).sqrt() / (n - 2.0)
}

/// Bias-corrected excess kurtosis `G2`.
pub fn excess_kurtosis(xs: &[f64]) -> f64 {
  let n = xs.len() as f64;
  let (m2, _, m4) = central_moments(xs);
  let g2 = m4 / (m2 * m2) - 3.0;
  ((n + 1.0) * g2 + 6.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0))
}

/// Compute the descriptive statistics of a return series.
///
/// Needs at least four observations (bias-corrected kurtosis) with non-zero dispersion.
pub fn risk_metrics(returns: &[f64], cfg: RiskConfig) -> Result<RiskMetrics> {
  if returns.len() < 4 {
    return Err(PortfolioError::insufficient(format!(
      "risk metrics need at least 4 returns, got {}",
      returns.len()
    )));
  }
  if returns.iter().any(|r| !r.is_finite()) {
    return Err(PortfolioError::config("return series contains non-finite values"));
  }
  if !(cfg.alpha > 0.0 && cfg.alpha < 1.0) {
    return Err(PortfolioError::config(format!(
      "alpha must be in (0, 1), got {}",
      cfg.alpha
    )));
  }

  let mean = returns.iter().mean();
  let std_dev = returns.iter().std_dev();
  if std_dev <= 0.0 {
    return Err(PortfolioError::insufficient("return series has zero dispersion"));
  }

  let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
  let sortino = if losses.len() >= 2 {
    let downside = losses.iter().std_dev();
    (downside > 0.0).then(|| (mean - cfg.risk_free) / downside)
  } else {
    None
  };

  Ok(RiskMetrics {
    mean,
    std_dev,
    skewness: skewness(returns),
    excess_kurtosis: excess_kurtosis(returns),
    var: historical_var(returns, cfg.alpha),
    cvar: historical_cvar(returns, cfg.alpha),
    sharpe: (mean - cfg.risk_free) / std_dev,
    sortino,
  })
}
