//! # Backtest
//!
//! $$
//! r_{p,t} = \sum_i w_i r_{i,t},\qquad V_t = \prod_{s\le t}(1 + r_{p,s})
//! $$
//!
//! Buy-and-rebalance evaluation of fixed weights over a price panel.

use chrono::NaiveDate;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::debug;

use super::data::ReturnSeries;
use super::types::TRADING_DAYS;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::market::PricePanel;
use crate::stats::MaxDrawdown;
use crate::stats::RiskConfig;
use crate::stats::RiskMetrics;
use crate::stats::max_drawdown;
use crate::stats::risk_metrics;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BacktestConfig {
  /// Annual risk-free rate.
  pub risk_free: f64,
  pub periods_per_year: f64,
  /// Tail probability of the VaR/CVaR figures.
  pub alpha: f64,
}

impl Default for BacktestConfig {
  fn default() -> Self {
    Self {
      risk_free: 0.0,
      periods_per_year: TRADING_DAYS,
      alpha: 0.05,
    }
  }
}

/// Performance of a weight vector over a price panel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BacktestReport {
  pub assets: Vec<String>,
  pub weights: Vec<f64>,
  /// Panel dates; `value[0]` sits on the first one.
  pub dates: Vec<NaiveDate>,
  /// Portfolio return per period, one fewer than `dates`.
  pub returns: Vec<f64>,
  /// Growth of one unit invested on the first date.
  pub value: Vec<f64>,
  pub annual_return: f64,
  pub cumulative_return: f64,
  pub annual_volatility: f64,
  pub sharpe: f64,
  /// Per-period statistics of `returns`.
  pub risk: RiskMetrics,
  pub drawdown: MaxDrawdown,
}

/// Running `prod(1 + r) - 1`.
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
  let mut growth = 1.0;
  returns
    .iter()
    .map(|r| {
      growth *= 1.0 + r;
      growth - 1.0
    })
    .collect()
}

pub fn backtest(
  panel: &PricePanel,
  weights: &[f64],
  cfg: &BacktestConfig,
) -> Result<BacktestReport> {
  if weights.iter().any(|w| !w.is_finite()) {
    return Err(PortfolioError::config("weights must be finite"));
  }
  if !(cfg.periods_per_year.is_finite() && cfg.periods_per_year > 0.0) {
    return Err(PortfolioError::config(format!(
      "periods per year must be positive, got {}",
      cfg.periods_per_year
    )));
  }

  let series = ReturnSeries::from_panel(panel)?;
  let returns = series.portfolio_returns(weights)?;

  let mut value = Vec::with_capacity(returns.len() + 1);
  value.push(1.0);
  value.extend(cumulative_returns(&returns).into_iter().map(|c| 1.0 + c));

  let risk = risk_metrics(
    &returns,
    RiskConfig {
      alpha: cfg.alpha,
      risk_free: cfg.risk_free / cfg.periods_per_year,
    },
  )?;

  let annual_return = returns.iter().mean() * cfg.periods_per_year;
  let annual_volatility = risk.std_dev * cfg.periods_per_year.sqrt();
  let sharpe = if annual_volatility > 1e-15 {
    (annual_return - cfg.risk_free) / annual_volatility
  } else {
    0.0
  };
  let cumulative_return = value.last().copied().unwrap_or(1.0) - 1.0;
  let drawdown = max_drawdown(panel.dates(), &value)?;

  debug!(
    periods = returns.len(),
    annual_return,
    annual_volatility,
    max_drawdown = drawdown.max_drawdown,
    "backtest finished"
  );

  Ok(BacktestReport {
    assets: panel.assets().to_vec(),
    weights: weights.to_vec(),
    dates: panel.dates().to_vec(),
    returns,
    value,
    annual_return,
    cumulative_return,
    annual_volatility,
    sharpe,
    risk,
    drawdown,
  })
}
