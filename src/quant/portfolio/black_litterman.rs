//! # Black-Litterman
//!
//! $$
//! \pi = \delta\Sigma w_{mkt} + r_f,\qquad
//! M = \left[(\tau\Sigma)^{-1} + P^\top\Omega^{-1}P\right]^{-1}
//! $$
//!
//! $$
//! \mu_{BL} = M\left[(\tau\Sigma)^{-1}\pi + P^\top\Omega^{-1}Q\right],\qquad
//! \Sigma_{BL} = \Sigma + M
//! $$
//!
//! Blends the market-implied prior with absolute investor views whose confidence is given
//! as an interval, then allocates by maximum Sharpe on the posterior.

use std::collections::HashMap;

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::info;
use tracing::warn;

use super::data::simple_returns;
use super::linalg::spd_inverse;
use super::optimizers::optimize_max_sharpe;
use super::sqp::SqpSettings;
use super::types::PortfolioResult;
use super::types::ReturnModel;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::market::MarketCapProvider;

/// Default uncertainty scaling of the prior covariance.
pub const DEFAULT_TAU: f64 = 0.05;

/// Investor belief about the annual return of one asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AbsoluteView {
  pub asset: String,
  pub expected_return: f64,
  /// `(lower, upper)` bounds of the belief; half the width is the view's standard deviation.
  pub interval: (f64, f64),
}

impl AbsoluteView {
  /// Diagonal entry of `Omega` for this view.
  pub fn variance(&self) -> f64 {
    let half_width = (self.interval.1 - self.interval.0) / 2.0;
    half_width * half_width
  }
}

/// Ordered collection of absolute views.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ViewSet {
  views: Vec<AbsoluteView>,
}

/// Matrices of a view set over a fixed asset ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewMatrices {
  /// `k x n` pick matrix.
  pub pick: DMatrix<f64>,
  /// Expected returns of the `k` views.
  pub q: DVector<f64>,
  /// Diagonal of `Omega`.
  pub omega: DVector<f64>,
}

impl ViewSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a view on `asset`, replacing any earlier view on the same asset.
  pub fn with_view(
    mut self,
    asset: impl Into<String>,
    expected_return: f64,
    lower: f64,
    upper: f64,
  ) -> Self {
    let asset = asset.into();
    self.views.retain(|v| v.asset != asset);
    self.views.push(AbsoluteView {
      asset,
      expected_return,
      interval: (lower, upper),
    });
    self
  }

  pub fn views(&self) -> &[AbsoluteView] {
    &self.views
  }

  pub fn get(&self, asset: &str) -> Option<&AbsoluteView> {
    self.views.iter().find(|v| v.asset == asset)
  }

  pub fn len(&self) -> usize {
    self.views.len()
  }

  pub fn is_empty(&self) -> bool {
    self.views.is_empty()
  }

  /// Build `P`, `Q` and `diag(Omega)`. Rows follow the order of `assets`.
  pub fn matrices(&self, assets: &[String]) -> Result<ViewMatrices> {
    for v in &self.views {
      if !assets.contains(&v.asset) {
        return Err(PortfolioError::config(format!(
          "view on unknown asset {}",
          v.asset
        )));
      }
      let (lower, upper) = v.interval;
      if !(v.expected_return.is_finite() && lower.is_finite() && upper.is_finite()) {
        return Err(PortfolioError::config(format!(
          "view on {} has non-finite values",
          v.asset
        )));
      }
      if upper <= lower {
        return Err(PortfolioError::config(format!(
          "view on {} has an empty confidence interval ({lower}, {upper})",
          v.asset
        )));
      }
    }

    let rows: Vec<(usize, &AbsoluteView)> = assets
      .iter()
      .enumerate()
      .filter_map(|(i, a)| self.get(a).map(|v| (i, v)))
      .collect();

    let k = rows.len();
    let mut pick = DMatrix::zeros(k, assets.len());
    let mut q = DVector::zeros(k);
    let mut omega = DVector::zeros(k);
    for (row, (col, view)) in rows.into_iter().enumerate() {
      pick[(row, col)] = 1.0;
      q[row] = view.expected_return;
      omega[row] = view.variance();
    }

    Ok(ViewMatrices { pick, q, omega })
  }
}

/// Knobs of the Black-Litterman allocation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BlackLittermanConfig {
  pub tau: f64,
  /// Fixed risk aversion; `None` implies it from a market proxy.
  pub risk_aversion: Option<f64>,
  /// L2 penalty of the max-Sharpe allocation on the posterior.
  pub l2_gamma: f64,
}

impl Default for BlackLittermanConfig {
  fn default() -> Self {
    Self {
      tau: DEFAULT_TAU,
      risk_aversion: None,
      l2_gamma: 1.0,
    }
  }
}

/// Fetch capitalizations for `assets`. Assets the provider knows nothing about are left out.
pub fn fetch_market_caps(
  assets: &[String],
  provider: &dyn MarketCapProvider,
) -> Result<HashMap<String, f64>> {
  let mut caps = HashMap::with_capacity(assets.len());
  for asset in assets {
    if let Some(cap) = provider.market_cap(asset)? {
      caps.insert(asset.clone(), cap);
    }
  }
  Ok(caps)
}

/// Capitalization weights aligned to `assets`; missing capitalizations count as zero.
pub fn market_weights(assets: &[String], caps: &HashMap<String, f64>) -> Result<DVector<f64>> {
  let mut raw = DVector::zeros(assets.len());
  for (i, asset) in assets.iter().enumerate() {
    match caps.get(asset) {
      Some(&cap) if cap.is_finite() && cap >= 0.0 => raw[i] = cap,
      Some(&cap) => {
        return Err(PortfolioError::config(format!(
          "market cap of {asset} is {cap}"
        )));
      }
      None => warn!(asset = asset.as_str(), "no market cap, using zero weight"),
    }
  }

  let total = raw.sum();
  if total <= 0.0 {
    return Err(PortfolioError::config("all market caps are zero"));
  }
  Ok(raw / total)
}

/// `delta = (E[r] - r_f) / Var(r)` of a market proxy, both annualized.
pub fn market_implied_risk_aversion(
  market_prices: &[f64],
  risk_free: f64,
  periods_per_year: f64,
) -> Result<f64> {
  let returns = simple_returns(market_prices);
  if returns.len() < 2 {
    return Err(PortfolioError::insufficient(format!(
      "risk aversion needs at least 3 market prices, got {}",
      market_prices.len()
    )));
  }

  let mean = returns.iter().mean() * periods_per_year;
  let variance = returns.iter().variance() * periods_per_year;
  if !(variance.is_finite() && variance > 0.0) {
    return Err(PortfolioError::degenerate(
      "market proxy has zero return variance",
    ));
  }
  Ok((mean - risk_free) / variance)
}

/// Equilibrium returns implied by market weights.
pub fn market_implied_prior(
  risk_aversion: f64,
  cov: &DMatrix<f64>,
  market_weights: &DVector<f64>,
  risk_free: f64,
) -> DVector<f64> {
  (cov * market_weights * risk_aversion).add_scalar(risk_free)
}

/// Posterior moments.
#[derive(Clone, Debug, PartialEq)]
pub struct Posterior {
  pub returns: DVector<f64>,
  pub covariance: DMatrix<f64>,
}

/// Combine the prior with the views.
pub fn posterior(
  prior: &DVector<f64>,
  cov: &DMatrix<f64>,
  views: &ViewMatrices,
  tau: f64,
) -> Result<Posterior> {
  if !(tau.is_finite() && tau > 0.0) {
    return Err(PortfolioError::config(format!("tau must be positive, got {tau}")));
  }

  let tau_cov_inv = spd_inverse(&(cov * tau), "scaled prior covariance")?;
  let omega_inv = DMatrix::from_diagonal(&views.omega.map(|w| 1.0 / w));
  let pt_omega_inv = views.pick.transpose() * omega_inv;

  let precision = &tau_cov_inv + &pt_omega_inv * &views.pick;
  let m = spd_inverse(&precision, "posterior precision")?;
  let returns = &m * (&tau_cov_inv * prior + &pt_omega_inv * &views.q);
  let covariance = cov + &m;

  if returns.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
    return Err(PortfolioError::degenerate(
      "black-litterman posterior is not finite",
    ));
  }

  Ok(Posterior {
    returns,
    covariance: (&covariance + covariance.transpose()) * 0.5,
  })
}

/// Prior, posterior and view of one asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnComparison {
  pub asset: String,
  pub prior: f64,
  pub posterior: f64,
  pub view: Option<f64>,
}

/// Full output of a Black-Litterman allocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlackLittermanResult {
  pub market_weights: Vec<f64>,
  pub risk_aversion: f64,
  pub prior: Vec<f64>,
  /// Annual posterior model (`periods_per_year == 1`).
  pub posterior: ReturnModel,
  pub comparison: Vec<ReturnComparison>,
  /// Max-Sharpe weights on the posterior.
  pub allocation: PortfolioResult,
}

/// Run the whole pipeline on `model` (annualized internally).
pub fn black_litterman(
  model: &ReturnModel,
  market_weights: &DVector<f64>,
  risk_aversion: f64,
  views: &ViewSet,
  config: &BlackLittermanConfig,
  risk_free: f64,
  settings: &SqpSettings,
) -> Result<BlackLittermanResult> {
  if market_weights.len() != model.len() {
    return Err(PortfolioError::config(format!(
      "{} market weights for {} assets",
      market_weights.len(),
      model.len()
    )));
  }
  if !risk_aversion.is_finite() {
    return Err(PortfolioError::config("risk aversion is not finite"));
  }

  let annual = model.annualized();
  let prior = market_implied_prior(risk_aversion, &annual.covariance, market_weights, risk_free);
  let matrices = views.matrices(&annual.assets)?;
  let post = posterior(&prior, &annual.covariance, &matrices, config.tau)?;

  let comparison = annual
    .assets
    .iter()
    .enumerate()
    .map(|(i, asset)| ReturnComparison {
      asset: asset.clone(),
      prior: prior[i],
      posterior: post.returns[i],
      view: views.get(asset).map(|v| v.expected_return),
    })
    .collect();

  let posterior_model =
    ReturnModel::new(annual.assets.clone(), post.returns, post.covariance, 1.0)?;
  let allocation = optimize_max_sharpe(&posterior_model, risk_free, config.l2_gamma, settings)?;

  info!(
    views = views.len(),
    risk_aversion,
    tau = config.tau,
    sharpe = allocation.stats.sharpe,
    "black-litterman allocation"
  );

  Ok(BlackLittermanResult {
    market_weights: market_weights.iter().copied().collect(),
    risk_aversion,
    prior: prior.iter().copied().collect(),
    posterior: posterior_model,
    comparison,
    allocation,
  })
}
