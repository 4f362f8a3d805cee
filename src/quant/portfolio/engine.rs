//! # Portfolio Engine
//!
//! $$
//! \mathbf{w}^\* = \operatorname{Optimize}(\hat\mu, \hat\Sigma),\qquad
//! (\hat\mu, \hat\Sigma) = \operatorname{Estimate}(P_{t_0:t_1})
//! $$
//!
//! High-level orchestration: one configuration, one memoized price download, every
//! optimizer.

use std::cell::RefCell;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use super::backtest::BacktestConfig;
use super::backtest::BacktestReport;
use super::backtest::backtest;
use super::black_litterman::BlackLittermanConfig;
use super::black_litterman::BlackLittermanResult;
use super::black_litterman::ViewSet;
use super::black_litterman::black_litterman;
use super::black_litterman::fetch_market_caps;
use super::black_litterman::market_implied_risk_aversion;
use super::black_litterman::market_weights;
use super::closed_form::optimize_target_return;
use super::data::CovarianceEstimator;
use super::data::ReturnSeries;
use super::data::ReturnStatistics;
use super::monte_carlo::DEFAULT_SIMULATIONS;
use super::monte_carlo::MonteCarloResult;
use super::monte_carlo::simulate;
use super::monte_carlo::simulate_seeded;
use super::optimizers::optimize_max_sharpe;
use super::optimizers::optimize_min_volatility;
use super::sqp::SqpSettings;
use super::types::OptimizerMethod;
use super::types::PortfolioResult;
use super::types::ReturnModel;
use super::types::TRADING_DAYS;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::market::CachedPriceProvider;
use crate::market::FxProvider;
use crate::market::MarketCapProvider;
use crate::market::PricePanel;
use crate::market::PriceProvider;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortfolioConfig {
  /// Tickers of the basket, in output order.
  pub assets: Vec<String>,
  pub start: NaiveDate,
  pub end: NaiveDate,
  /// Annual target of the closed-form optimizer.
  pub target_annual_return: f64,
  /// Draws of the Monte-Carlo search.
  pub simulations: usize,
  /// Annual risk-free rate used in every Sharpe ratio.
  pub risk_free_rate: f64,
  pub periods_per_year: f64,
  pub estimator: CovarianceEstimator,
  pub sqp: SqpSettings,
  /// L2 penalty of the plain max-Sharpe optimizer.
  pub l2_gamma: f64,
  /// Fixed Monte-Carlo seed; `None` draws from the thread RNG.
  pub seed: Option<u64>,
  pub views: ViewSet,
  pub black_litterman: BlackLittermanConfig,
  /// Ticker whose prices imply the market risk aversion.
  pub market_proxy: String,
}

impl Default for PortfolioConfig {
  fn default() -> Self {
    Self {
      assets: ["EMB", "XLE", "SPXL", "EEM", "SHV"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      start: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
      end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default(),
      target_annual_return: 0.10,
      simulations: DEFAULT_SIMULATIONS,
      risk_free_rate: 0.0,
      periods_per_year: TRADING_DAYS,
      estimator: CovarianceEstimator::Sample,
      sqp: SqpSettings::default(),
      l2_gamma: 0.0,
      seed: None,
      views: ViewSet::default(),
      black_litterman: BlackLittermanConfig::default(),
      market_proxy: "SPY".to_string(),
    }
  }
}

struct FxConversion {
  provider: Box<dyn FxProvider>,
  pair: String,
  rates: RefCell<Option<Vec<(NaiveDate, f64)>>>,
}

/// Single entry point for one portfolio run.
///
/// Prices are downloaded once per `(assets, start, end)` and shared by every optimizer.
pub struct PortfolioEngine<P> {
  config: PortfolioConfig,
  prices: CachedPriceProvider<P>,
  fx: Option<FxConversion>,
  market_caps: Option<Box<dyn MarketCapProvider>>,
}

impl<P: PriceProvider> PortfolioEngine<P> {
  /// Construct a new engine with explicit configuration.
  pub fn new(config: PortfolioConfig, provider: P) -> Result<Self> {
    if config.assets.is_empty() {
      return Err(PortfolioError::config("no assets configured"));
    }
    if config.start >= config.end {
      return Err(PortfolioError::config(format!(
        "start {} is not before end {}",
        config.start, config.end
      )));
    }
    if !(config.periods_per_year.is_finite() && config.periods_per_year > 0.0) {
      return Err(PortfolioError::config(format!(
        "periods per year must be positive, got {}",
        config.periods_per_year
      )));
    }

    Ok(Self {
      config,
      prices: CachedPriceProvider::new(provider),
      fx: None,
      market_caps: None,
    })
  }

  /// Re-denominate every price with the rates of `pair` (for example `USDMXN=X`).
  pub fn with_fx(mut self, provider: impl FxProvider + 'static, pair: impl Into<String>) -> Self {
    self.fx = Some(FxConversion {
      provider: Box::new(provider),
      pair: pair.into(),
      rates: RefCell::new(None),
    });
    self
  }

  /// Capitalization source for the Black-Litterman market weights.
  pub fn with_market_caps(mut self, provider: impl MarketCapProvider + 'static) -> Self {
    self.market_caps = Some(Box::new(provider));
    self
  }

  /// Borrow engine configuration.
  pub fn config(&self) -> &PortfolioConfig {
    &self.config
  }

  /// Number of downloads that reached the price provider.
  pub fn fetch_count(&self) -> usize {
    self.prices.fetch_count()
  }

  /// Aligned prices of the configured basket, converted if an FX pair is set.
  pub fn panel(&self) -> Result<PricePanel> {
    let panel = self
      .prices
      .panel(&self.config.assets, self.config.start, self.config.end)?;
    self.convert(panel)
  }

  /// Apply the FX conversion, if any, to `panel`.
  fn convert(&self, panel: PricePanel) -> Result<PricePanel> {
    let Some(fx) = &self.fx else {
      return Ok(panel);
    };
    if fx.rates.borrow().is_none() {
      let rates = fx
        .provider
        .rates(&fx.pair, self.config.start, self.config.end)?;
      *fx.rates.borrow_mut() = Some(rates);
    }
    let rates = fx.rates.borrow();
    panel.convert_currency(rates.as_deref().unwrap_or_default())
  }

  pub fn returns(&self) -> Result<ReturnSeries> {
    ReturnSeries::from_panel(&self.panel()?)
  }

  /// Mean, dispersion, correlation and covariance of the basket's returns.
  pub fn statistics(&self) -> Result<ReturnStatistics> {
    ReturnStatistics::estimate(&self.returns()?, self.config.estimator)
  }

  /// Per-period return model of the basket.
  pub fn model(&self) -> Result<ReturnModel> {
    self.statistics()?.model(self.config.periods_per_year)
  }

  /// Dispatch to the selected optimizer.
  pub fn optimize(&self, method: OptimizerMethod) -> Result<PortfolioResult> {
    match method {
      OptimizerMethod::TargetReturn => self.closed_form(),
      OptimizerMethod::MonteCarlo => Ok(self.monte_carlo()?.best),
      OptimizerMethod::MinVolatility => self.min_volatility(),
      OptimizerMethod::MaxSharpe => self.max_sharpe(),
      OptimizerMethod::BlackLitterman => Ok(self.black_litterman()?.allocation),
    }
  }

  pub fn closed_form(&self) -> Result<PortfolioResult> {
    optimize_target_return(
      &self.model()?,
      self.config.target_annual_return,
      self.config.risk_free_rate,
    )
  }

  pub fn monte_carlo(&self) -> Result<MonteCarloResult> {
    let model = self.model()?;
    match self.config.seed {
      Some(seed) => simulate_seeded(
        &model,
        self.config.simulations,
        self.config.risk_free_rate,
        seed,
      ),
      None => simulate(
        &model,
        self.config.simulations,
        self.config.risk_free_rate,
        &mut rand::thread_rng(),
      ),
    }
  }

  pub fn min_volatility(&self) -> Result<PortfolioResult> {
    optimize_min_volatility(&self.model()?, self.config.risk_free_rate, &self.config.sqp)
  }

  pub fn max_sharpe(&self) -> Result<PortfolioResult> {
    optimize_max_sharpe(
      &self.model()?,
      self.config.risk_free_rate,
      self.config.l2_gamma,
      &self.config.sqp,
    )
  }

  /// Market-implied prior blended with the configured views, allocated by max Sharpe.
  ///
  /// Needs a capitalization source ([`Self::with_market_caps`]). The risk aversion is
  /// taken from the configuration or implied from the market proxy's prices.
  pub fn black_litterman(&self) -> Result<BlackLittermanResult> {
    let provider = self.market_caps.as_deref().ok_or_else(|| {
      PortfolioError::config("black-litterman needs a market capitalization source")
    })?;

    let model = self.model()?;
    let caps = fetch_market_caps(&model.assets, provider)?;
    let weights = market_weights(&model.assets, &caps)?;
    let bl = &self.config.black_litterman;

    let delta = match bl.risk_aversion {
      Some(delta) => delta,
      None => {
        let proxy = self.convert(self.prices.panel(
          std::slice::from_ref(&self.config.market_proxy),
          self.config.start,
          self.config.end,
        )?)?;
        market_implied_risk_aversion(
          proxy.column(0),
          self.config.risk_free_rate,
          self.config.periods_per_year,
        )?
      }
    };
    info!(risk_aversion = delta, proxy = %self.config.market_proxy, "market risk aversion");

    black_litterman(
      &model,
      &weights,
      delta,
      &self.config.views,
      bl,
      self.config.risk_free_rate,
      &self.config.sqp,
    )
  }

  /// Evaluate `weights` over the configured window.
  pub fn backtest(&self, weights: &[f64]) -> Result<BacktestReport> {
    backtest(
      &self.panel()?,
      weights,
      &BacktestConfig {
        risk_free: self.config.risk_free_rate,
        periods_per_year: self.config.periods_per_year,
        ..BacktestConfig::default()
      },
    )
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use approx::assert_abs_diff_eq;
  use rand::SeedableRng;
  use rand::rngs::StdRng;
  use rand_distr::Distribution;
  use rand_distr::Normal;

  use super::*;
  use crate::market::StaticMarketCaps;
  use crate::market::StaticPriceProvider;

  const TICKERS: [(&str, f64, f64); 5] = [
    ("EMB", 0.0002, 0.006),
    ("XLE", 0.0003, 0.018),
    ("SPXL", 0.0012, 0.032),
    ("EEM", 0.0001, 0.015),
    ("SHV", 0.00003, 0.0004),
  ];

  fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
  }

  fn provider(days: u64) -> StaticPriceProvider {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut provider = StaticPriceProvider::new();
    for (ticker, drift, vol) in TICKERS.iter().chain([("SPY", 0.0005, 0.011)].iter()) {
      let shock = Normal::new(*drift, *vol).unwrap();
      let mut price = 100.0;
      let points = (0..days)
        .map(|i| {
          if i > 0 {
            price *= 1.0 + shock.sample(&mut rng);
          }
          (start() + chrono::Days::new(i), price)
        })
        .collect();
      provider = provider.with_series(*ticker, points);
    }
    provider
  }

  fn config() -> PortfolioConfig {
    PortfolioConfig {
      start: start(),
      end: start() + chrono::Days::new(600),
      simulations: 2_000,
      risk_free_rate: 0.016,
      seed: Some(7),
      black_litterman: BlackLittermanConfig {
        risk_aversion: Some(2.5),
        ..BlackLittermanConfig::default()
      },
      ..PortfolioConfig::default()
    }
  }

  fn caps() -> StaticMarketCaps {
    StaticMarketCaps(HashMap::from([
      ("EMB".to_string(), 1.6e10),
      ("XLE".to_string(), 3.5e10),
      ("SPXL".to_string(), 4.0e9),
      ("EEM".to_string(), 1.8e10),
      ("SHV".to_string(), 2.0e10),
    ]))
  }

  #[test]
  fn one_download_feeds_every_optimizer() {
    let engine = PortfolioEngine::new(config(), provider(500)).unwrap();

    engine.statistics().unwrap();
    engine.closed_form().unwrap();
    engine.monte_carlo().unwrap();
    engine.min_volatility().unwrap();
    assert_eq!(engine.fetch_count(), 1);
  }

  #[test]
  fn every_method_returns_a_fully_invested_portfolio() {
    let engine = PortfolioEngine::new(config(), provider(500))
      .unwrap()
      .with_market_caps(caps());

    for method in [
      OptimizerMethod::TargetReturn,
      OptimizerMethod::MonteCarlo,
      OptimizerMethod::MinVolatility,
      OptimizerMethod::MaxSharpe,
      OptimizerMethod::BlackLitterman,
    ] {
      let result = engine.optimize(method).unwrap();
      assert_eq!(result.assets, engine.config().assets);
      assert_abs_diff_eq!(result.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }
  }

  #[test]
  fn black_litterman_needs_market_caps() {
    let engine = PortfolioEngine::new(config(), provider(300)).unwrap();
    let err = engine.optimize(OptimizerMethod::BlackLitterman).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }

  #[test]
  fn risk_aversion_is_implied_from_the_proxy() {
    let mut cfg = config();
    cfg.black_litterman.risk_aversion = None;
    cfg.views = ViewSet::new().with_view("SPXL", 0.55, 0.5, 0.8);
    let engine = PortfolioEngine::new(cfg, provider(400))
      .unwrap()
      .with_market_caps(caps());

    let result = engine.black_litterman().unwrap();
    assert!(result.risk_aversion.is_finite());
    assert_eq!(engine.fetch_count(), 2);
    assert_eq!(result.comparison[2].view, Some(0.55));
  }

  #[test]
  fn constant_exchange_rate_leaves_returns_unchanged() {
    let days = 200;
    let rates = (0..days).map(|i| (start() + chrono::Days::new(i), 17.5)).collect();
    let fx = StaticPriceProvider::new().with_series("USDMXN=X", rates);

    let plain = PortfolioEngine::new(config(), provider(days)).unwrap();
    let converted = PortfolioEngine::new(config(), provider(days))
      .unwrap()
      .with_fx(fx, "USDMXN=X");

    let a = plain.statistics().unwrap();
    let b = converted.statistics().unwrap();
    assert_abs_diff_eq!(a.mean, b.mean, epsilon = 1e-12);
    assert_abs_diff_eq!(converted.panel().unwrap().column(0)[0], 100.0 * 17.5, epsilon = 1e-9);
  }

  #[test]
  fn proxy_prices_share_the_basket_currency() {
    let days = 400;
    let rates: Vec<(NaiveDate, f64)> = (0..days)
      .map(|i| (start() + chrono::Days::new(i), 17.0 * (1.0 + 0.1 * (i as f64 / 15.0).sin())))
      .collect();
    let fx = || StaticPriceProvider::new().with_series("USDMXN=X", rates.clone());

    let mut cfg = config();
    cfg.black_litterman.risk_aversion = None;
    let engine = PortfolioEngine::new(cfg.clone(), provider(days))
      .unwrap()
      .with_fx(fx(), "USDMXN=X")
      .with_market_caps(caps());
    let delta = engine.black_litterman().unwrap().risk_aversion;

    let proxy_cfg = PortfolioConfig {
      assets: vec!["SPY".into()],
      ..cfg
    };
    let proxy = PortfolioEngine::new(proxy_cfg.clone(), provider(days))
      .unwrap()
      .with_fx(fx(), "USDMXN=X")
      .panel()
      .unwrap();
    let expected = market_implied_risk_aversion(proxy.column(0), 0.016, TRADING_DAYS).unwrap();
    assert_abs_diff_eq!(delta, expected, epsilon = 1e-12);

    let raw = PortfolioEngine::new(proxy_cfg, provider(days)).unwrap().panel().unwrap();
    let unconverted = market_implied_risk_aversion(raw.column(0), 0.016, TRADING_DAYS).unwrap();
    assert!((delta - unconverted).abs() > 1e-6);
  }

  #[test]
  fn backtest_uses_the_configured_window() {
    let engine = PortfolioEngine::new(config(), provider(300)).unwrap();
    let report = engine.backtest(&[0.2; 5]).unwrap();
    assert_eq!(report.dates.len(), 300);
    assert_eq!(report.value[0], 1.0);
  }

  #[test]
  fn invalid_windows_are_rejected() {
    let cfg = PortfolioConfig {
      start: start(),
      end: start(),
      ..config()
    };
    assert!(matches!(
      PortfolioEngine::new(cfg, provider(10)),
      Err(PortfolioError::InvalidConfiguration(_))
    ));
  }
}
