//! # Data Providers
//!
//! $$
//! \text{fetch} : (\text{assets}, t_0, t_1) \mapsto \{P_{i,t}\}
//! $$
//!
//! Seams for the external price, exchange-rate and capitalization sources, plus a
//! per-run memoizing wrapper so one download feeds every optimizer.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::debug;

use super::panel::PricePanel;
use super::panel::PriceSeries;
use crate::error::Result;

/// Historical adjusted-close source.
pub trait PriceProvider {
  /// Fetch one series per requested asset over `[start, end]`.
  fn fetch(
    &self,
    assets: &[String],
    start: NaiveDate,
    end: NaiveDate,
  ) -> anyhow::Result<Vec<PriceSeries>>;
}

/// Exchange-rate source used to re-denominate a panel.
pub trait FxProvider {
  /// Rate series for a currency `pair` (for example `USDMXN=X`).
  fn rates(
    &self,
    pair: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> anyhow::Result<Vec<(NaiveDate, f64)>>;
}

/// Capitalization source for Black-Litterman market weights.
pub trait MarketCapProvider {
  /// Capitalization of `asset`, or `None` when the source has no figure for it.
  fn market_cap(&self, asset: &str) -> anyhow::Result<Option<f64>>;
}

/// In-memory price source.
#[derive(Clone, Debug, Default)]
pub struct StaticPriceProvider {
  series: HashMap<String, Vec<(NaiveDate, f64)>>,
}

impl StaticPriceProvider {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_series(mut self, asset: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Self {
    self.series.insert(asset.into(), points);
    self
  }
}

impl PriceProvider for StaticPriceProvider {
  fn fetch(
    &self,
    assets: &[String],
    start: NaiveDate,
    end: NaiveDate,
  ) -> anyhow::Result<Vec<PriceSeries>> {
    assets
      .iter()
      .map(|asset| {
        let points = self
          .series
          .get(asset)
          .ok_or_else(|| anyhow!("no price history for {asset}"))?;
        Ok(PriceSeries::new(
          asset.clone(),
          points
            .iter()
            .filter(|(d, _)| *d >= start && *d <= end)
            .copied()
            .collect(),
        ))
      })
      .collect()
  }
}

impl FxProvider for StaticPriceProvider {
  fn rates(
    &self,
    pair: &str,
    start: NaiveDate,
    end: NaiveDate,
  ) -> anyhow::Result<Vec<(NaiveDate, f64)>> {
    let mut series = self.fetch(&[pair.to_string()], start, end)?;
    Ok(series.pop().map(|s| s.points).unwrap_or_default())
  }
}

/// In-memory capitalization table.
#[derive(Clone, Debug, Default)]
pub struct StaticMarketCaps(pub HashMap<String, f64>);

impl MarketCapProvider for StaticMarketCaps {
  fn market_cap(&self, asset: &str) -> anyhow::Result<Option<f64>> {
    Ok(self.0.get(asset).copied())
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct FetchKey {
  assets: Vec<String>,
  start: NaiveDate,
  end: NaiveDate,
}

/// Memoizes aligned panels by `(assets, start, end)` for the lifetime of one run.
pub struct CachedPriceProvider<P> {
  inner: P,
  cache: RefCell<HashMap<FetchKey, PricePanel>>,
  misses: Cell<usize>,
}

impl<P: PriceProvider> CachedPriceProvider<P> {
  pub fn new(inner: P) -> Self {
    Self {
      inner,
      cache: RefCell::new(HashMap::new()),
      misses: Cell::new(0),
    }
  }

  /// Aligned panel for `assets` over `[start, end]`, downloaded at most once per key.
  pub fn panel(&self, assets: &[String], start: NaiveDate, end: NaiveDate) -> Result<PricePanel> {
    let key = FetchKey {
      assets: assets.to_vec(),
      start,
      end,
    };
    if let Some(panel) = self.cache.borrow().get(&key) {
      debug!(?assets, "price panel served from cache");
      return Ok(panel.clone());
    }

    let series = self.inner.fetch(assets, start, end)?;
    let panel = PricePanel::from_series(series)?;
    self.misses.set(self.misses.get() + 1);
    self.cache.borrow_mut().insert(key, panel.clone());
    Ok(panel)
  }

  /// Number of fetches that reached the wrapped provider.
  pub fn fetch_count(&self) -> usize {
    self.misses.get()
  }

  pub fn inner(&self) -> &P {
    &self.inner
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::PortfolioError;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
  }

  fn provider() -> StaticPriceProvider {
    StaticPriceProvider::new()
      .with_series("AAA", vec![(d(1), 1.0), (d(2), 1.1), (d(3), 1.2)])
      .with_series("BBB", vec![(d(1), 5.0), (d(2), 4.9), (d(3), 5.1)])
  }

  #[test]
  fn static_provider_filters_date_range() {
    let out = provider().fetch(&["AAA".into()], d(2), d(3)).unwrap();
    assert_eq!(out[0].points, vec![(d(2), 1.1), (d(3), 1.2)]);
  }

  #[test]
  fn unknown_asset_is_a_provider_error() {
    let cached = CachedPriceProvider::new(provider());
    let err = cached.panel(&["ZZZ".into()], d(1), d(3)).unwrap_err();
    assert!(matches!(err, PortfolioError::Provider(_)));
  }

  #[test]
  fn repeated_requests_hit_the_cache() {
    let cached = CachedPriceProvider::new(provider());
    let assets = vec!["AAA".to_string(), "BBB".to_string()];

    let first = cached.panel(&assets, d(1), d(3)).unwrap();
    let second = cached.panel(&assets, d(1), d(3)).unwrap();
    assert_eq!(first, second);
    assert_eq!(cached.fetch_count(), 1);

    cached.panel(&assets, d(2), d(3)).unwrap();
    assert_eq!(cached.fetch_count(), 2);
  }
}
