//! # Price Panel
//!
//! $$
//! \tilde P_{i,t} = P_{i,\max\{s \le t : P_{i,s}\ \text{observed}\}}
//! $$
//!
//! Aligned adjusted-close prices over a common, strictly increasing date index.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;

/// Raw observations for one asset as returned by a price provider.
#[derive(Clone, Debug, Default)]
pub struct PriceSeries {
  /// Asset identifier (ticker).
  pub asset: String,
  /// `(date, adjusted close)` observations, in any order.
  pub points: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
  pub fn new(asset: impl Into<String>, points: Vec<(NaiveDate, f64)>) -> Self {
    Self {
      asset: asset.into(),
      points,
    }
  }
}

fn is_valid_price(p: f64) -> bool {
  p.is_finite() && p > 0.0
}

/// Asset-by-date price matrix, stored one column per asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PricePanel {
  assets: Vec<String>,
  dates: Vec<NaiveDate>,
  prices: Vec<Vec<f64>>,
}

impl PricePanel {
  /// Build a panel from already aligned columns.
  pub fn new(assets: Vec<String>, dates: Vec<NaiveDate>, prices: Vec<Vec<f64>>) -> Result<Self> {
    if assets.is_empty() {
      return Err(PortfolioError::config("price panel needs at least one asset"));
    }
    if assets.len() != prices.len() {
      return Err(PortfolioError::config(format!(
        "{} assets but {} price columns",
        assets.len(),
        prices.len()
      )));
    }
    let mut seen = HashSet::new();
    for a in &assets {
      if !seen.insert(a.as_str()) {
        return Err(PortfolioError::config(format!("duplicate asset {a}")));
      }
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
      return Err(PortfolioError::config(
        "panel dates must be strictly increasing",
      ));
    }
    for (asset, col) in assets.iter().zip(prices.iter()) {
      if col.len() != dates.len() {
        return Err(PortfolioError::config(format!(
          "{asset} has {} prices for {} dates",
          col.len(),
          dates.len()
        )));
      }
      if let Some(p) = col.iter().find(|p| !is_valid_price(**p)) {
        return Err(PortfolioError::config(format!(
          "{asset} has non-positive or non-finite price {p}"
        )));
      }
    }

    Ok(Self {
      assets,
      dates,
      prices,
    })
  }

  /// Align raw provider series on the union of their dates.
  ///
  /// Each asset is forward-filled across dates it did not trade; rows where some asset
  /// still has no value (before its first observation) are dropped. Non-finite and
  /// non-positive quotes are treated as missing.
  pub fn from_series(series: Vec<PriceSeries>) -> Result<Self> {
    if series.is_empty() {
      return Err(PortfolioError::config("price panel needs at least one asset"));
    }

    let mut union = BTreeSet::new();
    let mut observed: Vec<BTreeMap<NaiveDate, f64>> = Vec::with_capacity(series.len());
    for s in &series {
      let map: BTreeMap<NaiveDate, f64> = s
        .points
        .iter()
        .filter(|(_, p)| is_valid_price(*p))
        .copied()
        .collect();
      union.extend(map.keys().copied());
      observed.push(map);
    }

    let mut dates = Vec::with_capacity(union.len());
    let mut prices: Vec<Vec<f64>> = vec![Vec::with_capacity(union.len()); series.len()];
    let mut last: Vec<Option<f64>> = vec![None; series.len()];
    let mut dropped = 0usize;

    for date in union {
      for (i, map) in observed.iter().enumerate() {
        if let Some(&p) = map.get(&date) {
          last[i] = Some(p);
        }
      }

      if last.iter().all(Option::is_some) {
        dates.push(date);
        for (col, p) in prices.iter_mut().zip(last.iter()) {
          col.push(p.unwrap_or_default());
        }
      } else {
        dropped += 1;
      }
    }

    if dropped > 0 {
      warn!(dropped, "dropped leading dates not covered by every asset");
    }
    if dates.is_empty() {
      return Err(PortfolioError::insufficient(
        "no date is covered by every asset",
      ));
    }
    debug!(assets = series.len(), rows = dates.len(), "aligned price panel");

    Self::new(series.into_iter().map(|s| s.asset).collect(), dates, prices)
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  /// Number of aligned dates.
  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  /// Price column of the `i`-th asset.
  pub fn column(&self, i: usize) -> &[f64] {
    &self.prices[i]
  }

  pub fn columns(&self) -> &[Vec<f64>] {
    &self.prices
  }

  /// Price column of `asset`, if present.
  pub fn prices(&self, asset: &str) -> Option<&[f64]> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.prices[i].as_slice())
  }

  /// Convert every price with a per-date exchange rate.
  ///
  /// The panel and the rate series are inner-joined on dates; dates missing from either
  /// side are dropped rather than filled.
  pub fn convert_currency(&self, rates: &[(NaiveDate, f64)]) -> Result<Self> {
    let fx: BTreeMap<NaiveDate, f64> = rates
      .iter()
      .filter(|(_, r)| is_valid_price(*r))
      .copied()
      .collect();

    let mut dates = Vec::new();
    let mut prices: Vec<Vec<f64>> = vec![Vec::new(); self.assets.len()];
    for (t, date) in self.dates.iter().enumerate() {
      let Some(rate) = fx.get(date) else {
        continue;
      };
      dates.push(*date);
      for (col, src) in prices.iter_mut().zip(self.prices.iter()) {
        col.push(src[t] * rate);
      }
    }

    if dates.is_empty() {
      return Err(PortfolioError::insufficient(
        "exchange-rate series shares no date with the price panel",
      ));
    }
    debug!(
      kept = dates.len(),
      dropped = self.dates.len() - dates.len(),
      "converted panel currency"
    );

    Self::new(self.assets.clone(), dates, prices)
  }

  /// Every column rebased to start at 1.
  pub fn normalized(&self) -> Vec<Vec<f64>> {
    self
      .prices
      .iter()
      .map(|col| match col.first() {
        Some(&p0) => col.iter().map(|p| p / p0).collect(),
        None => Vec::new(),
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
  }

  #[test]
  fn forward_fills_gaps_and_drops_leading_rows() {
    let panel = PricePanel::from_series(vec![
      PriceSeries::new("AAA", vec![(d(2), 10.0), (d(3), 11.0), (d(5), 12.0)]),
      PriceSeries::new("BBB", vec![(d(3), 20.0), (d(4), 21.0), (d(5), f64::NAN)]),
    ])
    .unwrap();

    assert_eq!(panel.dates(), &[d(3), d(4), d(5)]);
    assert_eq!(panel.prices("AAA").unwrap(), &[11.0, 11.0, 12.0]);
    assert_eq!(panel.prices("BBB").unwrap(), &[20.0, 21.0, 21.0]);
  }

  #[test]
  fn unordered_input_is_sorted() {
    let panel = PricePanel::from_series(vec![PriceSeries::new(
      "AAA",
      vec![(d(5), 3.0), (d(1), 1.0), (d(3), 2.0)],
    )])
    .unwrap();

    assert_eq!(panel.dates(), &[d(1), d(3), d(5)]);
    assert_eq!(panel.column(0), &[1.0, 2.0, 3.0]);
  }

  #[test]
  fn disjoint_series_have_no_common_row() {
    let err = PricePanel::from_series(vec![
      PriceSeries::new("AAA", vec![]),
      PriceSeries::new("BBB", vec![(d(1), 1.0)]),
    ])
    .unwrap_err();

    assert!(matches!(err, PortfolioError::InsufficientData(_)));
  }

  #[test]
  fn currency_conversion_inner_joins_dates() {
    let panel = PricePanel::from_series(vec![PriceSeries::new(
      "AAA",
      vec![(d(1), 10.0), (d(2), 11.0), (d(3), 12.0)],
    )])
    .unwrap();

    let converted = panel
      .convert_currency(&[(d(2), 17.0), (d(3), 18.0), (d(4), 19.0)])
      .unwrap();

    assert_eq!(converted.dates(), &[d(2), d(3)]);
    assert_eq!(converted.column(0), &[187.0, 216.0]);
  }

  #[test]
  fn rejects_duplicate_assets() {
    let err = PricePanel::new(
      vec!["AAA".into(), "AAA".into()],
      vec![d(1)],
      vec![vec![1.0], vec![2.0]],
    )
    .unwrap_err();

    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }

  #[test]
  fn normalized_columns_start_at_one() {
    let panel = PricePanel::new(
      vec!["AAA".into()],
      vec![d(1), d(2)],
      vec![vec![4.0, 5.0]],
    )
    .unwrap();

    assert_eq!(panel.normalized(), vec![vec![1.0, 1.25]]);
  }
}
