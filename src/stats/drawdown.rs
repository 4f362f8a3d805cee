use chrono::NaiveDate;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::error::Result;

/// Running peak and relative drawdown of a value path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawdownSeries {
  pub high_water_mark: Vec<f64>,
  /// `(p - peak) / peak`, zero or negative.
  pub drawdown: Vec<f64>,
}

/// Worst peak-to-valley decline of a dated value path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaxDrawdown {
  /// Largest decline as a positive fraction of the peak.
  pub max_drawdown: f64,
  pub peak: NaiveDate,
  pub valley: NaiveDate,
  /// First date at or after the valley where the peak value is regained.
  pub recovery: Option<NaiveDate>,
  /// Calendar days from peak to valley.
  pub decline_days: i64,
  /// Calendar days from valley to recovery.
  pub recovery_days: Option<i64>,
  /// Calendar days from peak to recovery.
  pub total_days: Option<i64>,
}

pub fn drawdown(prices: &[f64]) -> DrawdownSeries {
  let mut high_water_mark = Vec::with_capacity(prices.len());
  let mut dd = Vec::with_capacity(prices.len());
  let mut peak = f64::NEG_INFINITY;

  for &p in prices {
    peak = peak.max(p);
    high_water_mark.push(peak);
    dd.push(if peak > 0.0 { (p - peak) / peak } else { 0.0 });
  }

  DrawdownSeries {
    high_water_mark,
    drawdown: dd,
  }
}

/// Locate the maximum drawdown, its peak and, if it happened, the recovery.
///
/// Ties resolve to the earliest date.
pub fn max_drawdown(dates: &[NaiveDate], prices: &[f64]) -> Result<MaxDrawdown> {
  if prices.is_empty() {
    return Err(PortfolioError::insufficient("drawdown of an empty value path"));
  }
  if dates.len() != prices.len() {
    return Err(PortfolioError::config(format!(
      "{} dates for {} values",
      dates.len(),
      prices.len()
    )));
  }

  let series = drawdown(prices);
  let mut valley = 0;
  for (i, d) in series.drawdown.iter().enumerate() {
    if *d < series.drawdown[valley] {
      valley = i;
    }
  }

  let mut peak = 0;
  for (i, p) in prices.iter().enumerate().take(valley + 1) {
    if *p > prices[peak] {
      peak = i;
    }
  }

  let recovery = if valley == peak {
    None
  } else {
    (valley + 1..prices.len()).find(|&i| prices[i] >= prices[peak])
  };

  let decline_days = (dates[valley] - dates[peak]).num_days();
  let recovery_days = recovery.map(|r| (dates[r] - dates[valley]).num_days());
  let total_days = recovery.map(|r| (dates[r] - dates[peak]).num_days());

  Ok(MaxDrawdown {
    max_drawdown: -series.drawdown[valley],
    peak: dates[peak],
    valley: dates[valley],
    recovery: recovery.map(|r| dates[r]),
    decline_days,
    recovery_days,
    total_days,
  })
}
