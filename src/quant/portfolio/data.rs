//! # Portfolio Data Utilities
//!
//! $$
//! \Sigma_{ij} = \sigma_i \sigma_j \rho_{ij}
//! $$
//!
//! Return construction from a price panel and correlation/covariance estimation.

use chrono::NaiveDate;
use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Serialize;
use tracing::debug;

use super::types::ReturnModel;
use crate::error::PortfolioError;
use crate::error::Result;
use crate::market::PricePanel;

fn sample_mean(xs: &[f64]) -> f64 {
  if xs.is_empty() {
    0.0
  } else {
    xs.iter().sum::<f64>() / xs.len() as f64
  }
}

fn sample_std(xs: &[f64], mean: f64) -> f64 {
  if xs.len() < 2 {
    return 0.0;
  }
  let ss: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
  (ss / (xs.len() - 1) as f64).sqrt()
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
  let n = x.len().min(y.len());
  if n < 2 {
    return 0.0;
  }

  let mx = sample_mean(x);
  let my = sample_mean(y);

  let mut cov = 0.0;
  let mut sx = 0.0;
  let mut sy = 0.0;

  for i in 0..n {
    let dx = x[i] - mx;
    let dy = y[i] - my;
    cov += dx * dy;
    sx += dx * dx;
    sy += dy * dy;
  }

  let denom = (sx * sy).sqrt();
  if denom < 1e-15 {
    0.0
  } else {
    (cov / denom).clamp(-1.0, 1.0)
  }
}

/// Period-over-period percentage change of a price path.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
  prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Simple returns of every asset of a panel; the undefined first row is excluded.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnSeries {
  assets: Vec<String>,
  dates: Vec<NaiveDate>,
  returns: Vec<Vec<f64>>,
}

impl ReturnSeries {
  pub fn from_panel(panel: &PricePanel) -> Result<Self> {
    if panel.len() < 2 {
      return Err(PortfolioError::insufficient(format!(
        "need at least 2 aligned dates, got {}",
        panel.len()
      )));
    }

    Ok(Self {
      assets: panel.assets().to_vec(),
      dates: panel.dates()[1..].to_vec(),
      returns: panel.columns().iter().map(|c| simple_returns(c)).collect(),
    })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  /// Date of each return (the later date of each pair).
  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  /// Return columns, one per asset.
  pub fn columns(&self) -> &[Vec<f64>] {
    &self.returns
  }

  pub fn column(&self, i: usize) -> &[f64] {
    &self.returns[i]
  }

  /// Number of return observations.
  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  /// Per-date portfolio return `sum_i w_i r_{i,t}`.
  pub fn portfolio_returns(&self, weights: &[f64]) -> Result<Vec<f64>> {
    if weights.len() != self.assets.len() {
      return Err(PortfolioError::config(format!(
        "{} weights for {} assets",
        weights.len(),
        self.assets.len()
      )));
    }

    Ok(
      (0..self.len())
        .map(|t| {
          weights
            .iter()
            .zip(self.returns.iter())
            .map(|(w, col)| w * col[t])
            .sum()
        })
        .collect(),
    )
  }
}

/// Build a Pearson correlation matrix from aligned return series.
pub fn correlation_matrix(aligned_returns: &[Vec<f64>]) -> DMatrix<f64> {
  let n = aligned_returns.len();
  let mut corr = DMatrix::identity(n, n);

  for i in 0..n {
    for j in (i + 1)..n {
      let r = pearson(&aligned_returns[i], &aligned_returns[j]);
      corr[(i, j)] = r;
      corr[(j, i)] = r;
    }
  }

  corr
}

/// Build covariance matrix `S R S` from per-asset volatilities and a correlation matrix.
pub fn covariance_matrix(sigmas: &DVector<f64>, corr: &DMatrix<f64>) -> DMatrix<f64> {
  let s = DMatrix::from_diagonal(sigmas);
  &s * corr * &s
}

/// Correlation matrix implied by a covariance matrix.
pub fn corr_from_cov(cov: &DMatrix<f64>) -> DMatrix<f64> {
  let n = cov.nrows();
  DMatrix::from_fn(n, n, |i, j| {
    if i == j {
      return 1.0;
    }
    let denom = (cov[(i, i)].max(0.0) * cov[(j, j)].max(0.0)).sqrt();
    if denom > 1e-15 {
      (cov[(i, j)] / denom).clamp(-1.0, 1.0)
    } else {
      0.0
    }
  })
}

/// Ledoit-Wolf shrinkage toward a scaled identity.
///
/// Returns the shrunk covariance (same per-period units as the input) and the
/// shrinkage intensity in `[0, 1]`. The sample covariance being shrunk is the
/// maximum-likelihood (divide by `n`) estimate.
pub fn ledoit_wolf(aligned_returns: &[Vec<f64>]) -> Result<(DMatrix<f64>, f64)> {
  let p = aligned_returns.len();
  let n = aligned_returns.first().map(|c| c.len()).unwrap_or(0);
  if p == 0 || n < 2 {
    return Err(PortfolioError::insufficient(
      "Ledoit-Wolf shrinkage needs at least 2 observations",
    ));
  }

  let x = DMatrix::from_fn(n, p, |t, i| aligned_returns[i][t]);
  let means = x.row_mean();
  let centered = DMatrix::from_fn(n, p, |t, i| x[(t, i)] - means[i]);

  let nf = n as f64;
  let pf = p as f64;
  let emp_cov = centered.transpose() * &centered / nf;
  let mu = emp_cov.trace() / pf;

  let x2 = centered.map(|v| v * v);
  let beta_raw = (x2.transpose() * &x2).sum();
  let delta_raw = emp_cov.map(|v| v * v).sum();
  let beta = ((beta_raw / nf - delta_raw) / (pf * nf)).max(0.0);

  let mut delta = delta_raw - 2.0 * mu * emp_cov.trace() + pf * mu * mu;
  delta /= pf;

  let shrinkage = if delta <= 0.0 || beta == 0.0 {
    0.0
  } else {
    beta.min(delta) / delta
  };

  let target = DMatrix::<f64>::identity(p, p) * mu;
  Ok((emp_cov * (1.0 - shrinkage) + target * shrinkage, shrinkage))
}

/// Covariance estimator used by [`ReturnStatistics::estimate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum CovarianceEstimator {
  /// Sample covariance assembled as `S R S`.
  #[default]
  Sample,
  /// Ledoit-Wolf shrinkage toward `mu I`.
  LedoitWolf,
}

/// Descriptive moments of a return series.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnStatistics {
  pub assets: Vec<String>,
  /// Per-period mean return.
  pub mean: DVector<f64>,
  /// Per-period sample standard deviation.
  pub std_dev: DVector<f64>,
  pub correlation: DMatrix<f64>,
  /// Per-period covariance from the selected estimator.
  pub covariance: DMatrix<f64>,
  pub estimator: CovarianceEstimator,
  /// Ledoit-Wolf intensity, when that estimator was used.
  pub shrinkage: Option<f64>,
  pub observations: usize,
}

impl ReturnStatistics {
  pub fn estimate(returns: &ReturnSeries, estimator: CovarianceEstimator) -> Result<Self> {
    if returns.len() < 2 {
      return Err(PortfolioError::insufficient(format!(
        "need at least 2 return observations, got {}",
        returns.len()
      )));
    }

    let cols = returns.columns();
    let mean = DVector::from_iterator(cols.len(), cols.iter().map(|c| sample_mean(c)));
    let std_dev = DVector::from_iterator(
      cols.len(),
      cols.iter().zip(mean.iter()).map(|(c, m)| sample_std(c, *m)),
    );
    let correlation = correlation_matrix(cols);

    let (covariance, shrinkage) = match estimator {
      CovarianceEstimator::Sample => (covariance_matrix(&std_dev, &correlation), None),
      CovarianceEstimator::LedoitWolf => {
        let (cov, delta) = ledoit_wolf(cols)?;
        (cov, Some(delta))
      }
    };

    debug!(
      assets = cols.len(),
      observations = returns.len(),
      ?estimator,
      ?shrinkage,
      "estimated return statistics"
    );

    Ok(Self {
      assets: returns.assets().to_vec(),
      mean,
      std_dev,
      correlation,
      covariance,
      estimator,
      shrinkage,
      observations: returns.len(),
    })
  }

  /// Per-period return model for the optimizers.
  pub fn model(&self, periods_per_year: f64) -> Result<ReturnModel> {
    ReturnModel::new(
      self.assets.clone(),
      self.mean.clone(),
      self.covariance.clone(),
      periods_per_year,
    )
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;

  use super::*;

  fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 5, day).unwrap()
  }

  fn panel() -> PricePanel {
    PricePanel::new(
      vec!["AAA".into(), "BBB".into(), "CCC".into()],
      (1..=6).map(d).collect(),
      vec![
        vec![100.0, 101.0, 99.5, 102.0, 103.5, 103.0],
        vec![50.0, 50.5, 50.1, 49.8, 50.9, 51.3],
        vec![20.0, 19.6, 19.9, 20.4, 20.1, 20.8],
      ],
    )
    .unwrap()
  }

  fn direct_sample_cov(cols: &[Vec<f64>]) -> DMatrix<f64> {
    let n = cols[0].len() as f64;
    let m: Vec<f64> = cols.iter().map(|c| c.iter().sum::<f64>() / n).collect();
    DMatrix::from_fn(cols.len(), cols.len(), |i, j| {
      cols[i]
        .iter()
        .zip(cols[j].iter())
        .map(|(a, b)| (a - m[i]) * (b - m[j]))
        .sum::<f64>()
        / (n - 1.0)
    })
  }

  #[test]
  fn returns_drop_leading_row() {
    let r = ReturnSeries::from_panel(&panel()).unwrap();
    assert_eq!(r.len(), 5);
    assert_eq!(r.dates()[0], d(2));
    assert_abs_diff_eq!(r.column(0)[0], 0.01, epsilon = 1e-12);
  }

  #[test]
  fn single_date_is_insufficient() {
    let p = PricePanel::new(vec!["AAA".into()], vec![d(1)], vec![vec![1.0]]).unwrap();
    let err = ReturnSeries::from_panel(&p).unwrap_err();
    assert!(matches!(err, PortfolioError::InsufficientData(_)));
  }

  #[test]
  fn srs_covariance_matches_direct_sample_covariance() {
    let r = ReturnSeries::from_panel(&panel()).unwrap();
    let stats = ReturnStatistics::estimate(&r, CovarianceEstimator::Sample).unwrap();

    assert_relative_eq!(stats.covariance, direct_sample_cov(r.columns()), epsilon = 1e-15);
    for i in 0..3 {
      assert_abs_diff_eq!(stats.correlation[(i, i)], 1.0);
    }
    assert_relative_eq!(
      corr_from_cov(&stats.covariance),
      stats.correlation,
      epsilon = 1e-12
    );
  }

  #[test]
  fn covariance_matrix_scales_correlation() {
    let sigmas = DVector::from_vec(vec![0.2, 0.3]);
    let corr = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
    let cov = covariance_matrix(&sigmas, &corr);

    assert_abs_diff_eq!(cov[(0, 0)], 0.04, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[(1, 1)], 0.09, epsilon = 1e-12);
    assert_abs_diff_eq!(cov[(0, 1)], 0.03, epsilon = 1e-12);
  }

  #[test]
  fn ledoit_wolf_shrinks_toward_scaled_identity() {
    let r = ReturnSeries::from_panel(&panel()).unwrap();
    let (shrunk, delta) = ledoit_wolf(r.columns()).unwrap();

    assert!((0.0..=1.0).contains(&delta));
    assert_relative_eq!(shrunk.clone(), shrunk.transpose(), epsilon = 1e-18);

    let n = r.len() as f64;
    let mle = direct_sample_cov(r.columns()) * ((n - 1.0) / n);
    assert_abs_diff_eq!(shrunk.trace(), mle.trace(), epsilon = 1e-15);
    for i in 0..3 {
      for j in 0..3 {
        if i != j {
          assert!(shrunk[(i, j)].abs() <= mle[(i, j)].abs() + 1e-18);
        }
      }
    }
  }

  #[test]
  fn portfolio_returns_weight_each_column() {
    let r = ReturnSeries::from_panel(&panel()).unwrap();
    let pr = r.portfolio_returns(&[1.0, 0.0, 0.0]).unwrap();
    assert_eq!(pr, r.column(0).to_vec());
    assert!(r.portfolio_returns(&[1.0]).is_err());
  }
}
