//! # Monte-Carlo Portfolio Search
//!
//! $$
//! \tilde w_i \sim U[0,1),\qquad w = \tilde w / \mathbf{1}^\top\tilde w,\qquad
//! w^\* = \arg\max_{k\le N} S(w_k)
//! $$
//!
//! Heuristic random search over the long-only simplex. The draws are not uniform on the
//! simplex and the best draw is only an approximation of the maximum Sharpe portfolio.

use nalgebra::DVector;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::Distribution;
use rand_distr::Uniform;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use super::types::PortfolioResult;
use super::types::PortfolioStats;
use super::types::ReturnModel;
use crate::error::PortfolioError;
use crate::error::Result;

/// Number of portfolios drawn when nothing else is configured.
pub const DEFAULT_SIMULATIONS: usize = 10_000;

/// Sums below this are redrawn instead of normalized.
const MIN_DRAW_SUM: f64 = 1e-12;

/// One simulated portfolio of the cloud.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulatedPortfolio {
  pub weights: Vec<f64>,
  pub stats: PortfolioStats,
}

/// Outcome of a Monte-Carlo search.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonteCarloResult {
  /// Highest Sharpe portfolio; the earliest draw wins ties.
  pub best: PortfolioResult,
  /// Position of `best` in `portfolios`.
  pub best_index: usize,
  /// Every draw, in draw order, for frontier plots.
  pub portfolios: Vec<SimulatedPortfolio>,
}

fn draw_weights<R: Rng + ?Sized>(n: usize, uniform: &Uniform<f64>, rng: &mut R) -> DVector<f64> {
  loop {
    let raw = DVector::from_fn(n, |_, _| uniform.sample(rng));
    let sum = raw.sum();
    if sum > MIN_DRAW_SUM {
      return raw / sum;
    }
  }
}

/// Draw `simulations` random long-only portfolios and keep the best Sharpe ratio.
pub fn simulate<R: Rng + ?Sized>(
  model: &ReturnModel,
  simulations: usize,
  risk_free: f64,
  rng: &mut R,
) -> Result<MonteCarloResult> {
  if simulations == 0 {
    return Err(PortfolioError::config(
      "Monte-Carlo search needs at least one simulation",
    ));
  }

  let n = model.len();
  let uniform = Uniform::new(0.0, 1.0);
  let mut portfolios = Vec::with_capacity(simulations);
  let mut best_index = 0;
  let mut best_sharpe = f64::NEG_INFINITY;

  for k in 0..simulations {
    let w = draw_weights(n, &uniform, rng);
    let stats = model.stats(&w, risk_free);
    if stats.sharpe > best_sharpe {
      best_sharpe = stats.sharpe;
      best_index = k;
    }
    portfolios.push(SimulatedPortfolio {
      weights: w.iter().copied().collect(),
      stats,
    });
  }

  let best_point = &portfolios[best_index];
  let best = PortfolioResult {
    assets: model.assets.clone(),
    weights: best_point.weights.clone(),
    stats: best_point.stats,
  };

  debug!(simulations, best_index, "monte-carlo search finished");
  info!(
    expected_return = best.stats.expected_return,
    volatility = best.stats.volatility,
    sharpe = best.stats.sharpe,
    "monte-carlo max sharpe portfolio"
  );

  Ok(MonteCarloResult {
    best,
    best_index,
    portfolios,
  })
}

/// [`simulate`] with a `StdRng` seeded from `seed`.
pub fn simulate_seeded(
  model: &ReturnModel,
  simulations: usize,
  risk_free: f64,
  seed: u64,
) -> Result<MonteCarloResult> {
  let mut rng = StdRng::seed_from_u64(seed);
  simulate(model, simulations, risk_free, &mut rng)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::quant::portfolio::types::TRADING_DAYS;

  fn model() -> ReturnModel {
    ReturnModel::from_slices(
      &["EMB", "XLE", "SPXL"],
      &[0.0002, 0.0003, 0.0009],
      &[
        vec![0.00004, 0.00001, 0.00002],
        vec![0.00001, 0.0003, 0.0002],
        vec![0.00002, 0.0002, 0.001],
      ],
      TRADING_DAYS,
    )
    .unwrap()
  }

  #[test]
  fn draws_live_on_the_simplex() {
    let result = simulate_seeded(&model(), 500, 0.0, 7).unwrap();
    assert_eq!(result.portfolios.len(), 500);
    for p in &result.portfolios {
      assert_abs_diff_eq!(p.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
      assert!(p.weights.iter().all(|w| (0.0..=1.0).contains(w)));
    }
  }

  #[test]
  fn best_is_the_first_maximum() {
    let result = simulate_seeded(&model(), 2_000, 0.01, 11).unwrap();
    let best = result.best.stats.sharpe;
    for (k, p) in result.portfolios.iter().enumerate() {
      if k < result.best_index {
        assert!(p.stats.sharpe < best);
      } else {
        assert!(p.stats.sharpe <= best);
      }
    }
    assert_eq!(result.best.weights, result.portfolios[result.best_index].weights);
  }

  #[test]
  fn seeded_runs_are_reproducible() {
    let a = simulate_seeded(&model(), 300, 0.0, 42).unwrap();
    let b = simulate_seeded(&model(), 300, 0.0, 42).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn best_sharpe_is_monotone_in_the_number_of_draws() {
    let short = simulate_seeded(&model(), 1_000, 0.0, 3).unwrap();
    let long = simulate_seeded(&model(), 100_000, 0.0, 3).unwrap();

    assert_eq!(short.portfolios[..], long.portfolios[..1_000]);
    assert!(long.best.stats.sharpe >= short.best.stats.sharpe);
  }

  #[test]
  fn zero_simulations_are_rejected() {
    let err = simulate_seeded(&model(), 0, 0.0, 1).unwrap_err();
    assert!(matches!(err, PortfolioError::InvalidConfiguration(_)));
  }
}
