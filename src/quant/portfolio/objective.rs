//! # Portfolio Objectives
//!
//! $$
//! f_{\mathrm{vol}}(w) = w^\top\Sigma w,\qquad
//! f_{\mathrm{sharpe}}(w) = -\frac{w^\top\mu - r_f}{\sqrt{w^\top\Sigma w}}
//!   + \gamma\lVert w\rVert_2^2
//! $$
//!
//! Pure objectives with analytic gradients, evaluated on annual moments.

use argmin::core::CostFunction;
use argmin::core::Error;
use argmin::core::Gradient;
use nalgebra::DMatrix;
use nalgebra::DVector;

/// Portfolio variance. Minimizing it yields the minimum volatility portfolio.
#[derive(Clone, Debug)]
pub struct MinVolatility {
  pub cov: DMatrix<f64>,
}

impl CostFunction for MinVolatility {
  type Param = DVector<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, Error> {
    Ok(w.dot(&(&self.cov * w)))
  }
}

impl Gradient for MinVolatility {
  type Param = DVector<f64>;
  type Gradient = DVector<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, Error> {
    Ok(&self.cov * w * 2.0)
  }
}

/// Negative Sharpe ratio with an optional L2 penalty on the weights.
#[derive(Clone, Debug)]
pub struct NegativeSharpe {
  pub mean: DVector<f64>,
  pub cov: DMatrix<f64>,
  pub risk_free: f64,
  /// Penalty `gamma * |w|^2`; zero disables it.
  pub l2_gamma: f64,
}

impl NegativeSharpe {
  fn moments(&self, w: &DVector<f64>) -> Result<(f64, f64, DVector<f64>), Error> {
    let cov_w = &self.cov * w;
    let variance = w.dot(&cov_w);
    if !(variance.is_finite() && variance > 0.0) {
      return Err(anyhow::anyhow!(
        "portfolio variance {variance:e} is not positive"
      ));
    }
    Ok((w.dot(&self.mean) - self.risk_free, variance.sqrt(), cov_w))
  }
}

impl CostFunction for NegativeSharpe {
  type Param = DVector<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> Result<Self::Output, Error> {
    let (excess, sigma, _) = self.moments(w)?;
    Ok(-excess / sigma + self.l2_gamma * w.norm_squared())
  }
}

impl Gradient for NegativeSharpe {
  type Param = DVector<f64>;
  type Gradient = DVector<f64>;

  fn gradient(&self, w: &Self::Param) -> Result<Self::Gradient, Error> {
    let (excess, sigma, cov_w) = self.moments(w)?;
    Ok(-&self.mean / sigma + cov_w * (excess / sigma.powi(3)) + w * (2.0 * self.l2_gamma))
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  fn sharpe() -> NegativeSharpe {
    NegativeSharpe {
      mean: DVector::from_vec(vec![0.08, 0.12, 0.05]),
      cov: DMatrix::from_row_slice(
        3,
        3,
        &[0.04, 0.006, 0.002, 0.006, 0.09, 0.01, 0.002, 0.01, 0.01],
      ),
      risk_free: 0.02,
      l2_gamma: 0.5,
    }
  }

  fn numeric_gradient<F: CostFunction<Param = DVector<f64>, Output = f64>>(
    f: &F,
    w: &DVector<f64>,
  ) -> DVector<f64> {
    let h = 1e-6;
    DVector::from_fn(w.len(), |i, _| {
      let mut up = w.clone();
      let mut down = w.clone();
      up[i] += h;
      down[i] -= h;
      (f.cost(&up).unwrap() - f.cost(&down).unwrap()) / (2.0 * h)
    })
  }

  #[test]
  fn sharpe_gradient_matches_finite_differences() {
    let f = sharpe();
    let w = DVector::from_vec(vec![0.2, 0.5, 0.3]);
    let analytic = f.gradient(&w).unwrap();
    let numeric = numeric_gradient(&f, &w);
    for i in 0..3 {
      assert_abs_diff_eq!(analytic[i], numeric[i], epsilon = 1e-6);
    }
  }

  #[test]
  fn variance_gradient_matches_finite_differences() {
    let f = MinVolatility { cov: sharpe().cov };
    let w = DVector::from_vec(vec![0.6, 0.1, 0.3]);
    let analytic = f.gradient(&w).unwrap();
    let numeric = numeric_gradient(&f, &w);
    for i in 0..3 {
      assert_abs_diff_eq!(analytic[i], numeric[i], epsilon = 1e-8);
    }
  }

  #[test]
  fn sharpe_cost_without_penalty() {
    let mut f = sharpe();
    f.l2_gamma = 0.0;
    let w = DVector::from_vec(vec![1.0, 0.0, 0.0]);
    assert_abs_diff_eq!(f.cost(&w).unwrap(), -(0.08 - 0.02) / 0.2, epsilon = 1e-12);
  }

  #[test]
  fn riskless_weights_are_an_error() {
    let f = NegativeSharpe {
      mean: DVector::from_vec(vec![0.01]),
      cov: DMatrix::zeros(1, 1),
      risk_free: 0.0,
      l2_gamma: 0.0,
    };
    assert!(f.cost(&DVector::from_vec(vec![1.0])).is_err());
  }
}
