//! # Errors
//!
//! $$
//! \text{input} \mapsto \mathbf{w} \ \text{or}\ \varepsilon,\qquad
//! \varepsilon \in \{\text{data}, \text{degenerate}, \text{convergence}, \text{config}\}
//! $$
//!
//! Every failure of the optimization core is surfaced to the caller. A portfolio built on a
//! NaN or a non-converged iterate is never returned as a success.

use thiserror::Error;

/// Failure taxonomy of the estimation and optimization core.
#[derive(Error, Debug)]
pub enum PortfolioError {
  /// Too few aligned observations to estimate returns or risk.
  #[error("insufficient data: {0}")]
  InsufficientData(String),
  /// Singular or near-singular covariance, or a vanishing Lagrangian denominator.
  #[error("degenerate optimization: {0}")]
  DegenerateOptimization(String),
  /// The SQP solver stopped before reaching a stationary point.
  #[error("optimization did not converge after {iterations} iterations: {reason}")]
  OptimizationDidNotConverge {
    iterations: usize,
    reason: String,
    /// Last feasible iterate reached by the solver.
    last_iterate: Vec<f64>,
  },
  /// Infeasible target, malformed view set or mismatched asset lists.
  #[error("invalid configuration: {0}")]
  InvalidConfiguration(String),
  /// Failure reported by an external data collaborator.
  #[error("data provider error: {0}")]
  Provider(#[from] anyhow::Error),
}

impl PortfolioError {
  pub(crate) fn insufficient(msg: impl Into<String>) -> Self {
    Self::InsufficientData(msg.into())
  }

  pub(crate) fn degenerate(msg: impl Into<String>) -> Self {
    Self::DegenerateOptimization(msg.into())
  }

  pub(crate) fn config(msg: impl Into<String>) -> Self {
    Self::InvalidConfiguration(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, PortfolioError>;
