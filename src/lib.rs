//! # ETF Allocation
//!
//! $$
//! P_{t_0:t_1} \xrightarrow{\ \text{estimate}\ } (\hat\mu, \hat\Sigma)
//! \xrightarrow{\ \text{optimize}\ } \mathbf{w}^\*
//! $$
//!
//! Return/covariance estimation and long-only or target-return allocation of ETF baskets:
//! closed-form Lagrangian, Monte-Carlo search, SQP (minimum volatility, maximum Sharpe)
//! and Black-Litterman, plus descriptive risk statistics and backtests.

pub mod error;
pub mod market;
pub mod quant;
pub mod stats;

pub use error::PortfolioError;
pub use error::Result;
