//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w}
//! $$
//!
//! Return estimation, portfolio optimization and backtesting for ETF baskets.

pub mod backtest;
pub mod black_litterman;
pub mod closed_form;
pub mod data;
pub mod engine;
pub mod linalg;
pub mod monte_carlo;
pub mod objective;
pub mod optimizers;
pub mod sqp;
pub mod types;

pub use backtest::BacktestConfig;
pub use backtest::BacktestReport;
pub use backtest::backtest;
pub use backtest::cumulative_returns;
pub use black_litterman::AbsoluteView;
pub use black_litterman::BlackLittermanConfig;
pub use black_litterman::BlackLittermanResult;
pub use black_litterman::ReturnComparison;
pub use black_litterman::ViewSet;
pub use black_litterman::black_litterman;
pub use black_litterman::market_implied_prior;
pub use black_litterman::market_implied_risk_aversion;
pub use black_litterman::market_weights;
pub use black_litterman::posterior;
pub use closed_form::TargetReturnSolution;
pub use closed_form::optimize_target_return;
pub use closed_form::solve_target_return;
pub use data::CovarianceEstimator;
pub use data::ReturnSeries;
pub use data::ReturnStatistics;
pub use data::correlation_matrix;
pub use data::covariance_matrix;
pub use data::ledoit_wolf;
pub use engine::PortfolioConfig;
pub use engine::PortfolioEngine;
pub use monte_carlo::MonteCarloResult;
pub use monte_carlo::SimulatedPortfolio;
pub use monte_carlo::simulate;
pub use monte_carlo::simulate_seeded;
pub use objective::MinVolatility;
pub use objective::NegativeSharpe;
pub use optimizers::optimize_max_sharpe;
pub use optimizers::optimize_min_volatility;
pub use sqp::SqpSettings;
pub use sqp::minimize_on_simplex;
pub use types::OptimizerMethod;
pub use types::PortfolioResult;
pub use types::PortfolioStats;
pub use types::ReturnModel;
