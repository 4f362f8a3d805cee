//! # Stats
//!
//! $$
//! \mathrm{VaR}_\alpha = -q_\alpha(r),\qquad
//! \mathrm{DD}_t = \frac{P_t - \max_{s\le t}P_s}{\max_{s\le t}P_s}
//! $$
//!
pub mod drawdown;
pub mod risk;

pub use drawdown::drawdown;
pub use drawdown::max_drawdown;
pub use drawdown::DrawdownSeries;
pub use drawdown::MaxDrawdown;
pub use risk::risk_metrics;
pub use risk::RiskConfig;
pub use risk::RiskMetrics;
