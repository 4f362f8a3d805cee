//! # Market Data
//!
//! $$
//! P_{i,t} \xrightarrow{\text{ffill}} \tilde P_{i,t},\qquad
//! t \in \bigcap_i \operatorname{dom}(\tilde P_i)
//! $$
//!
//! Price panels and the external collaborators that supply them.

pub mod panel;
pub mod provider;

pub use panel::PricePanel;
pub use panel::PriceSeries;
pub use provider::CachedPriceProvider;
pub use provider::FxProvider;
pub use provider::MarketCapProvider;
pub use provider::PriceProvider;
pub use provider::StaticMarketCaps;
pub use provider::StaticPriceProvider;
