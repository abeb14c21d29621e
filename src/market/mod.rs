//! External collaborators of the engine.
//!
//! The core talks to lending markets, price and volatility feeds, swap
//! venues and a congestion feed only through the traits in [`traits`].
//! [`paper`] provides in-process implementations for simulation and tests.

pub mod paper;
mod traits;
mod types;

pub use traits::{CongestionSource, LendingMarket, PriceSource, SwapQuote, VolatilitySource};
pub use types::{AccountId, MarketError, PairId, TokenId};

#[cfg(test)]
pub use traits::{
    MockCongestionSource, MockLendingMarket, MockPriceSource, MockSwapQuote, MockVolatilitySource,
};
