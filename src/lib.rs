//! # Delta-Neutral Vault
//!
//! Position, risk and strategy accounting engine for a delta-neutral yield
//! vault that deposits a stable base asset as collateral, borrows the risk
//! asset against it and keeps the two legs hedged.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `market`: Collaborator traits (lending, prices, swaps) and paper implementations
//! - `ledger`: Hedged positions, their valuation and lifecycle
//! - `strategy`: Pair scoring, allocation planning and rebalance timing
//! - `risk`: Health gating, the circuit breaker and emergency deleverage
//! - `vault`: Orchestration of one rebalance epoch under a single lock
//! - `persistence`: SQLite audit trail
//! - `utils`: Fixed-point scales and the engine clock

pub mod config;
pub mod error;
pub mod ledger;
pub mod market;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;
pub mod vault;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{ErrorKind, VaultError, VaultResult};
pub use vault::Vault;
