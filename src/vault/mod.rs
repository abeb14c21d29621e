//! Top-level vault: the single entry point that sequences a rebalance.

mod audit;
mod orchestrator;

pub use audit::EpochRecord;
pub use orchestrator::{Vault, VaultState};
