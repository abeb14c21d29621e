//! Position ledger: open hedged positions, their composition and value.

mod book;
pub mod position;
pub mod sizing;

pub use book::{CloseResult, ExecutionReport, PairConfig, PositionLedger, RebalanceOutcome};
pub use position::{Position, PositionValuation, TradablePair, DEFAULT_HEALTH_FACTOR};
pub use sizing::BorrowSizing;
