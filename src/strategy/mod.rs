//! Strategy engine.
//!
//! Contains the logic for:
//! - Pair whitelisting and decayed market metadata
//! - Scoring and capped allocation across pairs
//! - Rebalance timing gates and portfolio delta

mod allocator;
mod engine;
pub mod estimators;
mod pairs;
mod rebalancer;

pub use allocator::{
    allocation_for_risk_level, score_pair, AllocationEntry, AllocationPlan, PairAllocator, RiskLevel,
    RiskLimits,
};
pub use engine::StrategyEngine;
pub use estimators::{ConstantCorrelation, CorrelationEstimator, FeeCollector, NoFees};
pub use pairs::{decayed_volume, PairMetadata, PairRegistry};
pub use rebalancer::{RebalanceDecision, RebalancePolicy};
