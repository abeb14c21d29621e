//! Pluggable estimators for inputs the engine does not derive itself.
//!
//! The defaults are deliberately inert: a constant correlation and no fee
//! income. Integrations replace them without touching the control flow.

use rust_decimal::Decimal;

use crate::ledger::TradablePair;
use crate::market::PairId;
use crate::utils::Bps;

/// Correlation between a pair's two legs.
pub trait CorrelationEstimator: Send + Sync {
    fn correlation(&self, pair: &TradablePair) -> Bps;
}

/// Same correlation for every pair.
#[derive(Debug, Clone, Copy)]
pub struct ConstantCorrelation(pub Bps);

impl CorrelationEstimator for ConstantCorrelation {
    fn correlation(&self, _pair: &TradablePair) -> Bps {
        self.0
    }
}

/// Swap fees accrued by a position, in base units, harvested after rebalancing.
pub trait FeeCollector: Send + Sync {
    fn collect(&self, pair: &PairId) -> Decimal;
}

/// Collects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFees;

impl FeeCollector for NoFees {
    fn collect(&self, _pair: &PairId) -> Decimal {
        Decimal::ZERO
    }
}
