//! Epoch audit trail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::market::PairId;

/// Before/after record of one completed rebalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u64,
    /// Portfolio delta in USD before execution
    pub delta_before: Decimal,
    pub delta_after: Decimal,
    pub total_value: Decimal,
    pub rebalanced_pairs: Vec<PairId>,
    /// Base units harvested from rebalanced pairs
    pub fees_collected: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl EpochRecord {
    /// How much closer to neutral the epoch moved the portfolio, USD.
    pub fn delta_reduction(&self) -> Decimal {
        self.delta_before.abs() - self.delta_after.abs()
    }

    pub fn emit(&self) {
        info!(
            target: "vault_event",
            event = "EpochAdvanced",
            epoch = self.epoch,
            delta_before = %self.delta_before,
            delta_after = %self.delta_after,
            total_value = %self.total_value,
            pairs = self.rebalanced_pairs.len(),
            "EpochAdvanced"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_delta_reduction_uses_magnitudes() {
        let record = EpochRecord {
            epoch: 1,
            delta_before: dec!(-10_000),
            delta_after: dec!(250),
            total_value: dec!(1_000_000),
            rebalanced_pairs: vec![PairId::new("USDC-WETH")],
            fees_collected: Decimal::ZERO,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        assert_eq!(record.delta_reduction(), dec!(9750));
    }
}
