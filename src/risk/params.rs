//! Risk limits.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{VaultError, VaultResult};
use crate::utils::{Bps, Pct100};

pub use crate::ledger::DEFAULT_HEALTH_FACTOR;

/// Health factor every position must keep for rebalancing to proceed.
pub const MIN_HEALTH_FACTOR: Pct100 = Pct100::new(150);
/// Below this, emergency deleverage is permitted.
pub const CRITICAL_HEALTH_FACTOR: Pct100 = Pct100::new(120);
/// Hourly drawdown and portfolio volatility limit.
pub const MAX_HOURLY_VOLATILITY: Bps = Bps::new(500);
pub const MAX_DAILY_DRAWDOWN: Bps = Bps::new(1000);
/// Largest net exposure of one position relative to the portfolio.
pub const MAX_SINGLE_POSITION: Pct100 = Pct100::new(30);

/// Tunable risk parameters. Mutated only by a guardian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskParameters {
    pub max_leverage: Pct100,
    pub min_collateral_ratio: Pct100,
    pub max_position_concentration: Pct100,
    pub max_correlation: Bps,
    pub emergency_deleverage_ratio: Pct100,
}

impl RiskParameters {
    pub fn validate(&self) -> VaultResult<()> {
        let invalid = |msg: &str| Err(VaultError::InvalidParameters(msg.to_string()));

        if self.max_leverage.value() == 0 {
            return invalid("max_leverage must be positive");
        }
        if self.min_collateral_ratio.value() <= 100 {
            return invalid("min_collateral_ratio must exceed 100 (1.0x)");
        }
        if self.max_position_concentration.value() == 0 || self.max_position_concentration.value() > 100 {
            return invalid("max_position_concentration must be between 1 and 100");
        }
        if self.max_correlation.value() > 10_000 {
            return invalid("max_correlation must not exceed 10000 bps");
        }
        if self.emergency_deleverage_ratio.value() <= 100 {
            return invalid("emergency_deleverage_ratio must exceed 100 (1.0x)");
        }

        if self.emergency_deleverage_ratio >= self.min_collateral_ratio {
            warn!(
                emergency = %self.emergency_deleverage_ratio,
                min = %self.min_collateral_ratio,
                "emergency_deleverage_ratio is not below min_collateral_ratio"
            );
        }
        Ok(())
    }
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_leverage: Pct100::new(200),
            min_collateral_ratio: Pct100::new(150),
            max_position_concentration: Pct100::new(40),
            max_correlation: Bps::new(9500),
            emergency_deleverage_ratio: Pct100::new(130),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(RiskParameters::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_emergency_ratio_is_only_warned() {
        let params = RiskParameters {
            emergency_deleverage_ratio: Pct100::new(180),
            ..RiskParameters::default()
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let params = RiskParameters {
            max_position_concentration: Pct100::new(150),
            ..RiskParameters::default()
        };
        assert!(matches!(params.validate(), Err(VaultError::InvalidParameters(_))));
    }
}
