//! Per-position risk metrics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::params::{MAX_SINGLE_POSITION, MIN_HEALTH_FACTOR};
use crate::ledger::PositionValuation;
use crate::market::PairId;
use crate::utils::Pct100;

/// Health factor at which a position becomes liquidatable.
const LIQUIDATION_HEALTH_FACTOR: Pct100 = Pct100::new(100);

/// Risk snapshot of one position, recomputed on every assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRisk {
    pub pair: PairId,
    /// Collateral over debt on the 100 scale; 200 when debt-free
    pub health_factor: Decimal,
    /// Risk-token price at which the position reaches 1.0x
    pub liquidation_price: Option<Decimal>,
    /// Collateral minus debt, USD
    pub exposure: Decimal,
    pub is_high_risk: bool,
    pub last_checked_at: DateTime<Utc>,
}

impl PositionRisk {
    pub fn assess(
        valuation: &PositionValuation,
        borrowed_units: Decimal,
        portfolio_value: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let health_factor = valuation.health_factor();
        let exposure = valuation.collateral_value() - valuation.debt_value;
        let concentrated = portfolio_value > Decimal::ZERO && exposure > MAX_SINGLE_POSITION.of(portfolio_value);
        let unhealthy = health_factor < Decimal::from(MIN_HEALTH_FACTOR.value());

        Self {
            pair: valuation.pair.clone(),
            health_factor,
            liquidation_price: valuation.liquidation_price(LIQUIDATION_HEALTH_FACTOR, borrowed_units),
            exposure,
            is_high_risk: unhealthy || concentrated,
            last_checked_at: now,
        }
    }
}
