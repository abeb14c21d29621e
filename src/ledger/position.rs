//! Hedged position records and their valuation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::market::{AccountId, PairId, TokenId};
use crate::utils::fixed::safe_div;
use crate::utils::Pct100;

/// Health factor reported for a position without debt.
pub const DEFAULT_HEALTH_FACTOR: Decimal = dec!(200);

/// A whitelisted two-token pair. Exactly one token is the stable base asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradablePair {
    pub id: PairId,
    pub token0: TokenId,
    pub token1: TokenId,
    pub base: TokenId,
}

impl TradablePair {
    pub fn new(id: PairId, token0: TokenId, token1: TokenId, base: TokenId) -> Self {
        Self {
            id,
            token0,
            token1,
            base,
        }
    }

    /// The non-base leg.
    pub fn risk_token(&self) -> &TokenId {
        if self.token0 == self.base {
            &self.token1
        } else {
            &self.token0
        }
    }

    pub fn base_is_token0(&self) -> bool {
        self.token0 == self.base
    }

    /// Reorder a (token0, token1) tuple into (base, risk).
    pub fn split<T>(&self, pair: (T, T)) -> (T, T) {
        if self.base_is_token0() {
            (pair.0, pair.1)
        } else {
            (pair.1, pair.0)
        }
    }

    /// Reorder (base, risk) into (token0, token1).
    pub fn join<T>(&self, base: T, risk: T) -> (T, T) {
        if self.base_is_token0() {
            (base, risk)
        } else {
            (risk, base)
        }
    }
}

/// An open hedged position. Owned exclusively by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PairId,
    /// Stable base asset deposited as lending collateral
    pub collateral_token: TokenId,
    /// Asset borrowed and held in the pair
    pub risk_token: TokenId,
    /// Sub-account carrying this position's collateral and debt
    pub account: AccountId,
    /// Base units deposited as collateral
    pub collateral_amount: Decimal,
    /// Raw lending-market shares minted for the collateral
    pub collateral_shares: u128,
    /// Risk units held in the pair at the last update
    pub risk_amount_held: Decimal,
    /// Risk units borrowed from the lending market
    pub borrowed_amount: Decimal,
    /// Borrow proceeds from rebalancing not deployed into the pair
    pub risk_reserve: Decimal,
    pub opened_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Position {
    pub fn is_hedged(&self) -> bool {
        self.borrowed_amount > Decimal::ZERO
    }
}

/// Point-in-time valuation of a position in USD (18-decimal scale).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValuation {
    pub pair: PairId,
    pub base_price: Decimal,
    pub risk_price: Decimal,
    /// Live pair composition, in whole units
    pub held_base: Decimal,
    pub held_risk: Decimal,
    /// Lending collateral value
    pub lending_collateral_value: Decimal,
    /// Combined value of both legs held in the pair
    pub lp_value: Decimal,
    /// Value of the risk reserve
    pub reserve_value: Decimal,
    /// Non-base share of the pair value
    pub exposure_value: Decimal,
    /// Value of the borrowed leg
    pub debt_value: Decimal,
}

impl PositionValuation {
    /// Everything backing the debt: lending collateral, pair legs, reserve.
    pub fn collateral_value(&self) -> Decimal {
        self.lending_collateral_value + self.lp_value + self.reserve_value
    }

    /// Net value, floored at zero: underwater positions contribute nothing.
    pub fn net_value(&self) -> Decimal {
        (self.collateral_value() - self.debt_value).max(Decimal::ZERO)
    }

    /// Signed USD delta: held non-base exposure minus borrowed value.
    /// The risk reserve backs the debt but is not counted as exposure.
    pub fn delta_value(&self) -> Decimal {
        self.exposure_value - self.debt_value
    }

    /// Delta in risk-token units, converted at the current risk price.
    pub fn delta_units(&self) -> Decimal {
        safe_div(self.delta_value(), self.risk_price)
    }

    /// Collateral over debt on the 100 scale; 200 when there is no debt.
    pub fn health_factor(&self) -> Decimal {
        if self.debt_value <= Decimal::ZERO {
            return DEFAULT_HEALTH_FACTOR;
        }
        Pct100::scale(self.collateral_value() / self.debt_value)
    }

    /// Risk price at which the health factor would reach `threshold`.
    ///
    /// Collateral excluding the risk legs must cover the debt's growth;
    /// `None` when the position cannot reach the threshold by price moves.
    pub fn liquidation_price(&self, threshold: Pct100, borrowed_units: Decimal) -> Option<Decimal> {
        let stable_backing = self.lending_collateral_value + self.held_base * self.base_price;
        let risk_units = self.held_risk + safe_div(self.reserve_value, self.risk_price);
        // stable + risk_units * p = ratio * borrowed * p
        let net_units = threshold.as_ratio() * borrowed_units - risk_units;
        if borrowed_units <= Decimal::ZERO || net_units <= Decimal::ZERO {
            return None;
        }
        Some(safe_div(stable_backing, net_units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valuation(collateral: Decimal, lp: Decimal, debt: Decimal) -> PositionValuation {
        PositionValuation {
            pair: PairId::new("USDC-WETH"),
            base_price: dec!(1),
            risk_price: dec!(2000),
            held_base: Decimal::ZERO,
            held_risk: lp / dec!(2000),
            lending_collateral_value: collateral,
            lp_value: lp,
            reserve_value: Decimal::ZERO,
            exposure_value: lp,
            debt_value: debt,
        }
    }

    #[test]
    fn test_zero_debt_reports_sentinel_health() {
        let v = valuation(dec!(1_000_000), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(v.health_factor(), dec!(200));

        let v = valuation(dec!(1), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(v.health_factor(), dec!(200));
    }

    #[test]
    fn test_health_factor_on_100_scale() {
        // 100k collateral + 100k in pair against 100k debt = 2.0x
        let v = valuation(dec!(100_000), dec!(100_000), dec!(100_000));
        assert_eq!(v.health_factor(), dec!(200));

        let v = valuation(dec!(50_000), dec!(100_000), dec!(100_000));
        assert_eq!(v.health_factor(), dec!(150));
    }

    #[test]
    fn test_underwater_net_value_floors_at_zero() {
        let v = valuation(dec!(10_000), dec!(5_000), dec!(100_000));
        assert_eq!(v.net_value(), Decimal::ZERO);
    }

    #[test]
    fn test_delta_in_units() {
        // 45 units held against 50 borrowed
        let mut v = valuation(dec!(100_000), dec!(90_000), dec!(100_000));
        v.exposure_value = dec!(90_000);
        assert_eq!(v.delta_value(), dec!(-10_000));
        assert_eq!(v.delta_units(), dec!(-5));
    }

    #[test]
    fn test_liquidation_price() {
        // 100k stable, 50 held, 50 borrowed: 100k + 50p = 1.2 * 50p => p = 10k
        let v = valuation(dec!(100_000), dec!(100_000), dec!(100_000));
        let price = v.liquidation_price(Pct100::new(120), dec!(50)).unwrap();
        assert_eq!(price, dec!(10000));

        // No debt: never liquidatable
        assert!(v.liquidation_price(Pct100::new(120), Decimal::ZERO).is_none());
    }

    #[test]
    fn test_pair_leg_ordering() {
        let pair = TradablePair::new(
            PairId::new("WETH-USDC"),
            TokenId::new("WETH"),
            TokenId::new("USDC"),
            TokenId::new("USDC"),
        );
        assert_eq!(pair.risk_token(), &TokenId::new("WETH"));
        assert_eq!(pair.split((1, 2)), (2, 1));
        assert_eq!(pair.join(10, 20), (20, 10));
    }
}
