//! Hedge-leg sizing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VaultResult;
use crate::market::{SwapQuote, TokenId};
use crate::utils::fixed::{self, safe_div};

/// How much of the risk token to borrow against a base deposit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowSizing {
    /// Equal USD value at oracle prices.
    #[default]
    Oracle,
    /// Half the swap quote for the full deposit. Degraded fallback for
    /// deployments without a usable oracle on the risk token.
    QuoteHalf,
}

/// Inputs for one sizing call.
pub struct SizingRequest<'a> {
    pub base_token: &'a TokenId,
    pub risk_token: &'a TokenId,
    /// Deposit in whole base units
    pub base_amount: Decimal,
    pub base_decimals: u8,
    pub risk_decimals: u8,
    pub base_price: Decimal,
    pub risk_price: Decimal,
}

impl BorrowSizing {
    /// Borrow amount in whole risk-token units.
    pub async fn size(&self, request: &SizingRequest<'_>, venue: &dyn SwapQuote) -> VaultResult<Decimal> {
        let amount = match self {
            BorrowSizing::Oracle => oracle_borrow(request.base_amount, request.base_price, request.risk_price),
            BorrowSizing::QuoteHalf => {
                let raw_in = fixed::to_native(request.base_amount, request.base_decimals)?;
                let raw_out = venue
                    .quote(request.base_token, request.risk_token, raw_in, true)
                    .await?;
                fixed::from_native(raw_out, request.risk_decimals)? / dec!(2)
            }
        };

        debug!(
            sizing = ?self,
            base = %request.base_token,
            risk = %request.risk_token,
            base_amount = %request.base_amount,
            borrow = %amount,
            "Hedge leg sized"
        );
        Ok(fixed::normalize(amount))
    }
}

/// Units of the risk token worth the same USD as `base_amount`.
pub fn oracle_borrow(base_amount: Decimal, base_price: Decimal, risk_price: Decimal) -> Decimal {
    safe_div(fixed::usd_value(base_amount, base_price), risk_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::paper::PaperSwapVenue;

    fn request<'a>(base: &'a TokenId, risk: &'a TokenId, amount: Decimal) -> SizingRequest<'a> {
        SizingRequest {
            base_token: base,
            risk_token: risk,
            base_amount: amount,
            base_decimals: 6,
            risk_decimals: 18,
            base_price: dec!(1),
            risk_price: dec!(2000),
        }
    }

    #[tokio::test]
    async fn test_oracle_sizing_matches_usd_value() {
        let (usdc, weth) = (TokenId::new("USDC"), TokenId::new("WETH"));
        let venue = PaperSwapVenue::new(usdc.clone(), weth.clone(), 0, 0);

        let borrow = BorrowSizing::Oracle
            .size(&request(&usdc, &weth, dec!(100_000)), &venue)
            .await
            .unwrap();
        assert_eq!(borrow, dec!(50));
    }

    #[tokio::test]
    async fn test_quote_half_sizing() {
        let (usdc, weth) = (TokenId::new("USDC"), TokenId::new("WETH"));
        // Deep pool: 200M USDC / 100k WETH
        let venue = PaperSwapVenue::new(
            usdc.clone(),
            weth.clone(),
            200_000_000 * 10u128.pow(6),
            100_000 * 10u128.pow(18),
        );

        let borrow = BorrowSizing::QuoteHalf
            .size(&request(&usdc, &weth, dec!(100_000)), &venue)
            .await
            .unwrap();
        // ~49.97 WETH quoted for the full deposit, halved
        assert!(borrow > dec!(24.9) && borrow < dec!(25));
    }

    #[test]
    fn test_zero_price_sizes_nothing() {
        assert_eq!(oracle_borrow(dec!(1000), dec!(1), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_sizing_mode_from_config_string() {
        let mode: BorrowSizing = serde_json::from_str("\"quote_half\"").unwrap();
        assert_eq!(mode, BorrowSizing::QuoteHalf);
        assert_eq!(BorrowSizing::default(), BorrowSizing::Oracle);
    }
}
