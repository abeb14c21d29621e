//! Identifiers and error types shared by the collaborator interfaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Asset identifier (e.g. "USDC", "WETH").
    TokenId
);

string_id!(
    /// Tradable pair / pool identifier; also the key of a hedged position.
    PairId
);

string_id!(
    /// Account at the lending markets and swap venues.
    AccountId
);

impl AccountId {
    /// Dedicated sub-account holding a single pair's position, so that
    /// market-side debt and collateral are attributable per position.
    pub fn sub_account(owner: &AccountId, pair: &PairId) -> AccountId {
        AccountId(format!("{}:{}", owner.0, pair.0))
    }
}

/// Failure reported by an external collaborator.
///
/// The core propagates these as-is and never retries them: a repeated
/// borrow or repay could double-execute a financial side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    #[error("no price available for {0}")]
    PriceUnavailable(TokenId),
    #[error("no volatility data for {0}")]
    VolatilityUnavailable(TokenId),
    #[error("account {account} has no enabled collateral")]
    CollateralNotEnabled { account: AccountId },
    #[error("account {account} has not enabled the {market} market as controller")]
    ControllerNotEnabled { account: AccountId, market: TokenId },
    #[error("insufficient market liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: u128, available: u128 },
    #[error("account {account} balance {available} below requested {requested}")]
    InsufficientBalance {
        account: AccountId,
        requested: u128,
        available: u128,
    },
    #[error("repay of {requested} exceeds outstanding debt {debt}")]
    RepayExceedsDebt { requested: u128, debt: u128 },
    #[error("token {0} is not part of this pair")]
    UnknownToken(TokenId),
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("call rejected: {0}")]
    Rejected(String),
}

impl MarketError {
    /// Whether the failure means borrowing was attempted without usable collateral.
    pub fn is_collateral_failure(&self) -> bool {
        matches!(
            self,
            MarketError::CollateralNotEnabled { .. } | MarketError::ControllerNotEnabled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_account_is_per_pair() {
        let owner = AccountId::new("vault");
        let a = AccountId::sub_account(&owner, &PairId::new("USDC-WETH"));
        let b = AccountId::sub_account(&owner, &PairId::new("USDC-WBTC"));

        assert_eq!(a.as_str(), "vault:USDC-WETH");
        assert_ne!(a, b);
    }

    #[test]
    fn test_collateral_failure_classification() {
        let err = MarketError::CollateralNotEnabled {
            account: AccountId::new("vault"),
        };
        assert!(err.is_collateral_failure());
        assert!(!MarketError::Rejected("paused".into()).is_collateral_failure());
    }
}
