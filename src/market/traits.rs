//! Collaborator interfaces consumed by the engine.
//!
//! Implementations live outside the core (money market, oracle, AMM-style
//! swap venue). All amounts crossing these traits are raw integers in the
//! token's native decimals; prices are 18-decimal USD per whole unit.
//! The engine normalizes everything through [`crate::utils::fixed`].

use async_trait::async_trait;
use chrono::Duration;

use super::types::{AccountId, MarketError, TokenId};
use crate::utils::Bps;

/// Spot and time-weighted prices with a manipulation flag.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Spot price as a raw WAD (1e18 = $1). Fails if the feed is unset.
    async fn price(&self, token: &TokenId) -> Result<u128, MarketError>;

    /// Whether the feed currently flags this token as manipulated.
    async fn is_manipulated(&self, token: &TokenId) -> Result<bool, MarketError>;

    /// Time-weighted average price over `window`, raw WAD.
    async fn twap(&self, token: &TokenId, window: Duration) -> Result<u128, MarketError>;
}

/// Realized volatility feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VolatilitySource: Send + Sync {
    async fn volatility(&self, token: &TokenId, window: Duration) -> Result<Bps, MarketError>;
}

/// A single-asset lending market.
///
/// Borrowing requires that the account first enabled a collateral deposit
/// and enabled this market as its controller; implementations reject an
/// out-of-order borrow with [`MarketError::CollateralNotEnabled`] or
/// [`MarketError::ControllerNotEnabled`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LendingMarket: Send + Sync {
    /// Underlying asset of this market.
    fn asset(&self) -> TokenId;

    /// Native decimals of the underlying asset.
    fn decimals(&self) -> u8;

    /// Deposit `assets` for `account`, returning minted shares.
    async fn deposit(&self, assets: u128, account: &AccountId) -> Result<u128, MarketError>;

    /// Withdraw `assets` owned by `owner` to `receiver`, returning burned shares.
    async fn withdraw(
        &self,
        assets: u128,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<u128, MarketError>;

    /// Borrow `assets` against `recipient`'s enabled collateral.
    async fn borrow(&self, assets: u128, recipient: &AccountId) -> Result<(), MarketError>;

    /// Repay `assets` of `account`'s debt.
    async fn repay(&self, assets: u128, account: &AccountId) -> Result<(), MarketError>;

    async fn convert_shares_to_assets(&self, shares: u128) -> Result<u128, MarketError>;

    /// Outstanding debt of `account`, in native units.
    async fn debt_of(&self, account: &AccountId) -> Result<u128, MarketError>;

    /// Allow `account`'s deposit in this market to back borrows.
    async fn enable_collateral(&self, account: &AccountId) -> Result<(), MarketError>;

    /// Authorize this market to control `account` (borrow authorization).
    async fn enable_controller(&self, account: &AccountId) -> Result<(), MarketError>;

    /// Release controller authorization; rejected while debt is outstanding.
    async fn disable_controller(&self, account: &AccountId) -> Result<(), MarketError>;
}

/// Swap-style quoting venue for one pair, plus the engine's holdings in it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapQuote: Send + Sync {
    /// Quote `amount` of `token_in` for `token_out`. With `exact_in` the
    /// result is the output amount; otherwise the required input.
    async fn quote(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount: u128,
        exact_in: bool,
    ) -> Result<u128, MarketError>;

    /// Pool reserves in (token0, token1) order.
    async fn reserves(&self) -> Result<(u128, u128), MarketError>;

    /// Current composition of `account`'s holdings in the pair, (token0, token1).
    async fn holdings(&self, account: &AccountId) -> Result<(u128, u128), MarketError>;

    /// Deploy liquidity for `account`.
    async fn add_liquidity(
        &self,
        account: &AccountId,
        amount0: u128,
        amount1: u128,
    ) -> Result<(), MarketError>;

    /// Withdraw all of `account`'s holdings, returning (token0, token1).
    async fn remove_liquidity(&self, account: &AccountId) -> Result<(u128, u128), MarketError>;
}

/// Network congestion / execution cost feed gating rebalances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CongestionSource: Send + Sync {
    async fn current_cost(&self) -> Result<rust_decimal::Decimal, MarketError>;
}
