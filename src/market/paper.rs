//! Paper implementations of the collaborator interfaces.
//!
//! Used by the simulator and tests. State lives behind `tokio` locks so the
//! paper venues can be shared across tasks like the real integrations.

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{CongestionSource, LendingMarket, PriceSource, SwapQuote, VolatilitySource};
use super::types::{AccountId, MarketError, TokenId};
use crate::utils::fixed;
use crate::utils::Bps;

/// Share price denominator: 10_000 = one asset per share.
const SHARE_RATE_ONE: u128 = 10_000;

/// Lending operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LendingOp {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
    EnableCollateral,
    EnableController,
    DisableController,
    DebtOf,
}

#[derive(Debug)]
struct MarketBook {
    decimals: u8,
    cash: u128,
    share_rate: u128,
    shares: HashMap<AccountId, u128>,
    debts: HashMap<AccountId, u128>,
    failures: HashSet<LendingOp>,
}

#[derive(Debug, Default)]
struct HubState {
    markets: HashMap<TokenId, MarketBook>,
    collateral_enabled: HashSet<(TokenId, AccountId)>,
    controllers: HashMap<AccountId, TokenId>,
}

impl HubState {
    fn book(&mut self, asset: &TokenId) -> Result<&mut MarketBook, MarketError> {
        self.markets
            .get_mut(asset)
            .ok_or_else(|| MarketError::UnknownToken(asset.clone()))
    }

    fn has_enabled_collateral(&self, account: &AccountId) -> bool {
        self.collateral_enabled.iter().any(|(asset, acct)| {
            acct == account
                && self
                    .markets
                    .get(asset)
                    .and_then(|book| book.shares.get(account))
                    .is_some_and(|shares| *shares > 0)
        })
    }
}

/// Shared state behind a set of paper lending markets.
///
/// Collateral and controller enablement span markets, so every
/// [`PaperLendingMarket`] handle of one hub sees the same accounts.
#[derive(Debug, Clone, Default)]
pub struct PaperLendingHub {
    state: Arc<RwLock<HubState>>,
}

impl PaperLendingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a market for `asset` seeded with `cash` of borrowable liquidity.
    pub async fn add_market(&self, asset: TokenId, decimals: u8, cash: u128) -> PaperLendingMarket {
        let mut state = self.state.write().await;
        state.markets.insert(
            asset.clone(),
            MarketBook {
                decimals,
                cash,
                share_rate: SHARE_RATE_ONE,
                shares: HashMap::new(),
                debts: HashMap::new(),
                failures: HashSet::new(),
            },
        );
        debug!(%asset, decimals, cash, "Paper lending market created");

        PaperLendingMarket {
            asset,
            decimals,
            state: Arc::clone(&self.state),
        }
    }

    /// Make `op` fail on `asset` until cleared.
    pub async fn fail_on(&self, asset: &TokenId, op: LendingOp) {
        if let Some(book) = self.state.write().await.markets.get_mut(asset) {
            book.failures.insert(op);
        }
    }

    pub async fn clear_failures(&self, asset: &TokenId) {
        if let Some(book) = self.state.write().await.markets.get_mut(asset) {
            book.failures.clear();
        }
    }

    /// Set assets-per-share (10_000 = 1.0) to simulate accrued interest.
    pub async fn set_share_rate(&self, asset: &TokenId, rate: u128) {
        if let Some(book) = self.state.write().await.markets.get_mut(asset) {
            book.share_rate = rate.max(1);
        }
    }

    /// Overwrite the recorded debt of `account` (simulates interest accrual).
    pub async fn set_debt(&self, asset: &TokenId, account: &AccountId, debt: u128) {
        if let Some(book) = self.state.write().await.markets.get_mut(asset) {
            book.debts.insert(account.clone(), debt);
        }
    }

    pub async fn debt(&self, asset: &TokenId, account: &AccountId) -> u128 {
        let state = self.state.read().await;
        state
            .markets
            .get(asset)
            .and_then(|book| book.debts.get(account).copied())
            .unwrap_or(0)
    }

    pub async fn shares(&self, asset: &TokenId, account: &AccountId) -> u128 {
        let state = self.state.read().await;
        state
            .markets
            .get(asset)
            .and_then(|book| book.shares.get(account).copied())
            .unwrap_or(0)
    }

    pub async fn controller(&self, account: &AccountId) -> Option<TokenId> {
        self.state.read().await.controllers.get(account).cloned()
    }
}

/// Handle to one asset's market inside a [`PaperLendingHub`].
#[derive(Debug, Clone)]
pub struct PaperLendingMarket {
    asset: TokenId,
    decimals: u8,
    state: Arc<RwLock<HubState>>,
}

impl PaperLendingMarket {
    fn check_failure(book: &MarketBook, op: LendingOp) -> Result<(), MarketError> {
        if book.failures.contains(&op) {
            return Err(MarketError::Rejected(format!("{:?} disabled", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl LendingMarket for PaperLendingMarket {
    fn asset(&self) -> TokenId {
        self.asset.clone()
    }

    fn decimals(&self) -> u8 {
        self.decimals
    }

    async fn deposit(&self, assets: u128, account: &AccountId) -> Result<u128, MarketError> {
        let mut state = self.state.write().await;
        let book = state.book(&self.asset)?;
        Self::check_failure(book, LendingOp::Deposit)?;

        let shares = assets
            .checked_mul(SHARE_RATE_ONE)
            .ok_or(MarketError::Overflow("deposit"))?
            / book.share_rate;
        *book.shares.entry(account.clone()).or_default() += shares;
        book.cash = book.cash.saturating_add(assets);

        debug!(asset = %self.asset, %account, assets, shares, "Paper deposit");
        Ok(shares)
    }

    async fn withdraw(
        &self,
        assets: u128,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<u128, MarketError> {
        let mut state = self.state.write().await;
        let book = state.book(&self.asset)?;
        Self::check_failure(book, LendingOp::Withdraw)?;

        let shares = assets
            .checked_mul(SHARE_RATE_ONE)
            .ok_or(MarketError::Overflow("withdraw"))?
            / book.share_rate;
        let held = book.shares.get(owner).copied().unwrap_or(0);
        if shares > held {
            return Err(MarketError::InsufficientBalance {
                account: owner.clone(),
                requested: shares,
                available: held,
            });
        }
        if assets > book.cash {
            return Err(MarketError::InsufficientLiquidity {
                requested: assets,
                available: book.cash,
            });
        }

        book.shares.insert(owner.clone(), held - shares);
        book.cash -= assets;

        debug!(asset = %self.asset, %owner, %receiver, assets, shares, "Paper withdraw");
        Ok(shares)
    }

    async fn borrow(&self, assets: u128, recipient: &AccountId) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        if !state.has_enabled_collateral(recipient) {
            return Err(MarketError::CollateralNotEnabled {
                account: recipient.clone(),
            });
        }
        if state.controllers.get(recipient) != Some(&self.asset) {
            return Err(MarketError::ControllerNotEnabled {
                account: recipient.clone(),
                market: self.asset.clone(),
            });
        }

        let book = state.book(&self.asset)?;
        Self::check_failure(book, LendingOp::Borrow)?;
        if assets > book.cash {
            return Err(MarketError::InsufficientLiquidity {
                requested: assets,
                available: book.cash,
            });
        }

        book.cash -= assets;
        *book.debts.entry(recipient.clone()).or_default() += assets;

        debug!(asset = %self.asset, %recipient, assets, "Paper borrow");
        Ok(())
    }

    async fn repay(&self, assets: u128, account: &AccountId) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        let book = state.book(&self.asset)?;
        Self::check_failure(book, LendingOp::Repay)?;

        let debt = book.debts.get(account).copied().unwrap_or(0);
        if assets > debt {
            return Err(MarketError::RepayExceedsDebt {
                requested: assets,
                debt,
            });
        }

        book.debts.insert(account.clone(), debt - assets);
        book.cash = book.cash.saturating_add(assets);

        debug!(asset = %self.asset, %account, assets, remaining = debt - assets, "Paper repay");
        Ok(())
    }

    async fn convert_shares_to_assets(&self, shares: u128) -> Result<u128, MarketError> {
        let state = self.state.read().await;
        let book = state
            .markets
            .get(&self.asset)
            .ok_or_else(|| MarketError::UnknownToken(self.asset.clone()))?;
        shares
            .checked_mul(book.share_rate)
            .map(|scaled| scaled / SHARE_RATE_ONE)
            .ok_or(MarketError::Overflow("convert_shares_to_assets"))
    }

    async fn debt_of(&self, account: &AccountId) -> Result<u128, MarketError> {
        let state = self.state.read().await;
        let book = state
            .markets
            .get(&self.asset)
            .ok_or_else(|| MarketError::UnknownToken(self.asset.clone()))?;
        Self::check_failure(book, LendingOp::DebtOf)?;
        Ok(book.debts.get(account).copied().unwrap_or(0))
    }

    async fn enable_collateral(&self, account: &AccountId) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        Self::check_failure(state.book(&self.asset)?, LendingOp::EnableCollateral)?;
        state
            .collateral_enabled
            .insert((self.asset.clone(), account.clone()));
        Ok(())
    }

    async fn enable_controller(&self, account: &AccountId) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        Self::check_failure(state.book(&self.asset)?, LendingOp::EnableController)?;
        match state.controllers.get(account) {
            Some(existing) if existing != &self.asset => Err(MarketError::Rejected(format!(
                "account {} already controlled by {}",
                account, existing
            ))),
            _ => {
                state.controllers.insert(account.clone(), self.asset.clone());
                Ok(())
            }
        }
    }

    async fn disable_controller(&self, account: &AccountId) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        let book = state.book(&self.asset)?;
        Self::check_failure(book, LendingOp::DisableController)?;
        if book.debts.get(account).copied().unwrap_or(0) > 0 {
            return Err(MarketError::Rejected(format!(
                "account {} has outstanding debt",
                account
            )));
        }
        if state.controllers.get(account) == Some(&self.asset) {
            state.controllers.remove(account);
        }
        Ok(())
    }
}

/// Settable price feed.
#[derive(Debug, Default)]
pub struct PaperPriceFeed {
    prices: RwLock<HashMap<TokenId, Decimal>>,
    twaps: RwLock<HashMap<TokenId, Decimal>>,
    manipulated: RwLock<HashSet<TokenId>>,
}

impl PaperPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the USD price of one whole unit.
    pub async fn set_price(&self, token: &TokenId, price: Decimal) {
        self.prices.write().await.insert(token.clone(), price);
    }

    /// Override the TWAP; without an override the TWAP equals spot.
    pub async fn set_twap(&self, token: &TokenId, price: Decimal) {
        self.twaps.write().await.insert(token.clone(), price);
    }

    pub async fn set_manipulated(&self, token: &TokenId, flagged: bool) {
        let mut manipulated = self.manipulated.write().await;
        if flagged {
            manipulated.insert(token.clone());
        } else {
            manipulated.remove(token);
        }
    }

    pub async fn spot(&self, token: &TokenId) -> Option<Decimal> {
        self.prices.read().await.get(token).copied()
    }
}

fn encode_price(token: &TokenId, price: Decimal) -> Result<u128, MarketError> {
    fixed::to_wad(price).map_err(|_| MarketError::PriceUnavailable(token.clone()))
}

#[async_trait]
impl PriceSource for PaperPriceFeed {
    async fn price(&self, token: &TokenId) -> Result<u128, MarketError> {
        let price = self
            .spot(token)
            .await
            .ok_or_else(|| MarketError::PriceUnavailable(token.clone()))?;
        encode_price(token, price)
    }

    async fn is_manipulated(&self, token: &TokenId) -> Result<bool, MarketError> {
        Ok(self.manipulated.read().await.contains(token))
    }

    async fn twap(&self, token: &TokenId, _window: Duration) -> Result<u128, MarketError> {
        let twap = self.twaps.read().await.get(token).copied();
        match twap {
            Some(price) => encode_price(token, price),
            None => self.price(token).await,
        }
    }
}

/// Settable volatility feed with an optional fallback.
#[derive(Debug, Default)]
pub struct PaperVolatilityFeed {
    values: RwLock<HashMap<TokenId, Bps>>,
    fallback: Option<Bps>,
}

impl PaperVolatilityFeed {
    pub fn new(fallback: Option<Bps>) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            fallback,
        }
    }

    pub async fn set_volatility(&self, token: &TokenId, volatility: Bps) {
        self.values.write().await.insert(token.clone(), volatility);
    }
}

#[async_trait]
impl VolatilitySource for PaperVolatilityFeed {
    async fn volatility(&self, token: &TokenId, _window: Duration) -> Result<Bps, MarketError> {
        self.values
            .read()
            .await
            .get(token)
            .copied()
            .or(self.fallback)
            .ok_or_else(|| MarketError::VolatilityUnavailable(token.clone()))
    }
}

#[derive(Debug, Default)]
struct VenueState {
    reserves: (u128, u128),
    holdings: HashMap<AccountId, (u128, u128)>,
    failing: bool,
}

/// Constant-product swap venue for one pair.
#[derive(Debug)]
pub struct PaperSwapVenue {
    token0: TokenId,
    token1: TokenId,
    state: RwLock<VenueState>,
}

impl PaperSwapVenue {
    pub fn new(token0: TokenId, token1: TokenId, reserve0: u128, reserve1: u128) -> Self {
        Self {
            token0,
            token1,
            state: RwLock::new(VenueState {
                reserves: (reserve0, reserve1),
                ..Default::default()
            }),
        }
    }

    pub async fn set_reserves(&self, reserve0: u128, reserve1: u128) {
        self.state.write().await.reserves = (reserve0, reserve1);
    }

    /// Overwrite an account's composition (simulates pool drift).
    pub async fn set_holdings(&self, account: &AccountId, amount0: u128, amount1: u128) {
        self.state
            .write()
            .await
            .holdings
            .insert(account.clone(), (amount0, amount1));
    }

    /// Scale one leg of every holding by `factor`.
    pub async fn scale_leg(&self, token: &TokenId, factor: Decimal) -> Result<(), MarketError> {
        let leg_zero = self.index_of(token)? == 0;
        let mut state = self.state.write().await;
        for (amount0, amount1) in state.holdings.values_mut() {
            let target = if leg_zero { amount0 } else { amount1 };
            *target = Decimal::from_u128(*target)
                .map(|amount| (amount * factor).trunc())
                .and_then(|scaled| scaled.to_u128())
                .ok_or(MarketError::Overflow("scale_leg"))?;
        }
        Ok(())
    }

    pub async fn set_failing(&self, failing: bool) {
        self.state.write().await.failing = failing;
    }

    fn index_of(&self, token: &TokenId) -> Result<usize, MarketError> {
        if token == &self.token0 {
            Ok(0)
        } else if token == &self.token1 {
            Ok(1)
        } else {
            Err(MarketError::UnknownToken(token.clone()))
        }
    }

    fn check(state: &VenueState) -> Result<(), MarketError> {
        if state.failing {
            return Err(MarketError::Rejected("venue unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SwapQuote for PaperSwapVenue {
    async fn quote(
        &self,
        token_in: &TokenId,
        token_out: &TokenId,
        amount: u128,
        exact_in: bool,
    ) -> Result<u128, MarketError> {
        let state = self.state.read().await;
        Self::check(&state)?;

        let (idx_in, idx_out) = (self.index_of(token_in)?, self.index_of(token_out)?);
        if idx_in == idx_out {
            return Err(MarketError::Rejected("identical tokens".to_string()));
        }
        let (reserve_in, reserve_out) = if idx_in == 0 {
            (state.reserves.0, state.reserves.1)
        } else {
            (state.reserves.1, state.reserves.0)
        };

        if exact_in {
            // out = reserve_out * in / (reserve_in + in)
            let numerator = reserve_out
                .checked_mul(amount)
                .ok_or(MarketError::Overflow("quote"))?;
            let denominator = reserve_in
                .checked_add(amount)
                .ok_or(MarketError::Overflow("quote"))?;
            if denominator == 0 {
                return Ok(0);
            }
            Ok(numerator / denominator)
        } else {
            // in = reserve_in * out / (reserve_out - out)
            if amount >= reserve_out {
                return Err(MarketError::InsufficientLiquidity {
                    requested: amount,
                    available: reserve_out,
                });
            }
            let numerator = reserve_in
                .checked_mul(amount)
                .ok_or(MarketError::Overflow("quote"))?;
            Ok(numerator / (reserve_out - amount))
        }
    }

    async fn reserves(&self) -> Result<(u128, u128), MarketError> {
        let state = self.state.read().await;
        Self::check(&state)?;
        Ok(state.reserves)
    }

    async fn holdings(&self, account: &AccountId) -> Result<(u128, u128), MarketError> {
        let state = self.state.read().await;
        Self::check(&state)?;
        Ok(state.holdings.get(account).copied().unwrap_or((0, 0)))
    }

    async fn add_liquidity(
        &self,
        account: &AccountId,
        amount0: u128,
        amount1: u128,
    ) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        Self::check(&state)?;
        let entry = state.holdings.entry(account.clone()).or_default();
        entry.0 = entry.0.saturating_add(amount0);
        entry.1 = entry.1.saturating_add(amount1);
        state.reserves.0 = state.reserves.0.saturating_add(amount0);
        state.reserves.1 = state.reserves.1.saturating_add(amount1);
        debug!(%account, amount0, amount1, "Paper liquidity added");
        Ok(())
    }

    async fn remove_liquidity(&self, account: &AccountId) -> Result<(u128, u128), MarketError> {
        let mut state = self.state.write().await;
        Self::check(&state)?;
        let (amount0, amount1) = state.holdings.remove(account).unwrap_or((0, 0));
        state.reserves.0 = state.reserves.0.saturating_sub(amount0);
        state.reserves.1 = state.reserves.1.saturating_sub(amount1);
        debug!(%account, amount0, amount1, "Paper liquidity removed");
        Ok((amount0, amount1))
    }
}

/// Congestion feed returning a settable cost.
#[derive(Debug)]
pub struct FixedCongestion {
    cost: RwLock<Decimal>,
}

impl FixedCongestion {
    pub fn new(cost: Decimal) -> Self {
        Self {
            cost: RwLock::new(cost),
        }
    }

    pub async fn set_cost(&self, cost: Decimal) {
        *self.cost.write().await = cost;
    }
}

#[async_trait]
impl CongestionSource for FixedCongestion {
    async fn current_cost(&self) -> Result<Decimal, MarketError> {
        Ok(*self.cost.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdc() -> TokenId {
        TokenId::new("USDC")
    }

    fn weth() -> TokenId {
        TokenId::new("WETH")
    }

    #[tokio::test]
    async fn test_borrow_requires_collateral_then_controller() {
        let hub = PaperLendingHub::new();
        let base = hub.add_market(usdc(), 6, 0).await;
        let risk = hub.add_market(weth(), 18, 1_000 * 10u128.pow(18)).await;
        let account = AccountId::new("vault:USDC-WETH");

        base.deposit(1_000_000_000, &account).await.unwrap();

        // Deposit alone is not usable collateral
        let err = risk.borrow(10u128.pow(18), &account).await.unwrap_err();
        assert!(matches!(err, MarketError::CollateralNotEnabled { .. }));

        base.enable_collateral(&account).await.unwrap();
        let err = risk.borrow(10u128.pow(18), &account).await.unwrap_err();
        assert!(matches!(err, MarketError::ControllerNotEnabled { .. }));

        risk.enable_controller(&account).await.unwrap();
        risk.borrow(10u128.pow(18), &account).await.unwrap();
        assert_eq!(risk.debt_of(&account).await.unwrap(), 10u128.pow(18));
    }

    #[tokio::test]
    async fn test_repay_cannot_exceed_debt() {
        let hub = PaperLendingHub::new();
        let risk = hub.add_market(weth(), 18, 0).await;
        let account = AccountId::new("a");
        hub.set_debt(&weth(), &account, 5).await;

        let err = risk.repay(6, &account).await.unwrap_err();
        assert_eq!(err, MarketError::RepayExceedsDebt { requested: 6, debt: 5 });

        risk.repay(5, &account).await.unwrap();
        assert_eq!(hub.debt(&weth(), &account).await, 0);
        // Debt cleared, controller can now be released
        risk.disable_controller(&account).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let hub = PaperLendingHub::new();
        let base = hub.add_market(usdc(), 6, 0).await;
        hub.fail_on(&usdc(), LendingOp::Deposit).await;

        assert!(base.deposit(1, &AccountId::new("a")).await.is_err());

        hub.clear_failures(&usdc()).await;
        assert_eq!(base.deposit(1, &AccountId::new("a")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_share_rate_accrues_value() {
        let hub = PaperLendingHub::new();
        let base = hub.add_market(usdc(), 6, 0).await;
        let shares = base.deposit(1_000_000, &AccountId::new("a")).await.unwrap();

        hub.set_share_rate(&usdc(), 10_500).await;
        assert_eq!(base.convert_shares_to_assets(shares).await.unwrap(), 1_050_000);
    }

    #[tokio::test]
    async fn test_constant_product_quote() {
        // 2,000,000 USDC / 1,000 WETH
        let venue = PaperSwapVenue::new(usdc(), weth(), 2_000_000, 1_000);

        let out = venue.quote(&usdc(), &weth(), 1_000_000, true).await.unwrap();
        assert_eq!(out, 333); // 1000 * 1e6 / 3e6

        let needed = venue.quote(&usdc(), &weth(), 500, false).await.unwrap();
        assert_eq!(needed, 2_000_000); // 2e6 * 500 / 500
    }

    #[tokio::test]
    async fn test_price_feed_encodes_wad() {
        let feed = PaperPriceFeed::new();
        assert!(feed.price(&weth()).await.is_err());

        feed.set_price(&weth(), dec!(2000)).await;
        assert_eq!(feed.price(&weth()).await.unwrap(), 2000 * 10u128.pow(18));
        assert_eq!(
            feed.twap(&weth(), Duration::minutes(30)).await.unwrap(),
            2000 * 10u128.pow(18)
        );
    }

    #[tokio::test]
    async fn test_holdings_drift() {
        let venue = PaperSwapVenue::new(usdc(), weth(), 0, 0);
        let account = AccountId::new("a");
        venue.add_liquidity(&account, 0, 50).await.unwrap();

        venue.scale_leg(&weth(), dec!(0.9)).await.unwrap();
        assert_eq!(venue.holdings(&account).await.unwrap(), (0, 45));

        assert_eq!(venue.remove_liquidity(&account).await.unwrap(), (0, 45));
        assert_eq!(venue.holdings(&account).await.unwrap(), (0, 0));
    }
}
