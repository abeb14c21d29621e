//! The position ledger: the only component that moves collateral and debt.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::position::{Position, PositionValuation, TradablePair};
use super::sizing::{BorrowSizing, SizingRequest};
use crate::error::{VaultError, VaultResult};
use crate::market::{AccountId, LendingMarket, PairId, PriceSource, SwapQuote, TokenId};
use crate::strategy::AllocationPlan;
use crate::utils::fixed::{self, usd_value};
use crate::utils::{Clock, Pct100};

/// A tradable pair together with the venue holding its liquidity.
#[derive(Clone)]
pub struct PairConfig {
    pub pair: TradablePair,
    pub venue: Arc<dyn SwapQuote>,
}

/// Outcome of closing a position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseResult {
    pub pair: PairId,
    pub owner: AccountId,
    pub repaid_risk: Decimal,
    pub repaid_base: Decimal,
    /// Collateral plus base units returned from the pair, credited to idle
    pub released_base: Decimal,
    /// Residual risk units sent to the owner (realized P&L on the hedge)
    pub swept_risk: Decimal,
}

/// Result of one per-position rebalance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceOutcome {
    pub pair: PairId,
    /// USD delta before the adjustment
    pub delta_before: Decimal,
    /// Signed risk-unit change of the borrow (positive = borrowed more)
    pub adjustment: Decimal,
    pub borrowed_after: Decimal,
    /// The computed repay exceeded the live debt and was clamped
    pub clamped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<RebalanceOutcome>,
    pub total_value: Decimal,
}

impl ExecutionReport {
    pub fn rebalanced_pairs(&self) -> Vec<PairId> {
        self.outcomes.iter().map(|o| o.pair.clone()).collect()
    }
}

/// External steps completed while opening, in execution order.
#[derive(Debug, Default)]
struct OpenProgress {
    shares: Option<u128>,
    controller_enabled: bool,
    borrowed: Option<u128>,
}

/// Authoritative store of hedged positions.
pub struct PositionLedger {
    base_token: TokenId,
    owner: AccountId,
    sizing: BorrowSizing,
    prices: Arc<dyn PriceSource>,
    clock: Arc<dyn Clock>,
    markets: HashMap<TokenId, Arc<dyn LendingMarket>>,
    pairs: HashMap<PairId, PairConfig>,
    positions: HashMap<PairId, Position>,
    /// Active set in opening order
    active: Vec<PairId>,
    idle: HashMap<TokenId, Decimal>,
    /// Risk units swept to owners on close; not part of vault value
    swept: HashMap<(AccountId, TokenId), Decimal>,
}

impl PositionLedger {
    pub fn new(
        base_token: TokenId,
        owner: AccountId,
        sizing: BorrowSizing,
        prices: Arc<dyn PriceSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_token,
            owner,
            sizing,
            prices,
            clock,
            markets: HashMap::new(),
            pairs: HashMap::new(),
            positions: HashMap::new(),
            active: Vec::new(),
            idle: HashMap::new(),
            swept: HashMap::new(),
        }
    }

    pub fn base_token(&self) -> &TokenId {
        &self.base_token
    }

    pub fn sizing(&self) -> BorrowSizing {
        self.sizing
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Configure the lending market for its asset, replacing any previous one.
    pub fn register_market(&mut self, market: Arc<dyn LendingMarket>) {
        let asset = market.asset();
        info!(%asset, decimals = market.decimals(), "Lending market registered");
        self.markets.insert(asset, market);
    }

    /// Declare a tradable pair. Exactly one leg must be the base asset.
    pub fn register_pair(&mut self, config: PairConfig) -> VaultResult<()> {
        let pair = &config.pair;
        let invalid = |reason: &str| VaultError::InvalidPool {
            pair: pair.id.clone(),
            reason: reason.to_string(),
        };

        if pair.token0 == pair.token1 {
            return Err(invalid("identical tokens"));
        }
        if pair.base != self.base_token {
            return Err(invalid("pair base differs from the vault base asset"));
        }
        if pair.token0 != pair.base && pair.token1 != pair.base {
            return Err(invalid("neither token is the base asset"));
        }
        if self.positions.contains_key(&pair.id) {
            return Err(invalid("pair has an active position"));
        }

        info!(pair = %pair.id, risk = %pair.risk_token(), "Pair registered");
        self.pairs.insert(pair.id.clone(), config);
        Ok(())
    }

    pub fn pair(&self, pair_id: &PairId) -> Option<&TradablePair> {
        self.pairs.get(pair_id).map(|c| &c.pair)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &TradablePair> {
        self.pairs.values().map(|c| &c.pair)
    }

    pub fn position(&self, pair_id: &PairId) -> Option<&Position> {
        self.positions.get(pair_id)
    }

    /// Active positions in opening order.
    pub fn active_positions(&self) -> impl Iterator<Item = &Position> {
        self.active.iter().filter_map(|id| self.positions.get(id))
    }

    pub fn active_pairs(&self) -> &[PairId] {
        &self.active
    }

    pub fn idle_balance(&self, token: &TokenId) -> Decimal {
        self.idle.get(token).copied().unwrap_or(Decimal::ZERO)
    }

    /// Units of `token` swept to `owner` by closed positions.
    pub fn swept_balance(&self, owner: &AccountId, token: &TokenId) -> Decimal {
        self.swept
            .get(&(owner.clone(), token.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Credit unallocated funds handed over by the vault wrapper.
    pub fn credit_idle(&mut self, token: &TokenId, amount: Decimal) -> VaultResult<()> {
        if amount <= Decimal::ZERO {
            return Err(VaultError::InvalidAmount(amount));
        }
        *self.idle.entry(token.clone()).or_default() += fixed::normalize(amount);
        debug!(%token, %amount, "Idle balance credited");
        Ok(())
    }

    /// USD price of one whole unit of `token`.
    pub async fn price_of(&self, token: &TokenId) -> VaultResult<Decimal> {
        let raw = self.prices.price(token).await?;
        Ok(fixed::from_wad(raw)?)
    }

    pub async fn is_manipulated(&self, token: &TokenId) -> VaultResult<bool> {
        Ok(self.prices.is_manipulated(token).await?)
    }

    fn market(&self, token: &TokenId) -> VaultResult<&Arc<dyn LendingMarket>> {
        self.markets
            .get(token)
            .ok_or_else(|| VaultError::VaultNotRegistered(token.clone()))
    }

    fn pair_config(&self, pair_id: &PairId) -> VaultResult<&PairConfig> {
        self.pairs.get(pair_id).ok_or_else(|| VaultError::InvalidPool {
            pair: pair_id.clone(),
            reason: "pair not registered".to_string(),
        })
    }

    /// Open (or top up) the hedged position on `pair_id` with `base_amount`
    /// of idle base units.
    ///
    /// Deposit, collateral enablement, controller enablement and borrow run in
    /// that order. If any step fails the completed ones are compensated and
    /// the ledger is left as it was.
    pub async fn open_position(&mut self, pair_id: &PairId, base_amount: Decimal) -> VaultResult<PairId> {
        let config = self.pair_config(pair_id)?.clone();
        if base_amount <= Decimal::ZERO {
            return Err(VaultError::InvalidAmount(base_amount));
        }
        let risk_token = config.pair.risk_token().clone();
        let base_market = Arc::clone(self.market(&self.base_token)?);
        let risk_market = Arc::clone(self.market(&risk_token)?);

        let idle = self.idle_balance(&self.base_token);
        if idle < base_amount {
            return Err(VaultError::InsufficientLiquidity {
                pair: pair_id.clone(),
                required: base_amount,
                available: idle,
            });
        }

        let base_price = self.price_of(&self.base_token).await?;
        let risk_price = self.price_of(&risk_token).await?;
        let request = SizingRequest {
            base_token: &self.base_token,
            risk_token: &risk_token,
            base_amount,
            base_decimals: base_market.decimals(),
            risk_decimals: risk_market.decimals(),
            base_price,
            risk_price,
        };
        let borrow_units = self.sizing.size(&request, config.venue.as_ref()).await?;

        let base_raw = fixed::to_native(base_amount, base_market.decimals())?;
        let borrow_raw = fixed::to_native(borrow_units, risk_market.decimals())?;
        let account = AccountId::sub_account(&self.owner, pair_id);
        let existing = self.positions.get(pair_id).cloned();

        info!(
            pair = %pair_id,
            %account,
            %base_amount,
            borrow = %borrow_units,
            top_up = existing.is_some(),
            "Opening hedged position"
        );

        let mut progress = OpenProgress::default();
        let result = Self::run_open_steps(
            base_market.as_ref(),
            risk_market.as_ref(),
            config.venue.as_ref(),
            &config.pair,
            &account,
            base_raw,
            borrow_raw,
            &mut progress,
        )
        .await;

        if let Err(e) = result {
            error!(pair = %pair_id, error = %e, "Open failed - compensating completed steps");
            Self::compensate_open(
                base_market.as_ref(),
                risk_market.as_ref(),
                &account,
                &progress,
                existing.is_some(),
            )
            .await;
            return Err(e);
        }

        let shares = progress.shares.unwrap_or(0);
        let collateral = fixed::from_native(base_raw, base_market.decimals())?;
        let borrowed = fixed::from_native(borrow_raw, risk_market.decimals())?;
        let now = self.clock.now();

        let position = match existing {
            Some(mut position) => {
                position.collateral_amount += collateral;
                position.collateral_shares = position.collateral_shares.saturating_add(shares);
                position.risk_amount_held += borrowed;
                position.borrowed_amount += borrowed;
                position.last_update = now;
                position
            }
            None => Position {
                id: pair_id.clone(),
                collateral_token: self.base_token.clone(),
                risk_token: risk_token.clone(),
                account: account.clone(),
                collateral_amount: collateral,
                collateral_shares: shares,
                risk_amount_held: borrowed,
                borrowed_amount: borrowed,
                risk_reserve: Decimal::ZERO,
                opened_at: now,
                last_update: now,
            },
        };

        if let Some(balance) = self.idle.get_mut(&self.base_token) {
            *balance -= collateral;
        }
        self.positions.insert(pair_id.clone(), position);
        if !self.active.contains(pair_id) {
            self.active.push(pair_id.clone());
        }

        info!(
            target: "vault_event",
            event = "PositionOpened",
            pair = %pair_id,
            collateral = %collateral,
            borrowed = %borrowed,
            "PositionOpened"
        );
        Ok(pair_id.clone())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_open_steps(
        base_market: &dyn LendingMarket,
        risk_market: &dyn LendingMarket,
        venue: &dyn SwapQuote,
        pair: &TradablePair,
        account: &AccountId,
        base_raw: u128,
        borrow_raw: u128,
        progress: &mut OpenProgress,
    ) -> VaultResult<()> {
        progress.shares = Some(base_market.deposit(base_raw, account).await?);
        base_market.enable_collateral(account).await?;
        risk_market.enable_controller(account).await?;
        progress.controller_enabled = true;

        if borrow_raw > 0 {
            risk_market.borrow(borrow_raw, account).await?;
            progress.borrowed = Some(borrow_raw);

            let (amount0, amount1) = pair.join(0, borrow_raw);
            venue.add_liquidity(account, amount0, amount1).await?;
        }
        Ok(())
    }

    /// Best-effort reversal of completed open steps, newest first.
    async fn compensate_open(
        base_market: &dyn LendingMarket,
        risk_market: &dyn LendingMarket,
        account: &AccountId,
        progress: &OpenProgress,
        was_open: bool,
    ) {
        if let Some(borrowed) = progress.borrowed {
            if let Err(e) = risk_market.repay(borrowed, account).await {
                error!(%account, error = %e, "CRITICAL: failed to repay borrow during compensation");
            }
        }
        if progress.controller_enabled && !was_open {
            if let Err(e) = risk_market.disable_controller(account).await {
                error!(%account, error = %e, "Failed to release controller during compensation");
            }
        }
        if let Some(shares) = progress.shares {
            let withdrawn = match base_market.convert_shares_to_assets(shares).await {
                Ok(assets) => base_market.withdraw(assets, account, account).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = withdrawn {
                error!(%account, error = %e, "CRITICAL: failed to withdraw deposit during compensation");
            }
        }
    }

    /// Fully unwind the position on `pair_id` and sweep residual risk units
    /// to `owner`.
    ///
    /// Debt is read live from both markets so a retry after a partial failure
    /// repays only what remains. The record survives any failed step.
    pub async fn close_position(&mut self, pair_id: &PairId, owner: &AccountId) -> VaultResult<CloseResult> {
        let position = self
            .positions
            .get(pair_id)
            .cloned()
            .ok_or_else(|| VaultError::PositionNotFound(pair_id.clone()))?;
        let config = self.pair_config(pair_id)?.clone();
        let base_market = Arc::clone(self.market(&position.collateral_token)?);
        let risk_market = Arc::clone(self.market(&position.risk_token)?);
        let (base_dec, risk_dec) = (base_market.decimals(), risk_market.decimals());
        let account = position.account.clone();

        let risk_debt_raw = risk_market.debt_of(&account).await?;
        let base_debt_raw = base_market.debt_of(&account).await?;
        let (held_base_raw, held_risk_raw) = config.pair.split(config.venue.holdings(&account).await?);

        let risk_debt = fixed::from_native(risk_debt_raw, risk_dec)?;
        let available_risk = fixed::from_native(held_risk_raw, risk_dec)? + position.risk_reserve;
        if available_risk < risk_debt {
            return Err(VaultError::InsufficientLiquidity {
                pair: pair_id.clone(),
                required: risk_debt,
                available: available_risk.max(Decimal::ZERO),
            });
        }
        let base_debt = fixed::from_native(base_debt_raw, base_dec)?;
        let available_base = fixed::from_native(held_base_raw, base_dec)? + self.idle_balance(&self.base_token);
        if available_base < base_debt {
            return Err(VaultError::InsufficientLiquidity {
                pair: pair_id.clone(),
                required: base_debt,
                available: available_base,
            });
        }

        info!(pair = %pair_id, %owner, %risk_debt, %base_debt, "Closing position");

        if risk_debt_raw > 0 {
            risk_market.repay(risk_debt_raw, &account).await?;
            self.sync_position(pair_id, |p| {
                p.borrowed_amount = Decimal::ZERO;
                p.risk_reserve -= risk_debt;
            });
        }
        if base_debt_raw > 0 {
            base_market.repay(base_debt_raw, &account).await?;
            if let Some(balance) = self.idle.get_mut(&self.base_token) {
                *balance = (*balance - base_debt).max(Decimal::ZERO);
            }
        }

        risk_market.disable_controller(&account).await?;

        let shares = self.positions.get(pair_id).map_or(0, |p| p.collateral_shares);
        let collateral_raw = base_market.convert_shares_to_assets(shares).await?;
        if collateral_raw > 0 {
            base_market.withdraw(collateral_raw, &self.owner, &account).await?;
        }
        let withdrawn = fixed::from_native(collateral_raw, base_dec)?;
        self.sync_position(pair_id, |p| {
            p.collateral_shares = 0;
            p.collateral_amount = Decimal::ZERO;
        });
        *self.idle.entry(self.base_token.clone()).or_default() += withdrawn;

        let (removed_base_raw, removed_risk_raw) =
            config.pair.split(config.venue.remove_liquidity(&account).await?);
        let removed_base = fixed::from_native(removed_base_raw, base_dec)?;
        let removed_risk = fixed::from_native(removed_risk_raw, risk_dec)?;
        *self.idle.entry(self.base_token.clone()).or_default() += removed_base;

        let reserve = self.positions.get(pair_id).map_or(Decimal::ZERO, |p| p.risk_reserve);
        let swept_risk = (removed_risk + reserve).max(Decimal::ZERO);
        if swept_risk > Decimal::ZERO {
            *self
                .swept
                .entry((owner.clone(), position.risk_token.clone()))
                .or_default() += swept_risk;
        }

        self.positions.remove(pair_id);
        self.active.retain(|id| id != pair_id);

        let result = CloseResult {
            pair: pair_id.clone(),
            owner: owner.clone(),
            repaid_risk: risk_debt,
            repaid_base: base_debt,
            released_base: withdrawn + removed_base,
            swept_risk,
        };
        info!(
            target: "vault_event",
            event = "PositionClosed",
            pair = %pair_id,
            released_base = %result.released_base,
            swept_risk = %result.swept_risk,
            "PositionClosed"
        );
        Ok(result)
    }

    fn sync_position(&mut self, pair_id: &PairId, update: impl FnOnce(&mut Position)) {
        if let Some(position) = self.positions.get_mut(pair_id) {
            update(position);
            position.last_update = self.clock.now();
        }
    }

    /// Rebalance every flagged entry of `plan`.
    ///
    /// Stops at the first failing rebalance; entries already executed stay
    /// executed since each rebalance is atomic on its own.
    pub async fn execute_allocation_plan(&mut self, plan: &AllocationPlan) -> VaultResult<ExecutionReport> {
        let mut outcomes = Vec::new();
        for entry in plan.entries.iter().filter(|e| e.should_rebalance) {
            if let Some(outcome) = self.rebalance_position(&entry.pair).await? {
                outcomes.push(outcome);
            }
        }

        let total_value = self.total_value().await?;
        info!(rebalanced = outcomes.len(), %total_value, "Allocation plan executed");
        Ok(ExecutionReport { outcomes, total_value })
    }

    /// Move the borrow toward the held exposure. `Ok(None)` if no position.
    pub async fn rebalance_position(&mut self, pair_id: &PairId) -> VaultResult<Option<RebalanceOutcome>> {
        let Some(position) = self.positions.get(pair_id).cloned() else {
            return Ok(None);
        };
        let valuation = self.position_valuation(pair_id).await?;
        let risk_market = Arc::clone(self.market(&position.risk_token)?);
        let decimals = risk_market.decimals();

        let delta_before = valuation.delta_value();
        let delta_units = valuation.delta_units();
        let magnitude_raw = fixed::to_native(delta_units.abs(), decimals)?;

        let mut outcome = RebalanceOutcome {
            pair: pair_id.clone(),
            delta_before,
            adjustment: Decimal::ZERO,
            borrowed_after: position.borrowed_amount,
            clamped: false,
        };
        if magnitude_raw == 0 {
            debug!(pair = %pair_id, "Position already neutral");
            return Ok(Some(outcome));
        }

        if delta_units > Decimal::ZERO {
            risk_market.borrow(magnitude_raw, &position.account).await?;
            let units = fixed::from_native(magnitude_raw, decimals)?;
            outcome.adjustment = units;
            self.sync_position(pair_id, |p| {
                p.borrowed_amount += units;
                p.risk_reserve += units;
                p.risk_amount_held = valuation.held_risk;
            });
        } else {
            let live_debt = risk_market.debt_of(&position.account).await?;
            let repay_raw = magnitude_raw.min(live_debt);
            if repay_raw < magnitude_raw {
                outcome.clamped = true;
                warn!(
                    target: "vault_event",
                    event = "DebtInconsistency",
                    pair = %pair_id,
                    computed = magnitude_raw,
                    debt = live_debt,
                    "Computed repay exceeds outstanding debt - clamping"
                );
            }
            if repay_raw > 0 {
                risk_market.repay(repay_raw, &position.account).await?;
            }
            let units = fixed::from_native(repay_raw, decimals)?;
            outcome.adjustment = -units;
            self.sync_position(pair_id, |p| {
                p.borrowed_amount = (p.borrowed_amount - units).max(Decimal::ZERO);
                p.risk_reserve -= units;
                p.risk_amount_held = valuation.held_risk;
            });
        }

        outcome.borrowed_after = self
            .positions
            .get(pair_id)
            .map_or(Decimal::ZERO, |p| p.borrowed_amount);
        info!(
            pair = %pair_id,
            delta = %delta_before,
            adjustment = %outcome.adjustment,
            borrowed = %outcome.borrowed_after,
            "Position rebalanced"
        );
        Ok(Some(outcome))
    }

    /// Repay up to `amount` risk units of the borrow; returns the units repaid.
    pub async fn reduce_borrow(&mut self, pair_id: &PairId, amount: Decimal) -> VaultResult<Decimal> {
        let position = self
            .positions
            .get(pair_id)
            .cloned()
            .ok_or_else(|| VaultError::PositionNotFound(pair_id.clone()))?;
        if amount < Decimal::ZERO {
            return Err(VaultError::InvalidAmount(amount));
        }
        let risk_market = Arc::clone(self.market(&position.risk_token)?);
        let decimals = risk_market.decimals();

        let target = amount.min(position.borrowed_amount);
        let live_debt = risk_market.debt_of(&position.account).await?;
        let repay_raw = fixed::to_native(target, decimals)?.min(live_debt);
        if repay_raw == 0 {
            return Ok(Decimal::ZERO);
        }

        risk_market.repay(repay_raw, &position.account).await?;
        let repaid = fixed::from_native(repay_raw, decimals)?;
        self.sync_position(pair_id, |p| {
            p.borrowed_amount = (p.borrowed_amount - repaid).max(Decimal::ZERO);
            p.risk_reserve -= repaid;
        });

        warn!(pair = %pair_id, %repaid, "Borrow reduced");
        Ok(repaid)
    }

    /// Idle base value plus every position's net value floored at zero.
    pub async fn total_value(&self) -> VaultResult<Decimal> {
        let base_price = self.price_of(&self.base_token).await?;
        let mut total = usd_value(self.idle_balance(&self.base_token), base_price);
        for pair_id in &self.active {
            total += self.position_valuation(pair_id).await?.net_value();
        }
        Ok(total)
    }

    /// Every nonzero debt leg is backed by at least `min_ratio` of collateral.
    pub async fn is_position_healthy(&self, pair_id: &PairId, min_ratio: Pct100) -> VaultResult<bool> {
        let position = self
            .positions
            .get(pair_id)
            .ok_or_else(|| VaultError::PositionNotFound(pair_id.clone()))?;
        let valuation = self.position_valuation(pair_id).await?;
        let collateral = valuation.collateral_value();

        if valuation.debt_value > Decimal::ZERO && collateral < min_ratio.of(valuation.debt_value) {
            return Ok(false);
        }

        let base_market = self.market(&position.collateral_token)?;
        let base_debt_raw = base_market.debt_of(&position.account).await?;
        if base_debt_raw > 0 {
            let base_debt = fixed::from_native(base_debt_raw, base_market.decimals())?;
            let base_debt_value = usd_value(base_debt, valuation.base_price);
            if collateral < min_ratio.of(base_debt_value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Live USD valuation of the position on `pair_id`. Read-only.
    pub async fn position_valuation(&self, pair_id: &PairId) -> VaultResult<PositionValuation> {
        let position = self
            .positions
            .get(pair_id)
            .ok_or_else(|| VaultError::PositionNotFound(pair_id.clone()))?;
        let config = self.pair_config(pair_id)?;
        let base_market = self.market(&position.collateral_token)?;
        let risk_market = self.market(&position.risk_token)?;

        let base_price = self.price_of(&position.collateral_token).await?;
        let risk_price = self.price_of(&position.risk_token).await?;

        let (held_base_raw, held_risk_raw) = config.pair.split(config.venue.holdings(&position.account).await?);
        let held_base = fixed::from_native(held_base_raw, base_market.decimals())?;
        let held_risk = fixed::from_native(held_risk_raw, risk_market.decimals())?;

        let base_leg = usd_value(held_base, base_price);
        let risk_leg = usd_value(held_risk, risk_price);
        let lp_value = base_leg + risk_leg;
        let exposure_value = fixed::safe_div(lp_value * risk_leg, lp_value);

        let collateral_raw = base_market
            .convert_shares_to_assets(position.collateral_shares)
            .await?;
        let lending_collateral = fixed::from_native(collateral_raw, base_market.decimals())?;

        Ok(PositionValuation {
            pair: pair_id.clone(),
            base_price,
            risk_price,
            held_base,
            held_risk,
            lending_collateral_value: usd_value(lending_collateral, base_price),
            lp_value,
            reserve_value: usd_value(position.risk_reserve, risk_price),
            exposure_value,
            debt_value: usd_value(position.borrowed_amount, risk_price),
        })
    }
}
