//! Vault orchestrator.
//!
//! Sequences strategy, risk and ledger for each rebalance. All mutable
//! engine state sits behind one `RwLock`: mutations hold the write guard
//! for their full duration, queries share the read guard.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::audit::EpochRecord;
use crate::error::{VaultError, VaultResult};
use crate::ledger::{CloseResult, Position, PositionLedger};
use crate::market::{AccountId, PairId};
use crate::risk::{
    AssessmentReport, BreakerEvent, CircuitBreaker, PortfolioRiskMetrics, RiskManager, RiskParameters,
};
use crate::strategy::{AllocationPlan, FeeCollector, NoFees, PairMetadata, StrategyEngine};
use crate::utils::{Bps, Clock};

/// Everything a rebalance may touch.
pub struct VaultState {
    pub ledger: PositionLedger,
    pub strategy: StrategyEngine,
    pub risk: RiskManager,
    epochs: Vec<EpochRecord>,
    epoch: u64,
}

pub struct Vault {
    state: RwLock<VaultState>,
    clock: Arc<dyn Clock>,
    fees: Arc<dyn FeeCollector>,
}

impl Vault {
    pub fn new(ledger: PositionLedger, strategy: StrategyEngine, risk: RiskManager) -> Self {
        let clock = Arc::clone(ledger.clock());
        Self {
            state: RwLock::new(VaultState {
                ledger,
                strategy,
                risk,
                epochs: Vec::new(),
                epoch: 0,
            }),
            clock,
            fees: Arc::new(NoFees),
        }
    }

    pub fn with_fee_collector(mut self, fees: Arc<dyn FeeCollector>) -> Self {
        self.fees = fees;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run one rebalance epoch.
    ///
    /// Order: interval/congestion/delta gate, health gate, delta before,
    /// plan, plan validation, execution, delta after, epoch advance. An
    /// abort before execution leaves every piece of state untouched.
    pub async fn rebalance(&self) -> VaultResult<EpochRecord> {
        let mut guard = self.state.write().await;
        let VaultState {
            ledger,
            strategy,
            risk,
            epochs,
            epoch,
        } = &mut *guard;
        let now = self.now();

        let decision = strategy.should_rebalance(ledger, now).await;
        if !decision.should_rebalance() {
            debug!(%decision, "Rebalance skipped");
            return Err(VaultError::RebalanceNotNeeded(decision.to_string()));
        }

        if let Some(pair) = risk.unhealthy_position(ledger).await? {
            return Err(VaultError::HealthCheckFailed(pair));
        }

        let delta_before = strategy.delta_exposure(ledger).await?;
        let total_value = ledger.total_value().await?;
        let plan = strategy.calculate_optimal_allocations(ledger, total_value).await;

        if !risk.is_rebalance_safe(ledger, &plan).await {
            warn!(%delta_before, "Rebalance plan rejected");
            return Err(VaultError::RebalanceUnsafe);
        }

        let report = ledger.execute_allocation_plan(&plan).await?;
        let rebalanced_pairs = report.rebalanced_pairs();

        let mut fees_collected = Decimal::ZERO;
        for pair in &rebalanced_pairs {
            fees_collected += self.fees.collect(pair);
        }
        if fees_collected > Decimal::ZERO {
            let base = ledger.base_token().clone();
            ledger.credit_idle(&base, fees_collected)?;
        }

        let delta_after = strategy.delta_exposure(ledger).await?;
        strategy.mark_rebalanced(now);
        *epoch += 1;

        let record = EpochRecord {
            epoch: *epoch,
            delta_before,
            delta_after,
            total_value: report.total_value,
            rebalanced_pairs,
            fees_collected,
            timestamp: now,
        };
        record.emit();
        epochs.push(record.clone());
        Ok(record)
    }

    /// Open or top up a hedged position. Refused while the breaker is tripped.
    pub async fn open_position(&self, pair_id: &PairId, base_amount: Decimal) -> VaultResult<PairId> {
        let mut state = self.state.write().await;
        state.risk.circuit_breaker().ensure_armed()?;
        state.ledger.open_position(pair_id, base_amount).await
    }

    /// Unwind a position. Allowed while tripped.
    pub async fn close_position(&self, pair_id: &PairId, owner: &AccountId) -> VaultResult<CloseResult> {
        let mut state = self.state.write().await;
        state.ledger.close_position(pair_id, owner).await
    }

    pub async fn perform_risk_assessment(&self) -> VaultResult<AssessmentReport> {
        let now = self.now();
        let mut guard = self.state.write().await;
        let VaultState { ledger, risk, .. } = &mut *guard;
        risk.perform_risk_assessment(ledger, now).await
    }

    pub async fn trip_circuit_breaker(
        &self,
        actor: &AccountId,
        reason: impl Into<String>,
    ) -> VaultResult<Option<BreakerEvent>> {
        let now = self.now();
        self.state.write().await.risk.trip_circuit_breaker(actor, reason, now)
    }

    pub async fn reset_circuit_breaker(&self, actor: &AccountId) -> VaultResult<Option<BreakerEvent>> {
        let now = self.now();
        self.state.write().await.risk.reset_circuit_breaker(actor, now)
    }

    pub async fn emergency_deleverage(&self, actor: &AccountId, pair_id: &PairId) -> VaultResult<Decimal> {
        let mut guard = self.state.write().await;
        let VaultState { ledger, risk, .. } = &mut *guard;
        risk.emergency_deleverage(ledger, actor, pair_id).await
    }

    pub async fn update_risk_parameters(&self, actor: &AccountId, params: RiskParameters) -> VaultResult<()> {
        self.state.write().await.risk.update_parameters(actor, params)
    }

    pub async fn update_pair_metadata(
        &self,
        pair_id: &PairId,
        volume_24h: Decimal,
        volatility_30d: Bps,
    ) -> VaultResult<PairMetadata> {
        let now = self.now();
        self.state
            .write()
            .await
            .strategy
            .update_pair_metadata(pair_id, volume_24h, volatility_30d, now)
    }

    /// Whitelist a ledger pair, subject to the risk correlation limit.
    pub async fn whitelist_pair(&self, pair_id: &PairId) -> VaultResult<Bps> {
        let mut guard = self.state.write().await;
        let VaultState {
            ledger,
            strategy,
            risk,
            ..
        } = &mut *guard;

        let pair = ledger.pair(pair_id).ok_or_else(|| VaultError::InvalidPool {
            pair: pair_id.clone(),
            reason: "pair not registered with the ledger".into(),
        })?;
        let correlation = strategy.whitelist(pair, risk.parameters().max_correlation)?;
        info!(pair = %pair_id, %correlation, "Pair whitelisted");
        Ok(correlation)
    }

    /// Credit base-token funds available for opening positions.
    pub async fn deposit_idle(&self, amount: Decimal) -> VaultResult<()> {
        let mut state = self.state.write().await;
        let base = state.ledger.base_token().clone();
        state.ledger.credit_idle(&base, amount)
    }

    pub async fn total_value(&self) -> VaultResult<Decimal> {
        self.state.read().await.ledger.total_value().await
    }

    pub async fn delta_exposure(&self) -> VaultResult<Decimal> {
        let state = self.state.read().await;
        state.strategy.delta_exposure(&state.ledger).await
    }

    pub async fn check_health_factors(&self) -> VaultResult<bool> {
        let state = self.state.read().await;
        state.risk.check_health_factors(&state.ledger).await
    }

    /// Current plan at the current total value. Read-only.
    pub async fn allocation_plan(&self) -> VaultResult<AllocationPlan> {
        let state = self.state.read().await;
        let total_value = state.ledger.total_value().await?;
        Ok(state.strategy.calculate_optimal_allocations(&state.ledger, total_value).await)
    }

    pub async fn is_rebalance_safe(&self, plan: &AllocationPlan) -> bool {
        let state = self.state.read().await;
        state.risk.is_rebalance_safe(&state.ledger, plan).await
    }

    pub async fn portfolio_risk_metrics(&self) -> VaultResult<PortfolioRiskMetrics> {
        let state = self.state.read().await;
        state.risk.portfolio_risk_metrics(&state.ledger).await
    }

    pub async fn position(&self, pair_id: &PairId) -> Option<Position> {
        self.state.read().await.ledger.position(pair_id).cloned()
    }

    pub async fn circuit_breaker(&self) -> CircuitBreaker {
        self.state.read().await.risk.circuit_breaker().clone()
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    pub async fn epochs(&self) -> Vec<EpochRecord> {
        self.state.read().await.epochs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::market::paper::{FixedCongestion, PaperPriceFeed, PaperVolatilityFeed};
    use crate::market::TokenId;
    use crate::testing::{harness, pair, Harness};
    use crate::utils::ManualClock;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct FlatFee(Decimal);

    impl FeeCollector for FlatFee {
        fn collect(&self, _pair: &PairId) -> Decimal {
            self.0
        }
    }

    fn guardian() -> AccountId {
        AccountId::new("guardian")
    }

    /// Vault over the shared harness; returns the harness handles too.
    fn vault(h: Harness) -> (Vault, Arc<PaperPriceFeed>, Arc<ManualClock>) {
        let Harness { ledger, feed, clock, .. } = h;
        let strategy = StrategyEngine::new(&StrategyConfig::default(), Arc::new(FixedCongestion::new(dec!(10))));
        let risk = RiskManager::new(
            RiskParameters::default(),
            [guardian()],
            Arc::new(PaperVolatilityFeed::new(Some(Bps::new(300)))),
        )
        .unwrap();
        (Vault::new(ledger, strategy, risk), feed, clock)
    }

    /// A WETH position whose pool units drifted to 45 against 50 borrowed.
    async fn drifted() -> (Vault, Arc<PaperPriceFeed>, Arc<ManualClock>) {
        let mut h = harness().await;
        h.ledger.open_position(&pair("WETH"), dec!(100_000)).await.unwrap();
        h.venue("WETH").scale_leg(&"WETH".into(), dec!(0.9)).await.unwrap();
        let parts = vault(h);
        parts.0.whitelist_pair(&pair("WETH")).await.unwrap();
        parts
            .0
            .update_pair_metadata(&pair("WETH"), dec!(50_000_000), Bps::new(100))
            .await
            .unwrap();
        parts
    }

    #[tokio::test]
    async fn test_neutral_portfolio_is_not_rebalanced() {
        let mut h = harness().await;
        h.ledger.open_position(&pair("WETH"), dec!(100_000)).await.unwrap();
        let (vault, _, _) = vault(h);

        let err = vault.rebalance().await.unwrap_err();
        assert!(matches!(err, VaultError::RebalanceNotNeeded(_)));
        assert!(!err.is_safety_gate());
        assert_eq!(vault.epoch().await, 0);
        assert!(vault.epochs().await.is_empty());
    }

    #[tokio::test]
    async fn test_rebalance_records_epoch() {
        let (vault, _, clock) = drifted().await;
        assert_eq!(vault.delta_exposure().await.unwrap(), dec!(-10_000));

        let record = vault.rebalance().await.unwrap();
        assert_eq!(record.epoch, 1);
        assert_eq!(record.delta_before, dec!(-10_000));
        assert_eq!(record.delta_after, Decimal::ZERO);
        assert_eq!(record.rebalanced_pairs, vec![pair("WETH")]);
        assert_eq!(record.timestamp, clock.now());
        assert_eq!(vault.position(&pair("WETH")).await.unwrap().borrowed_amount, dec!(45));
        assert_eq!(vault.epochs().await, vec![record]);

        // Interval gate holds the next epoch back
        assert!(matches!(
            vault.rebalance().await,
            Err(VaultError::RebalanceNotNeeded(_))
        ));
        clock.advance(Duration::hours(2));
        assert!(matches!(
            vault.rebalance().await,
            Err(VaultError::RebalanceNotNeeded(_))
        ));
        assert_eq!(vault.epoch().await, 1);
    }

    #[tokio::test]
    async fn test_tripped_breaker_blocks_rebalance() {
        let (vault, _, _) = drifted().await;
        vault.trip_circuit_breaker(&guardian(), "oracle incident").await.unwrap();

        let err = vault.rebalance().await.unwrap_err();
        assert!(matches!(err, VaultError::CircuitBreakerActive { .. }));
        assert!(err.is_safety_gate());
        assert_eq!(vault.epoch().await, 0);
        assert_eq!(vault.position(&pair("WETH")).await.unwrap().borrowed_amount, dec!(50));
        assert!(matches!(
            vault.open_position(&pair("WBTC"), dec!(10_000)).await,
            Err(VaultError::CircuitBreakerActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_assessment_trip_is_seen_by_next_rebalance() {
        let (vault, feed, clock) = drifted().await;
        vault.perform_risk_assessment().await.unwrap();

        feed.set_price(&TokenId::new("USDC"), dec!(0.9)).await;
        clock.advance(Duration::minutes(5));
        let report = vault.perform_risk_assessment().await.unwrap();
        assert!(report.breaker_event.is_some());

        assert!(matches!(
            vault.rebalance().await,
            Err(VaultError::CircuitBreakerActive { .. })
        ));

        clock.advance(Duration::hours(2));
        assert!(vault.reset_circuit_breaker(&guardian()).await.unwrap().is_some());
        assert!(!vault.circuit_breaker().await.is_tripped());
    }

    #[tokio::test]
    async fn test_unhealthy_position_aborts_before_planning() {
        let (vault, feed, _) = drifted().await;
        // 100k + 45 * 10000 against 500k debt = 110
        feed.set_price(&TokenId::new("WETH"), dec!(10_000)).await;

        assert_eq!(
            vault.rebalance().await.unwrap_err(),
            VaultError::HealthCheckFailed(pair("WETH"))
        );
        assert_eq!(vault.epoch().await, 0);
        assert_eq!(vault.position(&pair("WETH")).await.unwrap().borrowed_amount, dec!(50));

        let repaid = vault.emergency_deleverage(&guardian(), &pair("WETH")).await.unwrap();
        assert!(repaid > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unsafe_plan_leaves_state_untouched() {
        let (vault, feed, _) = drifted().await;
        feed.set_manipulated(&TokenId::new("WETH"), true).await;

        assert_eq!(vault.rebalance().await.unwrap_err(), VaultError::RebalanceUnsafe);
        assert_eq!(vault.epoch().await, 0);
        assert_eq!(vault.position(&pair("WETH")).await.unwrap().borrowed_amount, dec!(50));
        // Interval clock not consumed
        feed.set_manipulated(&TokenId::new("WETH"), false).await;
        assert_eq!(vault.rebalance().await.unwrap().epoch, 1);
    }

    #[tokio::test]
    async fn test_harvested_fees_credit_idle() {
        let (vault, _, _) = drifted().await;
        let vault = vault.with_fee_collector(Arc::new(FlatFee(dec!(25))));
        let before = vault.total_value().await.unwrap();

        let record = vault.rebalance().await.unwrap();
        assert_eq!(record.fees_collected, dec!(25));
        assert_eq!(vault.total_value().await.unwrap(), before + dec!(25));
    }

    #[test]
    fn test_read_queries_share_one_snapshot() {
        tokio_test::block_on(async {
            let (vault, _, _) = drifted().await;
            let plan = vault.allocation_plan().await.unwrap();

            let (safe, metrics, healthy) = tokio::join!(
                vault.is_rebalance_safe(&plan),
                vault.portfolio_risk_metrics(),
                vault.check_health_factors(),
            );
            assert!(safe);
            assert!(healthy.unwrap());
            assert_eq!(metrics.unwrap().total_debt, dec!(100_000));
            assert_eq!(vault.epoch().await, 0);
        });
    }

    #[tokio::test]
    async fn test_whitelist_requires_registered_pair() {
        let (vault, _, _) = vault(harness().await);
        assert!(matches!(
            vault.whitelist_pair(&PairId::new("USDC-DOGE")).await,
            Err(VaultError::InvalidPool { .. })
        ));
        vault.deposit_idle(dec!(5_000)).await.unwrap();
        assert_eq!(vault.total_value().await.unwrap(), dec!(1_005_000));
    }
}
