//! Strategy engine: pair selection, allocation planning and rebalance timing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::allocator::{
    allocation_for_risk_level, score_pair, AllocationEntry, AllocationPlan, PairAllocator, RiskLevel,
    RiskLimits,
};
use super::estimators::{ConstantCorrelation, CorrelationEstimator};
use super::pairs::{PairMetadata, PairRegistry};
use super::rebalancer::{RebalanceDecision, RebalancePolicy};
use crate::config::StrategyConfig;
use crate::error::{VaultError, VaultResult};
use crate::ledger::{PositionLedger, TradablePair};
use crate::market::{CongestionSource, PairId};
use crate::utils::fixed::normalize;
use crate::utils::Bps;

/// Plans allocations and decides when to rebalance. Reads the ledger, never
/// mutates it.
pub struct StrategyEngine {
    registry: PairRegistry,
    allocator: PairAllocator,
    policy: RebalancePolicy,
    risk_level: RiskLevel,
    correlation: Arc<dyn CorrelationEstimator>,
    congestion: Arc<dyn CongestionSource>,
    last_rebalance: Option<DateTime<Utc>>,
}

impl StrategyEngine {
    /// The per-pair cap is the tighter of `max_allocation_per_pair` and the
    /// risk tier's allocation limit.
    pub fn new(config: &StrategyConfig, congestion: Arc<dyn CongestionSource>) -> Self {
        let limits = allocation_for_risk_level(config.risk_level);
        let cap = config.max_allocation_per_pair.min(limits.max_allocation);
        if cap < config.max_allocation_per_pair {
            info!(level = ?config.risk_level, configured = %config.max_allocation_per_pair, %cap, "Risk tier tightens the per-pair cap");
        }
        Self {
            registry: PairRegistry::new(config.min_volume_threshold),
            allocator: PairAllocator::new(cap),
            policy: RebalancePolicy::from_config(config),
            risk_level: config.risk_level,
            correlation: Arc::new(ConstantCorrelation(config.default_correlation)),
            congestion,
            last_rebalance: None,
        }
    }

    /// Replace the default constant correlation estimator.
    pub fn with_correlation_estimator(mut self, estimator: Arc<dyn CorrelationEstimator>) -> Self {
        self.correlation = estimator;
        self
    }

    pub fn registry(&self) -> &PairRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &RebalancePolicy {
        &self.policy
    }

    pub fn last_rebalance(&self) -> Option<DateTime<Utc>> {
        self.last_rebalance
    }

    pub fn risk_limits(&self) -> RiskLimits {
        allocation_for_risk_level(self.risk_level)
    }

    /// Whitelist a pair unless its legs are more correlated than `max_correlation`.
    pub fn whitelist(&mut self, pair: &TradablePair, max_correlation: Bps) -> VaultResult<Bps> {
        let correlation = self.correlation.correlation(pair);
        if correlation > max_correlation {
            return Err(VaultError::InvalidPool {
                pair: pair.id.clone(),
                reason: format!("correlation {} exceeds {}", correlation, max_correlation),
            });
        }
        self.registry.whitelist(pair.id.clone(), correlation);
        Ok(correlation)
    }

    pub fn delist(&mut self, pair_id: &PairId) -> bool {
        self.registry.delist(pair_id)
    }

    pub fn update_pair_metadata(
        &mut self,
        pair_id: &PairId,
        volume_24h: Decimal,
        volatility_30d: Bps,
        now: DateTime<Utc>,
    ) -> VaultResult<PairMetadata> {
        self.registry
            .update_metadata(pair_id, volume_24h, volatility_30d, now)
            .cloned()
    }

    pub fn allocator(&self) -> &PairAllocator {
        &self.allocator
    }

    /// Whitelisted, active and within the risk tier's volatility limit.
    fn is_eligible(&self, pair_id: &PairId) -> bool {
        self.registry
            .metadata(pair_id)
            .is_some_and(|m| m.is_active && m.volatility_30d <= self.risk_limits().max_volatility)
    }

    /// Score of a pair; zero unless eligible.
    pub fn score(&self, pair_id: &PairId) -> Decimal {
        match self.registry.metadata(pair_id) {
            Some(meta) if self.is_eligible(pair_id) => score_pair(meta),
            _ => Decimal::ZERO,
        }
    }

    /// Target allocation over every pair registered with the ledger.
    pub async fn calculate_optimal_allocations(&self, ledger: &PositionLedger, total_value: Decimal) -> AllocationPlan {
        let mut pair_ids: Vec<PairId> = ledger.pairs().map(|p| p.id.clone()).collect();
        pair_ids.sort();

        let candidates: Vec<(PairId, Decimal, bool)> = pair_ids
            .into_iter()
            .map(|id| {
                let eligible = self.is_eligible(&id);
                let score = self.score(&id);
                (id, score, eligible)
            })
            .collect();

        let mut entries = Vec::with_capacity(candidates.len());
        for (pair, score, weight) in self.allocator.allocate(&candidates) {
            let should_rebalance = self.should_rebalance_pair(ledger, &pair).await;
            entries.push(AllocationEntry {
                target_value: normalize(total_value * weight),
                pair,
                score,
                weight,
                should_rebalance,
            });
        }

        let allocated: Decimal = entries.iter().map(|e| e.weight).sum();
        let unallocated = (Decimal::ONE - allocated).max(Decimal::ZERO);
        if unallocated > Decimal::ZERO && !entries.is_empty() {
            debug!(%unallocated, "Capped allocation left unassigned");
        }

        AllocationPlan {
            entries,
            total_value,
            unallocated,
        }
    }

    /// Portfolio-level gate: interval, congestion, then delta. Fails closed.
    pub async fn should_rebalance(&self, ledger: &PositionLedger, now: DateTime<Utc>) -> RebalanceDecision {
        if let Err(decision) = self.policy.interval_elapsed(self.last_rebalance, now) {
            return decision;
        }

        match self.congestion.current_cost().await {
            Ok(cost) => {
                if let Err(decision) = self.policy.congestion_ok(cost) {
                    return decision;
                }
            }
            Err(e) => {
                warn!(error = %e, "Congestion source unavailable");
                return RebalanceDecision::SourceUnavailable(e.to_string());
            }
        }

        match self.delta_exposure(ledger).await {
            Ok(delta) => self.policy.decide_delta(delta),
            Err(e) => {
                warn!(error = %e, "Delta exposure unavailable");
                RebalanceDecision::SourceUnavailable(e.to_string())
            }
        }
    }

    /// Whether one position's own delta exceeds the threshold.
    pub async fn should_rebalance_pair(&self, ledger: &PositionLedger, pair_id: &PairId) -> bool {
        if ledger.position(pair_id).is_none() {
            return false;
        }
        match ledger.position_valuation(pair_id).await {
            Ok(valuation) => self.policy.pair_needs_rebalance(valuation.delta_value()),
            Err(e) => {
                warn!(pair = %pair_id, error = %e, "Valuation failed, not flagging pair");
                false
            }
        }
    }

    /// Portfolio delta in USD: held non-base value minus borrowed value,
    /// summed over active positions.
    pub async fn delta_exposure(&self, ledger: &PositionLedger) -> VaultResult<Decimal> {
        let mut delta = Decimal::ZERO;
        for pair_id in ledger.active_pairs() {
            delta += ledger.position_valuation(pair_id).await?.delta_value();
        }
        Ok(delta)
    }

    pub fn mark_rebalanced(&mut self, now: DateTime<Utc>) {
        info!(at = %now, "Rebalance recorded");
        self.last_rebalance = Some(now);
    }
}
