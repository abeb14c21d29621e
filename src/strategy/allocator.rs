//! Pair scoring and capital allocation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pairs::PairMetadata;
use crate::market::PairId;
use crate::utils::fixed::{normalize, safe_div};
use crate::utils::Bps;

/// Coarse risk tier of the deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

/// Allocation and volatility limits of a risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskLimits {
    pub max_allocation: Bps,
    pub max_volatility: Bps,
}

pub fn allocation_for_risk_level(level: RiskLevel) -> RiskLimits {
    let (max_allocation, max_volatility) = match level {
        RiskLevel::Conservative => (3000, 5000),
        RiskLevel::Balanced => (4000, 10_000),
        RiskLevel::Aggressive => (5000, 20_000),
    };
    RiskLimits {
        max_allocation: Bps::new(max_allocation),
        max_volatility: Bps::new(max_volatility),
    }
}

/// Target allocation for one pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationEntry {
    pub pair: PairId,
    pub score: Decimal,
    /// Share of total value, after capping (0.0-1.0)
    pub weight: Decimal,
    /// `weight` applied to the plan's total value
    pub target_value: Decimal,
    pub should_rebalance: bool,
}

/// Allocation plan over every registered pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationPlan {
    pub entries: Vec<AllocationEntry>,
    pub total_value: Decimal,
    /// Share of value left unassigned by capping; never redistributed
    pub unallocated: Decimal,
}

impl AllocationPlan {
    pub fn entry(&self, pair: &PairId) -> Option<&AllocationEntry> {
        self.entries.iter().find(|e| &e.pair == pair)
    }

    pub fn flagged(&self) -> impl Iterator<Item = &AllocationEntry> {
        self.entries.iter().filter(|e| e.should_rebalance)
    }
}

/// Score a pair from 0 to 100. Volume counts 40%, low volatility and low
/// correlation 30% each.
pub fn score_pair(meta: &PairMetadata) -> Decimal {
    let volume = (meta.volume_24h / dec!(1_000_000)).min(dec!(100));
    let volatility = Decimal::from(meta.volatility_30d.value().min(100));
    let correlation = Decimal::from(meta.correlation.value().min(100));

    normalize(
        volume * dec!(0.40)
            + (dec!(100) - volatility) * dec!(0.30)
            + (dec!(100) - correlation) * dec!(0.30),
    )
}

/// Converts scores into capped weights.
#[derive(Debug, Clone)]
pub struct PairAllocator {
    max_allocation_per_pair: Bps,
}

impl PairAllocator {
    pub fn new(max_allocation_per_pair: Bps) -> Self {
        Self {
            max_allocation_per_pair,
        }
    }

    pub fn max_allocation_per_pair(&self) -> Bps {
        self.max_allocation_per_pair
    }

    /// Weight each `(pair, score, eligible)` candidate by its share of the
    /// total score, capped per pair. If every score is zero, eligible
    /// candidates split evenly.
    pub fn allocate(&self, candidates: &[(PairId, Decimal, bool)]) -> Vec<(PairId, Decimal, Decimal)> {
        let cap = self.max_allocation_per_pair.as_fraction();
        let total_score: Decimal = candidates.iter().map(|(_, score, _)| *score).sum();
        let eligible = candidates.iter().filter(|(_, _, ok)| *ok).count();

        debug!(%total_score, eligible, %cap, "Calculating allocation");

        candidates
            .iter()
            .map(|(pair, score, ok)| {
                let raw = if total_score > Decimal::ZERO {
                    safe_div(*score, total_score)
                } else if *ok && eligible > 0 {
                    safe_div(Decimal::ONE, Decimal::from(eligible))
                } else {
                    Decimal::ZERO
                };
                (pair.clone(), *score, raw.min(cap))
            })
            .collect()
    }
}
