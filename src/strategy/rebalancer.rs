//! Rebalance timing gates.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::config::StrategyConfig;

/// Outcome of the portfolio-level rebalance check, naming the gate that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RebalanceDecision {
    Proceed { delta: Decimal },
    IntervalNotElapsed { next_at: DateTime<Utc> },
    CongestionTooHigh { cost: Decimal },
    WithinThreshold { delta: Decimal },
    /// A source could not be read; fails closed
    SourceUnavailable(String),
}

impl RebalanceDecision {
    pub fn should_rebalance(&self) -> bool {
        matches!(self, RebalanceDecision::Proceed { .. })
    }
}

impl fmt::Display for RebalanceDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceDecision::Proceed { delta } => write!(f, "delta {} beyond threshold", delta),
            RebalanceDecision::IntervalNotElapsed { next_at } => {
                write!(f, "interval not elapsed, next at {}", next_at)
            }
            RebalanceDecision::CongestionTooHigh { cost } => {
                write!(f, "congestion cost {} above threshold", cost)
            }
            RebalanceDecision::WithinThreshold { delta } => {
                write!(f, "delta {} within threshold", delta)
            }
            RebalanceDecision::SourceUnavailable(reason) => write!(f, "source unavailable: {}", reason),
        }
    }
}

/// The three gates a portfolio rebalance must pass.
#[derive(Debug, Clone)]
pub struct RebalancePolicy {
    pub min_interval: Duration,
    pub gas_threshold: Decimal,
    pub rebalance_threshold: Decimal,
    pub target_delta: Decimal,
}

impl RebalancePolicy {
    pub fn from_config(config: &StrategyConfig) -> Self {
        let secs = i64::try_from(config.min_rebalance_interval_secs).unwrap_or(i64::MAX);
        Self {
            min_interval: Duration::try_seconds(secs).unwrap_or(Duration::MAX),
            gas_threshold: config.gas_threshold,
            rebalance_threshold: config.rebalance_threshold,
            target_delta: config.target_delta,
        }
    }

    pub fn next_allowed(&self, last: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        last.and_then(|at| at.checked_add_signed(self.min_interval))
    }

    /// Interval gate. Passes if no rebalance happened yet.
    pub fn interval_elapsed(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), RebalanceDecision> {
        if last.is_none() {
            return Ok(());
        }
        let next_at = self.next_allowed(last).unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < next_at {
            return Err(RebalanceDecision::IntervalNotElapsed { next_at });
        }
        Ok(())
    }

    pub fn congestion_ok(&self, cost: Decimal) -> Result<(), RebalanceDecision> {
        if cost < self.gas_threshold {
            Ok(())
        } else {
            Err(RebalanceDecision::CongestionTooHigh { cost })
        }
    }

    /// Portfolio delta gate against the target.
    pub fn decide_delta(&self, delta: Decimal) -> RebalanceDecision {
        let deviation = (delta - self.target_delta).abs();
        debug!(%delta, %deviation, threshold = %self.rebalance_threshold, "Checking delta gate");
        if deviation > self.rebalance_threshold {
            RebalanceDecision::Proceed { delta }
        } else {
            RebalanceDecision::WithinThreshold { delta }
        }
    }

    /// Per-pair gate, independent of the portfolio target.
    pub fn pair_needs_rebalance(&self, pair_delta: Decimal) -> bool {
        pair_delta.abs() > self.rebalance_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> RebalancePolicy {
        RebalancePolicy {
            min_interval: Duration::hours(1),
            gas_threshold: dec!(50),
            rebalance_threshold: dec!(5000),
            target_delta: Decimal::ZERO,
        }
    }

    #[test]
    fn test_interval_gate() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let policy = policy();

        assert!(policy.interval_elapsed(None, now).is_ok());
        assert!(policy.interval_elapsed(Some(now - Duration::hours(1)), now).is_ok());
        assert_eq!(
            policy.interval_elapsed(Some(now - Duration::minutes(30)), now),
            Err(RebalanceDecision::IntervalNotElapsed {
                next_at: now + Duration::minutes(30)
            })
        );
    }

    #[test]
    fn test_congestion_gate_is_strict() {
        let policy = policy();
        assert!(policy.congestion_ok(dec!(49.9)).is_ok());
        assert!(policy.congestion_ok(dec!(50)).is_err());
    }

    #[test]
    fn test_delta_gate_measures_distance_from_target() {
        let mut policy = policy();
        assert!(policy.decide_delta(dec!(-11_000)).should_rebalance());
        assert!(!policy.decide_delta(dec!(5000)).should_rebalance());

        policy.target_delta = dec!(8000);
        assert!(!policy.decide_delta(dec!(11_000)).should_rebalance());
        assert!(policy.pair_needs_rebalance(dec!(-5001)));
    }
}
