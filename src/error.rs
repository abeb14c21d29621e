//! Error taxonomy of the engine.
//!
//! Every failure maps to an [`ErrorKind`] so monitoring can tell a routine
//! "not needed yet" apart from a tripped circuit breaker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::market::{AccountId, MarketError, PairId, TokenId};
use crate::utils::FixedPointError;

/// Coarse classification of a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Missing or invalid setup; needs operator intervention.
    Configuration,
    /// The operation does not apply to the current state; a no-op signal.
    State,
    /// An intentional refusal by the risk manager.
    SafetyGate,
    /// A collaborator call failed; propagated without retry.
    External,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VaultError {
    #[error("no lending market registered for {0}")]
    VaultNotRegistered(TokenId),
    #[error("invalid pool {pair}: {reason}")]
    InvalidPool { pair: PairId, reason: String },
    #[error("invalid risk parameters: {0}")]
    InvalidParameters(String),

    #[error("no active position for {0}")]
    PositionNotFound(PairId),
    #[error("rebalance not needed: {0}")]
    RebalanceNotNeeded(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("circuit breaker active: {reason}")]
    CircuitBreakerActive { reason: String },
    #[error("health check failed for {0}")]
    HealthCheckFailed(PairId),
    #[error("health factor {health_factor} of {pair} is not below the critical threshold")]
    HealthFactorTooLow { pair: PairId, health_factor: Decimal },
    #[error("rebalance plan rejected by risk checks")]
    RebalanceUnsafe,
    #[error("circuit breaker cooldown active until {until}")]
    CooldownActive { until: DateTime<Utc> },
    #[error("account {0} is not authorized for this action")]
    Unauthorized(AccountId),

    #[error("insufficient collateral: {0}")]
    InsufficientCollateral(MarketError),
    #[error("insufficient liquidity for {pair}: need {required}, have {available}")]
    InsufficientLiquidity {
        pair: PairId,
        required: Decimal,
        available: Decimal,
    },
    #[error("fixed-point conversion failed: {0}")]
    Arithmetic(#[from] FixedPointError),
    #[error("external call failed: {0}")]
    External(MarketError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::VaultNotRegistered(_)
            | VaultError::InvalidPool { .. }
            | VaultError::InvalidParameters(_) => ErrorKind::Configuration,
            VaultError::PositionNotFound(_)
            | VaultError::RebalanceNotNeeded(_)
            | VaultError::InvalidAmount(_) => ErrorKind::State,
            VaultError::CircuitBreakerActive { .. }
            | VaultError::HealthCheckFailed(_)
            | VaultError::HealthFactorTooLow { .. }
            | VaultError::RebalanceUnsafe
            | VaultError::CooldownActive { .. }
            | VaultError::Unauthorized(_) => ErrorKind::SafetyGate,
            VaultError::InsufficientCollateral(_)
            | VaultError::InsufficientLiquidity { .. }
            | VaultError::Arithmetic(_)
            | VaultError::External(_) => ErrorKind::External,
        }
    }

    /// Safety-gate refusals are the system working as intended.
    pub fn is_safety_gate(&self) -> bool {
        self.kind() == ErrorKind::SafetyGate
    }
}

impl From<MarketError> for VaultError {
    fn from(err: MarketError) -> Self {
        if err.is_collateral_failure() {
            VaultError::InsufficientCollateral(err)
        } else {
            VaultError::External(err)
        }
    }
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        let not_needed = VaultError::RebalanceNotNeeded("interval".into());
        let tripped = VaultError::CircuitBreakerActive {
            reason: "Excessive hourly volatility".into(),
        };

        assert_eq!(not_needed.kind(), ErrorKind::State);
        assert_eq!(tripped.kind(), ErrorKind::SafetyGate);
        assert!(tripped.is_safety_gate());
        assert!(!not_needed.is_safety_gate());
    }

    #[test]
    fn test_collateral_failures_map_to_insufficient_collateral() {
        let err: VaultError = MarketError::CollateralNotEnabled {
            account: AccountId::new("a"),
        }
        .into();
        assert!(matches!(err, VaultError::InsufficientCollateral(_)));

        let err: VaultError = MarketError::Rejected("paused".into()).into();
        assert!(matches!(err, VaultError::External(_)));
        assert_eq!(err.kind(), ErrorKind::External);
    }
}
