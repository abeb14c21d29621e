//! Process-wide circuit breaker.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::error::{VaultError, VaultResult};
use crate::market::TokenId;

/// Why the breaker tripped. Each category carries a fixed cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    Manual(String),
    HourlyVolatility,
    DailyDrawdown,
    OracleManipulation(TokenId),
}

impl TripReason {
    pub fn cooldown(&self) -> Duration {
        match self {
            TripReason::Manual(_) => Duration::hours(4),
            TripReason::HourlyVolatility => Duration::hours(2),
            TripReason::DailyDrawdown => Duration::hours(6),
            TripReason::OracleManipulation(_) => Duration::hours(12),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            TripReason::Manual(_) => "manual",
            TripReason::HourlyVolatility => "hourly",
            TripReason::DailyDrawdown => "daily",
            TripReason::OracleManipulation(_) => "manipulation",
        }
    }
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::Manual(reason) => f.write_str(reason),
            TripReason::HourlyVolatility => f.write_str("Excessive hourly volatility"),
            TripReason::DailyDrawdown => f.write_str("Excessive daily drawdown"),
            TripReason::OracleManipulation(token) => write!(f, "Oracle manipulation on {}", token),
        }
    }
}

/// A trip or reset, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerEvent {
    pub tripped: bool,
    pub category: String,
    pub reason: String,
    pub cooldown_secs: i64,
    pub at: DateTime<Utc>,
}

/// Armed until tripped; reset only after the trip's cooldown has elapsed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreaker {
    is_tripped: bool,
    trip_timestamp: Option<DateTime<Utc>>,
    reason: Option<TripReason>,
    #[serde(with = "cooldown_secs")]
    cooldown: Duration,
}

mod cooldown_secs {
    use chrono::Duration;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(cooldown: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(cooldown.num_seconds())
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tripped(&self) -> bool {
        self.is_tripped
    }

    pub fn reason(&self) -> Option<&TripReason> {
        self.reason.as_ref()
    }

    pub fn trip_timestamp(&self) -> Option<DateTime<Utc>> {
        self.trip_timestamp
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Earliest time a reset is accepted.
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.trip_timestamp.map(|at| at + self.cooldown)
    }

    /// `CircuitBreakerActive` while tripped.
    pub fn ensure_armed(&self) -> VaultResult<()> {
        if self.is_tripped {
            return Err(VaultError::CircuitBreakerActive {
                reason: self
                    .reason
                    .as_ref()
                    .map_or_else(String::new, ToString::to_string),
            });
        }
        Ok(())
    }

    /// Trip the breaker. A trip while already tripped is ignored and
    /// returns `None`; the first trip's timestamp and cooldown stand.
    pub fn trip(&mut self, reason: TripReason, now: DateTime<Utc>) -> Option<BreakerEvent> {
        if self.is_tripped {
            warn!(ignored = %reason, current = ?self.reason, "Breaker already tripped");
            return None;
        }

        self.is_tripped = true;
        self.trip_timestamp = Some(now);
        self.cooldown = reason.cooldown();
        warn!(%reason, cooldown_h = self.cooldown.num_hours(), "Circuit breaker tripped");

        let event = BreakerEvent {
            tripped: true,
            category: reason.category().to_string(),
            reason: reason.to_string(),
            cooldown_secs: self.cooldown.num_seconds(),
            at: now,
        };
        self.reason = Some(reason);
        Some(event)
    }

    /// Re-arm once the cooldown has elapsed. Re-arming an armed breaker is a no-op.
    pub fn reset(&mut self, now: DateTime<Utc>) -> VaultResult<Option<BreakerEvent>> {
        if !self.is_tripped {
            return Ok(None);
        }
        if let Some(until) = self.resets_at() {
            if now < until {
                return Err(VaultError::CooldownActive { until });
            }
        }

        let reason = self.reason.take();
        self.is_tripped = false;
        self.trip_timestamp = None;
        self.cooldown = Duration::zero();
        info!(previous = ?reason, "Circuit breaker reset");

        Ok(Some(BreakerEvent {
            tripped: false,
            category: reason.as_ref().map_or("", TripReason::category).to_string(),
            reason: reason.map(|r| r.to_string()).unwrap_or_default(),
            cooldown_secs: 0,
            at: now,
        }))
    }
}
