//! Structured risk alerts for log-based monitoring.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::market::{AccountId, PairId};

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// What the alert is about.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RiskAlertType {
    BreakerTripped { reason: String, cooldown_secs: i64 },
    BreakerReset { actor: AccountId },
    HighRiskPosition { pair: PairId, health_factor: Decimal },
    EmergencyDeleverage { pair: PairId, repaid: Decimal },
}

/// A risk alert, emitted as one JSON line under the `risk_alert` target.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAlert {
    pub timestamp: DateTime<Utc>,
    pub alert_type: RiskAlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub metrics: BTreeMap<String, Decimal>,
}

impl RiskAlert {
    pub fn new(
        alert_type: RiskAlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            alert_type,
            severity,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: Decimal) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    /// Emit as structured log for workflow parsing.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Critical => error!(target: "risk_alert", "RISK_ALERT: {}", json),
        }
    }
}
