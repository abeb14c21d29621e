//! Risk management for the vault.
//!
//! Provides the safety gates around every rebalance:
//! - Health-factor and plan validation
//! - Drawdown tracking and the circuit breaker
//! - Per-position risk and emergency deleverage

pub mod alert;
mod circuit;
mod health;
mod manager;
pub mod params;
mod tracker;

pub use alert::{AlertSeverity, RiskAlert, RiskAlertType};
pub use circuit::{BreakerEvent, CircuitBreaker, TripReason};
pub use health::PositionRisk;
pub use manager::{AssessmentReport, PortfolioRiskMetrics, RiskManager};
pub use params::RiskParameters;
pub use tracker::{TrackerObservation, ValueTracker};
