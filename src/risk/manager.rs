//! Risk manager: plan validation, health gating, circuit breaker and
//! emergency deleverage.
//!
//! `check_health_factors` and `is_rebalance_safe` never mutate state.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::alert::{AlertSeverity, RiskAlert, RiskAlertType};
use super::circuit::{BreakerEvent, CircuitBreaker, TripReason};
use super::health::PositionRisk;
use super::params::{
    RiskParameters, CRITICAL_HEALTH_FACTOR, DEFAULT_HEALTH_FACTOR, MAX_DAILY_DRAWDOWN,
    MAX_HOURLY_VOLATILITY, MIN_HEALTH_FACTOR,
};
use super::tracker::{drawdown, TrackerObservation, ValueTracker};
use crate::error::{VaultError, VaultResult};
use crate::ledger::PositionLedger;
use crate::market::{AccountId, PairId, TokenId, VolatilitySource};
use crate::strategy::AllocationPlan;
use crate::utils::fixed::{safe_div, weighted_average};
use crate::utils::{Bps, Clock, Pct100};

/// Lookback handed to the volatility feed, in days.
const VOLATILITY_WINDOW_DAYS: i64 = 30;

/// Outcome of one watchdog tick.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentReport {
    pub total_value: Decimal,
    pub observation: TrackerObservation,
    pub hourly_drawdown: Decimal,
    /// `None` when the hourly check tripped and the daily check was skipped
    pub daily_drawdown: Option<Decimal>,
    pub breaker_event: Option<BreakerEvent>,
    pub high_risk: Vec<PairId>,
}

/// Aggregate risk view of the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioRiskMetrics {
    pub total_value: Decimal,
    pub total_debt: Decimal,
    /// Debt over value on the 100 scale
    pub leverage: Decimal,
    pub average_health_factor: Decimal,
    /// Exposure-weighted volatility of the risk legs
    pub volatility: Bps,
    pub any_high_risk: bool,
}

pub struct RiskManager {
    params: RiskParameters,
    guardians: BTreeSet<AccountId>,
    breaker: CircuitBreaker,
    tracker: ValueTracker,
    position_risks: BTreeMap<PairId, PositionRisk>,
    volatility: Arc<dyn VolatilitySource>,
}

impl RiskManager {
    pub fn new(
        params: RiskParameters,
        guardians: impl IntoIterator<Item = AccountId>,
        volatility: Arc<dyn VolatilitySource>,
    ) -> VaultResult<Self> {
        params.validate()?;
        let guardians: BTreeSet<_> = guardians.into_iter().collect();
        if guardians.is_empty() {
            return Err(VaultError::InvalidParameters("at least one guardian is required".into()));
        }

        info!(guardians = guardians.len(), ?params, "Risk manager initialized");
        Ok(Self {
            params,
            guardians,
            breaker: CircuitBreaker::new(),
            tracker: ValueTracker::new(),
            position_risks: BTreeMap::new(),
            volatility,
        })
    }

    pub fn parameters(&self) -> &RiskParameters {
        &self.params
    }

    pub fn is_guardian(&self, actor: &AccountId) -> bool {
        self.guardians.contains(actor)
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn trackers(&self) -> &ValueTracker {
        &self.tracker
    }

    /// Risk of `pair_id` as of the last assessment.
    pub fn position_risk(&self, pair_id: &PairId) -> Option<&PositionRisk> {
        self.position_risks.get(pair_id)
    }

    pub fn position_risks(&self) -> impl Iterator<Item = &PositionRisk> {
        self.position_risks.values()
    }

    fn ensure_guardian(&self, actor: &AccountId) -> VaultResult<()> {
        if !self.is_guardian(actor) {
            warn!(%actor, "Privileged risk action rejected");
            return Err(VaultError::Unauthorized(actor.clone()));
        }
        Ok(())
    }

    /// True iff every active position is at or above the minimum health
    /// factor, or `min_collateral_ratio` when that is stricter. Fails with
    /// `CircuitBreakerActive` while tripped.
    pub async fn check_health_factors(&self, ledger: &PositionLedger) -> VaultResult<bool> {
        Ok(self.unhealthy_position(ledger).await?.is_none())
    }

    /// First active position below the minimum health factor, if any.
    pub async fn unhealthy_position(&self, ledger: &PositionLedger) -> VaultResult<Option<PairId>> {
        self.breaker.ensure_armed()?;

        let min = self.health_floor();
        for pair_id in ledger.active_pairs() {
            if !ledger.is_position_healthy(pair_id, min).await? {
                warn!(pair = %pair_id, %min, "Position below minimum health factor");
                return Ok(Some(pair_id.clone()));
            }
        }
        Ok(None)
    }

    fn health_floor(&self) -> Pct100 {
        MIN_HEALTH_FACTOR.max(self.params.min_collateral_ratio)
    }

    /// Validate a plan before execution. Never errors: a tripped breaker
    /// or an unavailable feed reads as unsafe.
    pub async fn is_rebalance_safe(&self, ledger: &PositionLedger, plan: &AllocationPlan) -> bool {
        if self.breaker.is_tripped() {
            debug!("Rebalance unsafe: circuit breaker tripped");
            return false;
        }

        match self.check_plan(ledger, plan).await {
            Ok(safe) => safe,
            Err(e) => {
                warn!(error = %e, "Rebalance safety check failed closed");
                false
            }
        }
    }

    async fn check_plan(&self, ledger: &PositionLedger, plan: &AllocationPlan) -> VaultResult<bool> {
        let cap = self.params.max_position_concentration.of(plan.total_value);
        let max_leverage = Decimal::from(self.params.max_leverage.value());

        // Debt per pair after each entry applies; a hedged target borrows its own value.
        let mut projected = BTreeMap::new();
        for pair_id in ledger.active_pairs() {
            let debt = ledger.position_valuation(pair_id).await?.debt_value;
            projected.insert(pair_id.clone(), debt);
        }

        for entry in &plan.entries {
            if entry.target_value > cap {
                warn!(pair = %entry.pair, target = %entry.target_value, %cap, "Entry exceeds concentration cap");
                return Ok(false);
            }

            projected.insert(entry.pair.clone(), entry.target_value);
            let total_debt: Decimal = projected.values().sum();
            let leverage = Pct100::scale(safe_div(total_debt, plan.total_value));
            if leverage > max_leverage {
                warn!(pair = %entry.pair, %leverage, max = %self.params.max_leverage, "Projected leverage exceeds limit");
                return Ok(false);
            }
        }

        for token in position_tokens(ledger) {
            if ledger.is_manipulated(&token).await? {
                warn!(%token, "Price manipulation flagged");
                return Ok(false);
            }
        }

        let volatility = self.portfolio_volatility(ledger).await?;
        if volatility > MAX_HOURLY_VOLATILITY {
            warn!(%volatility, max = %MAX_HOURLY_VOLATILITY, "Portfolio volatility too high");
            return Ok(false);
        }
        Ok(true)
    }

    /// Periodic watchdog: observe value, evaluate drawdown trips, halt on
    /// a manipulated position token, then recompute every position's risk.
    pub async fn perform_risk_assessment(
        &mut self,
        ledger: &PositionLedger,
        now: DateTime<Utc>,
    ) -> VaultResult<AssessmentReport> {
        let total_value = ledger.total_value().await?;
        let observation = self.tracker.record(total_value, now);

        let hour_ref = self.tracker.last_hour_value(now).unwrap_or(total_value);
        let hourly_drawdown = drawdown(hour_ref, total_value);
        let mut daily_drawdown = None;
        let mut breaker_event = None;

        if hourly_drawdown > MAX_HOURLY_VOLATILITY.as_fraction() {
            breaker_event = self.trip(TripReason::HourlyVolatility, now);
        } else {
            let day_ref = self.tracker.last_day_value(now).unwrap_or(total_value);
            let daily = drawdown(day_ref, total_value);
            if daily > MAX_DAILY_DRAWDOWN.as_fraction() {
                breaker_event = self.trip(TripReason::DailyDrawdown, now);
            }
            daily_drawdown = Some(daily);
        }

        if !self.breaker.is_tripped() {
            for token in position_tokens(ledger) {
                if ledger.is_manipulated(&token).await? {
                    warn!(%token, "Price manipulation detected during assessment");
                    breaker_event = self.trip(TripReason::OracleManipulation(token), now);
                    break;
                }
            }
        }

        let mut risks = BTreeMap::new();
        let mut high_risk = Vec::new();
        for position in ledger.active_positions() {
            let valuation = ledger.position_valuation(&position.id).await?;
            let risk = PositionRisk::assess(&valuation, position.borrowed_amount, total_value, now);

            if risk.is_high_risk {
                RiskAlert::new(
                    RiskAlertType::HighRiskPosition {
                        pair: risk.pair.clone(),
                        health_factor: risk.health_factor,
                    },
                    AlertSeverity::Warning,
                    format!("Position {} flagged high risk", risk.pair),
                    now,
                )
                .with_metric("exposure", risk.exposure)
                .with_metric("portfolio_value", total_value)
                .emit();
                high_risk.push(risk.pair.clone());
            }
            risks.insert(position.id.clone(), risk);
        }
        self.position_risks = risks;

        info!(
            %total_value,
            %hourly_drawdown,
            daily_drawdown = ?daily_drawdown,
            high_risk = high_risk.len(),
            tripped = self.breaker.is_tripped(),
            "Risk assessment complete"
        );
        Ok(AssessmentReport {
            total_value,
            observation,
            hourly_drawdown,
            daily_drawdown,
            breaker_event,
            high_risk,
        })
    }

    fn trip(&mut self, reason: TripReason, now: DateTime<Utc>) -> Option<BreakerEvent> {
        let event = self.breaker.trip(reason, now)?;
        RiskAlert::new(
            RiskAlertType::BreakerTripped {
                reason: event.reason.clone(),
                cooldown_secs: event.cooldown_secs,
            },
            AlertSeverity::Critical,
            format!("Circuit breaker tripped: {}", event.reason),
            now,
        )
        .emit();
        Some(event)
    }

    /// Manual halt. Guardian only.
    pub fn trip_circuit_breaker(
        &mut self,
        actor: &AccountId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> VaultResult<Option<BreakerEvent>> {
        self.ensure_guardian(actor)?;
        Ok(self.trip(TripReason::Manual(reason.into()), now))
    }

    /// Re-arm after the cooldown. Guardian only.
    pub fn reset_circuit_breaker(
        &mut self,
        actor: &AccountId,
        now: DateTime<Utc>,
    ) -> VaultResult<Option<BreakerEvent>> {
        self.ensure_guardian(actor)?;
        let event = self.breaker.reset(now)?;

        if event.is_some() {
            RiskAlert::new(
                RiskAlertType::BreakerReset { actor: actor.clone() },
                AlertSeverity::Info,
                "Circuit breaker reset",
                now,
            )
            .emit();
        }
        Ok(event)
    }

    /// Break-glass debt reduction for a position below the critical health
    /// factor. Returns the risk units repaid.
    pub async fn emergency_deleverage(
        &self,
        ledger: &mut PositionLedger,
        actor: &AccountId,
        pair_id: &PairId,
    ) -> VaultResult<Decimal> {
        self.ensure_guardian(actor)?;

        let valuation = ledger.position_valuation(pair_id).await?;
        let health_factor = valuation.health_factor();
        if health_factor >= Decimal::from(CRITICAL_HEALTH_FACTOR.value()) {
            return Err(VaultError::HealthFactorTooLow {
                pair: pair_id.clone(),
                health_factor,
            });
        }

        let target_debt = safe_div(
            valuation.collateral_value(),
            self.params.emergency_deleverage_ratio.as_ratio(),
        );
        let reduction = (valuation.debt_value - target_debt).max(Decimal::ZERO);
        let units = safe_div(reduction, valuation.risk_price);
        debug!(pair = %pair_id, %health_factor, %target_debt, %reduction, %units, "Emergency deleverage sized");

        let repaid = ledger.reduce_borrow(pair_id, units).await?;

        RiskAlert::new(
            RiskAlertType::EmergencyDeleverage {
                pair: pair_id.clone(),
                repaid,
            },
            AlertSeverity::Critical,
            format!("Emergency deleverage on {}", pair_id),
            ledger.clock().now(),
        )
        .with_metric("health_factor", health_factor)
        .with_metric("reduction_usd", reduction)
        .emit();
        Ok(repaid)
    }

    pub async fn portfolio_risk_metrics(&self, ledger: &PositionLedger) -> VaultResult<PortfolioRiskMetrics> {
        let total_value = ledger.total_value().await?;

        let mut total_debt = Decimal::ZERO;
        let mut health_sum = Decimal::ZERO;
        let mut count = 0u32;
        for pair_id in ledger.active_pairs() {
            let valuation = ledger.position_valuation(pair_id).await?;
            total_debt += valuation.debt_value;
            health_sum += valuation.health_factor();
            count += 1;
        }

        let average_health_factor = if count == 0 {
            DEFAULT_HEALTH_FACTOR
        } else {
            safe_div(health_sum, Decimal::from(count))
        };

        Ok(PortfolioRiskMetrics {
            total_value,
            total_debt,
            leverage: Pct100::scale(safe_div(total_debt, total_value)),
            average_health_factor,
            volatility: self.portfolio_volatility(ledger).await?,
            any_high_risk: self.position_risks.values().any(|r| r.is_high_risk),
        })
    }

    async fn portfolio_volatility(&self, ledger: &PositionLedger) -> VaultResult<Bps> {
        let mut weighted = Vec::new();
        for position in ledger.active_positions() {
            let exposure = ledger.position_valuation(&position.id).await?.exposure_value;
            let volatility = self
                .volatility
                .volatility(&position.risk_token, Duration::days(VOLATILITY_WINDOW_DAYS))
                .await?;
            weighted.push((Decimal::from(volatility.value()), exposure.abs()));
        }
        Ok(Bps::from_fraction(weighted_average(&weighted) / dec!(10000)))
    }

    /// Replace the risk parameters. Guardian only.
    pub fn update_parameters(&mut self, actor: &AccountId, params: RiskParameters) -> VaultResult<()> {
        self.ensure_guardian(actor)?;
        params.validate()?;

        info!(%actor, old = ?self.params, new = ?params, "Risk parameters updated");
        self.params = params;
        Ok(())
    }
}

fn position_tokens(ledger: &PositionLedger) -> BTreeSet<TokenId> {
    ledger
        .active_positions()
        .flat_map(|p| [p.collateral_token.clone(), p.risk_token.clone()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::paper::PaperVolatilityFeed;
    use crate::market::{MarketError, MockVolatilitySource};
    use crate::strategy::AllocationEntry;
    use crate::testing::{harness, pair, Harness};

    fn guardian() -> AccountId {
        AccountId::new("guardian")
    }

    fn manager_with(volatility: Arc<dyn VolatilitySource>) -> RiskManager {
        RiskManager::new(RiskParameters::default(), [guardian()], volatility).unwrap()
    }

    fn manager() -> RiskManager {
        manager_with(Arc::new(PaperVolatilityFeed::new(Some(Bps::new(300)))))
    }

    fn plan(total_value: Decimal, targets: &[(&str, Decimal)]) -> AllocationPlan {
        AllocationPlan {
            entries: targets
                .iter()
                .map(|(risk, target)| AllocationEntry {
                    pair: pair(risk),
                    score: dec!(50),
                    weight: safe_div(*target, total_value),
                    target_value: *target,
                    should_rebalance: true,
                })
                .collect(),
            total_value,
            unallocated: Decimal::ZERO,
        }
    }

    async fn with_weth_position() -> Harness {
        let mut h = harness().await;
        h.ledger.open_position(&pair("WETH"), dec!(100_000)).await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_hourly_drawdown_trips_breaker() {
        let h = harness().await;
        let mut risk = manager();
        let t0 = h.now();

        let first = risk.perform_risk_assessment(&h.ledger, t0).await.unwrap();
        assert_eq!(first.total_value, dec!(1_000_000));
        assert!(first.breaker_event.is_none());

        h.feed.set_price(&TokenId::new("USDC"), dec!(0.94)).await;
        let report = risk
            .perform_risk_assessment(&h.ledger, t0 + Duration::minutes(30))
            .await
            .unwrap();

        assert_eq!(report.hourly_drawdown, dec!(0.06));
        assert!(report.daily_drawdown.is_none());
        let event = report.breaker_event.unwrap();
        assert_eq!(event.reason, "Excessive hourly volatility");
        assert_eq!(event.cooldown_secs, 2 * 3600);
        assert_eq!(risk.circuit_breaker().reason(), Some(&TripReason::HourlyVolatility));
    }

    #[tokio::test]
    async fn test_hourly_trip_skips_daily_check() {
        let h = harness().await;
        let mut risk = manager();
        let t0 = h.now();
        risk.perform_risk_assessment(&h.ledger, t0).await.unwrap();

        // 15% breaches both limits; only the hourly trip applies
        h.feed.set_price(&TokenId::new("USDC"), dec!(0.85)).await;
        let report = risk
            .perform_risk_assessment(&h.ledger, t0 + Duration::minutes(10))
            .await
            .unwrap();

        assert!(report.daily_drawdown.is_none());
        assert_eq!(risk.circuit_breaker().cooldown(), Duration::hours(2));
    }

    #[tokio::test]
    async fn test_daily_drawdown_trips_with_longer_cooldown() {
        let h = harness().await;
        let mut risk = manager();
        let t0 = h.now();
        risk.perform_risk_assessment(&h.ledger, t0).await.unwrap();

        // New hour bucket opens at the lower value, so only the day sees the drop
        h.feed.set_price(&TokenId::new("USDC"), dec!(0.89)).await;
        let report = risk
            .perform_risk_assessment(&h.ledger, t0 + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.hourly_drawdown, Decimal::ZERO);
        assert_eq!(report.daily_drawdown, Some(dec!(0.11)));
        assert_eq!(report.breaker_event.unwrap().category, "daily");
        assert_eq!(risk.circuit_breaker().cooldown(), Duration::hours(6));
    }

    #[tokio::test]
    async fn test_assessment_flags_concentrated_position() {
        let mut h = harness().await;
        h.ledger.open_position(&pair("WETH"), dec!(400_000)).await.unwrap();
        let mut risk = manager();

        let report = risk.perform_risk_assessment(&h.ledger, h.now()).await.unwrap();

        // 400k net of a 1M portfolio exceeds the 30% single-position limit
        assert_eq!(report.high_risk, vec![pair("WETH")]);
        let position = risk.position_risk(&pair("WETH")).unwrap();
        assert_eq!(position.health_factor, dec!(200));
        assert_eq!(position.exposure, dec!(400_000));
    }

    #[test]
    fn test_privileged_actions_require_guardian() {
        let mut risk = manager();
        let intruder = AccountId::new("intruder");
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        assert_eq!(
            risk.trip_circuit_breaker(&intruder, "halt", t0).unwrap_err(),
            VaultError::Unauthorized(intruder.clone())
        );
        assert!(!risk.circuit_breaker().is_tripped());

        let event = risk.trip_circuit_breaker(&guardian(), "oracle incident", t0).unwrap().unwrap();
        assert_eq!(event.cooldown_secs, 4 * 3600);
        assert!(matches!(
            risk.reset_circuit_breaker(&intruder, t0 + Duration::hours(5)),
            Err(VaultError::Unauthorized(_))
        ));
        assert!(matches!(
            risk.reset_circuit_breaker(&guardian(), t0 + Duration::hours(3)),
            Err(VaultError::CooldownActive { .. })
        ));
        assert!(risk.reset_circuit_breaker(&guardian(), t0 + Duration::hours(4)).unwrap().is_some());
        assert!(!risk.circuit_breaker().is_tripped());

        let loose = RiskParameters {
            min_collateral_ratio: Pct100::new(90),
            ..RiskParameters::default()
        };
        assert!(risk.update_parameters(&intruder, RiskParameters::default()).is_err());
        assert!(matches!(
            risk.update_parameters(&guardian(), loose),
            Err(VaultError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_gating() {
        let h = with_weth_position().await;
        let mut risk = manager();
        assert!(risk.check_health_factors(&h.ledger).await.unwrap());

        // 100k + 50 * 10000 collateral against 500k debt = 120
        h.feed.set_price(&TokenId::new("WETH"), dec!(10000)).await;
        assert!(!risk.check_health_factors(&h.ledger).await.unwrap());

        risk.trip_circuit_breaker(&guardian(), "halt", h.now()).unwrap();
        assert!(matches!(
            risk.check_health_factors(&h.ledger).await,
            Err(VaultError::CircuitBreakerActive { .. })
        ));
    }

    #[tokio::test]
    async fn test_stricter_collateral_ratio_raises_health_floor() {
        let h = with_weth_position().await;
        let mut risk = manager();
        assert!(risk.check_health_factors(&h.ledger).await.unwrap());

        // Health factor sits at 200; a 300 ratio leaves it short
        let strict = RiskParameters {
            min_collateral_ratio: Pct100::new(300),
            ..RiskParameters::default()
        };
        risk.update_parameters(&guardian(), strict).unwrap();
        assert!(!risk.check_health_factors(&h.ledger).await.unwrap());
        assert_eq!(risk.unhealthy_position(&h.ledger).await.unwrap(), Some(pair("WETH")));
    }

    #[tokio::test]
    async fn test_manipulation_halts_until_guardian_reset() {
        let h = with_weth_position().await;
        let mut risk = manager();
        let t0 = h.now();
        let weth = TokenId::new("WETH");

        h.feed.set_manipulated(&weth, true).await;
        let report = risk.perform_risk_assessment(&h.ledger, t0).await.unwrap();
        let event = report.breaker_event.unwrap();
        assert_eq!(event.category, "manipulation");
        assert_eq!(event.cooldown_secs, 12 * 3600);
        assert_eq!(
            risk.circuit_breaker().reason(),
            Some(&TripReason::OracleManipulation(weth.clone()))
        );

        // A clean feed does not re-arm the breaker
        h.feed.set_manipulated(&weth, false).await;
        let later = t0 + Duration::hours(13);
        let report = risk.perform_risk_assessment(&h.ledger, later).await.unwrap();
        assert!(report.breaker_event.is_none());
        assert!(risk.circuit_breaker().is_tripped());

        assert!(matches!(
            risk.reset_circuit_breaker(&guardian(), t0 + Duration::hours(11)),
            Err(VaultError::CooldownActive { .. })
        ));
        assert!(risk.reset_circuit_breaker(&guardian(), later).unwrap().is_some());
        assert!(risk.check_health_factors(&h.ledger).await.unwrap());
    }

    #[tokio::test]
    async fn test_rebalance_safety_checks() {
        let h = with_weth_position().await;
        let risk = manager();

        assert!(risk.is_rebalance_safe(&h.ledger, &plan(dec!(1_000_000), &[("WETH", dec!(300_000))])).await);
        // Concentration cap is 40% of value
        assert!(!risk.is_rebalance_safe(&h.ledger, &plan(dec!(1_000_000), &[("WETH", dec!(450_000))])).await);

        h.feed.set_manipulated(&TokenId::new("WETH"), true).await;
        assert!(!risk.is_rebalance_safe(&h.ledger, &plan(dec!(1_000_000), &[("WETH", dec!(300_000))])).await);
    }

    #[tokio::test]
    async fn test_projected_leverage_accumulates_across_entries() {
        let h = harness().await;
        let mut risk = manager();
        let tight = RiskParameters {
            max_leverage: Pct100::new(50),
            ..RiskParameters::default()
        };
        risk.update_parameters(&guardian(), tight).unwrap();

        let single = plan(dec!(1_000_000), &[("WETH", dec!(300_000))]);
        assert!(risk.is_rebalance_safe(&h.ledger, &single).await);

        // Each entry alone is 30; together 60 exceeds 50
        let both = plan(dec!(1_000_000), &[("WETH", dec!(300_000)), ("WBTC", dec!(300_000))]);
        assert!(!risk.is_rebalance_safe(&h.ledger, &both).await);
    }

    #[tokio::test]
    async fn test_volatility_gate_fails_closed() {
        let h = with_weth_position().await;
        let proposal = plan(dec!(1_000_000), &[("WETH", dec!(100_000))]);

        let stormy = manager_with(Arc::new(PaperVolatilityFeed::new(Some(Bps::new(800)))));
        assert!(!stormy.is_rebalance_safe(&h.ledger, &proposal).await);

        let mut feed = MockVolatilitySource::new();
        feed.expect_volatility()
            .returning(|token, _| Err(MarketError::VolatilityUnavailable(token.clone())));
        let blind = manager_with(Arc::new(feed));
        assert!(!blind.is_rebalance_safe(&h.ledger, &proposal).await);

        let mut risk = manager();
        risk.trip_circuit_breaker(&guardian(), "halt", h.now()).unwrap();
        assert!(!risk.is_rebalance_safe(&h.ledger, &proposal).await);
    }

    #[tokio::test]
    async fn test_emergency_deleverage_only_below_critical() {
        let mut h = with_weth_position().await;
        let risk = manager();

        let err = risk
            .emergency_deleverage(&mut h.ledger, &guardian(), &pair("WETH"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VaultError::HealthFactorTooLow {
                pair: pair("WETH"),
                health_factor: dec!(200)
            }
        );

        // 700k collateral vs 600k debt: HF ~116.7
        h.feed.set_price(&TokenId::new("WETH"), dec!(12000)).await;
        assert!(matches!(
            risk.emergency_deleverage(&mut h.ledger, &AccountId::new("intruder"), &pair("WETH")).await,
            Err(VaultError::Unauthorized(_))
        ));

        let repaid = risk
            .emergency_deleverage(&mut h.ledger, &guardian(), &pair("WETH"))
            .await
            .unwrap();
        // (600k - 700k / 1.3) / 12000
        assert!(repaid > dec!(5.128) && repaid < dec!(5.129));
        let position = h.ledger.position(&pair("WETH")).unwrap();
        assert_eq!(position.borrowed_amount, dec!(50) - repaid);
    }

    #[tokio::test]
    async fn test_portfolio_metrics() {
        let h = harness().await;
        let risk = manager();
        let empty = risk.portfolio_risk_metrics(&h.ledger).await.unwrap();
        assert_eq!(empty.average_health_factor, dec!(200));
        assert_eq!(empty.leverage, Decimal::ZERO);
        assert_eq!(empty.volatility, Bps::new(0));

        let h = with_weth_position().await;
        let metrics = risk.portfolio_risk_metrics(&h.ledger).await.unwrap();
        assert_eq!(metrics.total_value, dec!(1_000_000));
        assert_eq!(metrics.total_debt, dec!(100_000));
        assert_eq!(metrics.leverage, dec!(10));
        assert_eq!(metrics.volatility, Bps::new(300));
        assert!(!metrics.any_high_risk);
    }
}
