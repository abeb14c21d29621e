//! Configuration management for the vault engine.
//!
//! Loads settings from an optional `config.toml` and `DNV__SECTION__KEY`
//! environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::BorrowSizing;
use crate::market::{AccountId, TokenId};
use crate::risk::RiskParameters;
use crate::strategy::RiskLevel;
use crate::utils::{Bps, Pct100};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Risk parameters and privileged actors
    #[serde(default)]
    pub risk: RiskConfig,
    /// Allocation and rebalance timing
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Position ledger setup
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Audit trail storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum portfolio leverage, debt over value (100 = 1.0x)
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Pct100,
    /// Minimum collateral backing per debt leg (150 = 1.5x)
    #[serde(default = "default_min_collateral_ratio")]
    pub min_collateral_ratio: Pct100,
    /// Maximum share of total value per allocation entry (30 = 30%)
    #[serde(default = "default_max_position_concentration")]
    pub max_position_concentration: Pct100,
    /// Maximum pair correlation accepted for whitelisting
    #[serde(default = "default_max_correlation")]
    pub max_correlation: Bps,
    /// Collateral ratio restored by emergency deleverage
    #[serde(default = "default_emergency_deleverage_ratio")]
    pub emergency_deleverage_ratio: Pct100,
    /// Accounts allowed to trip/reset the breaker and deleverage
    #[serde(default = "default_guardians")]
    pub guardians: Vec<AccountId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum seconds between portfolio rebalances
    #[serde(default = "default_min_rebalance_interval_secs")]
    pub min_rebalance_interval_secs: u64,
    /// Rebalance only while congestion cost is below this
    #[serde(default = "default_gas_threshold")]
    pub gas_threshold: Decimal,
    /// USD delta that must be exceeded to rebalance
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: Decimal,
    /// Target portfolio delta in USD
    #[serde(default)]
    pub target_delta: Decimal,
    /// Cap on any single pair's allocation weight
    #[serde(default = "default_max_allocation_per_pair")]
    pub max_allocation_per_pair: Bps,
    /// Decayed 24h volume needed for a pair to be active
    #[serde(default = "default_min_volume_threshold")]
    pub min_volume_threshold: Decimal,
    /// Correlation assumed for every pair by the default estimator
    #[serde(default = "default_correlation")]
    pub default_correlation: Bps,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Stable base asset used as collateral
    #[serde(default = "default_base_token")]
    pub base_token: TokenId,
    /// Account owning the per-position sub-accounts
    #[serde(default = "default_owner")]
    pub owner: AccountId,
    #[serde(default)]
    pub sizing: BorrowSizing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_max_leverage() -> Pct100 {
    Pct100::new(200) // 2.0x
}

fn default_min_collateral_ratio() -> Pct100 {
    Pct100::new(150) // 1.5x
}

fn default_max_position_concentration() -> Pct100 {
    Pct100::new(40) // 40% of total value
}

fn default_max_correlation() -> Bps {
    Bps::new(9500) // 95%
}

fn default_emergency_deleverage_ratio() -> Pct100 {
    Pct100::new(130) // 1.3x
}

fn default_guardians() -> Vec<AccountId> {
    vec![AccountId::new("guardian")]
}

fn default_min_rebalance_interval_secs() -> u64 {
    3600
}

fn default_gas_threshold() -> Decimal {
    Decimal::new(50, 0) // 50 gwei
}

fn default_rebalance_threshold() -> Decimal {
    Decimal::new(1000, 0) // $1,000 of delta
}

fn default_max_allocation_per_pair() -> Bps {
    Bps::new(3000) // 30%
}

fn default_min_volume_threshold() -> Decimal {
    Decimal::new(1_000_000, 0) // $1M decayed volume
}

fn default_correlation() -> Bps {
    Bps::new(50)
}

fn default_base_token() -> TokenId {
    TokenId::new("USDC")
}

fn default_owner() -> AccountId {
    AccountId::new("vault")
}

fn default_db_path() -> String {
    "dnv.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("DNV")
                    .list_separator(",")
                    .with_list_parse_key("risk.guardians")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.risk
            .parameters()
            .validate()
            .context("Invalid risk parameters")?;

        anyhow::ensure!(
            !self.risk.guardians.is_empty(),
            "at least one guardian must be configured"
        );

        anyhow::ensure!(
            self.strategy.max_allocation_per_pair.value() > 0
                && self.strategy.max_allocation_per_pair.value() <= 10_000,
            "max_allocation_per_pair must be between 1 and 10000 bps"
        );

        anyhow::ensure!(
            self.strategy.rebalance_threshold >= Decimal::ZERO,
            "rebalance_threshold must not be negative"
        );

        anyhow::ensure!(
            self.strategy.min_volume_threshold >= Decimal::ZERO,
            "min_volume_threshold must not be negative"
        );

        Ok(())
    }
}

impl RiskConfig {
    pub fn parameters(&self) -> RiskParameters {
        RiskParameters {
            max_leverage: self.max_leverage,
            min_collateral_ratio: self.min_collateral_ratio,
            max_position_concentration: self.max_position_concentration,
            max_correlation: self.max_correlation,
            emergency_deleverage_ratio: self.emergency_deleverage_ratio,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            min_collateral_ratio: default_min_collateral_ratio(),
            max_position_concentration: default_max_position_concentration(),
            max_correlation: default_max_correlation(),
            emergency_deleverage_ratio: default_emergency_deleverage_ratio(),
            guardians: default_guardians(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_rebalance_interval_secs: default_min_rebalance_interval_secs(),
            gas_threshold: default_gas_threshold(),
            rebalance_threshold: default_rebalance_threshold(),
            target_delta: Decimal::ZERO,
            max_allocation_per_pair: default_max_allocation_per_pair(),
            min_volume_threshold: default_min_volume_threshold(),
            default_correlation: default_correlation(),
            risk_level: RiskLevel::default(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_token: default_base_token(),
            owner: default_owner(),
            sizing: BorrowSizing::default(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
