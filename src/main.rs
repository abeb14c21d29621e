//! Delta-Neutral Vault - Main Entry Point
//!
//! Paper simulation of the engine plus a status view of the persisted
//! audit trail.

use anyhow::{Context, Result};
use chrono::{Duration, DurationRound, Utc};
use clap::{Parser, Subcommand};
use delta_neutral_vault::config::Config;
use delta_neutral_vault::error::ErrorKind;
use delta_neutral_vault::ledger::{PairConfig, PositionLedger, TradablePair};
use delta_neutral_vault::market::paper::{
    FixedCongestion, PaperLendingHub, PaperPriceFeed, PaperSwapVenue, PaperVolatilityFeed,
};
use delta_neutral_vault::market::{PairId, TokenId};
use delta_neutral_vault::persistence::PersistenceManager;
use delta_neutral_vault::risk::RiskManager;
use delta_neutral_vault::strategy::StrategyEngine;
use delta_neutral_vault::utils::fixed::to_native;
use delta_neutral_vault::utils::{Bps, Clock, ManualClock};
use delta_neutral_vault::vault::Vault;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Minutes of simulated time per tick.
const TICK_MINUTES: i64 = 15;

/// Per-tick risk-token price multipliers, cycled.
const PRICE_PATH: [Decimal; 6] = [
    dec!(1.01),
    dec!(0.995),
    dec!(1.015),
    dec!(0.99),
    dec!(1.005),
    dec!(0.985),
];

/// Delta-Neutral Vault CLI
#[derive(Parser)]
#[command(name = "dnv")]
#[command(version, about = "Delta-neutral yield vault engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against paper markets on a scripted price path
    Simulate {
        /// Number of ticks to simulate
        #[arg(short, long, default_value_t = 48)]
        ticks: u32,

        /// Base-token capital credited to the vault
        #[arg(short, long, default_value = "1000000")]
        capital: Decimal,

        /// Base amount deployed into the hedged position
        #[arg(short, long, default_value = "400000")]
        position: Decimal,

        /// Tick at which the base asset depegs by 7% for one tick
        #[arg(long)]
        shock_tick: Option<u32>,

        /// Close the position after the last tick
        #[arg(long)]
        close: bool,

        /// Path to SQLite database (default: persistence.db_path)
        #[arg(short, long)]
        db: Option<String>,
    },

    /// Show persisted epochs and circuit-breaker events
    Status {
        /// Path to SQLite database (default: persistence.db_path)
        #[arg(short, long)]
        db: Option<String>,

        /// Number of rows to show per table
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Commands::Simulate {
            ticks,
            capital,
            position,
            shock_tick,
            close,
            db,
        } => {
            let db_path = db.unwrap_or_else(|| config.persistence.db_path.clone());
            let simulation = Simulation {
                ticks,
                capital,
                position,
                shock_tick,
                close,
            };
            run_simulation(&config, &simulation, &db_path).await
        }
        Commands::Status { db, limit } => {
            let db_path = db.unwrap_or_else(|| config.persistence.db_path.clone());
            show_status(&db_path, limit)
        }
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "dnv.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("delta_neutral_vault=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Base Token: {}", config.ledger.base_token);
    info!("   Borrow Sizing: {:?}", config.ledger.sizing);
    info!("   Max Leverage: {}", config.risk.max_leverage);
    info!("   Min Collateral Ratio: {}", config.risk.min_collateral_ratio);
    info!("   Emergency Deleverage Ratio: {}", config.risk.emergency_deleverage_ratio);
    info!("   Max Allocation / Pair: {}", config.strategy.max_allocation_per_pair);
    info!("   Rebalance Threshold: ${}", config.strategy.rebalance_threshold);
    info!(
        "   Min Rebalance Interval: {}s",
        config.strategy.min_rebalance_interval_secs
    );
    info!("   Guardians: {}", config.risk.guardians.len());
}

struct Simulation {
    ticks: u32,
    capital: Decimal,
    position: Decimal,
    shock_tick: Option<u32>,
    close: bool,
}

async fn run_simulation(config: &Config, sim: &Simulation, db_path: &str) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║       Delta-Neutral Vault v{} - Paper Simulation         ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(config);

    let base = config.ledger.base_token.clone();
    let risk_token = TokenId::new("WETH");
    let pair_id = PairId::new(format!("{}-{}", base, risk_token));
    let guardian = config
        .risk
        .guardians
        .first()
        .cloned()
        .context("no guardian configured")?;

    let start = Utc::now()
        .duration_trunc(Duration::hours(1))
        .context("Failed to align simulation clock")?;
    let clock = Arc::new(ManualClock::new(start));
    let hub = PaperLendingHub::new();
    let feed = Arc::new(PaperPriceFeed::new());
    feed.set_price(&base, dec!(1)).await;
    feed.set_price(&risk_token, dec!(2000)).await;

    let mut ledger = PositionLedger::new(
        base.clone(),
        config.ledger.owner.clone(),
        config.ledger.sizing,
        feed.clone(),
        clock.clone(),
    );
    ledger.register_market(Arc::new(hub.add_market(base.clone(), 6, 0).await));
    ledger.register_market(Arc::new(
        hub.add_market(risk_token.clone(), 18, to_native(dec!(100_000), 18)?)
            .await,
    ));

    let venue = Arc::new(PaperSwapVenue::new(
        base.clone(),
        risk_token.clone(),
        to_native(dec!(20_000_000), 6)?,
        to_native(dec!(10_000), 18)?,
    ));
    ledger.register_pair(PairConfig {
        pair: TradablePair::new(pair_id.clone(), base.clone(), risk_token.clone(), base.clone()),
        venue: venue.clone(),
    })?;
    ledger.credit_idle(&base, sim.capital)?;

    let strategy = StrategyEngine::new(&config.strategy, Arc::new(FixedCongestion::new(dec!(20))));
    let risk = RiskManager::new(
        config.risk.parameters(),
        config.risk.guardians.iter().cloned(),
        Arc::new(PaperVolatilityFeed::new(Some(Bps::new(250)))),
    )?;
    let vault = Vault::new(ledger, strategy, risk);
    let persistence = PersistenceManager::new(db_path)?;

    vault.whitelist_pair(&pair_id).await?;
    vault
        .update_pair_metadata(&pair_id, dec!(25_000_000), Bps::new(250))
        .await?;
    vault.open_position(&pair_id, sim.position).await?;
    info!(pair = %pair_id, amount = %sim.position, "📈 Position opened");

    let mut epochs = 0u32;
    let mut blocked = 0u32;
    for tick in 1..=sim.ticks {
        clock.advance(Duration::minutes(TICK_MINUTES));

        let multiplier = PRICE_PATH[tick as usize % PRICE_PATH.len()];
        let price = feed.spot(&risk_token).await.unwrap_or(dec!(2000)) * multiplier;
        feed.set_price(&risk_token, price).await;
        // Pools shed units into a rally and absorb them in a dip
        venue.scale_leg(&risk_token, Decimal::ONE / multiplier).await?;

        let base_price = if sim.shock_tick == Some(tick) { dec!(0.93) } else { dec!(1) };
        feed.set_price(&base, base_price).await;

        let report = vault.perform_risk_assessment().await?;
        persistence.record_observation(&report.observation)?;
        if let Some(event) = &report.breaker_event {
            persistence.record_breaker_event(event)?;
            warn!(tick, reason = %event.reason, "🚨 Circuit breaker tripped");
        }

        let breaker = vault.circuit_breaker().await;
        if breaker.is_tripped() && breaker.resets_at().is_some_and(|at| clock.now() >= at) {
            match vault.reset_circuit_breaker(&guardian).await {
                Ok(Some(event)) => {
                    persistence.record_breaker_event(&event)?;
                    info!(tick, "✅ Circuit breaker reset");
                }
                Ok(None) => {}
                Err(e) => warn!(tick, error = %e, "Circuit breaker reset rejected"),
            }
        }

        match vault.rebalance().await {
            Ok(record) => {
                persistence.record_epoch(&record)?;
                epochs += 1;
                info!(
                    tick,
                    epoch = record.epoch,
                    delta_before = %record.delta_before,
                    delta_after = %record.delta_after,
                    "⚖️  Rebalanced"
                );
            }
            Err(e) if e.kind() == ErrorKind::State => debug!(tick, reason = %e, "No rebalance"),
            Err(e) if e.is_safety_gate() => {
                blocked += 1;
                warn!(tick, error = %e, "Rebalance blocked");
            }
            Err(e) => error!(tick, error = %e, "Rebalance failed"),
        }
    }

    let metrics = vault.portfolio_risk_metrics().await?;
    info!("📊 Simulation Summary");
    info!("   ├─ Ticks:           {}", sim.ticks);
    info!("   ├─ Epochs:          {}", epochs);
    info!("   ├─ Blocked:         {}", blocked);
    info!("   ├─ Total Value:     ${:.2}", metrics.total_value);
    info!("   ├─ Delta:           ${:.2}", vault.delta_exposure().await?);
    info!("   ├─ Leverage:        {:.2}/100", metrics.leverage);
    info!("   └─ Avg Health:      {:.2}", metrics.average_health_factor);

    if sim.close {
        let result = vault.close_position(&pair_id, &config.ledger.owner).await?;
        info!(
            released = %result.released_base,
            swept = %result.swept_risk,
            "🔒 Position closed"
        );
    }
    Ok(())
}

/// Print the persisted audit trail.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              DELTA-NEUTRAL VAULT STATUS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   Run `dnv simulate` first, or check the database path.");
        return Ok(());
    }

    let persistence = PersistenceManager::new(db_path)?;

    let epochs = persistence.recent_epochs(limit)?;
    println!("\n⚖️  Epochs (latest {})", persistence.last_epoch()?.unwrap_or(0));
    if epochs.is_empty() {
        println!("   └─ none recorded");
    }
    for record in &epochs {
        println!(
            "   ├─ #{:<4} {}  delta ${:.2} → ${:.2}  value ${:.2}  pairs {}",
            record.epoch,
            record.timestamp.format("%Y-%m-%d %H:%M UTC"),
            record.delta_before,
            record.delta_after,
            record.total_value,
            record.rebalanced_pairs.len()
        );
    }

    let events = persistence.recent_breaker_events(limit)?;
    println!("\n🚨 Circuit Breaker Events");
    if events.is_empty() {
        println!("   └─ none recorded");
    }
    for event in &events {
        let action = if event.tripped { "TRIP " } else { "RESET" };
        println!(
            "   ├─ {} {}  [{}] {}",
            action,
            event.at.format("%Y-%m-%d %H:%M UTC"),
            event.category,
            event.reason
        );
    }

    let observations = persistence.recent_observations(limit)?;
    println!("\n📈 Value Observations");
    for (at, value) in &observations {
        println!("   ├─ {}  ${:.2}", at.format("%Y-%m-%d %H:%M UTC"), value);
    }

    Ok(())
}
