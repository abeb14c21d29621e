//! SQLite persistence for the audit trail.
//!
//! Persists what operators need after a restart:
//! - Epoch records (delta before/after per rebalance)
//! - Circuit-breaker trips and resets
//! - Portfolio-value observations that opened a tracker bucket

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::market::PairId;
use crate::risk::{BreakerEvent, TrackerObservation};
use crate::vault::EpochRecord;

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS epochs (
                epoch INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                delta_before TEXT NOT NULL,
                delta_after TEXT NOT NULL,
                total_value TEXT NOT NULL,
                rebalanced_pairs TEXT NOT NULL,
                fees_collected TEXT NOT NULL DEFAULT '0'
            );

            CREATE TABLE IF NOT EXISTS breaker_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                tripped INTEGER NOT NULL,
                category TEXT NOT NULL,
                reason TEXT NOT NULL,
                cooldown_secs INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_breaker_timestamp ON breaker_events(timestamp);

            -- Only observations that opened an hourly or daily bucket
            CREATE TABLE IF NOT EXISTS value_observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                value TEXT NOT NULL,
                hour_index INTEGER NOT NULL,
                day_index INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_observations_timestamp ON value_observations(timestamp);
            "#,
            )
            .context("Failed to initialize schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Store an epoch record. Re-recording an epoch replaces it.
    pub fn record_epoch(&self, record: &EpochRecord) -> Result<()> {
        let pairs = serde_json::to_string(&record.rebalanced_pairs)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO epochs (epoch, timestamp, delta_before, delta_after,
                                           total_value, rebalanced_pairs, fees_collected)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.epoch,
                record.timestamp.to_rfc3339(),
                record.delta_before.to_string(),
                record.delta_after.to_string(),
                record.total_value.to_string(),
                pairs,
                record.fees_collected.to_string(),
            ],
        )?;
        debug!(epoch = record.epoch, "Epoch persisted");
        Ok(())
    }

    /// Most recent epochs, newest first.
    pub fn recent_epochs(&self, limit: usize) -> Result<Vec<EpochRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT epoch, timestamp, delta_before, delta_after, total_value,
                   rebalanced_pairs, fees_collected
            FROM epochs
            ORDER BY epoch DESC
            LIMIT ?1
            "#,
        )?;

        let records = stmt
            .query_map([limit], |row| {
                let pairs: String = row.get(5)?;
                let rebalanced_pairs: Vec<PairId> = serde_json::from_str(&pairs)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
                Ok(EpochRecord {
                    epoch: row.get(0)?,
                    timestamp: time_at(row, 1)?,
                    delta_before: decimal_at(row, 2)?,
                    delta_after: decimal_at(row, 3)?,
                    total_value: decimal_at(row, 4)?,
                    rebalanced_pairs,
                    fees_collected: decimal_at(row, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read epochs")?;

        Ok(records)
    }

    pub fn last_epoch(&self) -> Result<Option<u64>> {
        let epoch = self
            .conn
            .query_row("SELECT MAX(epoch) FROM epochs", [], |row| row.get::<_, Option<u64>>(0))
            .optional()?
            .flatten();
        Ok(epoch)
    }

    pub fn record_breaker_event(&self, event: &BreakerEvent) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO breaker_events (timestamp, tripped, category, reason, cooldown_secs)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                event.at.to_rfc3339(),
                event.tripped,
                event.category,
                event.reason,
                event.cooldown_secs,
            ],
        )?;
        Ok(())
    }

    /// Most recent breaker events, newest first.
    pub fn recent_breaker_events(&self, limit: usize) -> Result<Vec<BreakerEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, tripped, category, reason, cooldown_secs
            FROM breaker_events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map([limit], |row| {
                Ok(BreakerEvent {
                    at: time_at(row, 0)?,
                    tripped: row.get(1)?,
                    category: row.get(2)?,
                    reason: row.get(3)?,
                    cooldown_secs: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read breaker events")?;

        Ok(events)
    }

    /// Store an observation if it opened a bucket. Returns whether it was stored.
    pub fn record_observation(&self, observation: &TrackerObservation) -> Result<bool> {
        if !observation.opened_hour && !observation.opened_day {
            return Ok(false);
        }
        self.conn.execute(
            r#"
            INSERT INTO value_observations (timestamp, value, hour_index, day_index)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                observation.at.to_rfc3339(),
                observation.value.to_string(),
                observation.hour_index,
                observation.day_index,
            ],
        )?;
        Ok(true)
    }

    /// Recent bucket-opening values for drawdown review, newest first.
    pub fn recent_observations(&self, limit: usize) -> Result<Vec<(DateTime<Utc>, Decimal)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, value
            FROM value_observations
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let observations = stmt
            .query_map([limit], |row| Ok((time_at(row, 0)?, decimal_at(row, 1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read value observations")?;

        Ok(observations)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persistence data");
        self.conn.execute_batch(
            r#"
            DELETE FROM epochs;
            DELETE FROM breaker_events;
            DELETE FROM value_observations;
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    fn epoch(n: u64) -> EpochRecord {
        EpochRecord {
            epoch: n,
            delta_before: dec!(-11_000),
            delta_after: dec!(0.000000000000000001),
            total_value: dec!(989_000.5),
            rebalanced_pairs: vec![PairId::new("USDC-WETH")],
            fees_collected: Decimal::ZERO,
            timestamp: at(1_700_000_000 + n as i64 * 3600),
        }
    }

    #[test]
    fn test_epochs_reload_newest_first() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        assert_eq!(manager.last_epoch().unwrap(), None);

        manager.record_epoch(&epoch(1)).unwrap();
        manager.record_epoch(&epoch(2)).unwrap();
        // Retried write of the same epoch does not duplicate it
        manager.record_epoch(&epoch(2)).unwrap();

        let epochs = manager.recent_epochs(10).unwrap();
        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0], epoch(2));
        assert_eq!(epochs[1].delta_after, dec!(0.000000000000000001));
        assert_eq!(manager.last_epoch().unwrap(), Some(2));
    }

    #[test]
    fn test_breaker_events_and_observations() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let trip = BreakerEvent {
            tripped: true,
            category: "hourly".into(),
            reason: "Excessive hourly volatility".into(),
            cooldown_secs: 7200,
            at: at(1_700_000_000),
        };
        manager.record_breaker_event(&trip).unwrap();
        assert_eq!(manager.recent_breaker_events(5).unwrap(), vec![trip]);

        let opened = TrackerObservation {
            value: dec!(1_000_000),
            hour_index: 472_222,
            day_index: 19_675,
            opened_hour: true,
            opened_day: false,
            at: at(1_700_000_000),
        };
        let repeat = TrackerObservation {
            opened_hour: false,
            value: dec!(940_000),
            ..opened.clone()
        };
        assert!(manager.record_observation(&opened).unwrap());
        assert!(!manager.record_observation(&repeat).unwrap());
        assert_eq!(
            manager.recent_observations(5).unwrap(),
            vec![(at(1_700_000_000), dec!(1_000_000))]
        );

        manager.clear_all().unwrap();
        assert!(manager.recent_breaker_events(5).unwrap().is_empty());
    }
}
