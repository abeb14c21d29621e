//! Hourly and daily portfolio-value buckets for drawdown checks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::utils::fixed::safe_div;

const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;
const MAX_HOURLY_BUCKETS: usize = 24 * 7;
const MAX_DAILY_BUCKETS: usize = 90;

/// One portfolio-value observation and the buckets it opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerObservation {
    pub value: Decimal,
    pub hour_index: i64,
    pub day_index: i64,
    pub opened_hour: bool,
    pub opened_day: bool,
    pub at: DateTime<Utc>,
}

/// Append-only value buckets. The first observation in a bucket wins.
#[derive(Debug, Clone, Default)]
pub struct ValueTracker {
    hourly: BTreeMap<i64, Decimal>,
    daily: BTreeMap<i64, Decimal>,
}

pub fn hour_index(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECS_PER_HOUR)
}

pub fn day_index(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECS_PER_DAY)
}

/// Relative drop from `reference` to `current`; zero when not a drop.
pub fn drawdown(reference: Decimal, current: Decimal) -> Decimal {
    if reference <= Decimal::ZERO || current >= reference {
        return Decimal::ZERO;
    }
    safe_div(reference - current, reference)
}

impl ValueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` in the buckets of `now` if they are still empty.
    pub fn record(&mut self, value: Decimal, now: DateTime<Utc>) -> TrackerObservation {
        let (hour, day) = (hour_index(now), day_index(now));

        let opened_hour = !self.hourly.contains_key(&hour);
        if opened_hour {
            self.hourly.insert(hour, value);
            prune(&mut self.hourly, MAX_HOURLY_BUCKETS);
        }
        let opened_day = !self.daily.contains_key(&day);
        if opened_day {
            self.daily.insert(day, value);
            prune(&mut self.daily, MAX_DAILY_BUCKETS);
        }

        debug!(%value, hour, day, opened_hour, opened_day, "Value observed");
        TrackerObservation {
            value,
            hour_index: hour,
            day_index: day,
            opened_hour,
            opened_day,
            at: now,
        }
    }

    /// First value observed in the hour containing `now`.
    pub fn last_hour_value(&self, now: DateTime<Utc>) -> Option<Decimal> {
        self.hourly.get(&hour_index(now)).copied()
    }

    /// First value observed in the day containing `now`.
    pub fn last_day_value(&self, now: DateTime<Utc>) -> Option<Decimal> {
        self.daily.get(&day_index(now)).copied()
    }

    pub fn hourly_values(&self) -> &BTreeMap<i64, Decimal> {
        &self.hourly
    }

    pub fn daily_values(&self) -> &BTreeMap<i64, Decimal> {
        &self.daily
    }
}

fn prune(buckets: &mut BTreeMap<i64, Decimal>, max: usize) {
    while buckets.len() > max {
        buckets.pop_first();
    }
}
