//! Pair whitelist and decayed market metadata.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{VaultError, VaultResult};
use crate::market::PairId;
use crate::utils::Bps;

/// Window over which reported volume decays out.
const VOLUME_DECAY_WINDOW_SECS: i64 = 24 * 3600;

/// Market statistics of one whitelisted pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairMetadata {
    pub volume_24h: Decimal,
    pub volatility_30d: Bps,
    pub correlation: Bps,
    pub is_active: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl PairMetadata {
    fn new(correlation: Bps) -> Self {
        Self {
            volume_24h: Decimal::ZERO,
            volatility_30d: Bps::new(0),
            correlation,
            is_active: false,
            last_update: None,
        }
    }
}

/// Decay `old` by the fraction of the window already elapsed and add
/// `incoming`; replace outright once a full window has passed.
pub fn decayed_volume(old: Decimal, incoming: Decimal, elapsed: Duration) -> Decimal {
    let elapsed_secs = elapsed.num_seconds().max(0);
    if elapsed_secs >= VOLUME_DECAY_WINDOW_SECS {
        return incoming;
    }
    let window = Decimal::from(VOLUME_DECAY_WINDOW_SECS);
    let remaining = Decimal::from(VOLUME_DECAY_WINDOW_SECS - elapsed_secs);
    old * remaining / window + incoming
}

/// Whitelisted pairs and their metadata. Iteration is ordered by pair id.
#[derive(Debug, Clone)]
pub struct PairRegistry {
    pairs: BTreeMap<PairId, PairMetadata>,
    min_volume_threshold: Decimal,
}

impl PairRegistry {
    pub fn new(min_volume_threshold: Decimal) -> Self {
        Self {
            pairs: BTreeMap::new(),
            min_volume_threshold,
        }
    }

    /// Whitelist a pair with its estimated correlation. Existing metadata is kept.
    pub fn whitelist(&mut self, pair_id: PairId, correlation: Bps) {
        info!(pair = %pair_id, %correlation, "Pair whitelisted");
        self.pairs
            .entry(pair_id)
            .and_modify(|meta| meta.correlation = correlation)
            .or_insert_with(|| PairMetadata::new(correlation));
    }

    /// Remove a pair; returns whether it was whitelisted.
    pub fn delist(&mut self, pair_id: &PairId) -> bool {
        let removed = self.pairs.remove(pair_id).is_some();
        if removed {
            info!(pair = %pair_id, "Pair delisted");
        }
        removed
    }

    pub fn is_whitelisted(&self, pair_id: &PairId) -> bool {
        self.pairs.contains_key(pair_id)
    }

    pub fn metadata(&self, pair_id: &PairId) -> Option<&PairMetadata> {
        self.pairs.get(pair_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PairId, &PairMetadata)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Fold a keeper report into the pair's metadata.
    pub fn update_metadata(
        &mut self,
        pair_id: &PairId,
        volume_24h: Decimal,
        volatility_30d: Bps,
        now: DateTime<Utc>,
    ) -> VaultResult<&PairMetadata> {
        if volume_24h < Decimal::ZERO {
            return Err(VaultError::InvalidAmount(volume_24h));
        }
        let threshold = self.min_volume_threshold;
        let meta = self.pairs.get_mut(pair_id).ok_or_else(|| VaultError::InvalidPool {
            pair: pair_id.clone(),
            reason: "pair not whitelisted".to_string(),
        })?;

        meta.volume_24h = match meta.last_update {
            Some(last) => decayed_volume(meta.volume_24h, volume_24h, now - last),
            None => volume_24h,
        };
        meta.volatility_30d = volatility_30d;
        meta.is_active = meta.volume_24h >= threshold;
        meta.last_update = Some(now);

        debug!(
            pair = %pair_id,
            volume = %meta.volume_24h,
            volatility = %meta.volatility_30d,
            active = meta.is_active,
            "Pair metadata updated"
        );
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_volume_decays_within_window() {
        // 6h into the window: 75% of the old volume survives
        let volume = decayed_volume(dec!(4_000_000), dec!(1_000_000), Duration::hours(6));
        assert_eq!(volume, dec!(4_000_000));

        let volume = decayed_volume(dec!(4_000_000), dec!(1_000_000), Duration::hours(24));
        assert_eq!(volume, dec!(1_000_000));
    }

    #[test]
    fn test_activity_follows_volume_threshold() {
        let mut registry = PairRegistry::new(dec!(1_000_000));
        let pair = PairId::new("USDC-WETH");
        registry.whitelist(pair.clone(), Bps::new(50));
        assert!(!registry.metadata(&pair).unwrap().is_active);

        let meta = registry
            .update_metadata(&pair, dec!(2_000_000), Bps::new(40), start())
            .unwrap();
        assert!(meta.is_active);

        // A day later the old volume is gone and the new report is small
        let meta = registry
            .update_metadata(&pair, dec!(500_000), Bps::new(40), start() + Duration::days(1))
            .unwrap();
        assert_eq!(meta.volume_24h, dec!(500_000));
        assert!(!meta.is_active);
    }

    #[test]
    fn test_update_requires_whitelist() {
        let mut registry = PairRegistry::new(dec!(1));
        let err = registry
            .update_metadata(&PairId::new("X"), dec!(1), Bps::new(0), start())
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPool { .. }));
    }

    #[test]
    fn test_delist() {
        let mut registry = PairRegistry::new(dec!(1));
        let pair = PairId::new("USDC-WETH");
        registry.whitelist(pair.clone(), Bps::new(50));

        assert!(registry.delist(&pair));
        assert!(!registry.delist(&pair));
        assert!(registry.is_empty());
    }
}
