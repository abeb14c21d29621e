//! Shared paper-market fixture for unit tests.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ledger::{BorrowSizing, PairConfig, PositionLedger, TradablePair};
use crate::market::paper::{PaperLendingHub, PaperPriceFeed, PaperSwapVenue};
use crate::market::{AccountId, PairId, TokenId};
use crate::utils::{Clock, ManualClock};

pub const OWNER: &str = "vault";

/// Risk tokens of the fixture with their decimals and starting price.
const RISK_TOKENS: [(&str, u8, Decimal); 2] = [("WETH", 18, dec!(2000)), ("WBTC", 8, dec!(40000))];

pub struct Harness {
    pub ledger: PositionLedger,
    pub hub: PaperLendingHub,
    pub feed: Arc<PaperPriceFeed>,
    pub clock: Arc<ManualClock>,
    venues: HashMap<String, Arc<PaperSwapVenue>>,
}

impl Harness {
    pub fn venue(&self, risk: &str) -> &Arc<PaperSwapVenue> {
        &self.venues[risk]
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub fn pair(risk: &str) -> PairId {
    PairId::new(format!("USDC-{}", risk))
}

pub fn account(risk: &str) -> AccountId {
    AccountId::sub_account(&AccountId::new(OWNER), &pair(risk))
}

/// Ledger over USDC with WETH and WBTC pairs and 1M USDC idle.
pub async fn harness() -> Harness {
    let usdc = TokenId::new("USDC");
    let hub = PaperLendingHub::new();
    let feed = Arc::new(PaperPriceFeed::new());
    let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));

    let mut ledger = PositionLedger::new(
        usdc.clone(),
        AccountId::new(OWNER),
        BorrowSizing::Oracle,
        feed.clone(),
        clock.clone(),
    );
    ledger.register_market(Arc::new(hub.add_market(usdc.clone(), 6, 0).await));
    feed.set_price(&usdc, dec!(1)).await;

    let mut venues = HashMap::new();
    for (symbol, decimals, price) in RISK_TOKENS {
        let token = TokenId::new(symbol);
        let cash = 1_000_000 * 10u128.pow(u32::from(decimals));
        ledger.register_market(Arc::new(hub.add_market(token.clone(), decimals, cash).await));
        feed.set_price(&token, price).await;

        let venue = Arc::new(PaperSwapVenue::new(usdc.clone(), token.clone(), 0, 0));
        ledger
            .register_pair(PairConfig {
                pair: TradablePair::new(pair(symbol), usdc.clone(), token, usdc.clone()),
                venue: venue.clone(),
            })
            .unwrap();
        venues.insert(symbol.to_string(), venue);
    }
    ledger
        .credit_idle(&usdc, dec!(1_000_000))
        .unwrap();

    Harness {
        ledger,
        hub,
        feed,
        clock,
        venues,
    }
}
