// Market monitoring: per-tick price/balance snapshots and intraday bookkeeping

use crate::exchange::Exchange;
use crate::exits::IntradayExtremes;
use crate::holdings::Holdings;
use crate::types::{BalanceSnapshot, Instrument, TargetPrice};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything one tick looks at
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    /// Instruments the exchange returned no price for are absent
    pub prices: HashMap<Instrument, f64>,
    /// `None` when the balance lookup failed
    pub balances: Option<BalanceSnapshot>,
    pub taken_at: NaiveDateTime,
}

pub struct MarketMonitor {
    exchange: Arc<dyn Exchange>,
}

impl MarketMonitor {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    /// Prices for the universe plus the account view. Failures degrade to an
    /// empty price map or a missing balance snapshot.
    pub async fn fetch_snapshot(&self, universe: &[Instrument], now: NaiveDateTime) -> MarketSnapshot {
        let prices = match self.exchange.fetch_current_prices(universe).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("⚠️  Failed to fetch prices: {:#}", e);
                HashMap::new()
            }
        };
        MarketSnapshot {
            prices,
            balances: self.refresh_balances().await,
            taken_at: now,
        }
    }

    pub async fn refresh_balances(&self) -> Option<BalanceSnapshot> {
        match self.exchange.fetch_balance_snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("⚠️  Failed to fetch balances: {:#}", e);
                None
            }
        }
    }
}

/// Per-session bookkeeping that is not holding truth
#[derive(Debug, Clone, Default)]
pub struct IntradayState {
    extremes: HashMap<Instrument, IntradayExtremes>,
    held_since: HashMap<Instrument, NaiveDateTime>,
    blacklist: HashSet<Instrument>,
}

impl IntradayState {
    pub fn observe_prices(&mut self, prices: &HashMap<Instrument, f64>) {
        for (instrument, price) in prices {
            if !price.is_finite() {
                continue;
            }
            self.extremes
                .entry(instrument.clone())
                .and_modify(|e| e.update(*price))
                .or_insert_with(|| IntradayExtremes::new(*price));
        }
    }

    /// Start the holding clock for newly opened positions and stop it for closed ones
    pub fn observe_holdings(&mut self, holdings: &Holdings, universe: &[Instrument], now: NaiveDateTime) {
        for instrument in universe {
            if holdings.get(instrument).is_open() {
                self.held_since.entry(instrument.clone()).or_insert(now);
            } else {
                self.held_since.remove(instrument);
            }
        }
    }

    /// Positions found open when the loop starts are treated as held since `since`
    pub fn adopt_holdings(&mut self, holdings: &Holdings, since: NaiveDateTime) {
        for (instrument, _) in holdings.open_positions() {
            self.held_since.insert(instrument, since);
        }
    }

    pub fn held_for(&self, instrument: &Instrument, now: NaiveDateTime) -> Duration {
        self.held_since
            .get(instrument)
            .map(|since| now - *since)
            .unwrap_or_else(Duration::zero)
    }

    pub fn extremes(&self, instrument: &Instrument) -> Option<IntradayExtremes> {
        self.extremes.get(instrument).copied()
    }

    pub fn blacklist(&mut self, instrument: &Instrument) {
        self.blacklist.insert(instrument.clone());
    }

    pub fn is_blacklisted(&self, instrument: &Instrument) -> bool {
        self.blacklist.contains(instrument)
    }
}

/// One debug line per instrument: price, band, holding
pub fn log_status(
    universe: &[Instrument],
    prices: &HashMap<Instrument, f64>,
    targets: &HashMap<Instrument, TargetPrice>,
    holdings: &Holdings,
) {
    for instrument in universe {
        let target = targets.get(instrument).copied().unwrap_or(TargetPrice::UNAVAILABLE);
        match prices.get(instrument) {
            Some(price) => debug!(
                "📊 {} | price={:.4} | long={:.4} | short={:.4} | held={}",
                instrument,
                price,
                target.long,
                target.short,
                holdings.get(instrument).size
            ),
            None => debug!("📊 {} | no price", instrument),
        }
    }
}
