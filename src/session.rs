// One trading day's universe, targets and budget snapshot

use crate::budget::{AllocationPolicy, BudgetPlan};
use crate::config::{EngineConfig, InstrumentSelection};
use crate::exchange::Exchange;
use crate::holdings::Holdings;
use crate::targets::{compute_target, prior_day_trading_value};
use crate::types::{Instrument, TargetPrice};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Replaced wholesale at every reset
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub date: NaiveDate,
    pub universe: Vec<Instrument>,
    pub targets: HashMap<Instrument, TargetPrice>,
    pub trading_values: HashMap<Instrument, f64>,
    pub budget: BudgetPlan,
}

impl Session {
    pub fn empty(date: NaiveDate, policy: AllocationPolicy) -> Self {
        Self {
            date,
            universe: Vec::new(),
            targets: HashMap::new(),
            trading_values: HashMap::new(),
            budget: BudgetPlan::new(policy, 0, Decimal::ZERO, &HashMap::new()),
        }
    }

    pub fn target(&self, instrument: &Instrument) -> TargetPrice {
        self.targets.get(instrument).copied().unwrap_or(TargetPrice::UNAVAILABLE)
    }
}

/// Build the session for `date`.
///
/// `previous_universe` is used when the exchange cannot list instruments. A
/// candle failure gives the instrument an unavailable target and zero trading
/// value; a balance failure gives zero capital at open. Instruments with an
/// open position stay in the universe whatever their volume or rank, so they
/// keep their exits and are liquidated at the next reset.
pub async fn build_session(
    exchange: &dyn Exchange,
    config: &EngineConfig,
    date: NaiveDate,
    previous_universe: &[Instrument],
) -> Session {
    let candidates = candidate_universe(exchange, config, previous_universe).await;

    let snapshot = match exchange.fetch_balance_snapshot().await {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("⚠️  Failed to read balance at session open: {:#}", e);
            None
        }
    };
    let held = snapshot
        .as_ref()
        .map(|s| Holdings::from_snapshot(s, &candidates))
        .unwrap_or_default();

    let mut targets = HashMap::new();
    let mut trading_values = HashMap::new();
    for instrument in &candidates {
        let (target, value) = match exchange.fetch_daily_candles(instrument, config.candle_count).await {
            Ok(candles) => (
                compute_target(&candles, config.k_factor),
                prior_day_trading_value(&candles),
            ),
            Err(e) => {
                error!("❌ Failed to fetch daily candles for {}: {:#}", instrument, e);
                (TargetPrice::UNAVAILABLE, 0.0)
            }
        };
        if !target.is_available() {
            error!("❌ No breakout target for {} this session", instrument);
        }
        targets.insert(instrument.clone(), target);
        trading_values.insert(instrument.clone(), value);
    }

    let is_held = |i: &Instrument| held.get(i).is_open();
    let mut universe: Vec<Instrument> = candidates
        .into_iter()
        .filter(|i| {
            is_held(i) || !config.require_prior_volume || trading_values.get(i).copied().unwrap_or(0.0) > 0.0
        })
        .collect();

    if let InstrumentSelection::VolumeRanked { top_n } = config.selection {
        let (kept, ranked): (Vec<Instrument>, Vec<Instrument>) = universe.into_iter().partition(|i| is_held(i));
        universe = rank_by_trading_value(ranked, &trading_values, top_n);
        universe.extend(kept);
    }

    targets.retain(|i, _| universe.contains(i));
    trading_values.retain(|i, _| universe.contains(i));

    let capital_at_open = snapshot.map_or(Decimal::ZERO, |s| s.free_balance);
    let slots = config.max_positions.unwrap_or(universe.len());
    let budget = BudgetPlan::new(config.allocation, slots, capital_at_open, &trading_values);

    info!(
        "📅 Session {} | {} instruments | capital={} | slots={}",
        date,
        universe.len(),
        capital_at_open,
        slots
    );

    Session {
        date,
        universe,
        targets,
        trading_values,
        budget,
    }
}

async fn candidate_universe(
    exchange: &dyn Exchange,
    config: &EngineConfig,
    previous_universe: &[Instrument],
) -> Vec<Instrument> {
    let listed = match &config.selection {
        InstrumentSelection::Fixed(list) => list.clone(),
        InstrumentSelection::All | InstrumentSelection::VolumeRanked { .. } => {
            match exchange
                .list_tradable_instruments(&config.quote_currency, &config.excluded)
                .await
            {
                Ok(list) => list,
                Err(e) => {
                    warn!(
                        "⚠️  Failed to list instruments, keeping previous universe ({}): {:#}",
                        previous_universe.len(),
                        e
                    );
                    previous_universe.to_vec()
                }
            }
        }
    };

    let mut universe: Vec<Instrument> = Vec::with_capacity(listed.len());
    for instrument in listed {
        if !config.excluded.contains(&instrument) && !universe.contains(&instrument) {
            universe.push(instrument);
        }
    }
    universe
}

/// Top `top_n` by prior-day trading value, ties broken by symbol
pub fn rank_by_trading_value(
    mut universe: Vec<Instrument>,
    trading_values: &HashMap<Instrument, f64>,
    top_n: usize,
) -> Vec<Instrument> {
    let value = |i: &Instrument| {
        let v = trading_values.get(i).copied().unwrap_or(0.0);
        if v.is_finite() {
            v
        } else {
            0.0
        }
    };
    universe.sort_by(|a, b| value(b).total_cmp(&value(a)).then_with(|| a.cmp(b)));
    universe.truncate(top_n);
    universe
}
