// Portfolio classification: which instruments broke out this tick

use crate::types::{Instrument, MarketType, TargetPrice};
use std::collections::HashMap;

/// Entry decision for a single instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Long,
    Short,
    Neither,
}

/// Classify one price against its breakout band.
///
/// The long check wins when both thresholds are satisfied (only possible with a
/// misordered band). Short signals exist only in futures mode.
pub fn classify(price: f64, target: &TargetPrice, market_type: MarketType) -> Signal {
    if !price.is_finite() {
        return Signal::Neither;
    }
    if price >= target.long {
        return Signal::Long;
    }
    if market_type == MarketType::Futures && price <= target.short {
        return Signal::Short;
    }
    Signal::Neither
}

/// Candidate sets for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Portfolio {
    pub long: Vec<Instrument>,
    pub short: Vec<Instrument>,
}

impl Portfolio {
    pub fn is_empty(&self) -> bool {
        self.long.is_empty() && self.short.is_empty()
    }

    pub fn signal(&self, instrument: &Instrument) -> Signal {
        if self.long.contains(instrument) {
            Signal::Long
        } else if self.short.contains(instrument) {
            Signal::Short
        } else {
            Signal::Neither
        }
    }
}

/// Build the long/short candidate sets for `universe` from the current prices.
/// Instruments without a price or a target are never candidates.
pub fn build_portfolio(
    universe: &[Instrument],
    prices: &HashMap<Instrument, f64>,
    targets: &HashMap<Instrument, TargetPrice>,
    market_type: MarketType,
) -> Portfolio {
    let mut portfolio = Portfolio::default();
    for instrument in universe {
        let (Some(price), Some(target)) = (prices.get(instrument), targets.get(instrument)) else {
            continue;
        };
        match classify(*price, target, market_type) {
            Signal::Long => portfolio.long.push(instrument.clone()),
            Signal::Short => portfolio.short.push(instrument.clone()),
            Signal::Neither => {}
        }
    }
    portfolio
}
