// Core types used throughout the trading system

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Exchange-tradable symbol, e.g. "KRW-BTC" (spot) or "BTCUSDT" (perpetual futures)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Instrument {
    fn from(symbol: &str) -> Self {
        Self::new(symbol)
    }
}

/// Spot (long only) or perpetual futures (long and short)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Spot,
    Futures,
}

/// One completed trading day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl DailyCandle {
    /// Quote-currency value traded during the day (volume * close)
    pub fn trading_value(&self) -> f64 {
        self.volume * self.close
    }
}

/// Breakout levels for one instrument and one session.
///
/// A target that could not be computed keeps `long = +inf` and `short = -inf`
/// so no price can ever trigger it.
#[derive(Debug, Clone, Copy)]
pub struct TargetPrice {
    pub today_open: f64,
    pub long: f64,
    pub short: f64,
}

impl TargetPrice {
    pub const UNAVAILABLE: TargetPrice = TargetPrice {
        today_open: f64::NAN,
        long: f64::INFINITY,
        short: f64::NEG_INFINITY,
    };

    pub fn is_available(&self) -> bool {
        self.long.is_finite() && self.short.is_finite()
    }
}

impl PartialEq for TargetPrice {
    fn eq(&self, other: &Self) -> bool {
        // NaN opens of two unavailable targets compare equal here
        let same_open = self.today_open == other.today_open
            || (self.today_open.is_nan() && other.today_open.is_nan());
        same_open && self.long == other.long && self.short == other.short
    }
}

/// Signed position size for one instrument (positive = long, negative = short)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HoldingState {
    pub size: Decimal,
}

impl HoldingState {
    pub const FLAT: HoldingState = HoldingState { size: Decimal::ZERO };

    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.size < Decimal::ZERO
    }
}

/// Authoritative account view returned by the exchange
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSnapshot {
    /// Signed position size per instrument. Instruments without a position may be absent.
    pub positions: HashMap<Instrument, Decimal>,
    /// Free quote-currency balance (KRW for spot, available margin for futures)
    pub free_balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// How much to trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSize {
    /// Spend this much quote currency (spot market buys)
    Quote(Decimal),
    /// Trade this many units of the instrument
    Base(Decimal),
}

impl OrderSize {
    pub fn amount(&self) -> Decimal {
        match self {
            OrderSize::Quote(amount) | OrderSize::Base(amount) => *amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopKind {
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    Isolated,
    Cross,
}

pub type OrderId = String;
