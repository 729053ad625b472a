//! Shared fixtures: an in-memory exchange and a recording notifier.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use volatility_breakout_trader::config::{EngineConfig, ExchangeKind, InstrumentSelection};
use volatility_breakout_trader::exchange::Exchange;
use volatility_breakout_trader::notify::Notifier;
use volatility_breakout_trader::types::{
    BalanceSnapshot, DailyCandle, Instrument, MarginMode, OrderId, OrderSide, OrderSize, StopKind,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FakeOrder {
    Market { instrument: Instrument, side: OrderSide, size: OrderSize },
    Close { instrument: Instrument, position: Decimal },
    Stop { instrument: Instrument, side: OrderSide, trigger: f64, kind: StopKind },
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub listed: Vec<Instrument>,
    pub prices: HashMap<Instrument, f64>,
    pub candles: HashMap<Instrument, Vec<DailyCandle>>,
    pub positions: HashMap<Instrument, Decimal>,
    pub free_balance: Decimal,
    pub fail_balance: bool,
    pub fail_listing: bool,
    /// Close orders accepted without flattening the position
    pub sticky_closes: usize,
    pub orders: Vec<FakeOrder>,
    pub configured: Vec<(Instrument, String)>,
}

#[derive(Debug, Default)]
pub struct FakeExchange {
    pub state: Mutex<FakeState>,
}

impl FakeExchange {
    pub fn new(free_balance: Decimal) -> Self {
        let exchange = Self::default();
        exchange.state.lock().unwrap().free_balance = free_balance;
        exchange
    }

    pub fn with_instrument(self, instrument: &str, yesterday: DailyCandle, price: f64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let instrument = Instrument::from(instrument);
            let forming = candle(yesterday.close, yesterday.close, yesterday.close, yesterday.close, 0.0);
            state.listed.push(instrument.clone());
            state.candles.insert(instrument.clone(), vec![yesterday, forming]);
            state.prices.insert(instrument, price);
        }
        self
    }

    /// Listed and priced, but the candle endpoint fails for it
    pub fn with_listing_only(self, instrument: &str, price: f64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let instrument = Instrument::from(instrument);
            state.listed.push(instrument.clone());
            state.prices.insert(instrument, price);
        }
        self
    }

    pub fn set_price(&self, instrument: &str, price: f64) {
        self.state.lock().unwrap().prices.insert(Instrument::from(instrument), price);
    }

    pub fn set_position(&self, instrument: &str, size: Decimal) {
        self.state.lock().unwrap().positions.insert(Instrument::from(instrument), size);
    }

    pub fn position(&self, instrument: &str) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .positions
            .get(&Instrument::from(instrument))
            .copied()
            .unwrap_or_default()
    }

    pub fn orders(&self) -> Vec<FakeOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn market_orders(&self) -> Vec<FakeOrder> {
        self.orders()
            .into_iter()
            .filter(|o| matches!(o, FakeOrder::Market { .. }))
            .collect()
    }

    pub fn close_orders(&self) -> usize {
        self.orders()
            .iter()
            .filter(|o| matches!(o, FakeOrder::Close { .. }))
            .count()
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_tradable_instruments(
        &self,
        _quote_currency: &str,
        excluded: &HashSet<Instrument>,
    ) -> Result<Vec<Instrument>> {
        let state = self.state.lock().unwrap();
        if state.fail_listing {
            anyhow::bail!("market list unavailable");
        }
        Ok(state.listed.iter().filter(|i| !excluded.contains(*i)).cloned().collect())
    }

    async fn fetch_current_prices(&self, instruments: &[Instrument]) -> Result<HashMap<Instrument, f64>> {
        let state = self.state.lock().unwrap();
        Ok(instruments
            .iter()
            .filter_map(|i| state.prices.get(i).map(|p| (i.clone(), *p)))
            .collect())
    }

    async fn fetch_daily_candles(&self, instrument: &Instrument, _count: usize) -> Result<Vec<DailyCandle>> {
        let state = self.state.lock().unwrap();
        match state.candles.get(instrument) {
            Some(candles) => Ok(candles.clone()),
            None => anyhow::bail!("no candles for {}", instrument),
        }
    }

    async fn fetch_balance_snapshot(&self) -> Result<BalanceSnapshot> {
        let state = self.state.lock().unwrap();
        if state.fail_balance {
            anyhow::bail!("balance endpoint unavailable");
        }
        Ok(BalanceSnapshot {
            positions: state.positions.clone(),
            free_balance: state.free_balance,
        })
    }

    async fn place_market_order(&self, instrument: &Instrument, side: OrderSide, size: OrderSize) -> Result<OrderId> {
        let mut state = self.state.lock().unwrap();
        let price = state
            .prices
            .get(instrument)
            .and_then(|p| Decimal::from_f64(*p))
            .ok_or_else(|| anyhow::anyhow!("no price for {}", instrument))?;
        let (quantity, cost) = match size {
            OrderSize::Quote(amount) => (amount / price, amount),
            OrderSize::Base(quantity) => (quantity, quantity * price),
        };
        let signed = if side == OrderSide::Buy { quantity } else { -quantity };
        *state.positions.entry(instrument.clone()).or_default() += signed;
        state.free_balance -= cost;
        state.orders.push(FakeOrder::Market { instrument: instrument.clone(), side, size });
        Ok(format!("fake-{}", state.orders.len()))
    }

    async fn place_stop_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        _size: OrderSize,
        trigger_price: f64,
        kind: StopKind,
    ) -> Result<OrderId> {
        let mut state = self.state.lock().unwrap();
        state.orders.push(FakeOrder::Stop { instrument: instrument.clone(), side, trigger: trigger_price, kind });
        Ok(format!("fake-{}", state.orders.len()))
    }

    async fn close_position(&self, instrument: &Instrument, position: Decimal) -> Result<OrderId> {
        let mut state = self.state.lock().unwrap();
        state.orders.push(FakeOrder::Close { instrument: instrument.clone(), position });
        if state.sticky_closes > 0 {
            state.sticky_closes -= 1;
        } else {
            let price = state.prices.get(instrument).and_then(|p| Decimal::from_f64(*p)).unwrap_or_default();
            state.positions.remove(instrument);
            state.free_balance += position.abs() * price;
        }
        Ok(format!("fake-{}", state.orders.len()))
    }

    async fn set_leverage(&self, instrument: &Instrument, multiplier: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.configured.push((instrument.clone(), format!("leverage x{}", multiplier)));
        Ok(())
    }

    async fn set_margin_mode(&self, instrument: &Instrument, mode: MarginMode) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.configured.push((instrument.clone(), format!("{:?}", mode)));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _channel: &str, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> DailyCandle {
    DailyCandle { open, high, low, close, volume }
}

/// Engine settings for tests: fixed universe, no waiting between orders
pub fn test_config(kind: ExchangeKind, instruments: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::defaults_for(kind);
    config.selection = InstrumentSelection::Fixed(instruments.iter().map(|s| Instrument::from(*s)).collect());
    config.order_settle = Duration::ZERO;
    config.schedule.settle = Duration::ZERO;
    config
}

pub fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, day)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}
