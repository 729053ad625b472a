// Collaborator interface to the exchange (market data, balances, orders)

use crate::types::{
    BalanceSnapshot, DailyCandle, Instrument, MarginMode, OrderId, OrderSide, OrderSize, StopKind,
};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Everything the engine needs from an exchange. Implementations are thin I/O
/// glue; all decisions stay in the engine.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Instruments quoted in `quote_currency`, minus `excluded`
    async fn list_tradable_instruments(
        &self,
        quote_currency: &str,
        excluded: &HashSet<Instrument>,
    ) -> Result<Vec<Instrument>>;

    /// Last traded price for many instruments. Instruments the exchange did not
    /// return are simply absent.
    async fn fetch_current_prices(&self, instruments: &[Instrument]) -> Result<HashMap<Instrument, f64>>;

    async fn fetch_current_price(&self, instrument: &Instrument) -> Result<f64> {
        let prices = self.fetch_current_prices(std::slice::from_ref(instrument)).await?;
        prices
            .get(instrument)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("No price returned for {}", instrument))
    }

    /// Daily candles, oldest first
    async fn fetch_daily_candles(&self, instrument: &Instrument, count: usize) -> Result<Vec<DailyCandle>>;

    async fn fetch_balance_snapshot(&self) -> Result<BalanceSnapshot>;

    async fn place_market_order(&self, instrument: &Instrument, side: OrderSide, size: OrderSize) -> Result<OrderId>;

    async fn place_stop_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        size: OrderSize,
        trigger_price: f64,
        kind: StopKind,
    ) -> Result<OrderId> {
        let _ = (side, size, trigger_price);
        anyhow::bail!("{} does not support {:?} orders ({})", self.name(), kind, instrument)
    }

    /// Flatten a signed position with an opposite market order
    async fn close_position(&self, instrument: &Instrument, position: Decimal) -> Result<OrderId> {
        let side = if position > Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy };
        self.place_market_order(instrument, side, OrderSize::Base(position.abs())).await
    }

    /// Cancel resting orders (e.g. protective stops) for an instrument
    async fn cancel_all_orders(&self, _instrument: &Instrument) -> Result<()> {
        Ok(())
    }

    async fn set_leverage(&self, instrument: &Instrument, multiplier: u32) -> Result<()> {
        anyhow::bail!("{} does not support leverage ({} x{})", self.name(), instrument, multiplier)
    }

    async fn set_margin_mode(&self, instrument: &Instrument, mode: MarginMode) -> Result<()> {
        anyhow::bail!("{} does not support margin modes ({} {:?})", self.name(), instrument, mode)
    }
}
