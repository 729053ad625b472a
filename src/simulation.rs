// Simulation mode - reads go to the real exchange, orders are logged and filled on paper

use crate::exchange::Exchange;
use crate::types::{
    BalanceSnapshot, DailyCandle, Instrument, MarginMode, OrderId, OrderSide, OrderSize, StopKind,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A position opened by a simulated fill
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperPosition {
    /// Signed size (positive = long)
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// Simulated fills layered on top of the account view
#[derive(Debug, Default)]
struct PaperBook {
    positions: HashMap<Instrument, PaperPosition>,
    /// Change to free balance caused by simulated fills (margin in use and realized PnL)
    cash_delta: Decimal,
}

impl PaperBook {
    /// Apply a fill of signed `qty` at `price` to an instrument whose current
    /// (account + paper) position is `current`.
    fn fill(&mut self, instrument: &Instrument, current: Decimal, qty: Decimal, price: Decimal, leverage: Decimal) {
        let mut opening = qty;

        // Part of the fill that reduces the current position
        if !current.is_zero() && current.is_sign_positive() != qty.is_sign_positive() {
            let closing = qty.abs().min(current.abs());
            let direction = if current.is_sign_positive() { Decimal::ONE } else { Decimal::NEGATIVE_ONE };
            let entry = self
                .positions
                .get(instrument)
                .map(|p| p.entry_price)
                .unwrap_or(price);
            self.cash_delta += closing * entry / leverage + (price - entry) * closing * direction;
            opening = qty + direction * closing;
        }

        if !opening.is_zero() {
            self.cash_delta -= opening.abs() * price / leverage;
        }

        let previous = self.positions.get(instrument).copied();
        let size = previous.map_or(Decimal::ZERO, |p| p.size) + qty;
        if size.is_zero() {
            self.positions.remove(instrument);
            return;
        }

        let entry_price = match previous {
            // Adding to a paper position in the same direction: weighted entry
            Some(p) if !opening.is_zero() && p.size.is_sign_positive() == opening.is_sign_positive() => {
                (p.size.abs() * p.entry_price + opening.abs() * price) / (p.size.abs() + opening.abs())
            }
            Some(p) if opening.is_zero() => p.entry_price,
            _ => price,
        };
        self.positions.insert(instrument.clone(), PaperPosition { size, entry_price });
    }
}

/// Wraps an exchange for `Mode::Simulation`: market data and (unless paper
/// capital is given) balances come from `inner`, every write is only logged.
pub struct DryRunExchange {
    inner: Arc<dyn Exchange>,
    leverage: Decimal,
    paper_capital: Option<Decimal>,
    book: Mutex<PaperBook>,
    next_order_id: AtomicU64,
}

impl DryRunExchange {
    pub fn new(inner: Arc<dyn Exchange>, leverage: u32, paper_capital: Option<Decimal>) -> Self {
        Self {
            inner,
            leverage: Decimal::from(leverage.max(1)),
            paper_capital,
            book: Mutex::new(PaperBook::default()),
            next_order_id: AtomicU64::new(1),
        }
    }

    fn order_id(&self) -> OrderId {
        format!("sim-{}", self.next_order_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Current simulated positions
    pub async fn paper_positions(&self) -> HashMap<Instrument, PaperPosition> {
        self.book.lock().await.positions.clone()
    }

    async fn simulate_fill(&self, instrument: &Instrument, side: OrderSide, size: OrderSize) -> Result<OrderId> {
        let price = self.inner.fetch_current_price(instrument).await?;
        let price = Decimal::from_f64(price)
            .filter(|p| *p > Decimal::ZERO)
            .with_context(|| format!("No usable price for {} ({})", instrument, price))?;

        let quantity = match size {
            OrderSize::Base(quantity) => quantity,
            OrderSize::Quote(amount) => amount / price,
        };
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        let current = self
            .fetch_balance_snapshot()
            .await
            .ok()
            .and_then(|s| s.positions.get(instrument).copied())
            .unwrap_or_default();

        self.book.lock().await.fill(instrument, current, signed, price, self.leverage);

        let id = self.order_id();
        info!(
            "[SIM] 📝 {:?} {} | qty={} @ {} | order={}",
            side,
            instrument,
            quantity.round_dp(8),
            price,
            id
        );
        Ok(id)
    }
}

#[async_trait]
impl Exchange for DryRunExchange {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn list_tradable_instruments(
        &self,
        quote_currency: &str,
        excluded: &HashSet<Instrument>,
    ) -> Result<Vec<Instrument>> {
        self.inner.list_tradable_instruments(quote_currency, excluded).await
    }

    async fn fetch_current_prices(&self, instruments: &[Instrument]) -> Result<HashMap<Instrument, f64>> {
        self.inner.fetch_current_prices(instruments).await
    }

    async fn fetch_daily_candles(&self, instrument: &Instrument, count: usize) -> Result<Vec<DailyCandle>> {
        self.inner.fetch_daily_candles(instrument, count).await
    }

    async fn fetch_balance_snapshot(&self) -> Result<BalanceSnapshot> {
        let mut snapshot = match self.paper_capital {
            Some(capital) => BalanceSnapshot {
                positions: HashMap::new(),
                free_balance: capital,
            },
            None => self.inner.fetch_balance_snapshot().await?,
        };

        let book = self.book.lock().await;
        for (instrument, position) in &book.positions {
            *snapshot.positions.entry(instrument.clone()).or_default() += position.size;
        }
        snapshot.positions.retain(|_, size| !size.is_zero());
        snapshot.free_balance += book.cash_delta;
        Ok(snapshot)
    }

    async fn place_market_order(&self, instrument: &Instrument, side: OrderSide, size: OrderSize) -> Result<OrderId> {
        self.simulate_fill(instrument, side, size).await
    }

    async fn place_stop_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        size: OrderSize,
        trigger_price: f64,
        kind: StopKind,
    ) -> Result<OrderId> {
        let id = self.order_id();
        info!(
            "[SIM] 🛡️ {:?} {:?} {} | qty={} trigger={:.6} | order={}",
            kind,
            side,
            instrument,
            size.amount(),
            trigger_price,
            id
        );
        Ok(id)
    }

    async fn close_position(&self, instrument: &Instrument, position: Decimal) -> Result<OrderId> {
        let side = if position > Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy };
        self.simulate_fill(instrument, side, OrderSize::Base(position.abs())).await
    }

    async fn cancel_all_orders(&self, instrument: &Instrument) -> Result<()> {
        info!("[SIM] ❎ cancel all orders | {}", instrument);
        Ok(())
    }

    async fn set_leverage(&self, instrument: &Instrument, multiplier: u32) -> Result<()> {
        info!("[SIM] ⚙️ leverage {} x{}", instrument, multiplier);
        Ok(())
    }

    async fn set_margin_mode(&self, instrument: &Instrument, mode: MarginMode) -> Result<()> {
        info!("[SIM] ⚙️ margin mode {} {:?}", instrument, mode);
        Ok(())
    }
}
