// Trading loop: daily reset, exits and breakout entries

use crate::budget::{leveraged_quantity, spot_spend};
use crate::classifier::{build_portfolio, Signal};
use crate::config::EngineConfig;
use crate::exchange::Exchange;
use crate::exits::{evaluate_exit, ExitContext, ExitReason};
use crate::holdings::Holdings;
use crate::monitor::{log_status, IntradayState, MarketMonitor};
use crate::notify::{notify_best_effort, Notifier};
use crate::schedule::{ResetSchedule, SchedulerState};
use crate::session::{build_session, Session};
use crate::types::{BalanceSnapshot, Instrument, MarketType, OrderSide, OrderSize, StopKind};
use chrono::{Local, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    /// A new session was built for this trading date
    Reset(NaiveDate),
    /// Exits and entries were evaluated; `orders` were accepted by the exchange
    Traded { orders: usize },
    /// Nothing could be decided (balance lookup failed)
    Skipped,
}

pub struct Trader {
    exchange: Arc<dyn Exchange>,
    monitor: MarketMonitor,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    schedule: ResetSchedule,
    state: SchedulerState,
    session: Session,
    intraday: IntradayState,
    last_reset: Option<NaiveDate>,
}

impl Trader {
    pub fn new(exchange: Arc<dyn Exchange>, notifier: Arc<dyn Notifier>, config: EngineConfig) -> Self {
        let window = chrono::Duration::from_std(config.schedule.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(20));
        let schedule = ResetSchedule::new(config.schedule.reset_time, window);
        let today = Local::now().date_naive();
        Self {
            monitor: MarketMonitor::new(exchange.clone()),
            exchange,
            notifier,
            session: Session::empty(today, config.allocation),
            config,
            schedule,
            state: SchedulerState::Active,
            intraday: IntradayState::default(),
            last_reset: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn last_reset(&self) -> Option<NaiveDate> {
        self.last_reset
    }

    pub fn is_blacklisted(&self, instrument: &Instrument) -> bool {
        self.intraday.is_blacklisted(instrument)
    }

    /// How long `instrument` has been held as of `now` (zero when flat)
    pub fn held_for(&self, instrument: &Instrument, now: NaiveDateTime) -> chrono::Duration {
        self.intraday.held_for(instrument, now)
    }

    /// Build the session `now` belongs to without liquidating. Positions already
    /// open are adopted as held since the session boundary.
    ///
    /// Starting inside a reset window leaves the reset pending, so the first
    /// tick still liquidates and rebuilds.
    pub async fn start(&mut self, now: NaiveDateTime) {
        let date = self.schedule.session_date(now);
        info!("🚀 Starting session {} on {}", date, self.exchange.name());

        self.session = build_session(self.exchange.as_ref(), &self.config, date, &[]).await;
        self.intraday = IntradayState::default();
        self.last_reset = match self.schedule.due_session(now, None) {
            Some(due) => {
                info!("⏰ Started inside the reset window, liquidating on the first tick");
                due.pred_opt()
            }
            None => Some(date),
        };
        if self.config.market_type == MarketType::Futures {
            self.configure_instruments().await;
        }

        if let Some(snapshot) = self.monitor.refresh_balances().await {
            let holdings = Holdings::from_snapshot(&snapshot, &self.session.universe);
            let since = self.schedule.window_on(date).start;
            for (instrument, holding) in holdings.open_positions() {
                info!("📌 Adopting open position {} size={}", instrument, holding.size);
            }
            self.intraday.adopt_holdings(&holdings, since);
        }
        self.state = SchedulerState::Active;
    }

    /// One polling step: reset when a window is due, trade otherwise.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickReport {
        if let Some(date) = self.schedule.due_session(now, self.last_reset) {
            self.reset(date).await;
            return TickReport::Reset(date);
        }
        self.state = SchedulerState::Active;
        self.trade_tick(now).await
    }

    /// Liquidate, then rebuild the session for `date`. The caller sleeps the
    /// settle time; the state stays `Resetting` until the next tick.
    pub async fn reset(&mut self, date: NaiveDate) {
        self.state = SchedulerState::Resetting;
        info!("🔄 RESET | new trading day {}", date);

        self.liquidate().await;
        self.last_reset = Some(date);

        let previous = self.session.universe.clone();
        self.session = build_session(self.exchange.as_ref(), &self.config, date, &previous).await;
        self.intraday = IntradayState::default();

        if self.config.market_type == MarketType::Futures {
            self.configure_instruments().await;
        }

        let message = format!(
            "Session {} ready: {} instruments, capital {}",
            date,
            self.session.universe.len(),
            self.session.budget.capital_at_open
        );
        info!("✅ {}", message);
        self.notify(&message).await;
    }

    /// Close every open position in the current universe, retrying once for residuals.
    async fn liquidate(&mut self) {
        let universe = self.session.universe.clone();
        let Some(snapshot) = self.monitor.refresh_balances().await else {
            error!("❌ Cannot liquidate: balance lookup failed");
            self.notify("Liquidation skipped: balance lookup failed").await;
            return;
        };

        let open = Holdings::from_snapshot(&snapshot, &universe).open_positions();
        if open.is_empty() {
            info!("No open positions to liquidate");
            return;
        }

        for attempt in 1..=2 {
            let residual = match attempt {
                1 => open.clone(),
                _ => {
                    sleep(self.config.order_settle).await;
                    match self.monitor.refresh_balances().await {
                        Some(snapshot) => Holdings::from_snapshot(&snapshot, &universe).open_positions(),
                        None => {
                            error!("❌ Cannot verify liquidation: balance lookup failed");
                            self.notify("Liquidation unverified: balance lookup failed").await;
                            return;
                        }
                    }
                }
            };
            if residual.is_empty() {
                info!("✅ Liquidation complete");
                return;
            }
            if attempt == 2 {
                warn!("⚠️  {} positions left after liquidation, retrying once", residual.len());
            }
            for (instrument, holding) in &residual {
                self.close(instrument, holding.size, "liquidation").await;
            }
        }

        sleep(self.config.order_settle).await;
        let remaining = match self.monitor.refresh_balances().await {
            Some(snapshot) => Holdings::from_snapshot(&snapshot, &universe).open_positions(),
            None => {
                error!("❌ Cannot verify liquidation retry: balance lookup failed");
                return;
            }
        };
        if remaining.is_empty() {
            info!("✅ Liquidation complete after retry");
            return;
        }
        let names: Vec<String> = remaining
            .iter()
            .map(|(i, h)| format!("{} ({})", i, h.size))
            .collect();
        let message = format!("Liquidation incomplete: {}", names.join(", "));
        error!("❌ {}", message);
        self.notify(&message).await;
    }

    /// Cancel resting orders and flatten `position`. Returns true when the close was accepted.
    async fn close(&self, instrument: &Instrument, position: Decimal, why: &str) -> bool {
        if let Err(e) = self.exchange.cancel_all_orders(instrument).await {
            warn!("⚠️  Failed to cancel orders for {}: {:#}", instrument, e);
        }
        match self.exchange.close_position(instrument, position).await {
            Ok(order_id) => {
                info!("📤 CLOSE {} size={} ({}) | order={}", instrument, position, why, order_id);
                true
            }
            Err(e) => {
                warn!("⚠️  Failed to close {} ({}): {:#}", instrument, why, e);
                false
            }
        }
    }

    async fn trade_tick(&mut self, now: NaiveDateTime) -> TickReport {
        let universe = self.session.universe.clone();
        let snapshot = self.monitor.fetch_snapshot(&universe, now).await;
        self.intraday.observe_prices(&snapshot.prices);

        let Some(mut balances) = snapshot.balances else {
            warn!("⚠️  Balance lookup failed, no orders this tick");
            return TickReport::Skipped;
        };
        let mut holdings = Holdings::from_snapshot(&balances, &universe);
        self.intraday.observe_holdings(&holdings, &universe, now);
        log_status(&universe, &snapshot.prices, &self.session.targets, &holdings);

        let prices = snapshot.prices;
        let mut orders = 0;

        // Exits first
        let mut exited = 0;
        for (instrument, holding) in holdings.open_positions() {
            let Some(price) = prices.get(&instrument).copied() else {
                continue;
            };
            let ctx = ExitContext {
                price,
                target: self.session.target(&instrument),
                holding,
                held_for: self.intraday.held_for(&instrument, now),
                extremes: self.intraday.extremes(&instrument),
            };
            let Some(reason) = evaluate_exit(self.config.stop_loss_pct, self.config.trailing_stop.as_ref(), &ctx)
            else {
                continue;
            };
            let why = describe_exit(&reason);
            if self.close(&instrument, holding.size, &why).await {
                orders += 1;
                exited += 1;
                self.intraday.blacklist(&instrument);
                self.notify(&format!("Exit {} @ {:.4}: {}", instrument, price, why)).await;
            }
        }

        if exited > 0 {
            match self.settle_and_refresh().await {
                Some(fresh) => {
                    balances = fresh;
                    holdings = Holdings::from_snapshot(&balances, &universe);
                    self.intraday.observe_holdings(&holdings, &universe, now);
                }
                None => return TickReport::Traded { orders },
            }
        }

        // Entries
        let portfolio = build_portfolio(&universe, &prices, &self.session.targets, self.config.market_type);
        if portfolio.is_empty() {
            return TickReport::Traded { orders };
        }

        for instrument in portfolio.long.iter().chain(portfolio.short.iter()) {
            if self.intraday.is_blacklisted(instrument) {
                debug!("{} exited this session, not re-entering", instrument);
                continue;
            }
            if holdings.get(instrument).is_open() {
                continue;
            }
            let Some(price) = prices.get(instrument).copied() else {
                continue;
            };

            let budget = self
                .session
                .budget
                .budget_for(instrument, balances.free_balance, holdings.held_count());
            if budget <= Decimal::ZERO {
                debug!("No budget for {} (free={})", instrument, balances.free_balance);
                continue;
            }

            let Some((side, size)) = self.entry_order(portfolio.signal(instrument), budget, price) else {
                continue;
            };
            if size.amount() <= Decimal::ZERO {
                continue;
            }

            match self.exchange.place_market_order(instrument, side, size).await {
                Ok(order_id) => {
                    orders += 1;
                    info!(
                        "📥 ENTRY {:?} {} | price={:.4} | size={:?} | budget={} | order={}",
                        side, instrument, price, size, budget.round_dp(2), order_id
                    );
                    self.notify(&format!("Entry {:?} {} @ {:.4}", side, instrument, price)).await;
                    if self.config.market_type == MarketType::Futures {
                        self.place_protective_orders(instrument, side, size, price).await;
                    }
                    match self.settle_and_refresh().await {
                        Some(fresh) => {
                            balances = fresh;
                            holdings = Holdings::from_snapshot(&balances, &universe);
                            self.intraday.observe_holdings(&holdings, &universe, now);
                        }
                        None => break,
                    }
                }
                Err(e) => warn!("⚠️  Entry order for {} failed: {:#}", instrument, e),
            }
        }

        TickReport::Traded { orders }
    }

    fn entry_order(&self, signal: Signal, budget: Decimal, price: f64) -> Option<(OrderSide, OrderSize)> {
        match (self.config.market_type, signal) {
            (MarketType::Spot, Signal::Long) => {
                Some((OrderSide::Buy, OrderSize::Quote(spot_spend(budget, self.config.fee_rate))))
            }
            (MarketType::Futures, Signal::Long | Signal::Short) => {
                let quantity = leveraged_quantity(budget, price, self.config.leverage, self.config.safety_factor);
                let side = if signal == Signal::Long { OrderSide::Buy } else { OrderSide::Sell };
                Some((side, OrderSize::Base(quantity)))
            }
            _ => None,
        }
    }

    /// Exchange-side stop-loss / take-profit for a fresh futures entry
    async fn place_protective_orders(&self, instrument: &Instrument, entry: OrderSide, size: OrderSize, price: f64) {
        let direction = if entry == OrderSide::Buy { 1.0 } else { -1.0 };
        let legs = [
            (StopKind::StopLoss, self.config.stop_loss_pct.map(|pct| price * (1.0 - direction * pct))),
            (StopKind::TakeProfit, self.config.take_profit_pct.map(|pct| price * (1.0 + direction * pct))),
        ];
        for (kind, trigger) in legs {
            let Some(trigger) = trigger else {
                continue;
            };
            match self
                .exchange
                .place_stop_order(instrument, entry.opposite(), size, trigger, kind)
                .await
            {
                Ok(order_id) => info!("🛡️ {:?} {} @ {:.4} | order={}", kind, instrument, trigger, order_id),
                Err(e) => warn!("⚠️  Failed to place {:?} for {}: {:#}", kind, instrument, e),
            }
        }
    }

    /// Margin mode and leverage for every futures instrument of the session
    async fn configure_instruments(&self) {
        for instrument in &self.session.universe {
            if let Err(e) = self.exchange.set_margin_mode(instrument, self.config.margin_mode).await {
                warn!("⚠️  Failed to set margin mode for {}: {:#}", instrument, e);
            }
            if let Err(e) = self.exchange.set_leverage(instrument, self.config.leverage).await {
                warn!("⚠️  Failed to set leverage for {}: {:#}", instrument, e);
            }
        }
    }

    async fn settle_and_refresh(&self) -> Option<BalanceSnapshot> {
        sleep(self.config.order_settle).await;
        let fresh = self.monitor.refresh_balances().await;
        if fresh.is_none() {
            warn!("⚠️  Balance lookup failed after an order, no more orders this tick");
        }
        fresh
    }

    async fn notify(&self, message: &str) {
        notify_best_effort(self.notifier.as_ref(), &self.config.notify.channel, message).await;
    }

    /// Run the polling loop forever
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("🚀 Starting trading loop on {}", self.exchange.name());
        info!(
            "K={} | market={:?} | leverage={} | reset={} | tick={}ms",
            self.config.k_factor,
            self.config.market_type,
            self.config.leverage,
            self.config.schedule.reset_time,
            self.config.tick_interval.as_millis()
        );

        self.start(Local::now().naive_local()).await;

        loop {
            let now = Local::now().naive_local();
            match self.tick(now).await {
                TickReport::Reset(date) => {
                    info!(
                        "Session {} active after {}s settle; next reset at {}",
                        date,
                        self.config.schedule.settle.as_secs(),
                        self.schedule.next_reset(now)
                    );
                    sleep(self.config.schedule.settle).await;
                }
                TickReport::Traded { orders } if orders > 0 => debug!("{} orders this tick", orders),
                _ => {}
            }
            sleep(self.config.tick_interval).await;
        }
    }
}

fn describe_exit(reason: &ExitReason) -> String {
    match reason {
        ExitReason::StopLoss { gain } => format!("stop-loss ({:+.2}%)", gain * 100.0),
        ExitReason::TakeProfit { gain, min_gain } => {
            format!("take-profit ({:+.2}% >= {:.2}%)", gain * 100.0, min_gain * 100.0)
        }
        ExitReason::Drawdown { gain, retrace } => {
            format!("drawdown ({:+.2}%, {:.2}% off extreme)", gain * 100.0, retrace * 100.0)
        }
    }
}
