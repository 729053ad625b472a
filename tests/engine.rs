//! Trader scenarios against the in-memory exchange.

mod common;

use chrono::Duration;
use common::{at, candle, test_config, FakeExchange, FakeOrder, RecordingNotifier};
use rust_decimal_macros::dec;
use std::sync::Arc;
use volatility_breakout_trader::budget::AllocationPolicy;
use volatility_breakout_trader::config::{ExchangeKind, InstrumentSelection};
use volatility_breakout_trader::exchange::Exchange;
use volatility_breakout_trader::notify::NullNotifier;
use volatility_breakout_trader::schedule::SchedulerState;
use volatility_breakout_trader::trading::{TickReport, Trader};
use volatility_breakout_trader::types::{Instrument, OrderSide, OrderSize, StopKind};
use volatility_breakout_trader::EngineConfig;

fn trader(exchange: &Arc<FakeExchange>, config: EngineConfig) -> Trader {
    let exchange: Arc<dyn Exchange> = exchange.clone();
    Trader::new(exchange, Arc::new(NullNotifier), config)
}

fn spot_btc(price: f64) -> Arc<FakeExchange> {
    // long target = 105 + 15 * 0.5 = 112.5
    Arc::new(FakeExchange::new(dec!(1000000)).with_instrument("KRW-BTC", candle(98.0, 110.0, 95.0, 105.0, 1000.0), price))
}

fn futures_btc(price: f64) -> Arc<FakeExchange> {
    // short target = 105 - 15 * 0.5 = 97.5
    Arc::new(FakeExchange::new(dec!(1000)).with_instrument("BTCUSDT", candle(100.0, 110.0, 95.0, 105.0, 500.0), price))
}

#[tokio::test]
async fn spot_breakout_buys_once() {
    let exchange = spot_btc(113.0);
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    let target = trader.session().target(&Instrument::from("KRW-BTC"));
    assert_eq!(target.long, 112.5);

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 1 });
    assert_eq!(
        exchange.market_orders(),
        vec![FakeOrder::Market {
            instrument: Instrument::from("KRW-BTC"),
            side: OrderSide::Buy,
            size: OrderSize::Quote(dec!(999500)),
        }]
    );

    // Already held: no duplicate entry
    assert_eq!(trader.tick(at(2, 10, 0, 2)).await, TickReport::Traded { orders: 0 });
    assert_eq!(exchange.market_orders().len(), 1);
}

#[tokio::test]
async fn spot_below_target_does_nothing() {
    let exchange = spot_btc(108.0);
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 0 });
    assert!(exchange.orders().is_empty());
}

#[tokio::test]
async fn futures_breakdown_goes_short_with_protective_stop() {
    let exchange = futures_btc(96.0);
    let mut config = test_config(ExchangeKind::Binance, &["BTCUSDT"]);
    config.stop_loss_pct = Some(0.02);
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    let configured = exchange.state.lock().unwrap().configured.clone();
    assert!(configured.contains(&(Instrument::from("BTCUSDT"), "Isolated".to_string())));
    assert!(configured.contains(&(Instrument::from("BTCUSDT"), "leverage x1".to_string())));

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 1 });
    let orders = exchange.orders();
    match &orders[0] {
        FakeOrder::Market { side, size: OrderSize::Base(quantity), .. } => {
            assert_eq!(*side, OrderSide::Sell);
            // 1000 / 96 * 0.99
            assert!((*quantity - dec!(10.3125)).abs() < dec!(0.0001));
        }
        other => panic!("expected a market sell, got {:?}", other),
    }
    match &orders[1] {
        FakeOrder::Stop { side, trigger, kind, .. } => {
            assert_eq!(*side, OrderSide::Buy);
            assert_eq!(*kind, StopKind::StopLoss);
            assert!((trigger - 97.92).abs() < 1e-9);
        }
        other => panic!("expected a protective stop, got {:?}", other),
    }

    assert!(exchange.position("BTCUSDT") < dec!(0));
    assert_eq!(trader.tick(at(2, 10, 0, 2)).await, TickReport::Traded { orders: 0 });
}

#[tokio::test]
async fn existing_short_is_not_doubled() {
    let exchange = futures_btc(96.0);
    exchange.set_position("BTCUSDT", dec!(-1));
    let mut trader = trader(&exchange, test_config(ExchangeKind::Binance, &["BTCUSDT"]));
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 0 });
    assert!(exchange.market_orders().is_empty());
}

#[tokio::test]
async fn reset_fires_once_per_trading_day() {
    let exchange = spot_btc(100.0);
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));

    // Before 09:01 the session still belongs to the previous day
    trader.start(at(2, 8, 0, 0)).await;
    assert_eq!(trader.session().date, at(1, 0, 0, 0).date());

    assert_eq!(trader.tick(at(2, 9, 0, 59)).await, TickReport::Traded { orders: 0 });
    assert_eq!(trader.tick(at(2, 9, 1, 5)).await, TickReport::Reset(at(2, 0, 0, 0).date()));
    assert_eq!(trader.state(), SchedulerState::Resetting);

    assert_eq!(trader.tick(at(2, 9, 1, 10)).await, TickReport::Traded { orders: 0 });
    assert_eq!(trader.state(), SchedulerState::Active);
    assert_eq!(trader.last_reset(), Some(at(2, 0, 0, 0).date()));

    assert_eq!(trader.tick(at(3, 9, 1, 0)).await, TickReport::Reset(at(3, 0, 0, 0).date()));
}

#[tokio::test]
async fn reset_twice_on_flat_book_is_idempotent() {
    let exchange = spot_btc(100.0);
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    let date = at(3, 0, 0, 0).date();
    trader.reset(date).await;
    let first = trader.session().clone();
    trader.reset(date).await;

    assert_eq!(trader.session(), &first);
    assert!(exchange.orders().is_empty());
}

#[tokio::test]
async fn liquidation_retries_once_for_residual_position() {
    let exchange = spot_btc(100.0);
    exchange.set_position("KRW-BTC", dec!(0.5));
    exchange.state.lock().unwrap().sticky_closes = 1;
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.tick(at(3, 9, 1, 0)).await, TickReport::Reset(at(3, 0, 0, 0).date()));
    assert_eq!(exchange.close_orders(), 2);
    assert_eq!(exchange.position("KRW-BTC"), dec!(0));
}

#[tokio::test]
async fn stuck_liquidation_is_reported_after_one_retry() {
    let exchange = spot_btc(100.0);
    exchange.set_position("KRW-BTC", dec!(0.5));
    exchange.state.lock().unwrap().sticky_closes = 5;
    let notifier = Arc::new(RecordingNotifier::default());
    let dyn_exchange: Arc<dyn Exchange> = exchange.clone();
    let mut trader = Trader::new(dyn_exchange, notifier.clone(), test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    trader.reset(at(3, 0, 0, 0).date()).await;

    assert_eq!(exchange.close_orders(), 2);
    assert_eq!(exchange.position("KRW-BTC"), dec!(0.5));
    assert!(notifier.messages().iter().any(|m| m.contains("Liquidation incomplete")));
    // The new session is still built
    assert_eq!(trader.session().date, at(3, 0, 0, 0).date());
}

#[tokio::test]
async fn failed_balance_lookup_places_no_orders() {
    let exchange = spot_btc(113.0);
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    exchange.state.lock().unwrap().fail_balance = true;
    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Skipped);
    assert!(exchange.orders().is_empty());
}

#[tokio::test]
async fn full_slots_give_zero_budget() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000))
            .with_instrument("KRW-A", candle(98.0, 110.0, 95.0, 105.0, 10.0), 100.0)
            .with_instrument("KRW-B", candle(98.0, 110.0, 95.0, 105.0, 10.0), 113.0),
    );
    exchange.set_position("KRW-A", dec!(1));
    let mut config = test_config(ExchangeKind::Upbit, &["KRW-A", "KRW-B"]);
    config.max_positions = Some(1);
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 0 });
    assert!(exchange.orders().is_empty());
}

#[tokio::test]
async fn volume_weighted_budget_uses_capital_at_open() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000))
            .with_instrument("KRW-A", candle(98.0, 110.0, 95.0, 105.0, 300.0), 113.0)
            .with_instrument("KRW-B", candle(98.0, 110.0, 95.0, 105.0, 100.0), 113.0),
    );
    let mut config = test_config(ExchangeKind::Upbit, &["KRW-A", "KRW-B"]);
    config.allocation = AllocationPolicy::VolumeWeighted;
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 2 });
    let spends: Vec<OrderSize> = exchange
        .market_orders()
        .into_iter()
        .filter_map(|o| match o {
            FakeOrder::Market { size, .. } => Some(size),
            _ => None,
        })
        .collect();
    // 75% and 25% of 1000, less the 0.05% fee
    assert_eq!(spends, vec![OrderSize::Quote(dec!(749.625)), OrderSize::Quote(dec!(249.875))]);
}

#[tokio::test]
async fn stopped_out_instrument_is_not_reentered_until_next_session() {
    let exchange = spot_btc(110.0);
    exchange.set_position("KRW-BTC", dec!(1));
    let mut config = test_config(ExchangeKind::Upbit, &["KRW-BTC"]);
    config.stop_loss_pct = Some(0.02);
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    // (110 - 112.5) / 112.5 is below -2%
    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 1 });
    assert_eq!(exchange.close_orders(), 1);
    assert!(trader.is_blacklisted(&Instrument::from("KRW-BTC")));

    exchange.set_price("KRW-BTC", 113.0);
    assert_eq!(trader.tick(at(2, 10, 0, 2)).await, TickReport::Traded { orders: 0 });
    assert!(exchange.market_orders().is_empty());

    assert_eq!(trader.tick(at(3, 9, 1, 0)).await, TickReport::Reset(at(3, 0, 0, 0).date()));
    assert!(!trader.is_blacklisted(&Instrument::from("KRW-BTC")));
    assert_eq!(trader.tick(at(3, 9, 2, 0)).await, TickReport::Traded { orders: 1 });
    assert_eq!(exchange.market_orders().len(), 1);
}

fn instruments(names: &[&str]) -> Vec<Instrument> {
    names.iter().map(|n| Instrument::from(*n)).collect()
}

#[tokio::test]
async fn start_inside_reset_window_still_liquidates() {
    let exchange = spot_btc(100.0);
    exchange.set_position("KRW-BTC", dec!(0.5));
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));

    // Restarted at 09:01:05, inside [09:01:00, 09:01:20)
    trader.start(at(2, 9, 1, 5)).await;
    assert!(exchange.orders().is_empty());

    assert_eq!(trader.tick(at(2, 9, 1, 6)).await, TickReport::Reset(at(2, 0, 0, 0).date()));
    assert_eq!(exchange.close_orders(), 1);
    assert_eq!(exchange.position("KRW-BTC"), dec!(0));
    assert_eq!(trader.last_reset(), Some(at(2, 0, 0, 0).date()));

    assert_eq!(trader.tick(at(2, 9, 1, 7)).await, TickReport::Traded { orders: 0 });
}

#[tokio::test]
async fn start_outside_reset_window_keeps_open_positions() {
    let exchange = spot_btc(100.0);
    exchange.set_position("KRW-BTC", dec!(0.5));
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));

    trader.start(at(2, 9, 1, 20)).await;
    assert_eq!(trader.tick(at(2, 9, 1, 21)).await, TickReport::Traded { orders: 0 });
    assert_eq!(exchange.position("KRW-BTC"), dec!(0.5));
    // Adopted as held since the reset boundary
    assert_eq!(trader.held_for(&Instrument::from("KRW-BTC"), at(2, 10, 1, 0)), Duration::hours(1));
}

#[tokio::test]
async fn universe_drops_instruments_without_prior_volume() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000))
            .with_instrument("KRW-BTC", candle(98.0, 110.0, 95.0, 105.0, 1000.0), 100.0)
            .with_instrument("KRW-ZERO", candle(98.0, 110.0, 95.0, 105.0, 0.0), 113.0)
            .with_listing_only("KRW-GONE", 113.0),
    );
    let mut config = test_config(ExchangeKind::Upbit, &[]);
    config.selection = InstrumentSelection::All;
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.session().universe, instruments(&["KRW-BTC"]));
    assert!(!trader.session().targets.contains_key(&Instrument::from("KRW-ZERO")));

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 0 });
    assert!(exchange.orders().is_empty());
}

#[tokio::test]
async fn failed_candle_fetch_never_trades() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000))
            .with_instrument("BTCUSDT", candle(100.0, 110.0, 95.0, 105.0, 500.0), 100.0)
            .with_listing_only("DEADUSDT", 1.0),
    );
    let mut config = test_config(ExchangeKind::Binance, &[]);
    config.selection = InstrumentSelection::All;
    config.require_prior_volume = false;
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    let dead = Instrument::from("DEADUSDT");
    assert!(trader.session().universe.contains(&dead));
    let target = trader.session().target(&dead);
    assert_eq!(target.long, f64::INFINITY);
    assert_eq!(target.short, f64::NEG_INFINITY);

    for (second, price) in [(1, 1e12), (2, 1e-9), (3, 0.0), (4, f64::MAX)] {
        exchange.set_price("DEADUSDT", price);
        assert_eq!(trader.tick(at(2, 10, 0, second)).await, TickReport::Traded { orders: 0 });
    }
    assert!(exchange.market_orders().is_empty());
}

#[tokio::test]
async fn volume_ranking_keeps_top_n() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000))
            .with_instrument("KRW-A", candle(98.0, 110.0, 95.0, 105.0, 300.0), 100.0)
            .with_instrument("KRW-B", candle(98.0, 110.0, 95.0, 105.0, 100.0), 113.0)
            .with_instrument("KRW-C", candle(98.0, 110.0, 95.0, 105.0, 200.0), 100.0),
    );
    let mut config = test_config(ExchangeKind::Upbit, &[]);
    config.selection = InstrumentSelection::VolumeRanked { top_n: 2 };
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.session().universe, instruments(&["KRW-A", "KRW-C"]));
    // KRW-B breaks out but was ranked out
    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 0 });
    assert!(exchange.orders().is_empty());
}

#[tokio::test]
async fn excluded_instruments_never_enter_the_universe() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000))
            .with_instrument("KRW-A", candle(98.0, 110.0, 95.0, 105.0, 10.0), 100.0)
            .with_instrument("KRW-B", candle(98.0, 110.0, 95.0, 105.0, 10.0), 113.0),
    );
    let mut config = test_config(ExchangeKind::Upbit, &["KRW-A", "KRW-B", "KRW-A"]);
    config.excluded.insert(Instrument::from("KRW-B"));
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.session().universe, instruments(&["KRW-A"]));
    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 0 });
}

#[tokio::test]
async fn failed_listing_keeps_previous_universe() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000))
            .with_instrument("KRW-A", candle(98.0, 110.0, 95.0, 105.0, 10.0), 100.0)
            .with_instrument("KRW-B", candle(98.0, 110.0, 95.0, 105.0, 10.0), 100.0),
    );
    let mut config = test_config(ExchangeKind::Upbit, &[]);
    config.selection = InstrumentSelection::All;
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;
    assert_eq!(trader.session().universe, instruments(&["KRW-A", "KRW-B"]));

    exchange.state.lock().unwrap().fail_listing = true;
    assert_eq!(trader.tick(at(3, 9, 1, 0)).await, TickReport::Reset(at(3, 0, 0, 0).date()));
    assert_eq!(trader.session().date, at(3, 0, 0, 0).date());
    assert_eq!(trader.session().universe, instruments(&["KRW-A", "KRW-B"]));
}

#[tokio::test]
async fn held_instrument_without_volume_data_is_still_liquidated() {
    let exchange = Arc::new(
        FakeExchange::new(dec!(1000000))
            .with_instrument("KRW-BTC", candle(98.0, 110.0, 95.0, 105.0, 1000.0), 100.0)
            .with_listing_only("KRW-OLD", 50.0),
    );
    exchange.set_position("KRW-OLD", dec!(2));
    let mut config = test_config(ExchangeKind::Upbit, &[]);
    config.selection = InstrumentSelection::VolumeRanked { top_n: 1 };
    let mut trader = trader(&exchange, config);
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.session().universe, instruments(&["KRW-BTC", "KRW-OLD"]));

    assert_eq!(trader.tick(at(3, 9, 1, 0)).await, TickReport::Reset(at(3, 0, 0, 0).date()));
    assert_eq!(exchange.close_orders(), 1);
    assert_eq!(exchange.position("KRW-OLD"), dec!(0));
    assert_eq!(trader.session().universe, instruments(&["KRW-BTC"]));
}

#[tokio::test]
async fn holding_clock_starts_at_the_entry_tick() {
    let exchange = spot_btc(113.0);
    let mut trader = trader(&exchange, test_config(ExchangeKind::Upbit, &["KRW-BTC"]));
    trader.start(at(2, 10, 0, 0)).await;

    assert_eq!(trader.tick(at(2, 10, 0, 1)).await, TickReport::Traded { orders: 1 });
    assert_eq!(trader.held_for(&Instrument::from("KRW-BTC"), at(2, 11, 0, 1)), Duration::hours(1));
}
