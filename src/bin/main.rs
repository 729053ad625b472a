// Main entry point for the volatility breakout trader

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use volatility_breakout_trader::api::{BinanceFutures, UpbitSpot};
use volatility_breakout_trader::config::{CliConfig, ExchangeKind, Mode};
use volatility_breakout_trader::exchange::Exchange;
use volatility_breakout_trader::notify::{Notifier, NullNotifier, SlackNotifier};
use volatility_breakout_trader::simulation::DryRunExchange;
use volatility_breakout_trader::trading::Trader;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (tracing to stderr, RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Parse CLI arguments
    let cli = <CliConfig as clap::Parser>::parse();
    let json = cli.load_json_config()?;
    let kind = cli.exchange_kind(&json);
    let engine = cli.engine_config(&json)?;

    // Validate configuration
    if let Err(e) = cli.validate(&json, &engine) {
        error!("❌ Configuration error: {:#}", e);
        std::process::exit(1);
    }

    // Also print key info to stdout so you always see it without RUST_LOG
    println!("🚀 Starting Volatility Breakout Trader");
    println!("Mode         : {:?}", cli.mode());
    println!("Exchange     : {:?} ({:?})", kind, engine.market_type);
    println!("K factor     : {}", engine.k_factor);
    println!("Leverage     : x{}", engine.leverage);
    println!("Reset        : {} (+{}s)", engine.schedule.reset_time, engine.schedule.window.as_secs());
    println!("Tick int.ms  : {}", engine.tick_interval.as_millis());

    let adapter: Arc<dyn Exchange> = match kind {
        ExchangeKind::Upbit => Arc::new(UpbitSpot::new(cli.base_url(&json), cli.api_key(&json), cli.api_secret(&json))?),
        ExchangeKind::Binance => Arc::new(BinanceFutures::new(
            cli.base_url(&json),
            cli.api_key(&json),
            cli.api_secret(&json),
        )?),
    };

    let exchange: Arc<dyn Exchange> = match cli.mode() {
        Mode::Simulation => {
            let paper_capital = cli.paper_capital(&json)?;
            info!("🎮 Running in SIMULATION MODE (orders are logged, never sent)");
            if let Some(capital) = paper_capital {
                info!("Paper capital: {}", capital);
            }
            Arc::new(DryRunExchange::new(adapter, engine.leverage, paper_capital))
        }
        Mode::Live => {
            info!("🚀 Running in LIVE TRADING MODE");
            warn!("⚠️  WARNING: Live trading mode will execute real trades!");
            adapter
        }
    };

    let notifier: Arc<dyn Notifier> = match (engine.notify.enabled, cli.slack_token(&json)) {
        (true, Some(token)) => Arc::new(SlackNotifier::new(token)?),
        _ => Arc::new(NullNotifier),
    };

    let mut trader = Trader::new(exchange, notifier, engine);
    trader.run().await
}
