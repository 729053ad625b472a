// Configuration: CLI flags > config.json > environment > defaults

use crate::budget::AllocationPolicy;
use crate::exits::TrailingStopConfig;
use crate::types::{Instrument, MarginMode, MarketType};
use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{Parser, ValueEnum};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Simulation, // Orders are logged, never sent
    Live,       // Real orders
}

/// Supported exchange adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Upbit,
    Binance,
}

impl ExchangeKind {
    pub fn default_market_type(self) -> MarketType {
        match self {
            ExchangeKind::Upbit => MarketType::Spot,
            ExchangeKind::Binance => MarketType::Futures,
        }
    }

    pub fn default_quote_currency(self) -> &'static str {
        match self {
            ExchangeKind::Upbit => "KRW",
            ExchangeKind::Binance => "USDT",
        }
    }

    fn key_env_vars(self) -> (&'static str, &'static str) {
        match self {
            ExchangeKind::Upbit => ("UPBIT_ACCESS_KEY", "UPBIT_SECRET_KEY"),
            ExchangeKind::Binance => ("BINANCE_API_KEY", "BINANCE_API_SECRET"),
        }
    }
}

/// Which instruments a session trades
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentSelection {
    Fixed(Vec<Instrument>),
    All,
    /// Top N by prior-day trading value
    VolumeRanked { top_n: usize },
}

/// Daily reset timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub reset_time: NaiveTime,
    pub window: Duration,
    /// Pause after a reset before polling resumes
    pub settle: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub channel: String,
}

/// Fully resolved engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub market_type: MarketType,
    pub quote_currency: String,
    pub selection: InstrumentSelection,
    pub excluded: HashSet<Instrument>,
    /// Drop instruments that traded nothing the previous day
    pub require_prior_volume: bool,
    pub k_factor: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub safety_factor: Decimal,
    pub fee_rate: Decimal,
    pub allocation: AllocationPolicy,
    /// Defaults to the universe size
    pub max_positions: Option<usize>,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub trailing_stop: Option<TrailingStopConfig>,
    pub candle_count: usize,
    pub tick_interval: Duration,
    /// Wait after a filled order before re-reading balances
    pub order_settle: Duration,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
}

impl EngineConfig {
    pub fn defaults_for(kind: ExchangeKind) -> Self {
        Self {
            market_type: kind.default_market_type(),
            quote_currency: kind.default_quote_currency().to_string(),
            selection: InstrumentSelection::All,
            excluded: HashSet::new(),
            require_prior_volume: true,
            k_factor: 0.5,
            leverage: 1,
            margin_mode: MarginMode::Isolated,
            safety_factor: dec!(0.99),
            fee_rate: dec!(0.0005),
            allocation: AllocationPolicy::Equal,
            max_positions: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            trailing_stop: None,
            candle_count: 10,
            tick_interval: Duration::from_secs(1),
            order_settle: Duration::from_secs(1),
            schedule: ScheduleConfig {
                reset_time: NaiveTime::from_hms_opt(9, 1, 0).unwrap_or_default(),
                window: Duration::from_secs(20),
                settle: Duration::from_secs(10),
            },
            notify: NotifyConfig {
                enabled: false,
                channel: "#trading".to_string(),
            },
        }
    }

    /// Apply the `trading`, `schedule`, `trailing_stop` and `notify` sections on top of defaults.
    pub fn from_json(json: &JsonConfig, kind: ExchangeKind) -> Result<Self> {
        let mut config = Self::defaults_for(kind);

        if let Some(t) = &json.trading {
            if let Some(market_type) = t.market_type {
                config.market_type = market_type;
            }
            if let Some(quote) = &t.quote_currency {
                config.quote_currency = quote.to_uppercase();
            }
            if let Some(selection) = &t.selection {
                config.selection = parse_selection(selection, t.instruments.as_deref(), t.top_n)?;
            }
            if let Some(excluded) = &t.excluded {
                config.excluded = excluded.iter().map(|s| Instrument::new(s.as_str())).collect();
            }
            if let Some(require) = t.require_prior_volume {
                config.require_prior_volume = require;
            }
            if let Some(k) = t.k_factor {
                config.k_factor = k;
            }
            if let Some(leverage) = t.leverage {
                config.leverage = leverage;
            }
            if let Some(mode) = t.margin_mode {
                config.margin_mode = mode;
            }
            if let Some(safety) = t.safety_factor {
                config.safety_factor = decimal_from(safety, "safety_factor")?;
            }
            if let Some(fee) = t.fee_rate {
                config.fee_rate = decimal_from(fee, "fee_rate")?;
            }
            if let Some(allocation) = t.allocation {
                config.allocation = allocation;
            }
            config.max_positions = t.max_positions.or(config.max_positions);
            config.stop_loss_pct = t.stop_loss_pct.or(config.stop_loss_pct);
            config.take_profit_pct = t.take_profit_pct.or(config.take_profit_pct);
            if let Some(count) = t.candle_count {
                config.candle_count = count;
            }
            if let Some(ms) = t.tick_interval_ms {
                config.tick_interval = Duration::from_millis(ms);
            }
            if let Some(ms) = t.order_settle_ms {
                config.order_settle = Duration::from_millis(ms);
            }
        }

        if let Some(s) = &json.schedule {
            if let Some(reset_time) = &s.reset_time {
                config.schedule.reset_time = NaiveTime::parse_from_str(reset_time, "%H:%M:%S")
                    .with_context(|| format!("Invalid schedule.reset_time '{}', expected HH:MM:SS", reset_time))?;
            }
            if let Some(secs) = s.window_secs {
                config.schedule.window = Duration::from_secs(secs);
            }
            if let Some(secs) = s.settle_secs {
                config.schedule.settle = Duration::from_secs(secs);
            }
        }

        config.trailing_stop = json.trailing_stop.clone();

        if let Some(n) = &json.notify {
            if let Some(enabled) = n.enabled {
                config.notify.enabled = enabled;
            }
            if let Some(channel) = &n.channel {
                config.notify.channel = channel.clone();
            }
        }

        Ok(config)
    }

    /// Reject settings the engine cannot trade safely with
    pub fn validate(&self) -> Result<()> {
        if !self.k_factor.is_finite() || self.k_factor < 0.0 {
            anyhow::bail!("k_factor must be a non-negative number, got {}", self.k_factor);
        }
        if self.leverage == 0 {
            anyhow::bail!("leverage must be at least 1");
        }
        if self.market_type == MarketType::Spot && self.leverage != 1 {
            anyhow::bail!("leverage {} is only available for futures", self.leverage);
        }
        if self.safety_factor <= Decimal::ZERO || self.safety_factor >= Decimal::ONE {
            anyhow::bail!("safety_factor must be in (0, 1), got {}", self.safety_factor);
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            anyhow::bail!("fee_rate must be in [0, 1), got {}", self.fee_rate);
        }
        for (name, pct) in [("stop_loss_pct", self.stop_loss_pct), ("take_profit_pct", self.take_profit_pct)] {
            if let Some(pct) = pct {
                if !(pct > 0.0 && pct < 1.0) {
                    anyhow::bail!("{} must be in (0, 1), got {}", name, pct);
                }
            }
        }
        if self.candle_count < 2 {
            anyhow::bail!("candle_count must be at least 2 (yesterday is the second-to-last row)");
        }
        if self.tick_interval.is_zero() {
            anyhow::bail!("tick interval must be positive");
        }
        if self.schedule.window.is_zero() || self.schedule.window >= Duration::from_secs(24 * 3600) {
            anyhow::bail!("reset window must be between 1s and 24h");
        }
        if self.max_positions == Some(0) {
            anyhow::bail!("max_positions must be at least 1");
        }
        match &self.selection {
            InstrumentSelection::Fixed(list) if list.is_empty() => {
                anyhow::bail!("fixed selection needs at least one instrument")
            }
            InstrumentSelection::VolumeRanked { top_n: 0 } => anyhow::bail!("top_n must be at least 1"),
            _ => {}
        }
        Ok(())
    }
}

fn parse_selection(mode: &str, instruments: Option<&[String]>, top_n: Option<usize>) -> Result<InstrumentSelection> {
    match mode.to_lowercase().as_str() {
        "all" => Ok(InstrumentSelection::All),
        "fixed" => {
            let list = instruments
                .context("selection 'fixed' requires trading.instruments")?
                .iter()
                .map(|s| Instrument::new(s.as_str()))
                .collect();
            Ok(InstrumentSelection::Fixed(list))
        }
        "volume_ranked" => Ok(InstrumentSelection::VolumeRanked {
            top_n: top_n.context("selection 'volume_ranked' requires trading.top_n")?,
        }),
        other => anyhow::bail!("Unknown selection '{}': expected all, fixed or volume_ranked", other),
    }
}

fn decimal_from(value: f64, field: &str) -> Result<Decimal> {
    Decimal::from_f64(value).with_context(|| format!("{} is not a valid number: {}", field, value))
}

/// CLI Configuration
#[derive(Parser, Debug)]
#[command(name = "breakout-trader")]
#[command(about = "Volatility breakout (Larry Williams K) trading loop for spot and futures exchanges")]
pub struct CliConfig {
    /// Exchange adapter (overrides config.json exchange.name)
    #[arg(long, value_enum)]
    pub exchange: Option<ExchangeKind>,

    /// K factor applied to the prior-day range
    #[arg(long)]
    pub k_factor: Option<f64>,

    /// Leverage multiplier (futures only)
    #[arg(long)]
    pub leverage: Option<u32>,

    /// Comma-separated instruments; switches to a fixed universe
    #[arg(long, value_delimiter = ',')]
    pub instruments: Option<Vec<String>>,

    /// Polling interval in milliseconds
    #[arg(long)]
    pub tick_interval_ms: Option<u64>,

    /// Send real orders (default is simulation: orders are only logged)
    #[arg(long)]
    pub live: bool,

    /// Paper balance used in simulation when no credentials are configured
    #[arg(long)]
    pub initial_capital: Option<f64>,

    /// Exchange API key (or access key for Upbit)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Exchange API secret
    #[arg(long)]
    pub api_secret: Option<String>,

    /// Configuration file path (JSON format)
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}

/// JSON configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonConfig {
    pub exchange: Option<ExchangeJson>,
    pub trading: Option<TradingJson>,
    pub schedule: Option<ScheduleJson>,
    pub trailing_stop: Option<TrailingStopConfig>,
    pub notify: Option<NotifyJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeJson {
    pub name: Option<ExchangeKind>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingJson {
    pub market_type: Option<MarketType>,
    pub quote_currency: Option<String>,
    /// "all", "fixed" or "volume_ranked"
    pub selection: Option<String>,
    pub instruments: Option<Vec<String>>,
    pub top_n: Option<usize>,
    pub excluded: Option<Vec<String>>,
    pub require_prior_volume: Option<bool>,
    pub k_factor: Option<f64>,
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,
    pub safety_factor: Option<f64>,
    pub fee_rate: Option<f64>,
    pub allocation: Option<AllocationPolicy>,
    pub max_positions: Option<usize>,
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub candle_count: Option<usize>,
    pub tick_interval_ms: Option<u64>,
    pub order_settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleJson {
    /// Local time of day, "HH:MM:SS"
    pub reset_time: Option<String>,
    pub window_secs: Option<u64>,
    pub settle_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyJson {
    pub enabled: Option<bool>,
    pub slack_token: Option<String>,
    pub channel: Option<String>,
}

impl CliConfig {
    /// Load configuration from JSON file. A missing file means all defaults.
    pub fn load_json_config(&self) -> Result<JsonConfig> {
        let config_path = &self.config;

        if !config_path.exists() {
            return Ok(JsonConfig::default());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    pub fn mode(&self) -> Mode {
        if self.live {
            Mode::Live
        } else {
            Mode::Simulation
        }
    }

    /// CLI --exchange, then config.json exchange.name, then Upbit
    pub fn exchange_kind(&self, json: &JsonConfig) -> ExchangeKind {
        self.exchange
            .or_else(|| json.exchange.as_ref().and_then(|e| e.name))
            .unwrap_or(ExchangeKind::Upbit)
    }

    pub fn base_url(&self, json: &JsonConfig) -> Option<String> {
        json.exchange.as_ref().and_then(|e| e.base_url.clone())
    }

    /// API key from CLI arg, config file, or environment variable (in that order)
    pub fn api_key(&self, json: &JsonConfig) -> Option<String> {
        let (key_var, _) = self.exchange_kind(json).key_env_vars();
        self.api_key
            .clone()
            .or_else(|| json.exchange.as_ref().and_then(|e| e.api_key.clone()))
            .or_else(|| std::env::var(key_var).ok())
    }

    /// API secret from CLI arg, config file, or environment variable (in that order)
    pub fn api_secret(&self, json: &JsonConfig) -> Option<String> {
        let (_, secret_var) = self.exchange_kind(json).key_env_vars();
        self.api_secret
            .clone()
            .or_else(|| json.exchange.as_ref().and_then(|e| e.api_secret.clone()))
            .or_else(|| std::env::var(secret_var).ok())
    }

    /// Slack token from config file or SLACK_TOKEN
    pub fn slack_token(&self, json: &JsonConfig) -> Option<String> {
        json.notify
            .as_ref()
            .and_then(|n| n.slack_token.clone())
            .or_else(|| std::env::var("SLACK_TOKEN").ok())
    }

    /// Resolve engine settings: config.json on top of defaults, CLI flags on top of that.
    pub fn engine_config(&self, json: &JsonConfig) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_json(json, self.exchange_kind(json))?;

        if let Some(k) = self.k_factor {
            config.k_factor = k;
        }
        if let Some(leverage) = self.leverage {
            config.leverage = leverage;
        }
        if let Some(instruments) = &self.instruments {
            config.selection =
                InstrumentSelection::Fixed(instruments.iter().map(|s| Instrument::new(s.trim())).collect());
        }
        if let Some(ms) = self.tick_interval_ms {
            config.tick_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Paper capital for simulation; `None` means the real account balance is read
    pub fn paper_capital(&self, json: &JsonConfig) -> Result<Option<Decimal>> {
        if self.mode() == Mode::Live {
            return Ok(None);
        }
        match self.initial_capital {
            Some(capital) => Ok(Some(decimal_from(capital, "initial_capital")?)),
            None if self.api_key(json).is_none() || self.api_secret(json).is_none() => Ok(Some(dec!(1000000))),
            None => Ok(None),
        }
    }

    /// Validate configuration
    pub fn validate(&self, json: &JsonConfig, engine: &EngineConfig) -> Result<()> {
        engine.validate()?;
        if self.mode() == Mode::Live && (self.api_key(json).is_none() || self.api_secret(json).is_none()) {
            let (key_var, secret_var) = self.exchange_kind(json).key_env_vars();
            anyhow::bail!(
                "API credentials required for live trading. Set {} and {} or use --api-key/--api-secret",
                key_var,
                secret_var
            );
        }
        if self.initial_capital.is_some_and(|c| !(c.is_finite() && c > 0.0)) {
            anyhow::bail!("initial_capital must be positive");
        }
        if engine.notify.enabled && self.slack_token(json).is_none() {
            anyhow::bail!("notify.enabled requires notify.slack_token or SLACK_TOKEN");
        }
        Ok(())
    }
}
