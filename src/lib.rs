// Volatility breakout trading library
// Larry Williams K breakout on spot and perpetual futures exchanges

pub mod types;
pub mod config;
pub mod targets;
pub mod classifier;
pub mod holdings;
pub mod budget;
pub mod schedule;
pub mod exits;
pub mod exchange;
pub mod notify;
pub mod models;
pub mod api;
pub mod monitor;
pub mod session;
pub mod simulation;
pub mod trading;

// Re-export commonly used types
pub use types::*;
pub use config::{CliConfig, EngineConfig, ExchangeKind, InstrumentSelection, Mode};
pub use exchange::Exchange;
pub use notify::{Notifier, NullNotifier, SlackNotifier};
pub use session::Session;
pub use simulation::DryRunExchange;
pub use trading::{TickReport, Trader};
