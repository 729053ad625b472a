// Binance USDⓈ-M perpetual futures REST adapter

use super::{http_client, read_json};
use crate::exchange::Exchange;
use crate::models::{
    BinanceAccount, BinanceExchangeInfo, BinanceOrderResponse, BinanceSymbol, BinanceTickerPrice,
};
use crate::types::{
    BalanceSnapshot, DailyCandle, Instrument, MarginMode, OrderId, OrderSide, OrderSize, StopKind,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::*;
use serde_json::Value;
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use tokio::sync::OnceCell;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// "No need to change margin type" is returned when the mode is already set
const MARGIN_TYPE_UNCHANGED: i64 = -4046;

pub struct BinanceFutures {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    symbols: OnceCell<HashMap<String, BinanceSymbol>>,
}

impl BinanceFutures {
    pub fn new(base_url: Option<String>, api_key: Option<String>, api_secret: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            api_secret,
            symbols: OnceCell::new(),
        })
    }

    async fn symbols(&self) -> Result<&HashMap<String, BinanceSymbol>> {
        self.symbols
            .get_or_try_init(|| async {
                let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
                let response = self.client.get(&url).send().await?;
                let info: BinanceExchangeInfo = read_json(response, "exchange info").await?;
                Ok::<_, anyhow::Error>(
                    info.symbols
                        .into_iter()
                        .map(|s| (s.symbol.clone(), s))
                        .collect(),
                )
            })
            .await
    }

    async fn quantity_precision(&self, instrument: &Instrument) -> Result<u32> {
        let symbols = self.symbols().await?;
        symbols
            .get(instrument.as_str())
            .map(|s| s.quantity_precision)
            .with_context(|| format!("Unknown futures symbol {}", instrument))
    }

    async fn price_precision(&self, instrument: &Instrument) -> Result<u32> {
        let symbols = self.symbols().await?;
        symbols
            .get(instrument.as_str())
            .map(|s| s.price_precision)
            .with_context(|| format!("Unknown futures symbol {}", instrument))
    }

    async fn base_quantity(&self, instrument: &Instrument, size: OrderSize) -> Result<Decimal> {
        let quantity = match size {
            OrderSize::Base(quantity) => quantity,
            OrderSize::Quote(amount) => {
                let price = Decimal::from_f64(self.fetch_current_price(instrument).await?)
                    .context("Price is not representable")?;
                if price <= Decimal::ZERO {
                    anyhow::bail!("Non-positive price for {}", instrument);
                }
                amount / price
            }
        };
        let precision = self.quantity_precision(instrument).await?;
        Ok(quantity.round_dp_with_strategy(precision, RoundingStrategy::ToZero))
    }

    /// Signed request: appends `timestamp` and `signature`, sends the API key header.
    async fn signed_request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
        what: &str,
    ) -> Result<T> {
        let api_key = self.api_key.as_ref().context("Binance API key required")?;
        let api_secret = self.api_secret.as_ref().context("Binance API secret required")?;

        params.push(("timestamp", chrono::Utc::now().timestamp_millis().to_string()));
        let query = serde_urlencoded::to_string(&params)?;
        let signature = sign_query(&query, api_secret)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        debug!("Binance {} {}", method, path);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await?;
        read_json(response, what).await
    }

    async fn submit_order(&self, params: Vec<(&str, String)>) -> Result<OrderId> {
        let order: BinanceOrderResponse = self
            .signed_request(Method::POST, "/fapi/v1/order", params, "order")
            .await?;
        Ok(order.order_id.to_string())
    }
}

/// Hex HMAC-SHA256 of the query string
pub(crate) fn sign_query(query: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid Binance API secret: {}", e))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Kline rows are arrays: [open_time, open, high, low, close, volume, ...] with
/// prices as strings.
pub(crate) fn parse_kline(row: &Value) -> Result<DailyCandle> {
    let field = |idx: usize| -> Result<f64> {
        let value = row.get(idx).with_context(|| format!("Kline missing field {}", idx))?;
        match value {
            Value::String(s) => s.parse::<f64>().with_context(|| format!("Bad kline value {}", s)),
            Value::Number(n) => n.as_f64().context("Bad kline number"),
            other => anyhow::bail!("Unexpected kline value {}", other),
        }
    };
    Ok(DailyCandle {
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

fn side_param(side: OrderSide) -> String {
    match side {
        OrderSide::Buy => "BUY".to_string(),
        OrderSide::Sell => "SELL".to_string(),
    }
}

#[async_trait]
impl Exchange for BinanceFutures {
    fn name(&self) -> &str {
        "binance-futures"
    }

    async fn list_tradable_instruments(
        &self,
        quote_currency: &str,
        excluded: &HashSet<Instrument>,
    ) -> Result<Vec<Instrument>> {
        let symbols = self.symbols().await?;
        let mut instruments: Vec<Instrument> = symbols
            .values()
            .filter(|s| s.status == "TRADING" && s.contract_type == "PERPETUAL" && s.quote_asset == quote_currency)
            .map(|s| Instrument::new(s.symbol.clone()))
            .filter(|i| !excluded.contains(i))
            .collect();
        instruments.sort();
        Ok(instruments)
    }

    async fn fetch_current_prices(&self, instruments: &[Instrument]) -> Result<HashMap<Instrument, f64>> {
        if instruments.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!("{}/fapi/v1/ticker/price", self.base_url);
        let response = self.client.get(&url).send().await?;
        let tickers: Vec<BinanceTickerPrice> = read_json(response, "ticker price").await?;

        let wanted: HashSet<&str> = instruments.iter().map(Instrument::as_str).collect();
        Ok(tickers
            .into_iter()
            .filter(|t| wanted.contains(t.symbol.as_str()))
            .filter_map(|t| t.price.to_f64().map(|p| (Instrument::new(t.symbol), p)))
            .collect())
    }

    async fn fetch_daily_candles(&self, instrument: &Instrument, count: usize) -> Result<Vec<DailyCandle>> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", instrument.as_str().to_string()),
                ("interval", "1d".to_string()),
                ("limit", count.to_string()),
            ])
            .send()
            .await?;
        let rows: Vec<Value> = read_json(response, "klines").await?;
        rows.iter().map(parse_kline).collect()
    }

    async fn fetch_balance_snapshot(&self) -> Result<BalanceSnapshot> {
        let account: BinanceAccount = self
            .signed_request(Method::GET, "/fapi/v2/account", Vec::new(), "account")
            .await?;
        Ok(BalanceSnapshot {
            positions: account
                .positions
                .into_iter()
                .filter(|p| !p.position_amt.is_zero())
                .map(|p| (Instrument::new(p.symbol), p.position_amt))
                .collect(),
            free_balance: account.available_balance,
        })
    }

    async fn place_market_order(&self, instrument: &Instrument, side: OrderSide, size: OrderSize) -> Result<OrderId> {
        let quantity = self.base_quantity(instrument, size).await?;
        if quantity <= Decimal::ZERO {
            anyhow::bail!("Order quantity for {} rounds to zero", instrument);
        }
        self.submit_order(vec![
            ("symbol", instrument.as_str().to_string()),
            ("side", side_param(side)),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
        ])
        .await
    }

    async fn place_stop_order(
        &self,
        instrument: &Instrument,
        side: OrderSide,
        size: OrderSize,
        trigger_price: f64,
        kind: StopKind,
    ) -> Result<OrderId> {
        let quantity = self.base_quantity(instrument, size).await?;
        let precision = self.price_precision(instrument).await?;
        let stop_price = Decimal::from_f64(trigger_price)
            .context("Trigger price is not representable")?
            .round_dp(precision);
        let order_type = match kind {
            StopKind::StopLoss => "STOP_MARKET",
            StopKind::TakeProfit => "TAKE_PROFIT_MARKET",
        };
        self.submit_order(vec![
            ("symbol", instrument.as_str().to_string()),
            ("side", side_param(side)),
            ("type", order_type.to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("stopPrice", stop_price.normalize().to_string()),
            ("reduceOnly", "true".to_string()),
            ("workingType", "MARK_PRICE".to_string()),
        ])
        .await
    }

    async fn close_position(&self, instrument: &Instrument, position: Decimal) -> Result<OrderId> {
        let side = if position > Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy };
        self.submit_order(vec![
            ("symbol", instrument.as_str().to_string()),
            ("side", side_param(side)),
            ("type", "MARKET".to_string()),
            ("quantity", position.abs().normalize().to_string()),
            ("reduceOnly", "true".to_string()),
        ])
        .await
    }

    async fn cancel_all_orders(&self, instrument: &Instrument) -> Result<()> {
        let _: Value = self
            .signed_request(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                vec![("symbol", instrument.as_str().to_string())],
                "cancel all orders",
            )
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, instrument: &Instrument, multiplier: u32) -> Result<()> {
        let _: Value = self
            .signed_request(
                Method::POST,
                "/fapi/v1/leverage",
                vec![
                    ("symbol", instrument.as_str().to_string()),
                    ("leverage", multiplier.to_string()),
                ],
                "set leverage",
            )
            .await?;
        Ok(())
    }

    async fn set_margin_mode(&self, instrument: &Instrument, mode: MarginMode) -> Result<()> {
        let margin_type = match mode {
            MarginMode::Isolated => "ISOLATED",
            MarginMode::Cross => "CROSSED",
        };
        let result: Result<Value> = self
            .signed_request(
                Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol", instrument.as_str().to_string()),
                    ("marginType", margin_type.to_string()),
                ],
                "set margin type",
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains(&MARGIN_TYPE_UNCHANGED.to_string()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
