// Upbit spot REST adapter (KRW markets)

use super::{http_client, read_json};
use crate::exchange::Exchange;
use crate::models::{UpbitAccount, UpbitDayCandle, UpbitMarket, UpbitOrderResponse, UpbitTicker};
use crate::types::{BalanceSnapshot, DailyCandle, Instrument, OrderId, OrderSide, OrderSize};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::{Digest, Sha256, Sha512};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_BASE_URL: &str = "https://api.upbit.com";

pub struct UpbitSpot {
    client: Client,
    base_url: String,
    access_key: Option<String>,
    secret_key: Option<String>,
}

impl UpbitSpot {
    pub fn new(base_url: Option<String>, access_key: Option<String>, secret_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            access_key,
            secret_key,
        })
    }

    /// `Bearer <jwt>` for private endpoints. `query` is the url-encoded parameter
    /// string the request carries, if any.
    fn authorization(&self, query: Option<&str>) -> Result<String> {
        let access_key = self.access_key.as_ref().context("Upbit access key required")?;
        let secret_key = self.secret_key.as_ref().context("Upbit secret key required")?;

        let mut claims = json!({
            "access_key": access_key,
            "nonce": Uuid::new_v4().to_string(),
        });
        if let Some(query) = query {
            claims["query_hash"] = Value::String(hex::encode(Sha512::digest(query.as_bytes())));
            claims["query_hash_alg"] = Value::String("SHA512".to_string());
        }
        Ok(format!("Bearer {}", sign_jwt(&claims, secret_key)?))
    }
}

/// HS256 JWT over `claims`
pub(crate) fn sign_jwt(claims: &Value, secret: &str) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid Upbit secret key: {}", e))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

/// Upbit returns newest first; the engine wants oldest first.
pub(crate) fn candles_oldest_first(rows: Vec<UpbitDayCandle>) -> Vec<DailyCandle> {
    rows.into_iter()
        .rev()
        .map(|c| DailyCandle {
            open: c.opening_price,
            high: c.high_price,
            low: c.low_price,
            close: c.trade_price,
            volume: c.candle_acc_trade_volume,
        })
        .collect()
}

/// Turn /v1/accounts into a snapshot: the quote currency is the free balance,
/// every other currency is a long position in "<QUOTE>-<CURRENCY>".
pub(crate) fn snapshot_from_accounts(accounts: &[UpbitAccount], quote: &str) -> BalanceSnapshot {
    let mut snapshot = BalanceSnapshot::default();
    for account in accounts {
        if account.currency == quote {
            snapshot.free_balance = account.balance;
            continue;
        }
        if account.unit_currency.as_deref().is_some_and(|unit| unit != quote) {
            continue;
        }
        let instrument = Instrument::new(format!("{}-{}", quote, account.currency));
        snapshot.positions.insert(instrument, account.balance);
    }
    snapshot
}

fn quote_of(instrument: &Instrument) -> &str {
    instrument.as_str().split('-').next().unwrap_or("KRW")
}

#[async_trait]
impl Exchange for UpbitSpot {
    fn name(&self) -> &str {
        "upbit"
    }

    async fn list_tradable_instruments(
        &self,
        quote_currency: &str,
        excluded: &HashSet<Instrument>,
    ) -> Result<Vec<Instrument>> {
        let url = format!("{}/v1/market/all", self.base_url);
        let response = self.client.get(&url).query(&[("isDetails", "false")]).send().await?;
        let markets: Vec<UpbitMarket> = read_json(response, "market list").await?;

        let prefix = format!("{}-", quote_currency);
        Ok(markets
            .into_iter()
            .map(|m| Instrument::new(m.market))
            .filter(|i| i.as_str().starts_with(&prefix) && !excluded.contains(i))
            .collect())
    }

    async fn fetch_current_prices(&self, instruments: &[Instrument]) -> Result<HashMap<Instrument, f64>> {
        if instruments.is_empty() {
            return Ok(HashMap::new());
        }
        let markets = instruments.iter().map(Instrument::as_str).collect::<Vec<_>>().join(",");
        let url = format!("{}/v1/ticker", self.base_url);
        let response = self.client.get(&url).query(&[("markets", markets)]).send().await?;
        let tickers: Vec<UpbitTicker> = read_json(response, "ticker").await?;

        Ok(tickers
            .into_iter()
            .map(|t| (Instrument::new(t.market), t.trade_price))
            .collect())
    }

    async fn fetch_daily_candles(&self, instrument: &Instrument, count: usize) -> Result<Vec<DailyCandle>> {
        let url = format!("{}/v1/candles/days", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("market", instrument.as_str().to_string()), ("count", count.to_string())])
            .send()
            .await?;
        let rows: Vec<UpbitDayCandle> = read_json(response, "daily candles").await?;
        Ok(candles_oldest_first(rows))
    }

    async fn fetch_balance_snapshot(&self) -> Result<BalanceSnapshot> {
        let url = format!("{}/v1/accounts", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.authorization(None)?)
            .send()
            .await?;
        let accounts: Vec<UpbitAccount> = read_json(response, "accounts").await?;
        // Upbit only lists KRW markets for this bot, so KRW is the quote
        Ok(snapshot_from_accounts(&accounts, "KRW"))
    }

    async fn place_market_order(&self, instrument: &Instrument, side: OrderSide, size: OrderSize) -> Result<OrderId> {
        let mut params: BTreeMap<&str, String> = BTreeMap::new();
        params.insert("market", instrument.as_str().to_string());
        match (side, size) {
            (OrderSide::Buy, OrderSize::Quote(amount)) => {
                // KRW amounts are whole won
                let amount = if quote_of(instrument) == "KRW" { amount.floor() } else { amount };
                params.insert("side", "bid".to_string());
                params.insert("ord_type", "price".to_string());
                params.insert("price", amount.normalize().to_string());
            }
            (OrderSide::Sell, OrderSize::Base(volume)) => {
                params.insert("side", "ask".to_string());
                params.insert("ord_type", "market".to_string());
                params.insert("volume", volume.normalize().to_string());
            }
            (side, size) => anyhow::bail!("Upbit market orders do not support {:?} with {:?}", side, size),
        }

        let query = serde_urlencoded::to_string(&params)?;
        let url = format!("{}/v1/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.authorization(Some(&query))?)
            .json(&params)
            .send()
            .await?;
        let order: UpbitOrderResponse = read_json(response, "order").await?;
        Ok(order.uuid)
    }

    async fn close_position(&self, instrument: &Instrument, position: Decimal) -> Result<OrderId> {
        if position <= Decimal::ZERO {
            anyhow::bail!("Spot position {} for {} cannot be closed by selling", position, instrument);
        }
        self.place_market_order(instrument, OrderSide::Sell, OrderSize::Base(position)).await
    }
}
