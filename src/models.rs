// Exchange wire models

use rust_decimal::Decimal;
use serde::Deserialize;

// ---- Upbit (spot) ----

/// Entry of GET /v1/market/all
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitMarket {
    pub market: String,
}

/// Entry of GET /v1/ticker
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitTicker {
    pub market: String,
    pub trade_price: f64,
}

/// Entry of GET /v1/candles/days (newest first)
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitDayCandle {
    pub opening_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    /// Close of the day (last trade)
    pub trade_price: f64,
    pub candle_acc_trade_volume: f64,
}

/// Entry of GET /v1/accounts
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitAccount {
    pub currency: String,
    pub balance: Decimal,
    #[serde(default)]
    pub locked: Option<Decimal>,
    #[serde(default)]
    pub unit_currency: Option<String>,
}

/// Response of POST /v1/orders
#[derive(Debug, Clone, Deserialize)]
pub struct UpbitOrderResponse {
    pub uuid: String,
}

// ---- Binance USDⓈ-M futures ----

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceSymbol {
    pub symbol: String,
    pub status: String,
    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
    #[serde(rename = "contractType")]
    pub contract_type: String,
    #[serde(rename = "pricePrecision")]
    pub price_precision: u32,
    #[serde(rename = "quantityPrecision")]
    pub quantity_precision: u32,
}

/// Entry of GET /fapi/v1/ticker/price
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// Response of GET /fapi/v2/account (fields we use)
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceAccount {
    #[serde(rename = "availableBalance")]
    pub available_balance: Decimal,
    pub positions: Vec<BinancePosition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinancePosition {
    pub symbol: String,
    #[serde(rename = "positionAmt")]
    pub position_amt: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceOrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: u64,
}
