// Thin REST adapters implementing the `Exchange` trait

pub mod binance;
pub mod upbit;

pub use binance::BinanceFutures;
pub use upbit::UpbitSpot;

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("Failed to create HTTP client")
}

/// Decode a JSON body, turning non-2xx responses into errors that carry the body text
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        anyhow::bail!("{} failed (status: {}): {}", what, status, body);
    }
    serde_json::from_str(&body).with_context(|| format!("Invalid {} response: {}", what, body))
}
