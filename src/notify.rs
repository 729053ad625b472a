// Best-effort notification side channel

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> Result<()>;
}

/// Used when notifications are disabled
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _channel: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Slack `chat.postMessage` client
pub struct SlackNotifier {
    client: Client,
    token: String,
    api_url: String,
}

impl SlackNotifier {
    pub fn new(token: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            token,
            api_url: "https://slack.com/api/chat.postMessage".to_string(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, channel: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&json!({ "channel": channel, "text": message }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Slack returned status {}", status);
        }

        // Slack reports most failures with 200 + {"ok": false}
        let body: Value = response.json().await?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let reason = body.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            anyhow::bail!("Slack rejected message: {}", reason);
        }
        Ok(())
    }
}

/// Send a notification, logging instead of propagating any failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, channel: &str, message: &str) {
    if let Err(e) = notifier.notify(channel, message).await {
        warn!("Notification to {} failed: {:#}", channel, e);
    }
}
