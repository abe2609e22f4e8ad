//! Outbound message channels: Telegram bots and JSON webhooks (Discord included).

use anyhow::{Context, Result, bail};
use reqwest::Client;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::truncate_body;

const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(10);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
}

impl TelegramClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    pub async fn send_message(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<()> {
        let response: TelegramResponse = self
            .client
            .post(format!("{}/bot{bot_token}/sendMessage", self.api_base))
            .timeout(TELEGRAM_TIMEOUT)
            .json(&json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }))
            .send()
            .await
            .context("Failed to reach Telegram")?
            .json()
            .await
            .context("Invalid Telegram response")?;

        if !response.ok {
            bail!(
                "{}",
                response
                    .description
                    .unwrap_or_else(|| "Erro desconhecido.".to_string())
            );
        }
        Ok(())
    }
}

/// Splits the configured authorization setting into a header pair.
///
/// `Name: value` sets a custom header, anything else is sent as `Authorization`.
pub fn parse_auth_header(raw: &str) -> Result<Option<(HeaderName, HeaderValue)>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let (name, value) = match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() && !name.contains(' ') => {
            (name.trim(), value.trim())
        }
        _ => ("Authorization", raw),
    };

    Ok(Some((
        HeaderName::from_bytes(name.as_bytes()).context("Invalid webhook header name")?,
        HeaderValue::from_str(value).context("Invalid webhook header value")?,
    )))
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn post_json(&self, url: &str, payload: &Value, authorization: &str) -> Result<()> {
        let mut request = self.client.post(url).timeout(WEBHOOK_TIMEOUT).json(payload);
        if let Some((name, value)) = parse_auth_header(authorization)? {
            request = request.header(name, value);
        }

        let response = request.send().await.context("Failed to reach webhook")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Webhook returned {status}: {}", truncate_body(&body));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DiscordClient {
    webhook: WebhookClient,
}

impl DiscordClient {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self {
            webhook: WebhookClient::new(client),
        }
    }

    pub async fn post_json(&self, webhook_url: &str, payload: &Value) -> Result<()> {
        self.webhook.post_json(webhook_url, payload, "").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_header_pairs_are_split() {
        let (name, value) = parse_auth_header("X-Token: abc123").unwrap().unwrap();
        assert_eq!(name.as_str(), "x-token");
        assert_eq!(value, "abc123");
    }

    #[test]
    fn raw_values_become_authorization() {
        let (name, value) = parse_auth_header("Bearer abc:def").unwrap().unwrap();
        assert_eq!(name.as_str(), "authorization");
        assert_eq!(value, "Bearer abc:def");
        assert!(parse_auth_header("   ").unwrap().is_none());
    }
}
