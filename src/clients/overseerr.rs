use anyhow::{Context, Result, bail};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::truncate_body;

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverseerrUser {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct UserPage {
    #[serde(default)]
    results: Vec<OverseerrUser>,
}

/// Request manager (Overseerr or Jellyseerr) API.
#[derive(Debug, Clone)]
pub struct OverseerrClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OverseerrClient {
    #[must_use]
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn request(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/api/v1/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut request = self
            .client
            .request(method, &url)
            .header("X-Api-Key", &self.api_key)
            .timeout(TIMEOUT);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach Overseerr at {}", self.base_url))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| truncate_body(&text).to_string());
            bail!("Erro do Servidor Overseerr: {message}");
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("Invalid Overseerr response")
    }

    pub async fn import_from_plex(&self, plex_id: u64) -> Result<()> {
        self.request(
            Method::POST,
            "user/import-from-plex",
            Some(json!({ "plexIds": [plex_id.to_string()] })),
        )
        .await?;
        info!(plex_id, "User imported into Overseerr");
        Ok(())
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<OverseerrUser>> {
        let page: UserPage = serde_json::from_value(self.request(Method::GET, "user?take=1000", None).await?)
            .context("Invalid Overseerr user list")?;

        Ok(page
            .results
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    /// A user already absent from Overseerr counts as removed.
    pub async fn remove_user(&self, email: &str) -> Result<()> {
        let Some(user) = self.find_user_by_email(email).await? else {
            warn!(email, "User not found in Overseerr, nothing to remove");
            return Ok(());
        };

        debug!(email, id = user.id, name = %user.display_name, "Removing Overseerr user");
        self.request(Method::DELETE, &format!("user/{}", user.id), None)
            .await?;
        info!(email, "User removed from Overseerr");
        Ok(())
    }
}

pub async fn test_connection(client: &Client, url: &str, api_key: &str) -> Result<()> {
    if url.trim().is_empty() || api_key.trim().is_empty() {
        bail!("URL e Chave da API são obrigatórios.");
    }
    OverseerrClient::new(client.clone(), url, api_key)
        .request(Method::GET, "settings/about", None)
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("Falha na conexão: {e}"))
}
