use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::truncate_body;

const HISTORY_TIMEOUT: Duration = Duration::from_secs(20);

/// Tautulli sends numbers as ints, floats, numeric strings or empty strings
/// depending on version and field.
#[allow(clippy::cast_possible_truncation)]
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// One row of `get_history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRow {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user: String,
    /// Unix timestamp of the play.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub date: i64,
    /// Seconds watched.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub duration: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub media_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub grandparent_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub platform: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub player: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumb: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub year: i64,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    data: Vec<HistoryRow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentlyAddedItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub grandparent_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub media_type: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub added_at: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumb: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub year: i64,
}

#[derive(Debug, Deserialize)]
struct RecentlyAdded {
    #[serde(default)]
    recently_added: Vec<RecentlyAddedItem>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: EnvelopeBody,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    #[serde(default)]
    result: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Converts a notifier config value to the string Tautulli expects in a form.
#[must_use]
pub fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct TautulliClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TautulliClient {
    #[must_use]
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Proxied poster URL for a Plex image path.
    #[must_use]
    pub fn image_proxy_url(&self, img: &str) -> String {
        if img.is_empty() {
            return String::new();
        }
        format!(
            "{}/pms_image_proxy?img={}&width=200&height=300&apikey={}",
            self.base_url,
            urlencoding::encode(img),
            self.api_key
        )
    }

    fn api_url(&self) -> String {
        format!("{}/api/v2", self.base_url)
    }

    async fn unwrap_envelope(response: reqwest::Response, cmd: &str) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Tautulli returned {status} for {cmd}: {}", truncate_body(&body));
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .with_context(|| format!("Invalid Tautulli response for {cmd}"))?;
        if envelope.response.result != "success" {
            bail!(
                "{}",
                envelope
                    .response
                    .message
                    .unwrap_or_else(|| "Erro desconhecido do Tautulli.".to_string())
            );
        }
        Ok(envelope.response.data)
    }

    async fn call(&self, cmd: &str, params: &[(&str, String)], timeout: Option<Duration>) -> Result<Value> {
        let mut request = self
            .client
            .get(self.api_url())
            .query(&[("apikey", self.api_key.as_str()), ("cmd", cmd)])
            .query(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach Tautulli at {}", self.base_url))?;
        Self::unwrap_envelope(response, cmd).await
    }

    pub async fn get_notifier_config(&self, notifier_id: i64) -> Result<Map<String, Value>> {
        let data = self
            .call(
                "get_notifier_config",
                &[("notifier_id", notifier_id.to_string())],
                None,
            )
            .await?;
        match data {
            Value::Object(map) => Ok(map),
            _ => bail!("Notificador {notifier_id} não encontrado no Tautulli."),
        }
    }

    /// Writes a notifier config, sent as a form body.
    pub async fn set_notifier_config(&self, notifier_id: i64, form: &[(String, String)]) -> Result<()> {
        debug!(notifier_id, fields = form.len(), "Writing Tautulli notifier config");
        let id = notifier_id.to_string();
        let response = self
            .client
            .post(self.api_url())
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("cmd", "set_notifier_config"),
                ("notifier_id", id.as_str()),
            ])
            .form(form)
            .send()
            .await
            .context("Failed to write Tautulli notifier config")?;
        Self::unwrap_envelope(response, "set_notifier_config").await?;
        Ok(())
    }

    pub async fn get_history(
        &self,
        user: Option<&str>,
        after: Option<&str>,
        length: u32,
    ) -> Result<Vec<HistoryRow>> {
        let mut params = vec![("length", length.to_string())];
        if let Some(user) = user {
            params.push(("user", user.to_string()));
        }
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }

        let data = self.call("get_history", &params, Some(HISTORY_TIMEOUT)).await?;
        let page: HistoryPage = serde_json::from_value(data).context("Invalid history payload")?;
        Ok(page.data)
    }

    pub async fn get_recently_added(&self, count: u32) -> Result<Vec<RecentlyAddedItem>> {
        let data = self
            .call("get_recently_added", &[("count", count.to_string())], None)
            .await?;
        let recent: RecentlyAdded =
            serde_json::from_value(data).context("Invalid recently added payload")?;
        Ok(recent.recently_added)
    }

    pub async fn status(&self) -> Result<()> {
        self.call("status", &[], None).await.map(|_| ())
    }
}

/// Tests credentials without touching the configured client.
pub async fn test_connection(client: &Client, url: &str, api_key: &str) -> Result<()> {
    if url.trim().is_empty() || api_key.trim().is_empty() {
        bail!("URL e Chave da API são obrigatórios.");
    }

    TautulliClient::new(client.clone(), url, api_key)
        .status()
        .await
        .map_err(|e| {
            if let Some(err) = e.downcast_ref::<reqwest::Error>() {
                if err.is_timeout() {
                    return anyhow::anyhow!(
                        "A conexão com o Tautulli expirou. O servidor pode estar sobrecarregado ou offline."
                    );
                }
                if err.is_connect() {
                    return anyhow::anyhow!(
                        "Falha de conexão. Verifique se a URL do Tautulli está correta e acessível."
                    );
                }
            }
            e
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_rows_tolerate_mixed_types() {
        let json = serde_json::json!({
            "recordsTotal": 2,
            "data": [
                {"user": "ana", "date": 1_700_000_000, "duration": "3600", "media_type": "movie",
                 "title": "Duna", "year": 2021, "platform": "Android", "player": "Pixel", "genres": ["Ficção"]},
                {"user": "bia", "date": "1700003600", "duration": null, "media_type": "episode",
                 "title": "Piloto", "grandparent_title": "Série", "year": ""}
            ]
        });

        let page: HistoryPage = serde_json::from_value(json).unwrap();
        assert_eq!(page.data[0].duration, 3600);
        assert_eq!(page.data[0].year, 2021);
        assert_eq!(page.data[1].date, 1_700_003_600);
        assert_eq!(page.data[1].duration, 0);
        assert_eq!(page.data[1].year, 0);
    }

    #[test]
    fn form_values_match_tautulli_expectations() {
        assert_eq!(form_value(&serde_json::json!(true)), "1");
        assert_eq!(form_value(&serde_json::json!(7)), "7");
        assert_eq!(form_value(&serde_json::json!(null)), "");
        assert_eq!(form_value(&serde_json::json!("x")), "x");
    }

    #[test]
    fn poster_urls_go_through_the_proxy() {
        let client = TautulliClient::new(Client::new(), "http://tautulli:8181/", "KEY");
        assert_eq!(
            client.image_proxy_url("/library/metadata/1/thumb/2"),
            "http://tautulli:8181/pms_image_proxy?img=%2Flibrary%2Fmetadata%2F1%2Fthumb%2F2&width=200&height=300&apikey=KEY"
        );
        assert!(client.image_proxy_url("").is_empty());
    }
}
