//! Efí (Gerencianet) PIX API.
//!
//! Every call is made over mutual TLS with the account certificate, and
//! authenticated with a client-credentials bearer token cached until expiry.

use anyhow::{Context, Result, bail};
use reqwest::{Client, Identity};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::truncate_body;
use crate::config::EfiConfig;

const PRODUCTION_HOST: &str = "https://pix.api.efipay.com.br";
const SANDBOX_HOST: &str = "https://pix-h.api.efipay.com.br";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

const fn default_expiry() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedCharge {
    pub txid: String,
    pub loc: ChargeLocation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeLocation {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QrCode {
    /// PIX copy-and-paste payload.
    pub qrcode: String,
    /// `data:image/png;base64,...`
    #[serde(rename = "imagemQrcode")]
    pub imagem_qrcode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeDetail {
    pub txid: String,
    pub status: String,
}

/// Builds a readable message from an Efí error body.
#[must_use]
pub fn describe_error(body: &Value) -> String {
    let title = body["nome"]
        .as_str()
        .or_else(|| body["title"].as_str())
        .unwrap_or("Erro desconhecido");

    let detail = body["erros"].as_array().map_or_else(
        || {
            body["mensagem"]
                .as_str()
                .or_else(|| body["detail"].as_str())
                .unwrap_or("A API não retornou detalhes.")
                .to_string()
        },
        |errors| {
            errors
                .iter()
                .map(|e| e["mensagem"].as_str().unwrap_or("Erro não especificado."))
                .collect::<Vec<_>>()
                .join(" | ")
        },
    );

    format!("{title}: {detail}")
}

pub struct EfiClient {
    client: Client,
    host: &'static str,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<(String, Instant)>>,
}

impl EfiClient {
    /// Loads the PEM certificate and builds the mTLS client.
    pub fn from_config(config: &EfiConfig, timeout: Duration) -> Result<Self> {
        let pem = std::fs::read(Path::new(&config.certificate)).with_context(|| {
            format!("Failed to read Efí certificate at {}", config.certificate)
        })?;
        let identity = Identity::from_pem(&pem).context("Invalid Efí certificate (expected PEM with key)")?;

        let client = Client::builder()
            .identity(identity)
            .timeout(timeout)
            .user_agent(concat!("plexpanel/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Efí HTTP client")?;

        Ok(Self {
            client,
            host: if config.sandbox { SANDBOX_HOST } else { PRODUCTION_HOST },
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/oauth/token", self.host))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .json(&serde_json::json!({ "grant_type": "client_credentials" }))
            .send()
            .await
            .context("Failed to authenticate with Efí")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Efí authentication failed ({status}): {}", truncate_body(&body));
        }

        let token: TokenResponse = response.json().await.context("Invalid Efí token response")?;
        // Refresh a minute early so in-flight calls never carry a stale token.
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        debug!(expires_in = token.expires_in, "Efí token refreshed");
        Ok(token.access_token)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let token = self.access_token().await?;
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.host))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach Efí at {path}"))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .map_or_else(|_| truncate_body(&text).to_string(), |v| describe_error(&v));
            error!(status = %status, path, error = %message, "Efí request failed");
            bail!("{message}");
        }

        serde_json::from_str(&text).with_context(|| format!("Invalid Efí response for {path}"))
    }

    /// Verifies the credentials by requesting a token.
    pub async fn check(&self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    pub async fn create_immediate_charge(&self, body: &Value) -> Result<CreatedCharge> {
        self.send(reqwest::Method::POST, "/v2/cob", Some(body)).await
    }

    pub async fn qr_code(&self, loc_id: i64) -> Result<QrCode> {
        self.send(reqwest::Method::GET, &format!("/v2/loc/{loc_id}/qrcode"), None)
            .await
    }

    pub async fn charge_detail(&self, txid: &str) -> Result<ChargeDetail> {
        self.send(reqwest::Method::GET, &format!("/v2/cob/{txid}"), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_lists_are_joined() {
        let body = json!({
            "nome": "valor_invalido",
            "mensagem": "ignored",
            "erros": [{"mensagem": "Campo chave inválido"}, {"mensagem": "Valor negativo"}]
        });
        assert_eq!(
            describe_error(&body),
            "valor_invalido: Campo chave inválido | Valor negativo"
        );
    }

    #[test]
    fn falls_back_to_problem_details() {
        let body = json!({"title": "Não autorizado", "detail": "Certificado inválido"});
        assert_eq!(describe_error(&body), "Não autorizado: Certificado inválido");
    }

    #[test]
    fn missing_certificate_is_reported() {
        let config = EfiConfig {
            certificate: "/nonexistent/efi.pem".to_string(),
            ..EfiConfig::default()
        };
        let err = EfiClient::from_config(&config, Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(err.to_string().contains("certificate"));
    }
}
