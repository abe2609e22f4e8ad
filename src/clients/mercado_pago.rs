use anyhow::{Context, Result, bail};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use super::truncate_body;

const API_BASE: &str = "https://api.mercadopago.com";

#[derive(Debug, Clone)]
pub struct CreatedPixPayment {
    pub id: String,
    pub qr_code: String,
    pub qr_code_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetail {
    pub id: i64,
    /// `approved` once paid.
    pub status: String,
    #[serde(default)]
    pub external_reference: Option<String>,
}

impl PaymentDetail {
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == "approved"
    }
}

fn extract_created(payment: &Value) -> Result<CreatedPixPayment> {
    let id = match &payment["id"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => bail!("Mercado Pago response has no payment id"),
    };
    let data = &payment["point_of_interaction"]["transaction_data"];
    Ok(CreatedPixPayment {
        id,
        qr_code: data["qr_code"]
            .as_str()
            .context("Mercado Pago response has no PIX code")?
            .to_string(),
        qr_code_base64: data["qr_code_base64"].as_str().unwrap_or_default().to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    client: Client,
    access_token: String,
}

impl MercadoPagoClient {
    #[must_use]
    pub fn new(client: Client, access_token: &str) -> Self {
        Self {
            client,
            access_token: access_token.to_string(),
        }
    }

    pub async fn create_pix_payment(
        &self,
        request: &Value,
        idempotency_key: &str,
    ) -> Result<CreatedPixPayment> {
        let response = self
            .client
            .post(format!("{API_BASE}/v1/payments"))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", idempotency_key)
            .json(request)
            .send()
            .await
            .context("Failed to reach Mercado Pago")?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status != StatusCode::CREATED {
            let message = body["message"]
                .as_str()
                .unwrap_or("Falha ao criar cobrança PIX no Mercado Pago.")
                .to_string();
            error!(status = %status, body = %truncate_body(&body.to_string()), "Mercado Pago charge failed");
            bail!("{message}");
        }

        extract_created(&body)
    }

    /// Verifies the access token against the account endpoint.
    pub async fn check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{API_BASE}/users/me"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to reach Mercado Pago")?;

        if !response.status().is_success() {
            bail!("Mercado Pago recusou o token de acesso ({}).", response.status());
        }
        Ok(())
    }

    pub async fn payment(&self, id: &str) -> Result<PaymentDetail> {
        let response = self
            .client
            .get(format!("{API_BASE}/v1/payments/{id}"))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("Failed to reach Mercado Pago")?;

        if !response.status().is_success() {
            bail!("Mercado Pago returned {} for payment {id}", response.status());
        }

        response
            .json()
            .await
            .context("Invalid Mercado Pago payment response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_pix_data_from_created_payment() {
        let body = json!({
            "id": 123_456_789,
            "status": "pending",
            "point_of_interaction": {
                "transaction_data": {"qr_code": "000201...", "qr_code_base64": "iVBOR..."}
            }
        });
        let created = extract_created(&body).unwrap();
        assert_eq!(created.id, "123456789");
        assert_eq!(created.qr_code, "000201...");
        assert_eq!(created.qr_code_base64, "iVBOR...");
    }

    #[test]
    fn missing_pix_code_is_an_error() {
        assert!(extract_created(&json!({"id": 1})).is_err());
    }
}
