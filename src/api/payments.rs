use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::auth::CurrentUser;
use super::{ApiError, ApiResponse, AppState};
use crate::db::FinancialSummary;
use crate::domain::PaymentProvider;
use crate::domain::time::local_from_naive;
use crate::services::{CreatedCharge, Payer, PaymentLinkOwner, PaymentOptions};

#[derive(Deserialize)]
pub struct ChargeRequest {
    pub provider: Option<String>,
    /// Plan key from the options, `"0"` for the flat plan.
    pub screens: Option<Value>,
}

#[derive(Serialize)]
pub struct PaymentStatusResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

const RECEIVED: WebhookAck = WebhookAck { status: "received" };

#[derive(Deserialize)]
pub struct SummaryQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub renewal_days: Option<i64>,
}

#[derive(Serialize)]
pub struct QueryDate {
    pub year: i32,
    pub month: u32,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub summary: FinancialSummary,
    pub query_date: QueryDate,
}

#[derive(Deserialize)]
pub struct ManualPaymentRequest {
    pub username: Option<String>,
    pub value: Option<f64>,
    pub description: Option<String>,
    /// `YYYY-MM-DD`; the current time of day is used.
    pub payment_date: Option<String>,
}

#[derive(Serialize)]
pub struct ManualPaymentResponse {
    pub message: String,
    pub txid: String,
}

#[derive(Serialize)]
pub struct PaymentLinkInfo {
    pub user: PaymentLinkOwner,
    pub options: PaymentOptions,
}

/// Parses the charge body, accepting the plan key as a string or a number.
fn parse_charge(payload: ChargeRequest) -> Result<(PaymentProvider, String), ApiError> {
    let insufficient = || ApiError::validation("Dados insuficientes para gerar cobrança.");

    let provider = payload
        .provider
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(insufficient)?;
    let provider: PaymentProvider = provider.parse().map_err(|_| {
        ApiError::validation(format!("O provedor {provider} não está habilitado."))
    })?;
    if provider == PaymentProvider::Manual {
        return Err(ApiError::validation("O provedor Manual não está habilitado."));
    }

    let screens = match payload.screens.ok_or_else(insufficient)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => return Err(insufficient()),
    };

    Ok((provider, screens))
}

// ============================================================================
// Authenticated user
// ============================================================================

/// GET /payments/options
pub async fn get_options(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<PaymentOptions>>, ApiError> {
    let options = state
        .shared
        .payment_service
        .get_payment_options(&user.username)
        .await?;
    Ok(Json(ApiResponse::success(options)))
}

/// POST /payments/create-charge
pub async fn create_charge(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<ChargeRequest>,
) -> Result<Json<ApiResponse<CreatedCharge>>, ApiError> {
    let (provider, screens) = parse_charge(payload)?;

    let profile = state.shared.store.get_user_profile(&user.username).await?;
    let payer = Payer {
        name: profile.name.unwrap_or_else(|| user.username.clone()),
        username: user.username,
        email: user.email,
    };

    let charge = state
        .shared
        .payment_service
        .create_charge(&payer, provider, &screens)
        .await?;
    Ok(Json(ApiResponse::success(charge)))
}

/// GET /payments/status/{txid}
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(txid): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ApiError> {
    let payment = state
        .shared
        .store
        .get_pix_payment(&txid)
        .await?
        .ok_or_else(|| ApiError::NotFound("NOT_FOUND".to_string()))?;
    if !user.is_admin() && payment.username != user.username {
        return Err(ApiError::NotFound("NOT_FOUND".to_string()));
    }

    let status = state.shared.payment_service.check_status(&txid).await?;
    Ok(Json(ApiResponse::success(PaymentStatusResponse { status })))
}

// ============================================================================
// Provider webhooks
// ============================================================================

fn webhook_payload(provider: &str, body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!(provider, error = %e, "Webhook body is not JSON");
        Value::Null
    })
}

/// POST /payments/webhook/efi
pub async fn efi_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Json<WebhookAck> {
    let payload = webhook_payload("efi", &body);
    info!(provider = "efi", "Payment webhook received");
    state.shared.payment_service.handle_efi_webhook(&payload).await;
    Json(RECEIVED)
}

/// POST /payments/webhook/mercadopago
pub async fn mercadopago_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<WebhookAck> {
    let payload = webhook_payload("mercadopago", &body);
    info!(provider = "mercadopago", "Payment webhook received");
    state
        .shared
        .payment_service
        .handle_mercadopago_webhook(&payload)
        .await;
    Json(RECEIVED)
}

// ============================================================================
// Financial (admin)
// ============================================================================

/// GET /payments/financial/summary
pub async fn get_financial_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<ApiResponse<SummaryResponse>>, ApiError> {
    let today = Local::now().date_naive();
    let year = query.year.unwrap_or_else(|| today.year());
    let month = query
        .month
        .filter(|m| (1..=12).contains(m))
        .unwrap_or_else(|| today.month());
    let renewal_days = query.renewal_days.unwrap_or(7).max(0);

    let summary = state
        .shared
        .store
        .get_financial_summary(year, month, renewal_days)
        .await?;

    Ok(Json(ApiResponse::success(SummaryResponse {
        summary,
        query_date: QueryDate { year, month },
    })))
}

/// POST /payments/financial/add-manual
pub async fn add_manual_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ManualPaymentRequest>,
) -> Result<Json<ApiResponse<ManualPaymentResponse>>, ApiError> {
    let required = || ApiError::validation("Todos os campos são obrigatórios.");

    let username = payload
        .username
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(required)?;
    let value = payload.value.filter(|v| *v > 0.0).ok_or_else(required)?;
    let description = payload
        .description
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(required)?;
    let day = payload
        .payment_date
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(required)?;

    let day = NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::validation("Data de pagamento inválida."))?;
    let paid_at = local_from_naive(day.and_time(Local::now().time()))
        .ok_or_else(|| ApiError::validation("Data de pagamento inválida."))?;

    let txid = state
        .shared
        .store
        .add_manual_payment(username.trim(), value, description.trim(), paid_at)
        .await?;

    info!(username = %username, value, "Manual payment added");

    Ok(Json(ApiResponse::success(ManualPaymentResponse {
        message: "Pagamento manual registado com sucesso.".to_string(),
        txid,
    })))
}

// ============================================================================
// Public payment link
// ============================================================================

/// GET /pay/{token}
pub async fn get_payment_link(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<PaymentLinkInfo>>, ApiError> {
    let payments = &state.shared.payment_service;
    let owner = payments.resolve_payment_link(&token).await?;
    let options = payments.get_payment_options(&owner.username).await?;
    Ok(Json(ApiResponse::success(PaymentLinkInfo {
        user: owner,
        options,
    })))
}

/// POST /pay/{token}/charge
pub async fn create_link_charge(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(payload): Json<ChargeRequest>,
) -> Result<Json<ApiResponse<CreatedCharge>>, ApiError> {
    let (provider, screens) = parse_charge(payload)?;
    let payments = &state.shared.payment_service;
    let owner = payments.resolve_payment_link(&token).await?;

    let charge = payments
        .create_charge(&Payer::from(&owner), provider, &screens)
        .await?;
    Ok(Json(ApiResponse::success(charge)))
}

/// GET /pay/{token}/status/{txid}
pub async fn get_link_status(
    State(state): State<Arc<AppState>>,
    Path((token, txid)): Path<(String, String)>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ApiError> {
    let payments = &state.shared.payment_service;
    let owner = payments.resolve_payment_link(&token).await?;

    let belongs_to_owner = state
        .shared
        .store
        .get_pix_payment(&txid)
        .await?
        .is_some_and(|p| p.username == owner.username);
    if !belongs_to_owner {
        return Err(ApiError::NotFound("NOT_FOUND".to_string()));
    }

    let status = payments.check_status(&txid).await?;
    Ok(Json(ApiResponse::success(PaymentStatusResponse { status })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(provider: Option<&str>, screens: Option<Value>) -> ChargeRequest {
        ChargeRequest {
            provider: provider.map(str::to_string),
            screens,
        }
    }

    #[test]
    fn charge_accepts_numeric_and_string_plans() {
        let (provider, screens) = parse_charge(request(Some("EFI"), Some(json!(2)))).unwrap();
        assert_eq!(provider, PaymentProvider::Efi);
        assert_eq!(screens, "2");

        let (provider, screens) =
            parse_charge(request(Some("mercadopago"), Some(json!("0")))).unwrap();
        assert_eq!(provider, PaymentProvider::MercadoPago);
        assert_eq!(screens, "0");
    }

    #[test]
    fn charge_rejects_missing_or_manual_provider() {
        assert!(parse_charge(request(None, Some(json!("1")))).is_err());
        assert!(parse_charge(request(Some("EFI"), None)).is_err());
        assert!(parse_charge(request(Some("Manual"), Some(json!("1")))).is_err());
        assert!(parse_charge(request(Some("PAYPAL"), Some(json!("1")))).is_err());
    }
}
