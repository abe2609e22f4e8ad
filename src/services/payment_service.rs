//! Domain service for PIX charges, their reconciliation and the public payment link.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use super::plex_connection::ServiceStatus;
use super::subscription_service::SubscriptionError;
use crate::domain::PaymentProvider;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    /// The public link exists but may no longer be used.
    #[error("{0}")]
    Gone(String),

    #[error("{0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for PaymentError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for PaymentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<SubscriptionError> for PaymentError {
    fn from(err: SubscriptionError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EnabledProviders {
    pub efi: bool,
    pub mercadopago: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentOptions {
    /// Monthly price keyed by screen count, `"0"` for the flat plan.
    pub prices: BTreeMap<String, f64>,
    pub providers: EnabledProviders,
}

/// Who a charge is issued for.
#[derive(Debug, Clone)]
pub struct Payer {
    pub username: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedCharge {
    pub provider: PaymentProvider,
    pub txid: String,
    pub pix_copy_paste: String,
    pub qr_code_image: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub efi: ServiceStatus,
    pub mercado_pago: ServiceStatus,
}

/// Owner of a public payment link.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLinkOwner {
    pub username: String,
    pub name: String,
    #[serde(skip)]
    pub email: String,
    pub expiration_date: Option<String>,
    pub blocked: bool,
}

impl From<&PaymentLinkOwner> for Payer {
    fn from(owner: &PaymentLinkOwner) -> Self {
        Self {
            username: owner.username.clone(),
            name: owner.name.clone(),
            email: owner.email.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait PaymentService: Send + Sync {
    async fn get_payment_options(&self, username: &str) -> Result<PaymentOptions, PaymentError>;

    /// Issues a PIX charge for one of the options offered to `payer`.
    async fn create_charge(
        &self,
        payer: &Payer,
        provider: PaymentProvider,
        screens: &str,
    ) -> Result<CreatedCharge, PaymentError>;

    /// Current status of `txid`, asking the provider while it is pending.
    async fn check_status(&self, txid: &str) -> Result<String, PaymentError>;

    /// Marks a payment as paid and renews the subscription. Repeated calls are no-ops.
    async fn process_successful_payment(&self, txid: &str) -> Result<(), PaymentError>;

    async fn handle_efi_webhook(&self, payload: &Value);

    async fn handle_mercadopago_webhook(&self, payload: &Value);

    /// Resolves the owner of a public payment link token.
    async fn resolve_payment_link(&self, token: &str) -> Result<PaymentLinkOwner, PaymentError>;

    /// Rebuilds provider clients after the credentials change.
    async fn reload_credentials(&self);

    /// Checks that each enabled provider accepts its credentials.
    async fn provider_health(&self) -> ProviderHealth;
}
