//! `SeaORM` implementation of the `PaymentService` trait.

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::notifier::NotifierManager;
use super::notifier_handler::NotifierHandler;
use super::payment_service::{
    CreatedCharge, EnabledProviders, Payer, PaymentError, PaymentLinkOwner, PaymentOptions,
    PaymentService, ProviderHealth,
};
use super::plex_connection::ServiceStatus;
use super::plex_users::PlexUserManager;
use super::subscription_service::{RenewalRequest, SubscriptionService};
use crate::clients::efi::EfiClient;
use crate::clients::mercado_pago::MercadoPagoClient;
use crate::config::{Config, PaymentsConfig};
use crate::db::{Store, UserProfile};
use crate::domain::events::PanelEvent;
use crate::domain::time::{days_until, parse_timestamp};
use crate::domain::{PaymentProvider, PaymentStatus, RenewalBase};

const CHARGE_EXPIRY_SECONDS: u32 = 3600;
const STATEMENT_DESCRIPTOR_MAX: usize = 22;

/// Prices offered to a user holding `profile`.
///
/// Inside the renewal window every plan is offered so users may downgrade;
/// otherwise only plans with at least the current screen count.
#[must_use]
pub fn payment_prices(
    payments: &PaymentsConfig,
    renewal_window_days: i64,
    profile: &UserProfile,
) -> BTreeMap<String, f64> {
    let days_left = profile
        .expiration_date
        .as_deref()
        .and_then(parse_timestamp)
        .map_or(i64::MAX, |at| days_until(&at));
    let can_downgrade = days_left <= renewal_window_days;

    let mut prices: BTreeMap<String, f64> = payments
        .screen_prices
        .iter()
        .filter(|(_, price)| **price > 0.0)
        .filter(|(screens, _)| {
            can_downgrade
                || screens
                    .parse::<i32>()
                    .is_ok_and(|s| s >= profile.screen_limit)
        })
        .map(|(screens, price)| (screens.clone(), *price))
        .collect();

    if prices.is_empty() && payments.renewal_price > 0.0 {
        prices.insert("0".to_string(), payments.renewal_price);
    }
    prices
}

fn plan_title(screens: i32) -> String {
    if screens > 0 {
        format!("Renovação Plex - {screens} Tela(s)")
    } else {
        "Renovação Plex - Plano Padrão".to_string()
    }
}

#[must_use]
pub fn efi_charge_body(title: &str, pix_key: &str, payer: &Payer, price: f64, screens: i32) -> Value {
    json!({
        "calendario": { "expiracao": CHARGE_EXPIRY_SECONDS },
        "valor": { "original": format!("{price:.2}") },
        "chave": pix_key,
        "infoAdicionais": [
            { "nome": "Aplicação", "valor": title },
            { "nome": "Serviço", "valor": plan_title(screens) },
            { "nome": "Utilizador", "valor": payer.username },
        ],
    })
}

#[must_use]
pub fn mercadopago_payment_body(
    title: &str,
    base_url: &str,
    payer: &Payer,
    price: f64,
    screens: i32,
    external_reference: &str,
) -> Value {
    let item_title = plan_title(screens);
    let statement_descriptor: String = title
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(STATEMENT_DESCRIPTOR_MAX)
        .collect();

    json!({
        "transaction_amount": price,
        "payment_method_id": "pix",
        "description": format!("Serviço: {item_title} | Utilizador: {}", payer.username),
        "payer": {
            "email": payer.email,
            "first_name": payer.name,
            "last_name": " ",
        },
        "additional_info": {
            "items": [{
                "id": format!("plex-renewal-{screens}-screens"),
                "title": item_title,
                "description": format!(
                    "Assinatura de acesso ao servidor Plex para o utilizador {}.",
                    payer.username
                ),
                "category_id": "services",
                "quantity": 1,
                "unit_price": price,
            }],
        },
        "external_reference": external_reference,
        "statement_descriptor": statement_descriptor,
        "notification_url": format!("{base_url}/api/payments/webhook/mercadopago"),
    })
}

pub struct SeaOrmPaymentService {
    config: Arc<RwLock<Config>>,
    store: Store,
    http: Client,
    plex_users: Arc<PlexUserManager>,
    notifier_handler: Arc<NotifierHandler>,
    notifier: Arc<NotifierManager>,
    subscriptions: Arc<dyn SubscriptionService>,
    event_bus: broadcast::Sender<PanelEvent>,
    efi: RwLock<Option<Arc<EfiClient>>>,
}

impl SeaOrmPaymentService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        plex_users: Arc<PlexUserManager>,
        notifier_handler: Arc<NotifierHandler>,
        notifier: Arc<NotifierManager>,
        subscriptions: Arc<dyn SubscriptionService>,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            plex_users,
            notifier_handler,
            notifier,
            subscriptions,
            event_bus,
            efi: RwLock::new(None),
        }
    }

    async fn efi_client(&self) -> Result<Arc<EfiClient>, PaymentError> {
        if let Some(client) = self.efi.read().await.as_ref() {
            return Ok(Arc::clone(client));
        }

        let config = self.config.read().await;
        let efi = &config.payments.efi;
        if !efi.enabled || !efi.is_configured() {
            return Err(PaymentError::Validation(
                "O serviço de pagamento não está configurado corretamente.".to_string(),
            ));
        }
        let timeout = Duration::from_secs(config.general.http_timeout_seconds);
        let client = Arc::new(EfiClient::from_config(efi, timeout).map_err(|e| {
            error!(error = %e, "Could not build Efí client");
            PaymentError::Provider(
                "Erro de comunicação com o provedor de pagamento. Verifique o caminho do certificado e as permissões do ficheiro.".to_string(),
            )
        })?);
        *self.efi.write().await = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn mercadopago_client(&self) -> Result<MercadoPagoClient, PaymentError> {
        let config = self.config.read().await;
        let mp = &config.payments.mercadopago;
        if !mp.enabled || mp.access_token.is_empty() {
            return Err(PaymentError::Validation(
                "Credenciais do Mercado Pago não configuradas.".to_string(),
            ));
        }
        Ok(MercadoPagoClient::new(self.http.clone(), &mp.access_token))
    }

    async fn provider_confirms(&self, provider: PaymentProvider, txid: &str) -> Result<bool, PaymentError> {
        match provider {
            PaymentProvider::Efi => {
                let detail = self
                    .efi_client()
                    .await?
                    .charge_detail(txid)
                    .await
                    .map_err(|e| PaymentError::Provider(e.to_string()))?;
                Ok(detail.status == PaymentStatus::Completed.as_str())
            }
            PaymentProvider::MercadoPago => {
                let detail = self
                    .mercadopago_client()
                    .await?
                    .payment(txid)
                    .await
                    .map_err(|e| PaymentError::Provider(e.to_string()))?;
                Ok(detail.is_approved())
            }
            PaymentProvider::Manual => Ok(false),
        }
    }

    async fn reconcile(&self, provider: PaymentProvider, txid: &str) {
        match self.provider_confirms(provider, txid).await {
            Ok(true) => {
                if let Err(e) = self.process_successful_payment(txid).await {
                    error!(txid, error = %e, "Failed to process confirmed payment");
                }
            }
            Ok(false) => info!(txid, %provider, "Webhook payment not confirmed yet"),
            Err(e) => error!(txid, %provider, error = %e, "Could not verify webhook payment"),
        }
    }
}

#[async_trait]
impl PaymentService for SeaOrmPaymentService {
    async fn get_payment_options(&self, username: &str) -> Result<PaymentOptions, PaymentError> {
        let profile = self.store.get_user_profile(username).await?;
        let config = self.config.read().await;
        Ok(PaymentOptions {
            prices: payment_prices(
                &config.payments,
                config.scheduler.days_to_notify_expiration,
                &profile,
            ),
            providers: EnabledProviders {
                efi: config.payments.efi.enabled,
                mercadopago: config.payments.mercadopago.enabled,
            },
        })
    }

    async fn create_charge(
        &self,
        payer: &Payer,
        provider: PaymentProvider,
        screens: &str,
    ) -> Result<CreatedCharge, PaymentError> {
        let options = self.get_payment_options(&payer.username).await?;
        let Some(price) = options.prices.get(screens).copied().filter(|p| *p > 0.0) else {
            warn!(username = %payer.username, screens, "Charge requested for a plan not on offer");
            return Err(PaymentError::Validation(
                "O plano de pagamento solicitado não é válido ou não está disponível para si neste momento.".to_string(),
            ));
        };
        let screen_count: i32 = screens.parse().map_err(|_| {
            PaymentError::Validation("Opção de plano inválida.".to_string())
        })?;
        let (title, base_url, pix_key) = {
            let config = self.config.read().await;
            (
                config.app.title.clone(),
                config.app.base_url().to_string(),
                config.payments.efi.pix_key.clone(),
            )
        };

        info!(username = %payer.username, %provider, price, screens = screen_count, "Creating PIX charge");
        match provider {
            PaymentProvider::Efi => {
                let client = self.efi_client().await?;
                let body = efi_charge_body(&title, &pix_key, payer, price, screen_count);
                let charge = client
                    .create_immediate_charge(&body)
                    .await
                    .map_err(|e| PaymentError::Provider(e.to_string()))?;
                self.store
                    .create_pix_payment(&charge.txid, &payer.username, price, provider, screen_count, None)
                    .await?;
                let qr = client
                    .qr_code(charge.loc.id)
                    .await
                    .map_err(|e| PaymentError::Provider(e.to_string()))?;
                Ok(CreatedCharge {
                    provider,
                    txid: charge.txid,
                    pix_copy_paste: qr.qrcode,
                    qr_code_image: qr.imagem_qrcode,
                    value: price,
                })
            }
            PaymentProvider::MercadoPago => {
                let client = self.mercadopago_client().await?;
                let external_reference = Uuid::new_v4().to_string();
                let body = mercadopago_payment_body(
                    &title,
                    &base_url,
                    payer,
                    price,
                    screen_count,
                    &external_reference,
                );
                let created = client
                    .create_pix_payment(&body, &Uuid::new_v4().to_string())
                    .await
                    .map_err(|e| PaymentError::Provider(e.to_string()))?;
                self.store
                    .create_pix_payment(
                        &created.id,
                        &payer.username,
                        price,
                        provider,
                        screen_count,
                        Some(external_reference),
                    )
                    .await?;
                Ok(CreatedCharge {
                    provider,
                    txid: created.id,
                    pix_copy_paste: created.qr_code,
                    qr_code_image: format!("data:image/png;base64,{}", created.qr_code_base64),
                    value: price,
                })
            }
            PaymentProvider::Manual => Err(PaymentError::Validation(
                "O provedor Manual não gera cobranças.".to_string(),
            )),
        }
    }

    async fn check_status(&self, txid: &str) -> Result<String, PaymentError> {
        let payment = self
            .store
            .get_pix_payment(txid)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Pagamento não encontrado.".to_string()))?;
        if payment.status == PaymentStatus::Completed.as_str() {
            return Ok(payment.status);
        }

        let provider = payment
            .provider
            .parse::<PaymentProvider>()
            .unwrap_or(PaymentProvider::Efi);
        if self.provider_confirms(provider, txid).await? {
            self.process_successful_payment(txid).await?;
            return Ok(PaymentStatus::Completed.as_str().to_string());
        }
        Ok(payment.status)
    }

    async fn process_successful_payment(&self, txid: &str) -> Result<(), PaymentError> {
        let Some(payment) = self.store.get_pix_payment(txid).await? else {
            warn!(txid, "Confirmed payment not found, ignoring");
            return Ok(());
        };

        // Only the caller that flips the row to completed goes on to renew.
        if !self
            .store
            .update_pix_payment_status(txid, PaymentStatus::Completed)
            .await?
        {
            info!(txid, "Payment already processed, ignoring");
            return Ok(());
        }
        let username = payment.username.as_str();
        info!(txid, username, value = payment.value, "Processing confirmed payment");

        self.store
            .create_notification(
                &format!("Pagamento de {username} (R$ {:.2}) confirmado.", payment.value),
                "success",
                Some("/users".to_string()),
            )
            .await?;
        metrics::counter!("payments_confirmed_total", "provider" => payment.provider.clone())
            .increment(1);
        let _ = self.event_bus.send(PanelEvent::PaymentConfirmed {
            txid: txid.to_string(),
            username: username.to_string(),
            value: payment.value,
        });

        let Some(user) = self.plex_users.find_user(username).await else {
            warn!(txid, username, "Paying user not found on Plex, renewal skipped");
            return Ok(());
        };

        let expires_at = self
            .subscriptions
            .renew_subscription(username, RenewalRequest::months(1, RenewalBase::ExpiryDate))
            .await?;

        if payment.screens > 0 {
            if let Err(e) = self
                .notifier_handler
                .update_screen_limit(&user.email, username, payment.screens)
                .await
            {
                warn!(username, error = %e, "Could not apply purchased screen limit");
            }
        }

        let profile = self.store.get_user_profile(username).await?;
        self.notifier.send_renewal(&user, &profile, &expires_at).await;

        info!(txid, username, expires_at = %expires_at.to_rfc3339(), "Subscription renewed from payment");
        Ok(())
    }

    async fn handle_efi_webhook(&self, payload: &Value) {
        info!(payload = %payload, "Efí webhook received");
        let txids = payload["pix"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|pix| pix["txid"].as_str());
        for txid in txids {
            self.reconcile(PaymentProvider::Efi, txid).await;
        }
    }

    async fn handle_mercadopago_webhook(&self, payload: &Value) {
        info!(payload = %payload, "Mercado Pago webhook received");
        if payload["type"].as_str() != Some("payment") {
            return;
        }
        let id = match &payload["data"]["id"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => {
                warn!("Mercado Pago webhook without a payment id");
                return;
            }
        };
        self.reconcile(PaymentProvider::MercadoPago, &id).await;
    }

    async fn resolve_payment_link(&self, token: &str) -> Result<PaymentLinkOwner, PaymentError> {
        let profile = self
            .store
            .find_profile_by_payment_token(token)
            .await?
            .ok_or_else(|| PaymentError::NotFound("Link de pagamento inválido.".to_string()))?;
        let username = profile.username.clone();

        let blocked = self.store.get_blocked_user(&username).await?;
        if let Some(blocked_at) = blocked.as_ref().and_then(|b| parse_timestamp(&b.blocked_at)) {
            let grace_days = self.config.read().await.payments.payment_link_grace_period_days;
            if (Local::now() - blocked_at).num_days() > grace_days {
                return Err(PaymentError::Gone(
                    "Este link de pagamento expirou. Entre em contacto com o administrador.".to_string(),
                ));
            }
        }

        let email = self
            .plex_users
            .find_user(&username)
            .await
            .map(|u| u.email)
            .unwrap_or_default();
        Ok(PaymentLinkOwner {
            name: profile
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| username.clone()),
            username,
            email,
            expiration_date: profile.expiration_date,
            blocked: blocked.is_some(),
        })
    }

    async fn reload_credentials(&self) {
        *self.efi.write().await = None;
        info!("Payment provider clients reset");
    }

    async fn provider_health(&self) -> ProviderHealth {
        let (efi_enabled, mp_enabled) = {
            let config = self.config.read().await;
            (config.payments.efi.enabled, config.payments.mercadopago.enabled)
        };

        let efi = if efi_enabled {
            match self.efi_client().await {
                Ok(client) => match client.check().await {
                    Ok(()) => ServiceStatus::online("Conectado com sucesso."),
                    Err(e) => ServiceStatus::offline(e.to_string()),
                },
                Err(e) => ServiceStatus::offline(e.to_string()),
            }
        } else {
            ServiceStatus::offline("Desativado.")
        };

        let mercado_pago = if mp_enabled {
            match self.mercadopago_client().await {
                Ok(client) => match client.check().await {
                    Ok(()) => ServiceStatus::online("Conectado com sucesso."),
                    Err(e) => ServiceStatus::offline(e.to_string()),
                },
                Err(e) => ServiceStatus::offline(e.to_string()),
            }
        } else {
            ServiceStatus::offline("Desativado.")
        };

        ProviderHealth { efi, mercado_pago }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn payer() -> Payer {
        Payer {
            username: "ana".to_string(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
        }
    }

    fn profile(screens: i32, days_left: Option<i64>) -> UserProfile {
        UserProfile {
            username: "ana".to_string(),
            screen_limit: screens,
            expiration_date: days_left
                .map(|d| (Local::now() + ChronoDuration::days(d) + ChronoDuration::hours(1)).to_rfc3339()),
            ..Default::default()
        }
    }

    #[test]
    fn upgrades_only_outside_the_renewal_window() {
        let payments = PaymentsConfig::default();
        let prices = payment_prices(&payments, 2, &profile(3, Some(20)));
        assert_eq!(prices.keys().collect::<Vec<_>>(), ["3", "4"]);
    }

    #[test]
    fn every_plan_is_offered_near_expiry() {
        let payments = PaymentsConfig::default();
        let prices = payment_prices(&payments, 2, &profile(3, Some(1)));
        assert_eq!(prices.len(), 4);
        assert!((prices["1"] - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn flat_price_is_the_fallback() {
        let mut payments = PaymentsConfig::default();
        payments.screen_prices.clear();
        payments.renewal_price = 15.5;
        let prices = payment_prices(&payments, 2, &profile(0, None));
        assert_eq!(prices.get("0"), Some(&15.5));
    }

    #[test]
    fn efi_body_carries_the_plan_details() {
        let body = efi_charge_body("Painel Plex", "chave@pix", &payer(), 18.0, 2);
        assert_eq!(body["valor"]["original"], "18.00");
        assert_eq!(body["calendario"]["expiracao"], 3600);
        assert_eq!(body["infoAdicionais"][1]["valor"], "Renovação Plex - 2 Tela(s)");
        assert_eq!(body["infoAdicionais"][2]["valor"], "ana");
    }

    #[test]
    fn mercadopago_body_sanitises_the_statement_descriptor() {
        let body = mercadopago_payment_body(
            "Painel Plex do João & Cia. Ltda Premium",
            "https://painel.example.com",
            &payer(),
            10.0,
            0,
            "ref-1",
        );
        let descriptor = body["statement_descriptor"].as_str().unwrap();
        assert!(descriptor.chars().all(char::is_alphanumeric));
        assert_eq!(descriptor.chars().count(), 22);
        assert_eq!(
            body["notification_url"],
            "https://painel.example.com/api/payments/webhook/mercadopago"
        );
        assert_eq!(body["additional_info"]["items"][0]["id"], "plex-renewal-0-screens");
        assert_eq!(
            body["description"],
            "Serviço: Renovação Plex - Plano Padrão | Utilizador: ana"
        );
    }

    #[tokio::test]
    async fn concurrent_confirmations_are_processed_once() {
        let mut config = Config::default();
        config.general.database_path = "sqlite::memory:".to_string();
        let shared = crate::state::SharedState::new(config).await.unwrap();
        shared
            .store
            .create_pix_payment("tx-race", "ana", 18.0, PaymentProvider::Efi, 0, None)
            .await
            .unwrap();

        let payments = shared.payment_service.clone();
        let (first, second) = tokio::join!(
            payments.process_successful_payment("tx-race"),
            payments.process_successful_payment("tx-race"),
        );
        first.unwrap();
        second.unwrap();
        payments.process_successful_payment("tx-race").await.unwrap();

        let payment = shared.store.get_pix_payment("tx-race").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed.as_str());
        assert_eq!(shared.store.unread_notification_count().await.unwrap(), 1);
    }
}
