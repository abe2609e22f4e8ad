//! `SeaORM` implementation of the `SystemService` trait.

use async_trait::async_trait;
use chrono::{Datelike, Local};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use super::payment_service::PaymentService;
use super::plex_connection::{PlexConnection, ServiceStatus};
use super::plex_users::PlexUserManager;
use super::scheduler::Scheduler;
use super::system_service::{
    SettingsUpdate, SetupRequest, SystemError, SystemHealth, SystemService, SystemStatus,
};
use crate::clients::tautulli;
use crate::config::Config;
use crate::db::{Store, SystemLog};
use crate::domain::DashboardSummary;
use crate::domain::events::PanelEvent;

/// Renewal window counted by the dashboard.
const DASHBOARD_RENEWAL_DAYS: i64 = 7;

/// Copies the wizard values into `config`.
pub fn apply_setup(config: &mut Config, request: SetupRequest) {
    config.plex.url = request.plex_url;
    config.plex.token = request.plex_token;
    config.app.admin_user = request.admin_user;
    if let Some(title) = request.app_title.filter(|t| !t.trim().is_empty()) {
        config.app.title = title;
    }
    if let Some(base_url) = request.app_base_url {
        config.app.base_url = base_url;
    }
    config.tautulli.url = request.tautulli_url;
    config.tautulli.api_key = request.tautulli_api_key;
    config.tautulli.blocking_notifier_id = request.blocking_notifier_id;
    config.tautulli.screen_limit_notifier_id = request.screen_limit_notifier_id;
    config.tautulli.trial_block_notifier_id = request.trial_block_notifier_id;
    if let Some(days) = request.days_to_notify_expiration {
        config.scheduler.days_to_notify_expiration = days;
    }
    if let Some(days) = request.days_to_remove_blocked_user {
        config.scheduler.days_to_remove_blocked_user = days;
    }
    config.overseerr.enabled = request.overseerr_enabled;
    config.overseerr.url = request.overseerr_url;
    config.overseerr.api_key = request.overseerr_api_key;
}

pub struct SeaOrmSystemService {
    config: Arc<RwLock<Config>>,
    store: Store,
    http: Client,
    connection: Arc<PlexConnection>,
    plex_users: Arc<PlexUserManager>,
    scheduler: Arc<Scheduler>,
    payments: Arc<dyn PaymentService>,
    event_bus: broadcast::Sender<PanelEvent>,
}

impl SeaOrmSystemService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RwLock<Config>>,
        store: Store,
        http: Client,
        connection: Arc<PlexConnection>,
        plex_users: Arc<PlexUserManager>,
        scheduler: Arc<Scheduler>,
        payments: Arc<dyn PaymentService>,
        event_bus: broadcast::Sender<PanelEvent>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            connection,
            plex_users,
            scheduler,
            payments,
            event_bus,
        }
    }

    async fn tautulli_status(&self) -> ServiceStatus {
        let (url, api_key) = {
            let config = self.config.read().await;
            if !config.tautulli.is_configured() {
                return ServiceStatus::offline("Não configurado.");
            }
            (config.tautulli.url.clone(), config.tautulli.api_key.clone())
        };
        match tautulli::test_connection(&self.http, &url, &api_key).await {
            Ok(()) => ServiceStatus::online("Conectado com sucesso."),
            Err(e) => ServiceStatus::offline(e.to_string()),
        }
    }

    /// Reloads whatever depends on the settings.
    async fn apply(&self, config: &Config) -> (bool, String) {
        if let Err(e) = self.scheduler.configure_daily(&config.scheduler).await {
            warn!(error = %e, "Failed to reschedule daily jobs");
        }
        self.payments.reload_credentials().await;
        let result = self.connection.reload(&config.plex).await;
        self.plex_users.invalidate_user_cache().await;
        result
    }
}

#[async_trait]
impl SystemService for SeaOrmSystemService {
    async fn get_status(&self, uptime_secs: u64, version: &str) -> SystemStatus {
        SystemStatus {
            version: version.to_string(),
            uptime: uptime_secs,
            database_ok: self.store.ping().await.is_ok(),
            plex_connected: self.connection.is_connected().await,
            scheduler_running: self.scheduler.is_running(),
            pending_jobs: self.scheduler.pending_jobs().await,
        }
    }

    async fn get_dashboard_summary(&self) -> Result<DashboardSummary, SystemError> {
        let active_streams = self.connection.get_active_sessions().await.stream_count;
        let total_users = self
            .plex_users
            .get_all_plex_users(false)
            .await
            .map_or(0, |users| users.len());
        let blocked_users = self.store.get_blocked_users().await?.len();

        let now = Local::now();
        let financial = self
            .store
            .get_financial_summary(now.year(), now.month(), DASHBOARD_RENEWAL_DAYS)
            .await?;

        Ok(DashboardSummary {
            active_streams,
            total_users,
            active_users: total_users.saturating_sub(blocked_users),
            blocked_users,
            monthly_revenue: financial.total_revenue,
            upcoming_renewals: financial.upcoming_expirations.len(),
            daily_revenue: financial.daily_revenue,
        })
    }

    async fn get_health(&self) -> SystemHealth {
        let (plex, tautulli, providers) = tokio::join!(
            self.connection.check_status(),
            self.tautulli_status(),
            self.payments.provider_health()
        );
        let scheduler = if self.scheduler.is_running() {
            ServiceStatus {
                status: "RUNNING",
                message: "Agendador em execução.".to_string(),
            }
        } else {
            ServiceStatus {
                status: "STOPPED",
                message: "Agendador parado.".to_string(),
            }
        };

        SystemHealth {
            plex,
            tautulli,
            efi: providers.efi,
            mercado_pago: providers.mercado_pago,
            scheduler,
        }
    }

    async fn get_settings(&self) -> Config {
        self.config.read().await.masked()
    }

    async fn update_settings(&self, mut new_config: Config) -> Result<SettingsUpdate, SystemError> {
        let snapshot = {
            let mut config = self.config.write().await;
            new_config.restore_masked_secrets(&config);
            new_config.source_path.clone_from(&config.source_path);
            new_config.app.is_configured = config.app.is_configured;
            new_config
                .validate()
                .map_err(|e| SystemError::Validation(e.to_string()))?;

            let restart_needed = new_config.server.port != config.server.port;
            new_config.save()?;
            *config = new_config;
            (config.clone(), restart_needed)
        };
        let (config, restart_needed) = snapshot;

        let (success, mut message) = self.apply(&config).await;
        if restart_needed {
            message.push_str(" As alterações de porta requerem um reinício da aplicação para terem efeito.");
        }

        info!(plex_connected = success, "Settings updated");
        let _ = self.event_bus.send(PanelEvent::SettingsUpdated);
        Ok(SettingsUpdate { success, message })
    }

    async fn complete_setup(&self, request: SetupRequest) -> Result<(), SystemError> {
        if request.plex_url.trim().is_empty() || request.plex_token.trim().is_empty() {
            return Err(SystemError::Validation(
                "URL e Token do Plex são obrigatórios.".to_string(),
            ));
        }

        let config = {
            let mut config = self.config.write().await;
            apply_setup(&mut config, request);
            config.app.is_configured = true;
            config.save()?;
            config.clone()
        };

        let (success, message) = self.apply(&config).await;
        if success {
            info!(admin = %config.app.admin_user, "Initial setup completed");
            return Ok(());
        }

        {
            let mut config = self.config.write().await;
            config.app.is_configured = false;
            config.save()?;
        }
        Err(SystemError::Connection(format!(
            "Configuração salva, mas falha ao conectar: {message}"
        )))
    }

    async fn get_logs(&self, limit: u64) -> Result<Vec<SystemLog>, SystemError> {
        Ok(self.store.get_recent_logs(limit).await?)
    }

    async fn clear_logs(&self) -> Result<u64, SystemError> {
        let removed = self.store.clear_logs().await?;
        info!(removed, "Activity log cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_fills_connection_details_and_keeps_defaults() {
        let mut config = Config::default();
        apply_setup(
            &mut config,
            SetupRequest {
                plex_url: "http://plex:32400".to_string(),
                plex_token: "tok".to_string(),
                admin_user: "dono".to_string(),
                app_title: Some("  ".to_string()),
                screen_limit_notifier_id: 4,
                days_to_notify_expiration: Some(5),
                ..Default::default()
            },
        );

        assert_eq!(config.plex.url, "http://plex:32400");
        assert_eq!(config.app.admin_user, "dono");
        assert_eq!(config.app.title, "Painel Plex");
        assert_eq!(config.tautulli.screen_limit_notifier_id, 4);
        assert_eq!(config.scheduler.days_to_notify_expiration, 5);
        assert_eq!(config.scheduler.days_to_remove_blocked_user, 0);
    }
}
