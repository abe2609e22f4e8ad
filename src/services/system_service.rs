//! Domain service for panel-wide operations: status, health, settings and setup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::plex_connection::ServiceStatus;
use crate::config::Config;
use crate::db::SystemLog;
use crate::domain::DashboardSummary;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for SystemError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for SystemError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime: u64,
    pub database_ok: bool,
    pub plex_connected: bool,
    pub scheduler_running: bool,
    pub pending_jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub plex: ServiceStatus,
    pub tautulli: ServiceStatus,
    pub efi: ServiceStatus,
    pub mercado_pago: ServiceStatus,
    pub scheduler: ServiceStatus,
}

/// Outcome of applying new settings.
#[derive(Debug, Clone, Serialize)]
pub struct SettingsUpdate {
    pub success: bool,
    pub message: String,
}

/// Values collected by the first-run wizard.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetupRequest {
    pub plex_url: String,
    pub plex_token: String,
    pub admin_user: String,
    pub app_title: Option<String>,
    pub app_base_url: Option<String>,
    pub tautulli_url: String,
    pub tautulli_api_key: String,
    pub blocking_notifier_id: i64,
    pub screen_limit_notifier_id: i64,
    pub trial_block_notifier_id: i64,
    pub days_to_notify_expiration: Option<i64>,
    pub days_to_remove_blocked_user: Option<i64>,
    pub overseerr_enabled: bool,
    pub overseerr_url: String,
    pub overseerr_api_key: String,
}

#[async_trait::async_trait]
pub trait SystemService: Send + Sync {
    async fn get_status(&self, uptime_secs: u64, version: &str) -> SystemStatus;

    async fn get_dashboard_summary(&self) -> Result<DashboardSummary, SystemError>;

    async fn get_health(&self) -> SystemHealth;

    /// Current settings with secrets masked.
    async fn get_settings(&self) -> Config;

    /// Validates, saves and applies new settings.
    ///
    /// Masked secrets keep their stored value. The Plex connection, the daily
    /// job times and the payment clients are reloaded.
    async fn update_settings(&self, new_config: Config) -> Result<SettingsUpdate, SystemError>;

    /// Applies the first-run wizard and marks the panel configured.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Connection`] when Plex cannot be reached; the
    /// values are kept but the panel stays unconfigured.
    async fn complete_setup(&self, request: SetupRequest) -> Result<(), SystemError>;

    async fn get_logs(&self, limit: u64) -> Result<Vec<SystemLog>, SystemError>;

    async fn clear_logs(&self) -> Result<u64, SystemError>;
}
