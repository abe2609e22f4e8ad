//! System endpoints: activity log, dashboard, health, settings and the
//! first-run setup wizard.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{info, warn};

use super::auth::{self, CurrentUser, SETUP_TOKEN_KEY};
use super::{ApiError, ApiResponse, AppState, ConnectionTestRequest, MessageResponse};
use crate::clients::plex::Library;
use crate::clients::plex_tv::OwnedServer;
use crate::clients::{overseerr, tautulli};
use crate::config::Config;
use crate::db::SystemLog;
use crate::domain::{DashboardSummary, NotifierKind, Role};
use crate::services::system_service::{SystemHealth, SystemStatus};
use crate::services::{SettingsUpdate, SetupRequest};

const LOG_LIMIT: u64 = 500;

#[derive(Debug, Serialize)]
pub struct HealthLiveResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthReadinessChecks {
    pub database: bool,
    pub plex: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthReadyResponse {
    pub ready: bool,
    pub checks: HealthReadinessChecks,
}

#[derive(Serialize)]
pub struct SetupServers {
    pub servers: Vec<OwnedServer>,
    pub token: String,
    pub username: String,
}

#[derive(Serialize)]
pub struct SetupDone {
    pub redirect_url: String,
}

#[derive(Deserialize)]
pub struct AutoConfigureRequest {
    #[serde(default)]
    pub notifier_id: i64,
    pub notifier_type: Option<NotifierKind>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Before setup anyone may use the wizard helpers; afterwards only admins.
async fn require_setup_or_admin(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
) -> Result<bool, ApiError> {
    if !state.shared.config.read().await.app.is_configured {
        return Ok(false);
    }
    match auth::resolve_user(state, session, headers).await {
        Some(user) if user.is_admin() => Ok(true),
        _ => Err(ApiError::Forbidden("Acesso não autorizado.".to_string())),
    }
}

// ============================================================================
// Activity log
// ============================================================================

/// `GET /api/system/logs`
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<SystemLog>>>, ApiError> {
    let logs = state.shared.system_service.get_logs(LOG_LIMIT).await?;
    Ok(Json(ApiResponse::success(logs)))
}

/// `POST /api/system/logs/clear`
pub async fn clear_logs(
    State(state): State<Arc<AppState>>,
    axum::Extension(user): axum::Extension<CurrentUser>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let count = state.shared.system_service.clear_logs().await?;
    info!(username = %user.username, count, "Activity log cleared");
    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Registo de atividade limpo com sucesso.",
    ))))
}

// ============================================================================
// Dashboard and health
// ============================================================================

/// `GET /api/system/dashboard-summary`
pub async fn get_dashboard_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<DashboardSummary>>, ApiError> {
    let summary = state.shared.system_service.get_dashboard_summary().await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// `GET /api/system/system-health`
pub async fn get_system_health(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<SystemHealth>> {
    Json(ApiResponse::success(
        state.shared.system_service.get_health().await,
    ))
}

/// `GET /api/system/status`
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let status = state
        .shared
        .system_service
        .get_status(
            state.start_time.elapsed().as_secs(),
            env!("CARGO_PKG_VERSION"),
        )
        .await;
    Json(ApiResponse::success(status))
}

/// `GET /api/system/libraries`
pub async fn get_libraries(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<Library>>> {
    Json(ApiResponse::success(state.shared.plex.get_libraries().await))
}

/// `GET /api/health/live`
pub async fn health_live() -> impl IntoResponse {
    Json(ApiResponse::success(HealthLiveResponse { status: "alive" }))
}

/// `GET /api/health/ready`
///
/// Ready once the database answers. Plex is reported but optional, since a
/// fresh install has no server yet.
pub async fn health_ready(State(state): State<Arc<AppState>>) -> Response {
    let database = state.shared.store.ping().await.is_ok();
    let plex = state.shared.plex.is_connected().await;

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ApiResponse::success(HealthReadyResponse {
            ready: database,
            checks: HealthReadinessChecks { database, plex },
        })),
    )
        .into_response()
}

// ============================================================================
// Settings
// ============================================================================

/// `GET /api/system/settings`
///
/// Secrets are replaced by the mask.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Config>> {
    Json(ApiResponse::success(
        state.shared.system_service.get_settings().await,
    ))
}

/// `POST /api/system/settings`
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(new_config): Json<Config>,
) -> Result<Json<ApiResponse<SettingsUpdate>>, ApiError> {
    let update = state
        .shared
        .system_service
        .update_settings(new_config)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

// ============================================================================
// Setup wizard
// ============================================================================

/// `GET /api/system/setup/servers`
pub async fn get_setup_servers(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SetupServers>>, ApiError> {
    require_setup_or_admin(&state, &session, &headers).await?;

    let token = session
        .get::<String>(SETUP_TOKEN_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?
        .ok_or_else(|| {
            ApiError::Unauthorized(
                "Token do Plex não encontrado. Autentique-se novamente.".to_string(),
            )
        })?;

    let plex_tv = state.shared.plex.plex_tv();
    let account = plex_tv
        .account(&token)
        .await
        .map_err(|e| ApiError::plex(e.to_string()))?;
    let servers = plex_tv
        .owned_servers(&token)
        .await
        .map_err(|e| ApiError::plex(e.to_string()))?;

    if servers.is_empty() {
        warn!(username = %account.username, "No owned Plex servers found");
    }

    Ok(Json(ApiResponse::success(SetupServers {
        servers,
        token,
        username: account.username,
    })))
}

/// `POST /api/system/setup/save`
pub async fn save_setup(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(mut request): Json<SetupRequest>,
) -> Result<Json<ApiResponse<SetupDone>>, ApiError> {
    require_setup_or_admin(&state, &session, &headers).await?;

    if request.plex_token.trim().is_empty()
        && let Ok(Some(token)) = session.get::<String>(SETUP_TOKEN_KEY).await
    {
        request.plex_token = token;
    }

    state.shared.system_service.complete_setup(request).await?;

    let admin_user = state.shared.config.read().await.app.admin_user.clone();
    let user = CurrentUser {
        username: admin_user,
        email: String::new(),
        thumb: String::new(),
        role: Role::Admin,
        local: false,
    };
    auth::start_session(&session, &user).await?;
    if let Err(e) = session.remove::<String>(SETUP_TOKEN_KEY).await {
        warn!(error = %e, "Failed to drop setup token from session");
    }

    info!(admin = %user.username, "Setup completed");

    Ok(Json(ApiResponse::success(SetupDone {
        redirect_url: "/".to_string(),
    })))
}

/// `POST /api/system/test/tautulli-connection`
pub async fn test_tautulli_connection(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<ConnectionTestRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    require_setup_or_admin(&state, &session, &headers).await?;

    if payload.url.trim().is_empty() || payload.api_key.trim().is_empty() {
        return Err(ApiError::validation("URL e Chave da API são obrigatórios."));
    }

    tautulli::test_connection(&state.shared.http, payload.url.trim(), payload.api_key.trim())
        .await
        .map_err(|e| ApiError::tautulli(format!("Falha na conexão: {e}")))?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Conexão com o Tautulli bem-sucedida!",
    ))))
}

/// `POST /api/system/test/overseerr-connection`
pub async fn test_overseerr_connection(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<ConnectionTestRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    require_setup_or_admin(&state, &session, &headers).await?;

    if payload.url.trim().is_empty() || payload.api_key.trim().is_empty() {
        return Err(ApiError::validation("URL e Chave da API são obrigatórios."));
    }

    overseerr::test_connection(&state.shared.http, payload.url.trim(), payload.api_key.trim())
        .await
        .map_err(|e| ApiError::ExternalApiError {
            service: "Overseerr".to_string(),
            message: format!("Falha na conexão: {e}"),
        })?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Conexão com o Overseerr bem-sucedida!",
    ))))
}

/// `POST /api/system/tautulli/auto-configure`
///
/// Before setup the Tautulli credentials come from the request; afterwards
/// the saved ones are used.
pub async fn auto_configure_notifier(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<AutoConfigureRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let configured = require_setup_or_admin(&state, &session, &headers).await?;

    let kind = payload
        .notifier_type
        .filter(|_| payload.notifier_id > 0)
        .ok_or_else(|| ApiError::validation("ID e tipo do notificador são obrigatórios."))?;

    let (url, api_key) = if configured {
        let config = state.shared.config.read().await;
        (config.tautulli.url.clone(), config.tautulli.api_key.clone())
    } else {
        (payload.url, payload.api_key)
    };
    if url.trim().is_empty() || api_key.trim().is_empty() {
        return Err(ApiError::validation(
            "URL e Chave API do Tautulli não estão preenchidos.",
        ));
    }

    let message = state
        .shared
        .notifier_handler
        .auto_configure(url.trim(), api_key.trim(), payload.notifier_id, kind)
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}
