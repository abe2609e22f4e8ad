use axum::{
    Extension, Json,
    extract::{Path, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{info, warn};

use super::{ApiError, ApiResponse, AppState, MessageResponse};
use crate::clients::plex_tv::PinStatus;
use crate::domain::Role;
use crate::services::{LoginResult, UserInfo};

pub const SESSION_USER_KEY: &str = "user";

/// plex.tv token kept between the PIN login and the setup wizard.
pub const SETUP_TOKEN_KEY: &str = "plex_token";

/// The authenticated principal, stored in the session and in request extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub thumb: String,
    pub role: Role,
    /// Local password accounts can change their password and API key.
    #[serde(default)]
    pub local: bool,
}

impl CurrentUser {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn local_admin(username: String) -> Self {
        Self {
            username,
            email: String::new(),
            thumb: String::new(),
            role: Role::Admin,
            local: true,
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

#[derive(Serialize)]
pub struct PlexContext {
    pub product_name: String,
    pub client_id: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    Pending,
    AuthDenied,
    Authenticated,
}

#[derive(Serialize)]
pub struct PinCheckResponse {
    pub status: PinState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PinCheckResponse {
    const fn pending() -> Self {
        Self {
            status: PinState::Pending,
            redirect_url: None,
            token: None,
            error: None,
        }
    }

    fn denied(error: impl Into<String>) -> Self {
        Self {
            status: PinState::AuthDenied,
            redirect_url: None,
            token: None,
            error: Some(error.into()),
        }
    }

    fn redirect(url: &str) -> Self {
        Self {
            status: PinState::Authenticated,
            redirect_url: Some(url.to_string()),
            token: None,
            error: None,
        }
    }
}

const PIN_EXPIRED: &str = "O pedido de autenticação expirou ou é inválido.";

// ============================================================================
// Middleware
// ============================================================================

/// Resolves the caller from:
/// 1. the session cookie
/// 2. `X-Api-Key` header
/// 3. `Authorization: Bearer <api_key>` header
///
/// API keys belong to the local admin account.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    session: Session,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve_user(&state, &session, &headers).await {
        Some(user) => {
            tracing::Span::current().record("user_id", &user.username);
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => ApiError::Unauthorized("Não autenticado.".to_string()).into_response(),
    }
}

/// The caller behind the session or API key, if any.
pub async fn resolve_user(
    state: &AppState,
    session: &Session,
    headers: &HeaderMap,
) -> Option<CurrentUser> {
    if let Ok(Some(user)) = session.get::<CurrentUser>(SESSION_USER_KEY).await {
        return Some(user);
    }

    let key = extract_api_key(headers)?;
    match state.shared.auth_service.verify_api_key(&key).await {
        Ok(username) => username.map(CurrentUser::local_admin),
        Err(e) => {
            warn!(error = %e, "API key verification failed");
            None
        }
    }
}

/// Rejects non-admin callers. Must run inside [`auth_middleware`].
pub async fn admin_middleware(request: Request, next: Next) -> Response {
    match request.extensions().get::<CurrentUser>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(_) => ApiError::forbidden().into_response(),
        None => ApiError::Unauthorized("Não autenticado.".to_string()).into_response(),
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(api_key) = headers.get("X-Api-Key")
        && let Ok(key_str) = api_key.to_str()
    {
        return Some(key_str.to_string());
    }

    if let Some(auth_header) = headers.get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }

    None
}

pub async fn start_session(session: &Session, user: &CurrentUser) -> Result<(), ApiError> {
    session
        .cycle_id()
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    session
        .insert(SESSION_USER_KEY, user)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))
}

// ============================================================================
// Local account
// ============================================================================

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResult>>, ApiError> {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::validation("Usuário e senha são obrigatórios."));
    }

    let result = state
        .shared
        .auth_service
        .login(payload.username.trim(), &payload.password)
        .await?;

    start_session(&session, &CurrentUser::local_admin(result.username.clone())).await?;
    info!(username = %result.username, "Local login");

    Ok(Json(ApiResponse::success(result)))
}

/// POST /auth/logout
pub async fn logout(session: Session) -> Json<ApiResponse<MessageResponse>> {
    if let Err(e) = session.flush().await {
        warn!(error = %e, "Failed to flush session");
    }
    Json(ApiResponse::success(MessageResponse::new(
        "Você foi desconectado com sucesso.",
    )))
}

/// GET /auth/me
pub async fn get_current_user(
    Extension(user): Extension<CurrentUser>,
) -> Json<ApiResponse<CurrentUser>> {
    Json(ApiResponse::success(user))
}

/// GET /auth/account
pub async fn get_account_info(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let local = require_local(&user)?;
    let info = state.shared.auth_service.get_user_info(local).await?;
    Ok(Json(ApiResponse::success(info)))
}

/// PUT /auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let username = require_local(&user)?;

    state
        .shared
        .auth_service
        .change_password(username, &payload.current_password, &payload.new_password)
        .await?;

    info!(username, "Password changed");

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Senha alterada com sucesso.",
    ))))
}

/// GET /auth/api-key
pub async fn get_api_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<ApiKeyResponse>>, ApiError> {
    let username = require_local(&user)?;
    let api_key = state.shared.auth_service.get_api_key(username).await?;
    Ok(Json(ApiResponse::success(ApiKeyResponse { api_key })))
}

/// POST /auth/api-key/regenerate
pub async fn regenerate_api_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<ApiKeyResponse>>, ApiError> {
    let username = require_local(&user)?;
    let api_key = state.shared.auth_service.regenerate_api_key(username).await?;

    info!(username, "API key regenerated");

    Ok(Json(ApiResponse::success(ApiKeyResponse { api_key })))
}

/// Plex admins have no local password; these endpoints act on the seeded account.
fn require_local(user: &CurrentUser) -> Result<&str, ApiError> {
    if user.local {
        Ok(&user.username)
    } else {
        Err(ApiError::Forbidden(
            "Disponível apenas para a conta local de administrador.".to_string(),
        ))
    }
}

// ============================================================================
// Plex PIN login
// ============================================================================

/// GET /auth/plex/context
pub async fn plex_context(State(state): State<Arc<AppState>>) -> Json<ApiResponse<PlexContext>> {
    let product_name = state.shared.config().await.app.title;
    Json(ApiResponse::success(PlexContext {
        product_name,
        client_id: uuid::Uuid::new_v4().to_string(),
    }))
}

/// GET /auth/plex/check-pin/{client_id}/{pin_id}
pub async fn check_pin(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path((client_id, pin_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<PinCheckResponse>>, ApiError> {
    let plex_tv = state.shared.plex.plex_tv();

    let token = match plex_tv.pin_status(&client_id, &pin_id).await.map_err(|e| {
        warn!(pin_id, error = %e, "PIN check failed");
        ApiError::plex("Falha ao verificar autenticação.")
    })? {
        PinStatus::Pending => return Ok(Json(ApiResponse::success(PinCheckResponse::pending()))),
        PinStatus::Expired => {
            return Ok(Json(ApiResponse::success(PinCheckResponse::denied(
                PIN_EXPIRED,
            ))));
        }
        PinStatus::Authorized(token) => token,
    };

    let account = plex_tv
        .account(&token)
        .await
        .map_err(|e| ApiError::plex(format!("Falha ao obter a conta Plex: {e}")))?;
    let config = state.shared.config().await;

    if !config.app.is_configured {
        session
            .insert(SETUP_TOKEN_KEY, &token)
            .await
            .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
        info!(username = %account.username, "Plex token stored for setup");
        return Ok(Json(ApiResponse::success(PinCheckResponse::redirect(
            "/setup",
        ))));
    }

    let role = if account.username == config.app.admin_user {
        Role::Admin
    } else {
        Role::User
    };

    if role == Role::User {
        let has_access = state
            .shared
            .plex_users
            .get_all_plex_users(false)
            .await
            .is_some_and(|users| users.iter().any(|u| u.username == account.username));
        if !has_access {
            warn!(username = %account.username, "Plex login denied");
            return Ok(Json(ApiResponse::success(PinCheckResponse::denied(
                format!(
                    "Acesso negado. O usuário {} não tem acesso a este servidor.",
                    account.username
                ),
            ))));
        }
    }

    let user = CurrentUser {
        username: account.username,
        email: account.email,
        thumb: account.thumb,
        role,
        local: false,
    };
    start_session(&session, &user).await?;
    if user.is_admin() {
        // Lets the settings page re-run server discovery after re-authentication.
        session
            .insert(SETUP_TOKEN_KEY, &token)
            .await
            .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    }
    info!(username = %user.username, role = ?user.role, "Plex login");

    let redirect = if user.is_admin() { "/" } else { "/statistics" };
    Ok(Json(ApiResponse::success(PinCheckResponse::redirect(
        redirect,
    ))))
}

/// GET /auth/plex/check-pin-for-token/{client_id}/{pin_id}
pub async fn check_pin_for_token(
    State(state): State<Arc<AppState>>,
    Path((client_id, pin_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<PinCheckResponse>>, ApiError> {
    let status = state
        .shared
        .plex
        .plex_tv()
        .pin_status(&client_id, &pin_id)
        .await
        .map_err(|e| {
            warn!(pin_id, error = %e, "PIN check failed");
            ApiError::plex("Erro inesperado ao verificar o PIN.")
        })?;

    let response = match status {
        PinStatus::Pending => PinCheckResponse::pending(),
        PinStatus::Expired => PinCheckResponse::denied(PIN_EXPIRED),
        PinStatus::Authorized(token) => PinCheckResponse {
            status: PinState::Authenticated,
            redirect_url: None,
            token: Some(token),
            error: None,
        },
    };
    Ok(Json(ApiResponse::success(response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_and_header_keys_are_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);

        headers.insert("Authorization", "Bearer  abc ".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));

        headers.insert("X-Api-Key", "xyz".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn session_user_round_trips_without_optional_fields() {
        let user: CurrentUser =
            serde_json::from_str(r#"{"username":"ana","role":"user"}"#).unwrap();
        assert!(!user.is_admin());
        assert!(!user.local);
        assert!(user.email.is_empty());
    }
}
