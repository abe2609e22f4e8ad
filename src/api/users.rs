use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

use super::auth::CurrentUser;
use super::{ApiError, ApiResponse, AppState, EmailRequest, MessageResponse};
use crate::clients::plex::Library;
use crate::db::{PixPayment, UserProfile};
use crate::domain::time::{days_until, format_date_br, format_date_long_pt, parse_timestamp};
use crate::domain::{BlockAction, BlockReason, RenewalBase};
use crate::services::notifier_handler::ScreenLimitTarget;
use crate::services::stats_service::{Device, UserWatchDetails};
use crate::services::{PlexUser, RenewalRequest, Viewer};

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
pub struct UserStatus {
    pub username: String,
    pub email: String,
    pub thumb: String,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub screen_limit: i32,
    pub expiration_date: Option<String>,
    pub trial_end_date: Option<String>,
}

#[derive(Serialize)]
pub struct UsersStatus {
    pub users: Vec<UserStatus>,
    pub libraries: Vec<Library>,
}

#[derive(Serialize)]
pub struct UserListEntry {
    pub username: String,
    pub email: String,
}

#[derive(Deserialize)]
pub struct UpdateLibrariesRequest {
    pub email: String,
    #[serde(default)]
    pub libraries: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateLimitRequest {
    pub email: String,
    #[serde(default)]
    pub screens: i32,
}

#[derive(Deserialize)]
pub struct UpdateAllLimitsRequest {
    pub screens: i32,
}

#[derive(Deserialize)]
pub struct ToggleOverseerrRequest {
    pub email: String,
    #[serde(default)]
    pub access: bool,
}

#[derive(Deserialize)]
pub struct RenewRequest {
    #[serde(default = "default_months")]
    pub months: i64,
    #[serde(default)]
    pub base: RenewalBase,
    pub base_date: Option<String>,
    pub expiration_time: Option<String>,
}

const fn default_months() -> i64 {
    1
}

/// Editable profile fields. Absent fields keep their stored value.
#[derive(Deserialize, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub telegram_user: Option<String>,
    pub phone_number: Option<String>,
    pub discord_user_id: Option<String>,
    pub screen_limit: Option<i32>,
    pub allow_downloads: Option<bool>,
    pub overseerr_access: Option<bool>,
    pub hide_from_leaderboard: Option<bool>,
    /// `YYYY-MM-DDTHH:MM` in server time; empty clears the expiry.
    pub expiration_datetime_local: Option<String>,
}

#[derive(Deserialize)]
pub struct PrivacyRequest {
    pub hide: bool,
}

#[derive(Serialize)]
pub struct ExpirationInfo {
    pub date: Option<String>,
    pub days_left: Option<i64>,
    /// `active`, `expiring` or `expired`
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct AccountDetails {
    pub username: String,
    pub email: String,
    pub thumb: String,
    pub join_date: String,
    pub screen_limit: String,
    pub libraries: Vec<String>,
    pub watch_stats: Option<UserWatchDetails>,
    pub expiration_info: ExpirationInfo,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub trial_end_date: Option<String>,
    pub hide_from_leaderboard: bool,
}

/// Finds a Plex user with access to the server by username or email.
pub async fn lookup_user(state: &AppState, identifier: &str) -> Result<PlexUser, ApiError> {
    if identifier.trim().is_empty() {
        return Err(ApiError::validation("Email ou username não fornecido."));
    }

    let users = state
        .shared
        .plex_users
        .get_all_plex_users(false)
        .await
        .ok_or_else(|| {
            ApiError::ServiceUnavailable(
                "Não foi possível conectar ao servidor Plex para encontrar o utilizador."
                    .to_string(),
            )
        })?;

    users
        .into_iter()
        .find(|u| u.matches(identifier))
        .ok_or_else(|| ApiError::NotFound("Usuário não encontrado.".to_string()))
}

async fn all_users(state: &AppState, force: bool) -> Result<Vec<PlexUser>, ApiError> {
    state
        .shared
        .plex_users
        .get_all_plex_users(force)
        .await
        .ok_or_else(|| ApiError::ServiceUnavailable("Plex não configurado.".to_string()))
}

fn expiration_info(profile: &UserProfile, days_to_notify: i64) -> ExpirationInfo {
    let Some(expires_at) = profile.expiration_date.as_deref().and_then(parse_timestamp) else {
        return ExpirationInfo {
            date: None,
            days_left: None,
            status: "active",
        };
    };

    let date = Some(format_date_long_pt(expires_at.date_naive()));
    if expires_at < Local::now() {
        return ExpirationInfo {
            date,
            days_left: None,
            status: "expired",
        };
    }

    let days_left = days_until(&expires_at);
    ExpirationInfo {
        date,
        days_left: Some(days_left),
        status: if days_left < days_to_notify {
            "expiring"
        } else {
            "active"
        },
    }
}

fn screen_limit_label(screens: i32) -> String {
    if screens > 0 {
        format!("{screens} Tela(s)")
    } else {
        "Ilimitado".to_string()
    }
}

fn parse_renewal(payload: &RenewRequest) -> Result<RenewalRequest, ApiError> {
    let months = u32::try_from(payload.months)
        .ok()
        .filter(|m| *m > 0)
        .ok_or_else(|| ApiError::validation("Número de meses inválido."))?;

    let base_date = payload
        .base_date
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d"))
        .transpose()
        .map_err(|_| ApiError::validation("Data base inválida."))?;

    let expiration_time = payload
        .expiration_time
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
        .transpose()
        .map_err(|_| ApiError::validation("Hora de vencimento inválida."))?;

    Ok(RenewalRequest {
        months,
        base: payload.base,
        base_date,
        expiration_time,
    })
}

fn apply_profile_update(profile: &mut UserProfile, update: ProfileUpdate) {
    if let Some(name) = update.name {
        profile.name = Some(name).filter(|s| !s.is_empty());
    }
    if let Some(telegram_user) = update.telegram_user {
        profile.telegram_user = Some(telegram_user).filter(|s| !s.is_empty());
    }
    if let Some(phone_number) = update.phone_number {
        profile.phone_number = Some(phone_number).filter(|s| !s.is_empty());
    }
    if let Some(discord_user_id) = update.discord_user_id {
        profile.discord_user_id = Some(discord_user_id).filter(|s| !s.is_empty());
    }
    if let Some(screen_limit) = update.screen_limit {
        profile.screen_limit = screen_limit;
    }
    if let Some(allow_downloads) = update.allow_downloads {
        profile.allow_downloads = allow_downloads;
    }
    if let Some(overseerr_access) = update.overseerr_access {
        profile.overseerr_access = overseerr_access;
    }
    if let Some(hide) = update.hide_from_leaderboard {
        profile.hide_from_leaderboard = hide;
    }
}

// ============================================================================
// Admin
// ============================================================================

/// GET /users/status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ApiResponse<UsersStatus>>, ApiError> {
    if !state.shared.plex.is_connected().await {
        return Err(ApiError::ServiceUnavailable(
            "Plex não configurado.".to_string(),
        ));
    }

    let users = all_users(&state, query.force).await?;
    let blocked: HashMap<String, String> = state
        .shared
        .store
        .get_blocked_users()
        .await?
        .into_iter()
        .map(|b| (b.username, b.block_reason))
        .collect();
    let mut profiles: HashMap<String, UserProfile> = state
        .shared
        .store
        .get_all_user_profiles()
        .await?
        .into_iter()
        .map(|p| (p.username.clone(), p))
        .collect();

    let mut users: Vec<UserStatus> = users
        .into_iter()
        .map(|u| {
            let profile = profiles.remove(&u.username).unwrap_or_default();
            let block_reason = blocked.get(&u.username).cloned();
            UserStatus {
                is_blocked: block_reason.is_some(),
                block_reason,
                screen_limit: profile.screen_limit,
                expiration_date: profile.expiration_date,
                trial_end_date: profile.trial_end_date,
                username: u.username,
                email: u.email,
                thumb: u.thumb,
            }
        })
        .collect();
    users.sort_by_key(|u| u.username.to_lowercase());

    let libraries = state.shared.plex.get_libraries().await;

    Ok(Json(ApiResponse::success(UsersStatus { users, libraries })))
}

/// GET /users/list
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<UserListEntry>>>, ApiError> {
    let mut users: Vec<UserListEntry> = all_users(&state, false)
        .await?
        .into_iter()
        .map(|u| UserListEntry {
            username: u.username,
            email: u.email,
        })
        .collect();
    users.sort_by_key(|u| u.username.to_lowercase());
    Ok(Json(ApiResponse::success(users)))
}

/// GET /users/libraries/{email}
pub async fn get_user_libraries(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    let user = lookup_user(&state, &email).await?;
    let libraries = state.shared.plex_users.get_user_libraries(&user.email).await?;
    Ok(Json(ApiResponse::success(libraries)))
}

/// POST /users/update-libraries
pub async fn update_libraries(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateLibrariesRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &payload.email).await?;
    let message = state
        .shared
        .plex_users
        .update_user_libraries(&user.email, &payload.libraries)
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/remove
pub async fn remove_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &payload.email).await?;
    let message = state.shared.plex_users.remove_user(&user.email).await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/block
pub async fn block_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &payload.email).await?;
    let message = state
        .shared
        .notifier_handler
        .manage_block_unblock(
            &user.email,
            &user.username,
            BlockAction::Add,
            None,
            Some(BlockReason::Manual),
        )
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/unblock
pub async fn unblock_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &payload.email).await?;
    let message = state
        .shared
        .notifier_handler
        .manage_block_unblock(&user.email, &user.username, BlockAction::Remove, None, None)
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/update-limit
pub async fn update_limit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateLimitRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &payload.email).await?;
    let message = state
        .shared
        .notifier_handler
        .update_screen_limit(&user.email, &user.username, payload.screens)
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/update-all-limits
pub async fn update_all_limits(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<UpdateAllLimitsRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.screens < 0 {
        return Err(ApiError::validation("Número de telas inválido."));
    }

    let targets: Vec<ScreenLimitTarget> = all_users(&state, false)
        .await?
        .into_iter()
        .map(|u| ScreenLimitTarget {
            username: u.username,
            email: u.email,
        })
        .collect();
    let message = state
        .shared
        .notifier_handler
        .update_all_users_screen_limit(&targets, payload.screens)
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/toggle-overseerr
pub async fn toggle_overseerr(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ToggleOverseerrRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &payload.email).await?;
    let message = state
        .shared
        .plex_users
        .toggle_overseerr_access(&user.email, &user.username, payload.access)
        .await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(message))))
}

/// POST /users/renew/{username}
pub async fn renew_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(payload): Json<RenewRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let request = parse_renewal(&payload)?;
    let months = request.months;
    let user = lookup_user(&state, &username).await?;
    let username = user.username.as_str();

    let new_date = state
        .shared
        .subscription_service
        .renew_subscription(username, request)
        .await?;

    let profile = state.shared.store.get_user_profile(username).await?;
    let monthly_price = state
        .shared
        .config
        .read()
        .await
        .payments
        .monthly_price(profile.screen_limit);
    let total = monthly_price * f64::from(months);

    let recorded = state
        .shared
        .store
        .add_manual_payment(
            username,
            total,
            &format!("Renovação Admin (+{months} mês/meses)"),
            Local::now(),
        )
        .await;
    match recorded {
        Ok(_) => {
            info!(username, value = total, "Manual renewal recorded");
            if let Err(e) = state
                .shared
                .store
                .create_notification(
                    &format!("Renovação manual para {username} por {months} mês(es) registada."),
                    "info",
                    Some("/users".to_string()),
                )
                .await
            {
                error!(username, error = %e, "Failed to create renewal notification");
            }
        }
        Err(e) => error!(username, error = %e, "Failed to record manual renewal"),
    }

    state
        .shared
        .notifier
        .send_renewal(&user, &profile, &new_date)
        .await;

    Ok(Json(ApiResponse::success(MessageResponse::new(format!(
        "Subscrição renovada com sucesso. Novo vencimento em {}.",
        format_date_br(&new_date)
    )))))
}

/// GET /users/profile/{username}
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let profile = state.shared.store.get_user_profile(&username).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// POST /users/profile/{username}
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(mut payload): Json<ProfileUpdate>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let expires_at = match payload
        .expiration_datetime_local
        .take()
        .filter(|s| !s.trim().is_empty())
    {
        Some(raw) => Some(
            parse_timestamp(&raw)
                .ok_or_else(|| ApiError::validation("Formato de data ou hora inválido."))?,
        ),
        None => None,
    };

    let mut profile = state.shared.store.get_user_profile(&username).await?;
    apply_profile_update(&mut profile, payload);
    state.shared.store.set_user_profile(profile).await?;

    state
        .shared
        .subscription_service
        .set_expiration(&username, expires_at)
        .await?;

    info!(username, "Profile updated");

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Perfil do utilizador atualizado com sucesso.",
    ))))
}

/// POST /users/notify/{username}
pub async fn notify_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = lookup_user(&state, &username).await?;
    let profile = state.shared.store.get_user_profile(&user.username).await?;

    let expires_at = profile
        .expiration_date
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or_else(|| {
            ApiError::validation("Este utilizador não tem uma data de vencimento definida.")
        })?;
    let days_left = days_until(&expires_at);
    if days_left < 0 {
        return Err(ApiError::validation(
            "A data de vencimento deste utilizador já passou.",
        ));
    }

    state
        .shared
        .notifier
        .send_expiration(&user, &profile, days_left)
        .await;

    Ok(Json(ApiResponse::success(MessageResponse::new(format!(
        "Notificação de vencimento enviada para {}.",
        user.username
    )))))
}

/// GET /users/payments/{username}
pub async fn get_user_payments(
    State(state): State<Arc<AppState>>,
    Extension(viewer): Extension<CurrentUser>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<Vec<PixPayment>>>, ApiError> {
    if !viewer.is_admin() && viewer.username != username {
        return Err(ApiError::Forbidden("Acesso não autorizado.".to_string()));
    }
    let payments = state.shared.store.get_payments_by_user(&username).await?;
    Ok(Json(ApiResponse::success(payments)))
}

// ============================================================================
// Own account
// ============================================================================

/// GET /users/account/details
pub async fn get_account_details(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<AccountDetails>>, ApiError> {
    let store = &state.shared.store;
    let days_to_notify = state
        .shared
        .config
        .read()
        .await
        .scheduler
        .days_to_notify_expiration;

    let profile = store.get_user_profile(&user.username).await?;
    let blocked = store.get_blocked_user(&user.username).await?;

    let join_date = store
        .get_user_claim_date(&user.username)
        .await?
        .as_deref()
        .and_then(parse_timestamp)
        .map_or_else(
            || "Não disponível".to_string(),
            |dt| format_date_long_pt(dt.date_naive()),
        );

    let libraries = match state.shared.plex_users.get_user_libraries(&user.email).await {
        Ok(libraries) => libraries,
        Err(e) => {
            error!(username = %user.username, error = %e, "Failed to load account libraries");
            Vec::new()
        }
    };

    let viewer = Viewer {
        username: user.username.clone(),
        is_admin: user.is_admin(),
    };
    let watch_stats = match state
        .shared
        .stats_service
        .get_user_watch_details(&user.username, 365, &viewer)
        .await
    {
        Ok(details) => Some(details),
        Err(e) => {
            error!(username = %user.username, error = %e, "Failed to load account watch stats");
            None
        }
    };

    Ok(Json(ApiResponse::success(AccountDetails {
        expiration_info: expiration_info(&profile, days_to_notify),
        screen_limit: screen_limit_label(profile.screen_limit),
        is_blocked: blocked.is_some(),
        block_reason: blocked.map(|b| b.block_reason),
        trial_end_date: profile.trial_end_date,
        hide_from_leaderboard: profile.hide_from_leaderboard,
        join_date,
        libraries,
        watch_stats,
        username: user.username,
        email: user.email,
        thumb: user.thumb,
    })))
}

/// POST /users/account/privacy
pub async fn update_privacy(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(payload): Json<PrivacyRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let mut profile = state.shared.store.get_user_profile(&user.username).await?;
    profile.hide_from_leaderboard = payload.hide;
    state.shared.store.set_user_profile(profile).await?;

    info!(
        username = %user.username,
        hidden = payload.hide,
        "Leaderboard privacy updated"
    );

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Configuração de privacidade atualizada com sucesso.",
    ))))
}

/// GET /users/account/devices
pub async fn get_account_devices(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<Device>>>, ApiError> {
    let devices = state
        .shared
        .stats_service
        .get_user_devices(&user.username)
        .await?;
    Ok(Json(ApiResponse::success(devices)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn renewal_payload_is_validated() {
        let mut payload = RenewRequest {
            months: 0,
            base: RenewalBase::Today,
            base_date: None,
            expiration_time: None,
        };
        assert!(parse_renewal(&payload).is_err());

        payload.months = 2;
        payload.base_date = Some("2025-02-30".to_string());
        assert!(parse_renewal(&payload).is_err());

        payload.base_date = Some("2025-02-28".to_string());
        payload.expiration_time = Some("23:30".to_string());
        let request = parse_renewal(&payload).unwrap();
        assert_eq!(request.months, 2);
        assert_eq!(request.base_date, NaiveDate::from_ymd_opt(2025, 2, 28));
        assert_eq!(request.expiration_time, NaiveTime::from_hms_opt(23, 30, 0));
    }

    #[test]
    fn expiration_status_follows_notification_window() {
        let mut profile = UserProfile::default();
        assert_eq!(expiration_info(&profile, 7).status, "active");

        profile.expiration_date = Some((Local::now() + Duration::days(3)).to_rfc3339());
        let info = expiration_info(&profile, 7);
        assert_eq!(info.status, "expiring");
        assert_eq!(info.days_left, Some(3));

        profile.expiration_date = Some((Local::now() + Duration::days(30)).to_rfc3339());
        assert_eq!(expiration_info(&profile, 7).status, "active");

        profile.expiration_date = Some((Local::now() - Duration::hours(1)).to_rfc3339());
        assert_eq!(expiration_info(&profile, 7).status, "expired");
    }

    #[test]
    fn empty_strings_clear_optional_contact_fields() {
        let mut profile = UserProfile {
            telegram_user: Some("123".to_string()),
            screen_limit: 2,
            ..UserProfile::default()
        };
        apply_profile_update(
            &mut profile,
            ProfileUpdate {
                telegram_user: Some(String::new()),
                phone_number: Some("5511999999999".to_string()),
                ..ProfileUpdate::default()
            },
        );
        assert_eq!(profile.telegram_user, None);
        assert_eq!(profile.phone_number.as_deref(), Some("5511999999999"));
        assert_eq!(profile.screen_limit, 2);
    }
}
