use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer, session_store::ExpiredDeletion};
use tower_sessions_sqlx_store::SqliteStore;

use crate::config::Config;
use crate::state::SharedState;

mod assets;
pub mod auth;
mod error;
pub mod events;
mod invites;
mod links;
mod notifications;
pub mod observability;
mod payments;
mod stats;
mod system;
mod types;
mod users;

pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

/// Builds the HTTP app. Sessions live in the panel database so logins
/// survive restarts.
pub async fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let (cors_origins, secure_cookies) = {
        let config = state.shared.config.read().await;
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
        )
    };

    let pool = state.shared.store.conn.get_sqlite_connection_pool().clone();
    let session_store = SqliteStore::new(pool);
    session_store.migrate().await?;

    tokio::spawn(
        session_store
            .clone()
            .continuously_delete_expired(tokio::time::Duration::from_secs(3600)),
    );

    let session_layer = SessionManagerLayer::new(session_store)
        .with_name("plexpanel_session")
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(7)));

    let api_router = Router::new()
        .merge(create_protected_router(state.clone()))
        .merge(public_routes())
        .fallback(api_not_found)
        .layer(session_layer);

    let cors_layer = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Ok(Router::new()
        .nest("/api", api_router)
        .route("/s/{code}", get(links::redirect_short_link))
        .with_state(state)
        .fallback(assets::serve_asset)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        )))
}

async fn api_not_found() -> ApiError {
    ApiError::NotFound("Rota não encontrada.".to_string())
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/plex/context", get(auth::plex_context))
        .route(
            "/auth/plex/check-pin/{client_id}/{pin_id}",
            get(auth::check_pin),
        )
        .route(
            "/auth/plex/check-pin-for-token/{client_id}/{pin_id}",
            get(auth::check_pin_for_token),
        )
        .route("/invites/details/{code}", get(invites::get_invite_details))
        .route("/invites/claim", post(invites::claim_invite))
        .route("/payments/webhook/efi", post(payments::efi_webhook))
        .route(
            "/payments/webhook/mercadopago",
            post(payments::mercadopago_webhook),
        )
        .route("/pay/{token}", get(payments::get_payment_link))
        .route("/pay/{token}/charge", post(payments::create_link_charge))
        .route(
            "/pay/{token}/status/{txid}",
            get(payments::get_link_status),
        )
        .route("/system/setup/servers", get(system::get_setup_servers))
        .route("/system/setup/save", post(system::save_setup))
        .route(
            "/system/test/tautulli-connection",
            post(system::test_tautulli_connection),
        )
        .route(
            "/system/test/overseerr-connection",
            post(system::test_overseerr_connection),
        )
        .route(
            "/system/tautulli/auto-configure",
            post(system::auto_configure_notifier),
        )
        .route("/health/live", get(system::health_live))
        .route("/health/ready", get(system::health_ready))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let user_routes = Router::new()
        .route("/auth/me", get(auth::get_current_user))
        .route("/users/account/details", get(users::get_account_details))
        .route("/users/account/privacy", post(users::update_privacy))
        .route("/users/account/devices", get(users::get_account_devices))
        .route("/users/payments/{username}", get(users::get_user_payments))
        .route("/payments/options", get(payments::get_options))
        .route("/payments/create-charge", post(payments::create_charge))
        .route("/payments/status/{txid}", get(payments::get_status))
        .route("/stats", get(stats::get_leaderboard))
        .route("/stats/user/{username}", get(stats::get_user_stats))
        .route("/stats/recently-added", get(stats::get_recently_added));

    Router::new()
        .merge(user_routes)
        .merge(create_admin_router())
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}

fn create_admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/account", get(auth::get_account_info))
        .route("/auth/password", put(auth::change_password))
        .route("/auth/api-key", get(auth::get_api_key))
        .route("/auth/api-key/regenerate", post(auth::regenerate_api_key))
        .route("/users/status", get(users::get_status))
        .route("/users/list", get(users::list_users))
        .route("/users/libraries/{email}", get(users::get_user_libraries))
        .route("/users/update-libraries", post(users::update_libraries))
        .route("/users/remove", post(users::remove_user))
        .route("/users/block", post(users::block_user))
        .route("/users/unblock", post(users::unblock_user))
        .route("/users/update-limit", post(users::update_limit))
        .route("/users/update-all-limits", post(users::update_all_limits))
        .route("/users/toggle-overseerr", post(users::toggle_overseerr))
        .route("/users/renew/{username}", post(users::renew_user))
        .route(
            "/users/profile/{username}",
            get(users::get_profile).post(users::update_profile),
        )
        .route("/users/notify/{username}", post(users::notify_user))
        .route("/invites/create", post(invites::create_invite))
        .route("/invites/list", get(invites::list_invites))
        .route("/invites/delete", post(invites::delete_invite))
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/clear-all", post(notifications::clear_all))
        .route(
            "/payments/financial/summary",
            get(payments::get_financial_summary),
        )
        .route(
            "/payments/financial/add-manual",
            post(payments::add_manual_payment),
        )
        .route("/system/logs", get(system::get_logs))
        .route("/system/logs/clear", post(system::clear_logs))
        .route(
            "/system/dashboard-summary",
            get(system::get_dashboard_summary),
        )
        .route("/system/system-health", get(system::get_system_health))
        .route(
            "/system/settings",
            get(system::get_settings).post(system::update_settings),
        )
        .route("/system/libraries", get(system::get_libraries))
        .route("/system/status", get(system::get_status))
        .route("/metrics", get(observability::get_metrics))
        .merge(events::router())
        .route_layer(middleware::from_fn(auth::admin_middleware))
}
