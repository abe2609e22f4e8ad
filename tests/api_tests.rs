use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use plexpanel::config::Config;
use serde_json::{Value, json};
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "correct-horse-battery";

/// Builds the app and returns it with the admin API key. The seeded admin
/// password is random, so it is reset to `ADMIN_PASSWORD` first.
async fn spawn_app_with(config: Config) -> (Router, String) {
    let security = config.security.clone();
    let state = plexpanel::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");
    let store = &state.shared.store;
    store
        .update_user_password("admin", ADMIN_PASSWORD, &security)
        .await
        .unwrap();
    let api_key = store.get_user_api_key("admin").await.unwrap().unwrap();
    let router = plexpanel::api::router(state)
        .await
        .expect("Failed to build router");
    (router, api_key)
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.app.base_url = "https://painel.example.com".to_string();
    config
}

async fn spawn_app() -> (Router, String) {
    spawn_app_with(test_config()).await
}

fn get(uri: &str, api_key: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Api-Key", api_key)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, api_key: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-Api-Key", api_key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_auth_endpoints() {
    let (app, key) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/status")
                .header("X-Api-Key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(get("/api/system/status", &key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_seeded_admin_has_no_shared_credentials() {
    let (app, key) = spawn_app().await;
    assert_ne!(key, "plexpanel_default_api_key_please_regenerate");

    let response = app
        .oneshot(get(
            "/api/system/status",
            "plexpanel_default_api_key_please_regenerate",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_login_sets_session() {
    let (app, _) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"username": "admin", "password": ADMIN_PASSWORD}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("plexpanel_session="));

    let body = body_json(response).await;
    assert_eq!(body["data"]["username"], "admin");
    assert_eq!(body["data"]["must_change_password"], false);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["username"], "admin");
}

#[tokio::test]
async fn test_login_rejects_bad_password() {
    let (app, _) = spawn_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"username": "admin", "password": "nope"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_endpoints_are_public() {
    let (app, _) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["ready"], true);
    assert_eq!(body["data"]["checks"]["database"], true);
    assert_eq!(body["data"]["checks"]["plex"], false);
}

#[tokio::test]
async fn test_invitation_lifecycle() {
    let (app, key) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/invites/create",
            &key,
            &json!({
                "libraries": ["Filmes", "Séries"],
                "screens": 2,
                "trial_duration_minutes": 60,
                "max_uses": 3,
                "custom_code": "AMIGOS"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["code"], "AMIGOS");
    assert_eq!(
        body["data"]["invite_url"],
        "https://painel.example.com/invite/AMIGOS"
    );

    let response = app
        .clone()
        .oneshot(get("/api/invites/list", &key))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Invitation details are public.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/invites/details/AMIGOS")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["screen_limit"], 2);
    assert_eq!(body["data"]["libraries"], json!(["Filmes", "Séries"]));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/invites/delete",
            &key,
            &json!({"code": "AMIGOS"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/invites/details/AMIGOS")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invitation_requires_libraries() {
    let (app, key) = spawn_app().await;

    let response = app
        .oneshot(post_json(
            "/api/invites/create",
            &key,
            &json!({"libraries": [], "screens": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("biblioteca"));
}

#[tokio::test]
async fn test_manual_payment_feeds_financial_summary() {
    let (app, key) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments/financial/add-manual",
            &key,
            &json!({"username": "ana", "value": 18.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/payments/financial/add-manual",
            &key,
            &json!({
                "username": "ana",
                "value": 18.0,
                "description": "Pagamento em dinheiro",
                "payment_date": today
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"]["txid"].as_str().unwrap().starts_with("manual_"));

    let response = app
        .oneshot(get("/api/payments/financial/summary", &key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["summary"]["total_revenue"], 18.0);
    assert_eq!(body["data"]["summary"]["sales_count"], 1);
}

#[tokio::test]
async fn test_webhooks_always_acknowledge() {
    let (app, _) = spawn_app().await;

    for uri in [
        "/api/payments/webhook/efi",
        "/api/payments/webhook/mercadopago",
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("not json at all"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "received");
    }
}

#[tokio::test]
async fn test_unknown_payment_link_and_short_link() {
    let (app, _) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/pay/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/s/zzzzzz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_settings_mask_secrets() {
    let mut config = test_config();
    config.plex.url = "http://plex.local:32400".to_string();
    config.plex.token = "super-secret-token".to_string();
    let (app, key) = spawn_app_with(config).await;

    let response = app
        .oneshot(get("/api/system/settings", &key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["plex"]["url"], "http://plex.local:32400");
    assert_eq!(body["data"]["plex"]["token"], "********");
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let (app, key) = spawn_app().await;

    let response = app.oneshot(get("/api/metrics", &key)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_notifications_start_empty() {
    let (app, key) = spawn_app().await;

    let response = app
        .oneshot(get("/api/notifications", &key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["unread_count"], 0);
    assert!(body["data"]["notifications"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_spa_fallback_and_api_not_found() {
    let (app, key) = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/invite/AMIGOS")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );

    let response = app
        .oneshot(get("/api/does-not-exist", &key))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
