//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server,
//! against an in-memory SQLite database.

use std::collections::HashMap;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use nerdy_api::routes::create_router;
use nerdy_api::state::AppState;
use nerdy_common::config::AppConfig;
use nerdy_common::db::create_memory_pool;

// ============================================================
// Helpers
// ============================================================

const VAPID_PUBLIC: &str =
    "BCRweRf_U5iQM4pKNucGRzM6OuLp8Hisa8yX0N2ePIf1oxKitvFT6qvuGgYoTxlMatMDaytXbZR3rVClc2w_p6U";

fn test_config(vars: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

async fn app_with(config: AppConfig) -> Router {
    let pool = create_memory_pool().await.unwrap();
    create_router(AppState::new(pool, config))
}

async fn app() -> Router {
    app_with(test_config(&[])).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn subscription_body(endpoint: &str) -> Value {
    json!({
        "endpoint": endpoint,
        "keys": {
            "p256dh": VAPID_PUBLIC,
            "auth": "xS03Fi5ErfTNH_l9WHE9Ig"
        }
    })
}

async fn create_subscription(app: &Router, endpoint: &str) -> String {
    let (status, json) = send(app, "POST", "/api/subscriptions", Some(subscription_body(endpoint))).await;
    assert_eq!(status, StatusCode::CREATED);
    json["id"].as_str().unwrap().to_string()
}

// ============================================================
// Routes
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = app().await;
    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "nerdy-birthdays-api");
}

#[tokio::test]
async fn test_public_key() {
    let app = app().await;
    let (status, _) = send(&app, "GET", "/api/push/public-key", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let configured = app_with(test_config(&[
        ("VAPID_PRIVATE_KEY", "9pKJeIXAyyCj5M0QagsVvDYHlPF-cymJCbB5iHPsdEE"),
        ("VAPID_PUBLIC_KEY", VAPID_PUBLIC),
        ("VAPID_SUBJECT", "mailto:ops@example.com"),
    ]))
    .await;
    let (status, json) = send(&configured, "GET", "/api/push/public-key", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["public_key"], VAPID_PUBLIC);
}

#[tokio::test]
async fn test_subscription_lifecycle_via_api() {
    let app = app().await;

    // 1. Register, twice: same id
    let id = create_subscription(&app, "https://push.example/e1").await;
    assert_eq!(create_subscription(&app, "https://push.example/e1").await, id);

    // 2. Fetch with default lead times
    let (status, json) = send(&app, "GET", &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["notification_times"], json!([1440, 60, 0]));

    // 3. Update lead times
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/subscriptions/{id}/notification-times"),
        Some(json!({"notification_times": [0, 60]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["notification_times"], json!([60, 0]));

    // 4. Unsubscribe, twice
    let (status, _) = send(&app, "DELETE", &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", &format!("/api/subscriptions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_subscription_rejected() {
    let app = app().await;

    let (status, json) = send(&app, "POST", "/api/subscriptions", Some(subscription_body("not-a-url"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("endpoint"));

    let mut body = subscription_body("https://push.example/e1");
    body["notification_times"] = json!([]);
    let (status, _) = send(&app, "POST", "/api/subscriptions", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_update_lead_times_validation() {
    let app = app().await;
    let id = create_subscription(&app, "https://push.example/e1").await;

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/subscriptions/{id}/notification-times"),
        Some(json!({"notification_times": [50000]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/subscriptions/missing/notification-times",
        Some(json!({"notification_times": [60]})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_family_members_via_api() {
    let app = app().await;
    let id = create_subscription(&app, "https://push.example/e1").await;
    let family = format!("/api/subscriptions/{id}/family");

    let (status, ada) = send(
        &app,
        "POST",
        &family,
        Some(json!({"name": "Ada", "birth_date": "1990-12-10", "birth_time": "06:30"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ada["birth"], "1990-12-10T06:30");

    let (status, grace) = send(
        &app,
        "POST",
        &family,
        Some(json!({"name": " Grace ", "birth_date": "1985-03-01"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(grace["name"], "Grace");
    assert_eq!(grace["birth"], "1985-03-01T00:00");

    let (status, json) = send(&app, "GET", &family, None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Grace", "Ada"]);

    let (status, _) = send(&app, "DELETE", &format!("/api/family/{}", ada["id"]), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, json) = send(&app, "GET", &family, None).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_family_member_validation() {
    let app = app().await;
    let id = create_subscription(&app, "https://push.example/e1").await;
    let family = format!("/api/subscriptions/{id}/family");

    let (status, _) = send(&app, "POST", &family, Some(json!({"name": "Ada", "birth_date": "10/12/1990"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", &family, Some(json!({"name": "", "birth_date": "1990-12-10"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/subscriptions/missing/family",
        Some(json!({"name": "Ada", "birth_date": "1990-12-10"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notifications_listing() {
    let app = app().await;
    let id = create_subscription(&app, "https://push.example/e1").await;

    let (status, json) = send(&app, "GET", &format!("/api/subscriptions/{id}/notifications"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([]));

    let (status, _) = send(&app, "GET", "/api/subscriptions/missing/notifications", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
