//! Subscription routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use nerdy_common::error::AppError;
use nerdy_common::types::{NotificationLogEntry, NotificationTimes, Subscription};
use nerdy_engine::ledger::DedupLedger;
use nerdy_engine::subscription::{CreateSubscriptionParams, SubscriptionStore};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/subscriptions", post(create_subscription))
        .route(
            "/api/subscriptions/{id}",
            get(get_subscription).delete(delete_subscription),
        )
        .route(
            "/api/subscriptions/{id}/notification-times",
            put(update_notification_times),
        )
        .route("/api/subscriptions/{id}/notifications", get(list_notifications))
}

#[derive(Debug, Deserialize)]
struct UpdateNotificationTimes {
    notification_times: Vec<u32>,
}

/// POST /api/subscriptions: Register (or refresh) a push subscription.
async fn create_subscription(
    State(state): State<AppState>,
    Json(params): Json<CreateSubscriptionParams>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let subscription = SubscriptionStore::create(&state.pool, &params).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /api/subscriptions/{id}
async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = SubscriptionStore::get(&state.pool, &id).await?;
    Ok(Json(subscription))
}

/// PUT /api/subscriptions/{id}/notification-times: Replace the lead times.
async fn update_notification_times(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateNotificationTimes>,
) -> Result<Json<Subscription>, AppError> {
    let times = NotificationTimes::new(body.notification_times)?;
    let subscription = SubscriptionStore::update_lead_times(&state.pool, &id, &times).await?;
    Ok(Json(subscription))
}

/// DELETE /api/subscriptions/{id}: Unsubscribe. Succeeds for unknown ids too.
async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    SubscriptionStore::delete(&state.pool, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/subscriptions/{id}/notifications: Delivered notifications, newest first.
async fn list_notifications(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<NotificationLogEntry>>, AppError> {
    SubscriptionStore::get(&state.pool, &id).await?;
    let entries = DedupLedger::list_for(&state.pool, &id).await?;
    Ok(Json(entries))
}
