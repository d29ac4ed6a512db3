//! VAPID public key for browsers subscribing to push.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use nerdy_common::config::VapidStatus;
use nerdy_common::error::AppError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/push/public-key", get(public_key))
}

/// GET /api/push/public-key: The application server key for `pushManager.subscribe`.
async fn public_key(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    match state.config.vapid() {
        VapidStatus::Ready(vapid) => Ok(Json(json!({ "public_key": vapid.public_key }))),
        VapidStatus::Missing | VapidStatus::Incomplete => Err(AppError::NotFound(
            "Push notifications are not configured".to_string(),
        )),
    }
}
