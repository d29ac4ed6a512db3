//! Family member routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;

use nerdy_common::error::AppError;
use nerdy_common::types::{BirthInstant, FamilyMember};
use nerdy_engine::family::FamilyMemberStore;
use nerdy_engine::subscription::SubscriptionStore;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/subscriptions/{id}/family",
            get(list_family).post(add_family_member),
        )
        .route("/api/family/{id}", delete(remove_family_member))
}

#[derive(Debug, Deserialize)]
struct AddFamilyMember {
    name: String,
    /// `YYYY-MM-DD`
    birth_date: String,
    /// Optional `HH:MM`, midnight when absent
    #[serde(default)]
    birth_time: Option<String>,
}

/// POST /api/subscriptions/{id}/family
async fn add_family_member(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    Json(body): Json<AddFamilyMember>,
) -> Result<(StatusCode, Json<FamilyMember>), AppError> {
    let birth = BirthInstant::from_parts(&body.birth_date, body.birth_time.as_deref())?;
    let member = FamilyMemberStore::add(&state.pool, &subscription_id, &body.name, birth).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

/// GET /api/subscriptions/{id}/family: Members ordered by birth.
async fn list_family(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Json<Vec<FamilyMember>>, AppError> {
    SubscriptionStore::get(&state.pool, &subscription_id).await?;
    let members = FamilyMemberStore::list_for(&state.pool, &subscription_id).await?;
    Ok(Json(members))
}

/// DELETE /api/family/{id}
async fn remove_family_member(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    FamilyMemberStore::remove(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
