//! Subscription store: push credentials and per-subscriber lead times.
//!
//! A subscription is identified by a UUID v5 of its endpoint, so registering
//! the same browser twice updates the existing row instead of adding one.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use nerdy_common::error::AppError;
use nerdy_common::types::{NotificationTimes, PushKeys, Subscription, SubscriptionRow};

/// Store layer for subscription CRUD operations.
pub struct SubscriptionStore;

/// Parameters for registering a push subscription.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateSubscriptionParams {
    pub endpoint: String,
    pub keys: PushKeys,
    /// Lead times in minutes; defaults to `[1440, 60, 0]`
    #[serde(default)]
    pub notification_times: Option<Vec<u32>>,
}

/// Stable subscription id for an endpoint.
pub fn subscription_id(endpoint: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, endpoint.as_bytes()).to_string()
}

fn is_base64url(value: &str) -> bool {
    let unpadded = value.trim_end_matches('=');
    !unpadded.is_empty()
        && unpadded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl CreateSubscriptionParams {
    /// Check the endpoint and key material, returning the parsed lead times.
    pub fn validate(&self) -> Result<NotificationTimes, AppError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(AppError::Validation("endpoint must not be empty".to_string()));
        }
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(AppError::Validation(format!(
                "endpoint '{endpoint}' must be an http(s) URL"
            )));
        }
        if !is_base64url(&self.keys.p256dh) {
            return Err(AppError::Validation("keys.p256dh must be base64url".to_string()));
        }
        if !is_base64url(&self.keys.auth) {
            return Err(AppError::Validation("keys.auth must be base64url".to_string()));
        }

        match &self.notification_times {
            Some(minutes) => NotificationTimes::new(minutes.clone()),
            None => Ok(NotificationTimes::default()),
        }
    }
}

impl SubscriptionStore {
    /// Register a subscription, or refresh keys and lead times of an existing one.
    pub async fn create(
        pool: &SqlitePool,
        params: &CreateSubscriptionParams,
    ) -> Result<Subscription, AppError> {
        let times = params.validate()?;
        let endpoint = params.endpoint.trim();
        let id = subscription_id(endpoint);
        let now = Utc::now();

        let row: SubscriptionRow = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (id, endpoint, p256dh, auth, notification_times, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (id) DO UPDATE SET
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                notification_times = excluded.notification_times,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(endpoint)
        .bind(&params.keys.p256dh)
        .bind(&params.keys.auth)
        .bind(times.to_json())
        .bind(now)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            subscription_id = %id,
            notification_times = ?times.minutes(),
            "Subscription registered"
        );

        row.try_into()
    }

    /// Get a single subscription by id.
    pub async fn get(pool: &SqlitePool, subscription_id: &str) -> Result<Subscription, AppError> {
        let row: SubscriptionRow = sqlx::query_as("SELECT * FROM subscriptions WHERE id = ?")
            .bind(subscription_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Subscription {} not found", subscription_id))
            })?;

        row.try_into()
    }

    /// All subscriptions eligible for scanning. Rows whose stored lead times
    /// fail validation are skipped.
    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<Subscription>, AppError> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as("SELECT * FROM subscriptions ORDER BY created_at, id")
                .fetch_all(pool)
                .await?;

        let subscriptions = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match Subscription::try_from(row) {
                    Ok(sub) => Some(sub),
                    Err(e) => {
                        tracing::warn!(subscription_id = %id, error = %e, "Skipping invalid subscription");
                        None
                    }
                }
            })
            .collect();

        Ok(subscriptions)
    }

    /// Replace a subscription's lead times.
    pub async fn update_lead_times(
        pool: &SqlitePool,
        subscription_id: &str,
        times: &NotificationTimes,
    ) -> Result<Subscription, AppError> {
        let row: SubscriptionRow = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET notification_times = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(times.to_json())
        .bind(Utc::now())
        .bind(subscription_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", subscription_id)))?;

        tracing::info!(
            subscription_id = %subscription_id,
            notification_times = ?times.minutes(),
            "Lead times updated"
        );

        row.try_into()
    }

    /// Delete a subscription together with its family members and log entries.
    ///
    /// Returns true if the subscription existed. Deleting a missing id is a no-op.
    pub async fn delete(pool: &SqlitePool, subscription_id: &str) -> Result<bool, AppError> {
        let mut tx = pool.begin().await?;

        let log_rows = sqlx::query("DELETE FROM notification_log WHERE subscription_id = ?")
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let members = sqlx::query("DELETE FROM family_members WHERE subscription_id = ?")
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(subscription_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        tx.commit().await?;

        if deleted {
            tracing::info!(
                subscription_id = %subscription_id,
                family_members = members,
                log_entries = log_rows,
                "Subscription deleted"
            );
        }

        Ok(deleted)
    }
}
