//! Dedup ledger over `notification_log`.
//!
//! A notification is claimed by inserting its dedup key before delivery.
//! The `UNIQUE(subscription_id, person_name, milestone_at, lead_minutes)`
//! constraint makes the claim atomic: of any number of concurrent workers,
//! exactly one insert succeeds. A successful delivery finalises the row with
//! the rendered content; a dropped delivery releases it.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use nerdy_common::error::AppError;
use nerdy_common::types::{DedupKey, NotificationLogEntry};

pub struct DedupLedger;

impl DedupLedger {
    /// Reserve a dedup key. Returns false if it is already claimed or sent.
    pub async fn try_claim(
        pool: &SqlitePool,
        key: &DedupKey,
        milestone_label: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_log
                (subscription_id, person_name, milestone_at, milestone_label, lead_minutes, claimed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (subscription_id, person_name, milestone_at, lead_minutes) DO NOTHING
            "#,
        )
        .bind(&key.subscription_id)
        .bind(&key.person_name)
        .bind(key.milestone_at_text())
        .bind(milestone_label)
        .bind(i64::from(key.lead_minutes))
        .bind(Utc::now())
        .execute(pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        if !claimed {
            tracing::debug!(key = %key, "Dedup key already claimed");
        }
        Ok(claimed)
    }

    /// Whether a key has been claimed or sent.
    pub async fn exists(pool: &SqlitePool, key: &DedupKey) -> Result<bool, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM notification_log
            WHERE subscription_id = ? AND person_name = ? AND milestone_at = ? AND lead_minutes = ?
            "#,
        )
        .bind(&key.subscription_id)
        .bind(&key.person_name)
        .bind(key.milestone_at_text())
        .bind(i64::from(key.lead_minutes))
        .fetch_optional(pool)
        .await?;

        Ok(row.is_some())
    }

    /// Finalise a claimed key after delivery.
    ///
    /// Returns false if the claim no longer exists, e.g. because the
    /// subscription was deleted in the meantime.
    pub async fn record(
        pool: &SqlitePool,
        key: &DedupKey,
        title: &str,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE notification_log
            SET title = ?, body = ?, sent_at = ?
            WHERE subscription_id = ? AND person_name = ? AND milestone_at = ? AND lead_minutes = ?
            "#,
        )
        .bind(title)
        .bind(body)
        .bind(sent_at)
        .bind(&key.subscription_id)
        .bind(&key.person_name)
        .bind(key.milestone_at_text())
        .bind(i64::from(key.lead_minutes))
        .execute(pool)
        .await?
        .rows_affected()
            > 0;

        if !updated {
            tracing::warn!(key = %key, "Delivered notification had no claim to record");
        }
        Ok(updated)
    }

    /// Drop an unrecorded claim so a later scan can pick the key up again.
    pub async fn release(pool: &SqlitePool, key: &DedupKey) -> Result<bool, AppError> {
        let released = sqlx::query(
            r#"
            DELETE FROM notification_log
            WHERE subscription_id = ? AND person_name = ? AND milestone_at = ? AND lead_minutes = ?
              AND sent_at IS NULL
            "#,
        )
        .bind(&key.subscription_id)
        .bind(&key.person_name)
        .bind(key.milestone_at_text())
        .bind(i64::from(key.lead_minutes))
        .execute(pool)
        .await?
        .rows_affected()
            > 0;

        Ok(released)
    }

    /// Delivered notifications of a subscription, newest first.
    pub async fn list_for(
        pool: &SqlitePool,
        subscription_id: &str,
    ) -> Result<Vec<NotificationLogEntry>, AppError> {
        let entries: Vec<NotificationLogEntry> = sqlx::query_as(
            r#"
            SELECT * FROM notification_log
            WHERE subscription_id = ? AND sent_at IS NOT NULL
            ORDER BY sent_at DESC, id DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }
}
