//! Persisted scan watermark: the end of the last completed scan window.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use nerdy_common::error::AppError;

/// `scan_state` row used by the milestone scan.
pub const MILESTONE_SCAN: &str = "milestone_scan";

pub struct ScanWatermark;

impl ScanWatermark {
    /// Last stored watermark, or `None` before the first completed scan.
    pub async fn load(pool: &SqlitePool, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT last_scan_at FROM scan_state WHERE name = ?")
                .bind(name)
                .fetch_optional(pool)
                .await?;

        Ok(row.map(|(at,)| at))
    }

    pub async fn store(pool: &SqlitePool, name: &str, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scan_state (name, last_scan_at, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO UPDATE SET last_scan_at = ?2, updated_at = ?3
            "#,
        )
        .bind(name)
        .bind(at)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        tracing::debug!(name, watermark = %at, "Scan watermark stored");
        Ok(())
    }
}
