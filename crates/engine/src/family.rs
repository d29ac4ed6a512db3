//! Family member store: the people whose milestones a subscriber follows.

use chrono::Utc;
use sqlx::SqlitePool;

use nerdy_common::error::AppError;
use nerdy_common::types::{BirthInstant, FamilyMember, FamilyMemberRow};

/// Longest accepted display name, in characters.
pub const MAX_NAME_CHARS: usize = 100;

pub struct FamilyMemberStore;

/// Trim and check a display name.
pub fn normalize_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

fn into_members(rows: Vec<FamilyMemberRow>) -> Result<Vec<FamilyMember>, AppError> {
    rows.into_iter().map(FamilyMember::try_from).collect()
}

impl FamilyMemberStore {
    /// Add a person to a subscription.
    pub async fn add(
        pool: &SqlitePool,
        subscription_id: &str,
        name: &str,
        birth: BirthInstant,
    ) -> Result<FamilyMember, AppError> {
        let name = normalize_name(name)?;

        // Owner check and insert are a single statement.
        let row: FamilyMemberRow = sqlx::query_as(
            r#"
            INSERT INTO family_members (subscription_id, name, birth_datetime, created_at)
            SELECT ?1, ?2, ?3, ?4
            WHERE EXISTS (SELECT 1 FROM subscriptions WHERE id = ?1)
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(&name)
        .bind(birth.to_string())
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", subscription_id)))?;

        tracing::info!(
            subscription_id = %subscription_id,
            member_id = row.id,
            "Family member added"
        );

        row.try_into()
    }

    /// Members of one subscription, ordered by birth instant.
    pub async fn list_for(
        pool: &SqlitePool,
        subscription_id: &str,
    ) -> Result<Vec<FamilyMember>, AppError> {
        let rows: Vec<FamilyMemberRow> = sqlx::query_as(
            "SELECT * FROM family_members WHERE subscription_id = ? ORDER BY birth_datetime, id",
        )
        .bind(subscription_id)
        .fetch_all(pool)
        .await?;

        into_members(rows)
    }

    /// Remove a member. Returns false if no such member existed.
    pub async fn remove(pool: &SqlitePool, member_id: i64) -> Result<bool, AppError> {
        let removed = sqlx::query("DELETE FROM family_members WHERE id = ?")
            .bind(member_id)
            .execute(pool)
            .await?
            .rows_affected()
            > 0;

        if removed {
            tracing::info!(member_id, "Family member removed");
        }

        Ok(removed)
    }

    /// Members of any subscription born within `[from, to]`, using the
    /// `birth_datetime` index.
    pub async fn list_born_between(
        pool: &SqlitePool,
        from: BirthInstant,
        to: BirthInstant,
    ) -> Result<Vec<FamilyMember>, AppError> {
        let rows: Vec<FamilyMemberRow> = sqlx::query_as(
            r#"
            SELECT * FROM family_members
            WHERE birth_datetime >= ? AND birth_datetime <= ?
            ORDER BY birth_datetime, id
            "#,
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_all(pool)
        .await?;

        into_members(rows)
    }
}
