//! Organisation-scoped team members.
//!
//! A team member exists before the person behind it has an account. The
//! `user_id` link is set once, when an invitation is accepted, and is never
//! moved to another user.

use sqlx::{FromRow, SqliteExecutor};

#[derive(Debug, Clone, FromRow)]
pub struct TeamMember {
    pub id: i64,
    pub organisation_id: i64,
    pub name: String,
    pub email: String,
    pub user_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl TeamMember {
    pub fn is_linked(&self) -> bool {
        self.user_id.is_some()
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<TeamMember>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM team_members WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_user_id<'e, E>(
        executor: E,
        user_id: i64,
    ) -> Result<Option<TeamMember>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM team_members WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_for_organisation<'e, E>(
        executor: E,
        organisation_id: i64,
    ) -> Result<Vec<TeamMember>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM team_members WHERE organisation_id = ? ORDER BY name ASC, id ASC")
            .bind(organisation_id)
            .fetch_all(executor)
            .await
    }

    pub async fn insert<'e, E>(
        executor: E,
        organisation_id: i64,
        name: &str,
        email: &str,
        now: &str,
    ) -> Result<TeamMember, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            r#"
            INSERT INTO team_members (organisation_id, name, email, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(organisation_id)
        .bind(name)
        .bind(email)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Link an unlinked team member to a user. Returns 0 when the member is
    /// already linked, so a link can never be overwritten.
    pub async fn link_user<'e, E>(
        executor: E,
        id: i64,
        user_id: i64,
        now: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE team_members SET user_id = ?, updated_at = ? WHERE id = ? AND user_id IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
