//! User accounts.

use sqlx::{FromRow, SqliteExecutor};

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub organisation_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a new user row. The password must already be hashed.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub organisation_id: Option<i64>,
}

impl User {
    pub fn has_organisation(&self) -> bool {
        self.organisation_id.is_some()
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<User>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_email<'e, E>(executor: E, email: &str) -> Result<Option<User>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(executor)
            .await
    }

    pub async fn insert<'e, E>(executor: E, new: &NewUser<'_>, now: &str) -> Result<User, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            r#"
            INSERT INTO users (email, password_hash, role, organisation_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.role)
        .bind(new.organisation_id)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Assign an organisation to a user that has none yet.
    /// Returns the number of rows changed (0 if the user already had one).
    pub async fn assign_organisation<'e, E>(
        executor: E,
        id: i64,
        organisation_id: i64,
        now: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users SET organisation_id = ?, updated_at = ? WHERE id = ? AND organisation_id IS NULL",
        )
        .bind(organisation_id)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
