use sqlx::SqliteExecutor;

/// Denylist of session token ids revoked before their natural expiry
pub struct RevokedToken;

impl RevokedToken {
    pub async fn insert<'e, E>(executor: E, jti: &str, expires_at: &str) -> Result<(), sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?, ?)")
            .bind(jti)
            .bind(expires_at)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn is_revoked<'e, E>(executor: E, jti: &str) -> Result<bool, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let row: Option<(String,)> = sqlx::query_as("SELECT jti FROM revoked_tokens WHERE jti = ?")
            .bind(jti)
            .fetch_optional(executor)
            .await?;
        Ok(row.is_some())
    }

    /// Drop entries whose token would be rejected as expired anyway
    pub async fn purge_expired<'e, E>(executor: E, now: &str) -> Result<u64, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
