mod models;

pub use models::*;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

pub type DbPool = SqlitePool;

/// Format a timestamp the way every TEXT time column is stored.
///
/// Fixed width with a `Z` suffix, so `expires_at > ?` comparisons in SQL
/// order correctly as plain strings.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now() -> String {
    timestamp(Utc::now())
}

/// True when a sqlx error is a UNIQUE constraint violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(config: &DatabaseConfig) -> Result<DbPool> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    info!("Initializing database at {}", config.path.display());

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Organisations, users, team members, invitations
    let has_invitations_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='invitations'",
    )
    .fetch_optional(pool)
    .await?;
    if has_invitations_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
    }

    // Migration 002: Revoked session tokens (logout)
    let has_revoked_tokens_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='revoked_tokens'",
    )
    .fetch_optional(pool)
    .await?;
    if has_revoked_tokens_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/002_revoked_tokens.sql")).await?;
    }

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    /// A migrated database in a throwaway directory. Keep the `TempDir`
    /// alive for as long as the pool is used.
    pub async fn temp_db() -> (TempDir, DbPool) {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("test.db"),
            max_connections: 5,
            busy_timeout_secs: 10,
        };
        let pool = init(&config).await.unwrap();
        (dir, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(timestamp(at), "2026-03-04T05:06:07Z");

        let later = at + chrono::Duration::milliseconds(1500);
        assert!(timestamp(later) > timestamp(at));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_dir, pool) = testing::temp_db().await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec!["invitations", "organisations", "revoked_tokens", "team_members", "users"]
        );
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let (_dir, pool) = testing::temp_db().await;
        let result = sqlx::query("INSERT INTO team_members (organisation_id, name, email) VALUES (999, 'x', 'x@y.com')")
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }
}
