use sqlx::{FromRow, SqliteExecutor};

#[derive(Debug, Clone, FromRow)]
pub struct Organisation {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Organisation {
    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Organisation>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as("SELECT * FROM organisations WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn insert<'e, E>(executor: E, name: &str, now: &str) -> Result<Organisation, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            "INSERT INTO organisations (name, created_at, updated_at) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }
}
