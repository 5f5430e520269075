use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::{datetime_from_db_text, DbError, DbPool};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub headline: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            headline: row.try_get("headline")?,
            avatar_url: row.try_get("avatar_url")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

pub async fn upsert_user(
    pool: &DbPool,
    id: &str,
    display_name: &str,
    headline: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<UserRow, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "INSERT INTO users (id, display_name, headline, avatar_url)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (id) DO UPDATE
             SET display_name = $2, headline = $3, avatar_url = $4
         RETURNING id, display_name, headline, avatar_url, created_at",
    )
    .bind(id)
    .bind(display_name)
    .bind(headline)
    .bind(avatar_url)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_user(pool: &DbPool, id: &str) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, display_name, headline, avatar_url, created_at
         FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_display_name(pool: &DbPool, id: &str) -> Result<Option<String>, DbError> {
    let name: Option<String> =
        sqlx::query_scalar("SELECT display_name FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn test_pool() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let pool = test_pool().await;
        upsert_user(&pool, "alice", "Alice Chen", Some("Staff Engineer"), None)
            .await
            .expect("insert");
        upsert_user(&pool, "alice", "Alice Chen", Some("Principal Engineer"), None)
            .await
            .expect("update");

        let user = get_user(&pool, "alice").await.expect("get").expect("exists");
        assert_eq!(user.headline.as_deref(), Some("Principal Engineer"));
        assert_eq!(
            get_display_name(&pool, "alice").await.unwrap().as_deref(),
            Some("Alice Chen")
        );
        assert!(get_user(&pool, "nobody").await.unwrap().is_none());
    }
}
