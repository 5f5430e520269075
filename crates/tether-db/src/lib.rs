pub mod messages;
pub mod users;

use std::sync::OnceLock;

use sqlx::any::AnyPoolOptions;
use thiserror::Error;

static ACTIVE_DB_ENGINE: OnceLock<DatabaseEngine> = OnceLock::new();

pub type DbPool = sqlx::AnyPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Sqlite,
    Postgres,
}

impl DatabaseEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
}

pub fn detect_database_engine(database_url: &str) -> Result<DatabaseEngine, sqlx::Error> {
    let normalized = database_url.trim().to_ascii_lowercase();
    if normalized.starts_with("sqlite:") {
        Ok(DatabaseEngine::Sqlite)
    } else if normalized.starts_with("postgres://") || normalized.starts_with("postgresql://") {
        Ok(DatabaseEngine::Postgres)
    } else {
        Err(sqlx::Error::Configuration(
            format!("unsupported database URL scheme in '{database_url}'").into(),
        ))
    }
}

pub fn active_database_engine() -> DatabaseEngine {
    *ACTIVE_DB_ENGINE.get().unwrap_or(&DatabaseEngine::Sqlite)
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let engine = detect_database_engine(database_url)?;
    let _ = ACTIVE_DB_ENGINE.set(engine);

    // Required once before using sqlx::Any.
    sqlx::any::install_default_drivers();

    AnyPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                match engine {
                    DatabaseEngine::Sqlite => {
                        // Tune SQLite for concurrent access.
                        sqlx::query("PRAGMA journal_mode = WAL;")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA foreign_keys = ON;")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA busy_timeout = 5000;")
                            .execute(&mut *conn)
                            .await?;
                        sqlx::query("PRAGMA synchronous = NORMAL;")
                            .execute(&mut *conn)
                            .await?;
                    }
                    DatabaseEngine::Postgres => {
                        sqlx::query("SET timezone = 'UTC'").execute(&mut *conn).await?;
                        sqlx::query("SET lock_timeout = '10s'")
                            .execute(&mut *conn)
                            .await?;
                    }
                }
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    run_migrations_for_engine(pool, active_database_engine()).await
}

/// Each engine has its own migration set; the shared queries assume the
/// schemas stay column-compatible (text timestamps, integer flags).
pub async fn run_migrations_for_engine(
    pool: &DbPool,
    engine: DatabaseEngine,
) -> Result<(), sqlx::Error> {
    match engine {
        DatabaseEngine::Sqlite => sqlx::migrate!("./migrations").run(pool).await?,
        DatabaseEngine::Postgres => sqlx::migrate!("./migrations_pg").run(pool).await?,
    }
    tracing::info!("migrations: applied successfully");
    Ok(())
}

pub(crate) fn datetime_to_db_text(value: chrono::DateTime<chrono::Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn datetime_from_db_text(
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, sqlx::Error> {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(sqlx::Error::Protocol(format!(
        "invalid datetime text '{value}'"
    )))
}

pub(crate) fn bool_from_any_row(
    row: &sqlx::any::AnyRow,
    column: &str,
) -> Result<bool, sqlx::Error> {
    use sqlx::Row;
    let first_err = match row.try_get::<bool, _>(column) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if let Ok(raw) = row.try_get::<i64, _>(column) {
        return Ok(raw != 0);
    }
    if let Ok(raw) = row.try_get::<i32, _>(column) {
        return Ok(raw != 0);
    }

    Err(first_err)
}

#[cfg(test)]
mod tests {
    use super::{create_pool, detect_database_engine, run_migrations, DatabaseEngine};

    #[test]
    fn engine_detection() {
        assert_eq!(
            detect_database_engine("sqlite::memory:").unwrap(),
            DatabaseEngine::Sqlite
        );
        assert_eq!(
            detect_database_engine("postgres://localhost/tether").unwrap(),
            DatabaseEngine::Postgres
        );
        assert!(detect_database_engine("mysql://nope").is_err());
    }

    #[tokio::test]
    async fn pool_and_migrations_on_in_memory_sqlite() {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        let value: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&pool)
            .await
            .expect("query");
        assert_eq!(value, 0);
    }
}
