use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};
use std::future::Future;
use std::str::FromStr;
use tokio::time::{sleep, Duration};
use tracing::{error, info, instrument, warn};

use crate::TARGET_DB;

const MAX_LOCK_RETRIES: u32 = 5;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Get access to the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

// Helper method to check if an sqlx error is a database lock error
pub trait DbLockErrorExt {
    fn is_database_lock_error(&self) -> bool;
}

impl DbLockErrorExt for sqlx::Error {
    fn is_database_lock_error(&self) -> bool {
        match self {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6)
            sqlx::Error::Database(err) => {
                err.code().is_some_and(|c| c == "5" || c == "6")
                    || err.message().contains("database is locked")
            }
            _ => false,
        }
    }
}

impl Database {
    /// Opens (creating if missing) the SQLite file at `database_path`.
    #[instrument(target = "db", level = "info")]
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!(target: TARGET_DB, "Creating database pool for: {}", database_path);

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        info!(target: TARGET_DB, "Database pool created");

        let db = Database { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection is kept open for the
    /// lifetime of the pool so every query sees the same data.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        let db = Database { pool };
        db.initialize_schema().await?;
        Ok(db)
    }

    /// Runs `operation`, retrying with exponential backoff while SQLite
    /// reports the database as busy or locked.
    pub(crate) async fn retry_on_lock<T, F, Fut>(
        &self,
        description: &str,
        mut operation: F,
    ) -> Result<T, sqlx::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut backoff = 50u64;
        for attempt in 1..=MAX_LOCK_RETRIES {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_database_lock_error() && attempt < MAX_LOCK_RETRIES => {
                    let jitter = rand::rng().random_range(0..25);
                    warn!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying {} ({}/{})", backoff + jitter, description, attempt, MAX_LOCK_RETRIES);
                    sleep(Duration::from_millis(backoff + jitter)).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to {}: {}", description, err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(format!(
            "Maximum retries exceeded for {}",
            description
        )))
    }

    /// Row counts per table, for `manage_models stats`.
    pub async fn collect_stats(&self) -> Result<Vec<(&'static str, i64)>, sqlx::Error> {
        let tables = [
            "documents",
            "summaries",
            "usage_logs",
            "model_versions",
            "feedback",
            "cache_entries",
            "retraining_queue",
        ];

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await?;
            results.push((table, count));
        }
        Ok(results)
    }
}

pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
