use sqlx::Row;
use tracing::{debug, instrument};

use super::core::{to_millis, Database};
use crate::cache::CacheEntry;
use crate::error::StoreError;
use crate::TARGET_DB;

impl Database {
    /// Returns the stored entry unless it has expired. Expired rows are
    /// purged on read.
    #[instrument(target = "db", level = "debug", skip(self))]
    pub async fn get_cache_entry(
        &self,
        key: &str,
        now_ms: i64,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let row = sqlx::query("SELECT value, expires_at, hits FROM cache_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: i64 = row.get("expires_at");
        if expires_at <= now_ms {
            debug!(target: TARGET_DB, "Purging expired cache entry {}", key);
            self.delete_cache_entry(key).await?;
            return Ok(None);
        }

        let value: String = row.get("value");
        let hits: i64 = row.get("hits");
        let mut entry: CacheEntry = serde_json::from_str(&value)?;
        entry.hits = hits.max(0) as u64 + 1;

        sqlx::query("UPDATE cache_entries SET hits = hits + 1 WHERE key = ?1")
            .bind(key)
            .execute(self.pool())
            .await?;

        Ok(Some(entry))
    }

    #[instrument(target = "db", level = "debug", skip(self, entry), fields(key = %entry.key))]
    pub async fn put_cache_entry(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let value = serde_json::to_string(entry)?;
        let created_at = to_millis(entry.created_at);
        let expires_at = to_millis(entry.expires_at());

        self.retry_on_lock("store cache entry", || {
            sqlx::query(
                r#"
                INSERT INTO cache_entries (key, value, created_at, expires_at, hits)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(&entry.key)
            .bind(&value)
            .bind(created_at)
            .bind(expires_at)
            .bind(entry.hits as i64)
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    pub async fn delete_cache_entry(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?1")
            .bind(key)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Removes every expired row; returns how many were deleted.
    pub async fn purge_expired_cache_entries(&self, now_ms: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?1")
            .bind(now_ms)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
