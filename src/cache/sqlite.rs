use async_trait::async_trait;
use chrono::Utc;

use super::{CacheEntry, CacheError, CacheTier};
use crate::db::Database;

/// Durable tier backed by the `cache_entries` table.
pub struct SqliteTier {
    db: Database,
}

impl SqliteTier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheTier for SqliteTier {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .db
            .get_cache_entry(key, Utc::now().timestamp_millis())
            .await?)
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        Ok(self.db.put_cache_entry(entry).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        Ok(self.db.delete_cache_entry(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SummaryResult;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sqlite_tier_round_trip_and_expiry() {
        let db = Database::in_memory().await.unwrap();
        let tier = SqliteTier::new(db.clone());

        let entry = CacheEntry::new("k1", SummaryResult::sample("stored"), Duration::from_secs(60));
        tier.set(&entry).await.unwrap();
        let found = tier.get("k1").await.unwrap().unwrap();
        assert_eq!(found.value, entry.value);
        assert_eq!(found.hits, 1);

        let mut expired = CacheEntry::new("k2", SummaryResult::sample("old"), Duration::from_secs(1));
        expired.created_at = Utc::now() - chrono::Duration::seconds(10);
        tier.set(&expired).await.unwrap();
        assert!(tier.get("k2").await.unwrap().is_none());

        tier.delete("k1").await.unwrap();
        assert!(tier.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_entries() {
        let db = Database::in_memory().await.unwrap();
        let mut expired = CacheEntry::new("old", SummaryResult::sample("x"), Duration::from_secs(1));
        expired.created_at = Utc::now() - chrono::Duration::seconds(5);
        db.put_cache_entry(&expired).await.unwrap();
        db.put_cache_entry(&CacheEntry::new("fresh", SummaryResult::sample("y"), Duration::from_secs(60)))
            .await
            .unwrap();

        let purged = db
            .purge_expired_cache_entries(Utc::now().timestamp_millis())
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
