use ::redis::AsyncCommands;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::{CacheEntry, CacheError, CacheTier};
use crate::TARGET_CACHE;

/// Distributed tier shared between processes. Expiry is native (`SET EX`).
pub struct RedisTier {
    connection_manager: ::redis::aio::ConnectionManager,
}

impl RedisTier {
    pub async fn new(connection_string: &str) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(connection_string)
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        info!(target: TARGET_CACHE, "Connected Redis cache tier");
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection_manager.clone();

        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))?;

        match value {
            Some(json) => {
                let entry: CacheEntry = serde_json::from_str(&json)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let remaining = entry.remaining_ttl(Utc::now());
        if remaining.is_zero() {
            return Ok(());
        }
        // Redis rejects an expiry of zero seconds.
        let ttl_seconds = remaining.as_secs().max(1);

        let json =
            serde_json::to_string(entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut conn = self.connection_manager.clone();
        let _: () = conn
            .set_ex(&entry.key, json, ttl_seconds)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();

        let _: usize = conn
            .del(key)
            .await
            .map_err(|e| CacheError::Operation(e.to_string()))?;

        Ok(())
    }
}
