use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{CacheEntry, CacheError, CacheTier};

/// In-process tier with a fixed capacity. At capacity, the entry with the
/// oldest `created_at` is evicted.
pub struct MemoryTier {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Operation("memory tier lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired_at(Utc::now()),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.clone()
        }))
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        if !entries.contains_key(&entry.key) && entries.len() >= self.capacity {
            let now = Utc::now();
            entries.retain(|_, e| !e.is_expired_at(now));
            if entries.len() >= self.capacity {
                let oldest = entries
                    .values()
                    .min_by_key(|e| e.created_at)
                    .map(|e| e.key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        self.entries.lock().ok().map(|e| e.len())
    }
}
