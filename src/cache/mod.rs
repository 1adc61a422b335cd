//! Multi-tier cache for summarization results.
//!
//! Tiers are ordered from fastest to slowest. Reads walk the tiers in order
//! and back-fill faster tiers on a hit; writes go to the fastest tier inline
//! and to the others from spawned tasks.

pub mod memory;
pub mod redis;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::config::{Mode, SummarizationConfig};
use crate::error::StoreError;
use crate::types::SummaryResult;
use crate::TARGET_CACHE;

pub use self::memory::MemoryTier;
pub use self::redis::RedisTier;
pub use self::sqlite::SqliteTier;

pub const KEY_PREFIX: &str = "summary:";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
    #[error("cache operation error: {0}")]
    Operation(String),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => CacheError::Serialization(e.to_string()),
            other => CacheError::Operation(other.to_string()),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: SummaryResult,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    pub created_at: DateTime<Utc>,
    pub hits: u64,
}

impl CacheEntry {
    pub fn new(key: &str, value: SummaryResult, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            value,
            ttl,
            created_at: Utc::now(),
            hits: 0,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        self.created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// One storage layer of the cache.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Number of live entries, for tiers that can report it cheaply.
    fn len(&self) -> Option<usize> {
        None
    }
}

/// Result families with different lifetimes in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    /// Deterministic output of the local extractive engine.
    Extractive,
    /// Output of a generative backend.
    Generative,
}

impl ContentClass {
    pub fn for_mode(mode: Mode) -> Self {
        if mode.uses_backend() {
            ContentClass::Generative
        } else {
            ContentClass::Extractive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub extractive: Duration,
    pub generative: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            extractive: Duration::from_secs(7 * 24 * 60 * 60),
            generative: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub tier_hits: Vec<(String, u64)>,
    pub memory_entries: Option<usize>,
}

pub struct CacheManager {
    tiers: Vec<Arc<dyn CacheTier>>,
    tier_hits: Vec<AtomicU64>,
    hits: AtomicU64,
    misses: AtomicU64,
    ttls: CacheTtls,
}

impl CacheManager {
    /// `tiers` must be ordered fastest first.
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>, ttls: CacheTtls) -> Self {
        let tier_hits = tiers.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            tiers,
            tier_hits,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttls,
        }
    }

    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn ttl_for(&self, class: ContentClass) -> Duration {
        match class {
            ContentClass::Extractive => self.ttls.extractive,
            ContentClass::Generative => self.ttls.generative,
        }
    }

    /// Deterministic key for a (text, config) pair. Text is NFC normalized
    /// and whitespace-collapsed before hashing; case is significant.
    pub fn generate_key(text: &str, config: &SummarizationConfig) -> String {
        let normalized: String = text.nfc().collect();
        let normalized = crate::text::collapse_whitespace(&normalized);

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([0u8]);
        hasher.update(config.fingerprint().as_bytes());
        format!("{}{}", KEY_PREFIX, hex::encode(hasher.finalize()))
    }

    pub async fn get(&self, key: &str) -> Option<SummaryResult> {
        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.get(key).await {
                Ok(Some(entry)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.tier_hits[index].fetch_add(1, Ordering::Relaxed);
                    debug!(target: TARGET_CACHE, "Cache hit for {} in tier {}", key, tier.name());

                    for faster in &self.tiers[..index] {
                        if let Err(e) = faster.set(&entry).await {
                            warn!(target: TARGET_CACHE, "Failed to back-fill tier {} for {}: {}", faster.name(), key, e);
                        }
                    }
                    return Some(entry.value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(target: TARGET_CACHE, "Cache tier {} failed to read {}: {}", tier.name(), key, e);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(target: TARGET_CACHE, "Cache miss for {}", key);
        None
    }

    /// Writes the fastest tier before returning; slower tiers are written in
    /// the background and their failures are only logged.
    pub async fn set(&self, key: &str, value: SummaryResult, ttl: Duration) {
        let entry = CacheEntry::new(key, value, ttl);
        let Some((fastest, slower)) = self.tiers.split_first() else {
            return;
        };

        if let Err(e) = fastest.set(&entry).await {
            warn!(target: TARGET_CACHE, "Cache tier {} failed to store {}: {}", fastest.name(), key, e);
        }

        for tier in slower {
            let tier = Arc::clone(tier);
            let entry = entry.clone();
            tokio::spawn(async move {
                if let Err(e) = tier.set(&entry).await {
                    warn!(target: TARGET_CACHE, "Cache tier {} failed to store {}: {}", tier.name(), entry.key, e);
                }
            });
        }
    }

    /// Removes the key from every tier; returns how many tiers failed.
    pub async fn invalidate(&self, key: &str) -> usize {
        let mut failures = 0;
        for tier in &self.tiers {
            if let Err(e) = tier.delete(key).await {
                warn!(target: TARGET_CACHE, "Cache tier {} failed to delete {}: {}", tier.name(), key, e);
                failures += 1;
            }
        }
        failures
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            tier_hits: self
                .tiers
                .iter()
                .zip(&self.tier_hits)
                .map(|(t, h)| (t.name().to_string(), h.load(Ordering::Relaxed)))
                .collect(),
            memory_entries: self.tiers.first().and_then(|t| t.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LengthPreset;

    struct FailingTier;

    #[async_trait]
    impl CacheTier for FailingTier {
        fn name(&self) -> &str {
            "failing"
        }
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Connection("down".to_string()))
        }
        async fn set(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Connection("down".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Connection("down".to_string()))
        }
    }

    #[test]
    fn test_key_is_deterministic_and_normalized() {
        let config = SummarizationConfig::default();
        let a = CacheManager::generate_key("Hello   World\n", &config);
        let b = CacheManager::generate_key("Hello World", &config);
        assert_eq!(a, b);
        assert!(a.starts_with(KEY_PREFIX));
        assert_eq!(a.len(), KEY_PREFIX.len() + 64);

        let other = SummarizationConfig::new(Mode::Extractive, LengthPreset::Long);
        assert_ne!(a, CacheManager::generate_key("Hello World", &other));
    }

    #[test]
    fn test_key_is_case_sensitive() {
        let config = SummarizationConfig::default();
        assert_ne!(
            CacheManager::generate_key("HELLO WORLD", &config),
            CacheManager::generate_key("hello world", &config)
        );
    }

    #[test]
    fn test_key_normalizes_unicode_composition() {
        let config = SummarizationConfig::default();
        let composed = CacheManager::generate_key("caf\u{e9}", &config);
        let decomposed = CacheManager::generate_key("cafe\u{301}", &config);
        assert_eq!(composed, decomposed);
    }

    #[tokio::test]
    async fn test_round_trip_and_ttl_expiry() {
        let manager = CacheManager::new(vec![Arc::new(MemoryTier::new(16))], CacheTtls::default());
        let key = CacheManager::generate_key("some text", &SummarizationConfig::default());
        let result = SummaryResult::sample("short summary");

        manager.set(&key, result.clone(), Duration::from_millis(40)).await;
        assert_eq!(manager.get(&key).await, Some(result));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(manager.get(&key).await, None);

        let stats = manager.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_hit_in_slower_tier_back_fills_faster_tier() {
        let fast = Arc::new(MemoryTier::new(16));
        let slow = Arc::new(MemoryTier::new(16));
        let manager = CacheManager::new(
            vec![fast.clone() as Arc<dyn CacheTier>, slow.clone() as Arc<dyn CacheTier>],
            CacheTtls::default(),
        );

        let entry = CacheEntry::new("k", SummaryResult::sample("x"), Duration::from_secs(60));
        slow.set(&entry).await.unwrap();
        assert!(fast.get("k").await.unwrap().is_none());

        assert!(manager.get("k").await.is_some());
        assert!(fast.get("k").await.unwrap().is_some());
        assert_eq!(manager.stats().tier_hits[1].1, 1);
    }

    #[tokio::test]
    async fn test_failing_slow_tier_never_fails_requests() {
        let manager = CacheManager::new(
            vec![Arc::new(MemoryTier::new(4)), Arc::new(FailingTier)],
            CacheTtls::default(),
        );
        manager
            .set("k", SummaryResult::sample("x"), Duration::from_secs(60))
            .await;
        assert!(manager.get("k").await.is_some());
        assert!(manager.get("missing").await.is_none());
        assert_eq!(manager.invalidate("k").await, 1);
        assert!(manager.get("k").await.is_none());
    }

    #[test]
    fn test_ttl_per_content_class() {
        let manager = CacheManager::new(Vec::new(), CacheTtls::default());
        assert!(
            manager.ttl_for(ContentClass::for_mode(Mode::Extractive))
                > manager.ttl_for(ContentClass::for_mode(Mode::Abstractive))
        );
    }
}
