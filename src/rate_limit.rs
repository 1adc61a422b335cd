//! Sliding-window admission control and monthly token quotas.
//!
//! Windows are evaluated by counting usage records, so the usage log is the
//! single source of truth. Blocks imposed after a burst live in the limiter
//! instance. Any failure to read the usage log fails open.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::types::{UsageRecord, UserTier};
use crate::TARGET_RATE_LIMIT;

pub const ACTION_SUMMARIZE: &str = "summarize";
pub const ACTION_UPLOAD: &str = "upload";

/// Aggregated usage for one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionUsage {
    pub action: String,
    pub requests: u64,
    pub tokens_used: i64,
    pub cost: f64,
}

/// Append-only usage history.
#[async_trait]
pub trait UsageLog: Send + Sync {
    async fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;

    async fn count_usage_since(
        &self,
        user_id: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn oldest_usage_since(
        &self,
        user_id: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn tokens_used_since(&self, user_id: &str, since: DateTime<Utc>)
        -> Result<i64, StoreError>;

    async fn usage_summary(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionUsage>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max_requests: u64,
    pub window: Duration,
    pub block_duration: Duration,
}

impl RateLimitRule {
    pub const fn new(max_requests: u64, window_secs: u64, block_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            block_duration: Duration::from_secs(block_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    rules: HashMap<String, RateLimitRule>,
    default_rule: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert(ACTION_SUMMARIZE.to_string(), RateLimitRule::new(10, 60, 300));
        rules.insert(ACTION_UPLOAD.to_string(), RateLimitRule::new(5, 60, 300));
        Self {
            rules,
            default_rule: RateLimitRule::new(20, 60, 60),
        }
    }
}

impl RateLimitConfig {
    pub fn with_rule(mut self, action: &str, rule: RateLimitRule) -> Self {
        self.rules.insert(action.to_string(), rule);
        self
    }

    pub fn rule_for(&self, action: &str) -> RateLimitRule {
        self.rules.get(action).copied().unwrap_or(self.default_rule)
    }

    /// Parses `action|max|window_secs|block_secs` entries separated by `;`
    /// on top of the defaults. The action `default` replaces the fallback rule.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut config = Self::default();
        for item in spec.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let parts: Vec<&str> = item.split('|').map(str::trim).collect();
            if parts.len() != 4 {
                return Err(format!("expected action|max|window_secs|block_secs, got '{}'", item));
            }
            let numbers: Result<Vec<u64>, _> = parts[1..].iter().map(|p| p.parse::<u64>()).collect();
            let numbers = numbers.map_err(|e| format!("invalid number in '{}': {}", item, e))?;
            if numbers[0] == 0 || numbers[1] == 0 {
                return Err(format!("max and window must be positive in '{}'", item));
            }
            let rule = RateLimitRule::new(numbers[0], numbers[1], numbers[2]);
            if parts[0] == "default" {
                config.default_rule = rule;
            } else {
                config.rules.insert(parts[0].to_string(), rule);
            }
        }
        Ok(config)
    }
}

/// Monthly token allowance per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierQuotas(HashMap<UserTier, i64>);

impl Default for TierQuotas {
    fn default() -> Self {
        Self(HashMap::from([
            (UserTier::Free, 50_000),
            (UserTier::Basic, 500_000),
            (UserTier::Premium, 2_000_000),
            (UserTier::Enterprise, 20_000_000),
        ]))
    }
}

impl TierQuotas {
    pub fn limit_for(&self, tier: UserTier) -> i64 {
        self.0.get(&tier).copied().unwrap_or(0)
    }

    /// Parses `tier=tokens` pairs separated by `,` on top of the defaults.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut quotas = Self::default();
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (tier, tokens) = item
                .split_once('=')
                .ok_or_else(|| format!("expected tier=tokens, got '{}'", item))?;
            let tier: UserTier = tier.parse().map_err(|e| format!("{}", e))?;
            let tokens: i64 = tokens
                .trim()
                .parse()
                .map_err(|e| format!("invalid token count in '{}': {}", item, e))?;
            quotas.0.insert(tier, tokens);
        }
        Ok(quotas)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub used_tokens: i64,
    pub limit: i64,
    pub remaining: i64,
    pub exceeded: bool,
    pub period_start: DateTime<Utc>,
    pub reset_time: DateTime<Utc>,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// First instant of the calendar month containing `now`, and of the next one.
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    (start, end)
}

pub struct RateLimiter {
    log: Arc<dyn UsageLog>,
    config: RateLimitConfig,
    quotas: TierQuotas,
    blocks: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(log: Arc<dyn UsageLog>, config: RateLimitConfig, quotas: TierQuotas) -> Self {
        Self {
            log,
            config,
            quotas,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub async fn check_rate_limit(&self, user_id: &str, action: &str) -> RateLimitResult {
        self.check_rate_limit_at(user_id, action, Utc::now()).await
    }

    pub async fn check_rate_limit_at(
        &self,
        user_id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let rule = self.config.rule_for(action);
        let block_key = (user_id.to_string(), action.to_string());

        if let Some(blocked_until) = self.active_block(&block_key, now) {
            debug!(target: TARGET_RATE_LIMIT, "User {} is blocked for {} until {}", user_id, action, blocked_until);
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_time: blocked_until,
                blocked_until: Some(blocked_until),
            };
        }

        let window = to_chrono(rule.window);
        let window_start = now - window;

        let count = match self.log.count_usage_since(user_id, action, window_start).await {
            Ok(count) => count,
            Err(e) => {
                warn!(target: TARGET_RATE_LIMIT, "Failed to read usage for {} ({}), allowing request: {}", user_id, action, e);
                return RateLimitResult {
                    allowed: true,
                    remaining: rule.max_requests,
                    reset_time: now + window,
                    blocked_until: None,
                };
            }
        };

        let reset_time = match self.log.oldest_usage_since(user_id, action, window_start).await {
            Ok(Some(oldest)) => oldest + window,
            _ => now + window,
        };

        if count >= rule.max_requests {
            let blocked_until = now + to_chrono(rule.block_duration);
            if let Ok(mut blocks) = self.blocks.lock() {
                blocks.retain(|_, until| *until > now);
                blocks.insert(block_key, blocked_until);
            }
            info!(target: TARGET_RATE_LIMIT, "Rate limit exceeded for user {} action {} ({} in window), blocked until {}", user_id, action, count, blocked_until);
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_time,
                blocked_until: Some(blocked_until),
            };
        }

        RateLimitResult {
            allowed: true,
            remaining: rule.max_requests - count - 1,
            reset_time,
            blocked_until: None,
        }
    }

    fn active_block(&self, key: &(String, String), now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut blocks = self.blocks.lock().ok()?;
        let until = *blocks.get(key)?;
        if until > now {
            return Some(until);
        }
        blocks.remove(key);
        None
    }

    /// Lifts a block early. Returns whether one was active.
    pub fn reset_block(&self, user_id: &str, action: &str) -> bool {
        match self.blocks.lock() {
            Ok(mut blocks) => blocks
                .remove(&(user_id.to_string(), action.to_string()))
                .is_some(),
            Err(_) => false,
        }
    }

    /// Appends one usage record. Separate from the admission check.
    pub async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.log.append_usage(record).await
    }

    pub async fn check_quota(&self, user_id: &str, tier: UserTier) -> QuotaStatus {
        self.check_quota_at(user_id, tier, Utc::now()).await
    }

    pub async fn check_quota_at(
        &self,
        user_id: &str,
        tier: UserTier,
        now: DateTime<Utc>,
    ) -> QuotaStatus {
        let (period_start, reset_time) = month_bounds(now);
        let limit = self.quotas.limit_for(tier);

        let used_tokens = match self.log.tokens_used_since(user_id, period_start).await {
            Ok(used) => used,
            Err(e) => {
                warn!(target: TARGET_RATE_LIMIT, "Failed to read monthly usage for {}, allowing request: {}", user_id, e);
                0
            }
        };

        QuotaStatus {
            used_tokens,
            limit,
            remaining: (limit - used_tokens).max(0),
            exceeded: used_tokens >= limit,
            period_start,
            reset_time,
        }
    }

    pub async fn usage_stats(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionUsage>, StoreError> {
        self.log.usage_summary(user_id, since).await
    }
}
