//! The summarization request pipeline.
//!
//! validate → cache → rate limit and quota → model selection → input
//! optimization → engine → polish → evaluate → record usage, cache and
//! persist. Cache hits return before admission and are not charged.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::AlertSender;
use crate::cache::{CacheManager, ContentClass};
use crate::config::SummarizationConfig;
use crate::cost::{estimate_tokens, CostOptimizer, Route};
use crate::engine::{EngineOutput, PipelineState, SummarizationEngine};
use crate::error::{report, StoreError, SummarizeError};
use crate::evaluation::evaluate_summary;
use crate::rate_limit::{RateLimiter, ACTION_SUMMARIZE};
use crate::text::detect_language;
use crate::types::{SummaryResult, UsageRecord, UserTier};
use crate::TARGET_ENGINE;

pub const DEFAULT_MAX_INPUT_CHARS: usize = 50_000;

/// A finished summary together with what it was made from.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub user_id: String,
    pub source_text: String,
    /// Hex SHA-256 of the source text.
    pub content_hash: String,
    pub language: Option<String>,
    pub result: SummaryResult,
    /// Registry variant that produced the summary.
    pub model_id: Option<Uuid>,
}

impl SummaryRecord {
    pub fn new(
        user_id: &str,
        source_text: &str,
        language: Option<String>,
        result: SummaryResult,
        model_id: Option<Uuid>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            source_text: source_text.to_string(),
            content_hash: hex::encode(Sha256::digest(source_text.as_bytes())),
            language,
            result,
            model_id,
        }
    }
}

/// Durable storage for summaries and their source documents.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn persist_summary(&self, record: &SummaryRecord) -> Result<(), StoreError>;

    async fn get_summary(&self, id: Uuid) -> Result<Option<SummaryResult>, StoreError>;
}

/// Billing tier per user, with a default for everyone not listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserTiers {
    tiers: HashMap<String, UserTier>,
    default_tier: UserTier,
}

impl UserTiers {
    pub fn new(default_tier: UserTier) -> Self {
        Self {
            tiers: HashMap::new(),
            default_tier,
        }
    }

    pub fn with_user(mut self, user_id: &str, tier: UserTier) -> Self {
        self.tiers.insert(user_id.to_string(), tier);
        self
    }

    /// Parses `user=tier` pairs separated by `,`.
    pub fn parse(spec: &str, default_tier: UserTier) -> Result<Self, String> {
        let mut tiers = Self::new(default_tier);
        for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (user, tier) = item
                .split_once('=')
                .ok_or_else(|| format!("expected user=tier, got '{}'", item))?;
            let tier: UserTier = tier.parse().map_err(|e| format!("{}", e))?;
            tiers.tiers.insert(user.trim().to_string(), tier);
        }
        Ok(tiers)
    }

    pub fn tier_for(&self, user_id: &str) -> UserTier {
        self.tiers.get(user_id).copied().unwrap_or(self.default_tier)
    }
}

/// Who a request is made for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub tier: UserTier,
}

/// Records lifecycle transitions for one request.
struct Lifecycle {
    correlation_id: Uuid,
    state: PipelineState,
}

impl Lifecycle {
    fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            state: PipelineState::Received,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            warn!(target: TARGET_ENGINE, "[{}] unexpected transition {} -> {}", self.correlation_id, self.state, next);
        }
        debug!(target: TARGET_ENGINE, "[{}] {} -> {}", self.correlation_id, self.state, next);
        self.state = next;
    }
}

/// Resolves once `cancel` reads `true`. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct Pipeline {
    cache: Arc<CacheManager>,
    limiter: Arc<RateLimiter>,
    optimizer: Arc<CostOptimizer>,
    engine: Arc<SummarizationEngine>,
    store: Arc<dyn SummaryStore>,
    tiers: UserTiers,
    alerts: Option<AlertSender>,
    max_input_chars: usize,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<CacheManager>,
        limiter: Arc<RateLimiter>,
        optimizer: Arc<CostOptimizer>,
        engine: Arc<SummarizationEngine>,
        store: Arc<dyn SummaryStore>,
        tiers: UserTiers,
        alerts: Option<AlertSender>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            cache,
            limiter,
            optimizer,
            engine,
            store,
            tiers,
            alerts,
            max_input_chars,
        }
    }

    pub fn caller(&self, user_id: &str) -> Caller {
        Caller {
            user_id: user_id.to_string(),
            tier: self.tiers.tier_for(user_id),
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn engine(&self) -> &SummarizationEngine {
        &self.engine
    }

    pub async fn get_summary(&self, id: Uuid) -> Result<Option<SummaryResult>, StoreError> {
        self.store.get_summary(id).await
    }

    pub fn alerts(&self) -> Option<&AlertSender> {
        self.alerts.as_ref()
    }

    /// Summarizes `text` for `user_id`. Failures are logged under a
    /// correlation id, and critical ones raise an alert, before they are
    /// returned.
    pub async fn summarize(
        &self,
        text: &str,
        config: &SummarizationConfig,
        user_id: &str,
    ) -> Result<SummaryResult, SummarizeError> {
        let result = self.summarize_for(text, config, &self.caller(user_id)).await;
        if let Err(e) = &result {
            report(e, self.alerts.as_ref());
        }
        result
    }

    /// Runs the pipeline without reporting failures; the caller owns that.
    pub async fn summarize_for(
        &self,
        text: &str,
        config: &SummarizationConfig,
        caller: &Caller,
    ) -> Result<SummaryResult, SummarizeError> {
        let (_keep_open, cancel) = watch::channel(false);
        self.run(text, config, caller, cancel).await
    }

    /// Like [`Pipeline::summarize_for`], but gives up as soon as `cancel`
    /// becomes `true`. A cancelled request writes nothing: no usage, cache
    /// entry or stored summary.
    pub async fn summarize_with_cancel(
        &self,
        text: &str,
        config: &SummarizationConfig,
        caller: &Caller,
        cancel: watch::Receiver<bool>,
    ) -> Result<SummaryResult, SummarizeError> {
        self.run(text, config, caller, cancel).await
    }

    fn validate(&self, text: &str, config: &SummarizationConfig) -> Result<(), SummarizeError> {
        config.validate()?;
        if text.trim().is_empty() {
            return Err(SummarizeError::validation("text must not be empty"));
        }
        let chars = text.chars().count();
        if chars > self.max_input_chars {
            return Err(SummarizeError::validation(format!(
                "text has {} characters, the limit is {}",
                chars, self.max_input_chars
            )));
        }
        Ok(())
    }

    async fn admit(&self, caller: &Caller) -> Result<(), SummarizeError> {
        let rate = self
            .limiter
            .check_rate_limit(&caller.user_id, ACTION_SUMMARIZE)
            .await;
        if !rate.allowed {
            return Err(SummarizeError::RateLimited {
                action: ACTION_SUMMARIZE.to_string(),
                reset_time: rate.reset_time,
                blocked_until: rate.blocked_until,
            });
        }

        let quota = self.limiter.check_quota(&caller.user_id, caller.tier).await;
        if quota.exceeded {
            return Err(SummarizeError::QuotaExceeded {
                used: quota.used_tokens,
                limit: quota.limit,
                reset_time: quota.reset_time,
            });
        }
        Ok(())
    }

    async fn run(
        &self,
        text: &str,
        config: &SummarizationConfig,
        caller: &Caller,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<SummaryResult, SummarizeError> {
        let started = Instant::now();
        let mut lifecycle = Lifecycle::new(Uuid::new_v4());

        if let Err(e) = self.validate(text, config) {
            lifecycle.advance(PipelineState::FailedTerminal);
            return Err(e);
        }
        lifecycle.advance(PipelineState::Validated);

        let key = CacheManager::generate_key(text, config);
        if let Some(hit) = self.cache.get(&key).await {
            lifecycle.advance(PipelineState::CacheHit);
            lifecycle.advance(PipelineState::Done);
            return Ok(hit);
        }

        if let Err(e) = self.admit(caller).await {
            lifecycle.advance(PipelineState::FailedTerminal);
            return Err(e);
        }
        lifecycle.advance(PipelineState::Admitted);

        let selection = self
            .optimizer
            .select_model(config, text.chars().count(), caller.tier)
            .await;
        let optimized = self.optimizer.optimize_input(text, config);
        if optimized.truncated || optimized.savings_percent > 0.0 {
            debug!(target: TARGET_ENGINE, "Input optimized by {:.1}% (truncated: {})", optimized.savings_percent, optimized.truncated);
        }

        lifecycle.advance(PipelineState::Summarizing);
        let work = async {
            let output = self
                .engine
                .summarize(&optimized.optimized_text, config, &selection)
                .await?;
            lifecycle.advance(PipelineState::Polishing);
            let polished = self.engine.postprocessor().polish(&output.summary, config);
            if polished.trim().is_empty() {
                return Err(SummarizeError::processing("summary was empty after polishing"));
            }
            let evaluation = evaluate_summary(text, &polished, None);
            lifecycle.advance(PipelineState::Evaluated);
            Ok::<_, SummarizeError>((output, polished, evaluation))
        };

        let outcome = tokio::select! {
            _ = cancelled(&mut cancel) => {
                info!(target: TARGET_ENGINE, "Request for user {} cancelled", caller.user_id);
                return Err(SummarizeError::Cancelled);
            }
            outcome = work => outcome,
        };

        let input_tokens = estimate_tokens(&optimized.optimized_text);
        let (output, polished, evaluation) = match outcome {
            Ok(done) => done,
            Err(e) => {
                lifecycle.advance(PipelineState::Failed);
                lifecycle.advance(PipelineState::FailedTerminal);
                self.record_usage(&caller.user_id, 0, 0.0).await;
                return Err(e);
            }
        };

        let result = SummaryResult {
            id: Uuid::new_v4(),
            summary: polished,
            method: output.method.clone(),
            config: config.clone(),
            metrics: evaluation.metrics,
            model_version: output.model_version.clone(),
            processing_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            confidence: evaluation.confidence,
            created_at: Utc::now(),
        };

        let tokens = input_tokens + estimate_tokens(&result.summary);
        let cost = charged_cost(&output, selection.route, selection.estimated_cost);
        self.record_usage(&caller.user_id, tokens, cost).await;

        // Degraded results are not cached so the next request tries the backend again.
        if !output.degraded {
            let ttl = self.cache.ttl_for(ContentClass::for_mode(config.mode));
            self.cache.set(&key, result.clone(), ttl).await;
        }

        let record = SummaryRecord::new(
            &caller.user_id,
            text,
            detect_language(text),
            result.clone(),
            output.variant_id,
        );
        if let Err(e) = self.store.persist_summary(&record).await {
            warn!(target: TARGET_ENGINE, "Failed to persist summary {}: {}", result.id, e);
        }

        lifecycle.advance(PipelineState::Done);
        info!(target: TARGET_ENGINE, "Summarized {} chars for {} with {} ({}) in {}ms, confidence {:.2}", text.len(), caller.user_id, result.method, result.model_version, result.processing_time_ms, result.confidence);
        Ok(result)
    }

    async fn record_usage(&self, user_id: &str, tokens: u64, cost: f64) {
        let record = UsageRecord::new(
            user_id,
            ACTION_SUMMARIZE,
            i64::try_from(tokens).unwrap_or(i64::MAX),
            cost,
        );
        if let Err(e) = self.limiter.record_usage(&record).await {
            warn!(target: TARGET_ENGINE, "Failed to record usage for {}: {}", user_id, e);
        }
    }
}

fn charged_cost(output: &EngineOutput, route: Route, estimated_cost: f64) -> f64 {
    if output.degraded || route == Route::Local {
        0.0
    } else {
        estimated_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_tiers_parse() {
        let tiers = UserTiers::parse("alice=premium, bob=basic", UserTier::Free).unwrap();
        assert_eq!(tiers.tier_for("alice"), UserTier::Premium);
        assert_eq!(tiers.tier_for("bob"), UserTier::Basic);
        assert_eq!(tiers.tier_for("carol"), UserTier::Free);
        assert!(UserTiers::parse("alice", UserTier::Free).is_err());
        assert!(UserTiers::parse("alice=gold", UserTier::Free).is_err());
    }

    #[test]
    fn test_record_hashes_source() {
        let record = SummaryRecord::new("u", "abc", None, SummaryResult::sample("x"), None);
        assert_eq!(
            record.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
