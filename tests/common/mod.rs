#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use condense::cache::{CacheManager, CacheTier, CacheTtls, MemoryTier, SqliteTier};
use condense::cost::{BackendTarget, CostConfig, CostOptimizer};
use condense::db::Database;
use condense::engine::{EngineConfig, SummarizationEngine};
use condense::llm::{BackendError, GenerationParams, RetryPolicy, TextGenerator};
use condense::pipeline::{Pipeline, UserTiers, DEFAULT_MAX_INPUT_CHARS};
use condense::rate_limit::{ActionUsage, RateLimitConfig, RateLimiter, TierQuotas, UsageLog};
use condense::registry::{default_catalogue, ModelRegistry};
use condense::types::UserTier;

pub const ARTICLE: &str = "The council approved a new transport budget on Monday. \
    Bus fares will stay frozen for two years. Members argued the tram network needs more money. \
    The mayor called the plan balanced. Businesses welcomed longer night services. \
    Critics pointed to rising maintenance costs. A cycling consultation opens in spring. \
    Officials expect ridership to recover soon. Station accessibility funding was doubled. \
    The council called the budget a turning point.";

pub const REPLY: &str = "The council froze bus fares and doubled station accessibility funding.";

/// Backend that fails its first `failures` calls, optionally after a delay,
/// and then returns its reply ([`REPLY`] unless overridden).
pub struct FakeGenerator {
    provider: &'static str,
    failures: u32,
    reply: &'static str,
    delay: Duration,
    calls: AtomicU32,
}

impl FakeGenerator {
    pub fn new(provider: &'static str, failures: u32, delay: Duration) -> Self {
        Self {
            provider,
            failures,
            reply: REPLY,
            delay,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_reply(mut self, reply: &'static str) -> Self {
        self.reply = reply;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    fn provider(&self) -> &str {
        self.provider
    }

    async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures {
            Err(BackendError::Timeout(Duration::from_millis(5)))
        } else {
            Ok(self.reply.to_string())
        }
    }
}

pub struct Options {
    pub openai_failures: u32,
    pub ollama_failures: u32,
    pub backend_delay: Duration,
    pub reply: &'static str,
    pub rate_limits: RateLimitConfig,
    pub quotas: TierQuotas,
    pub tiers: UserTiers,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            openai_failures: 0,
            ollama_failures: 0,
            backend_delay: Duration::ZERO,
            reply: REPLY,
            rate_limits: RateLimitConfig::default(),
            quotas: TierQuotas::default(),
            tiers: UserTiers::new(UserTier::Free),
        }
    }
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub db: Database,
    pub registry: Arc<ModelRegistry>,
    pub openai: Arc<FakeGenerator>,
    pub ollama: Arc<FakeGenerator>,
}

impl Harness {
    pub async fn new(options: Options) -> Self {
        let db = Database::in_memory().await.unwrap();

        let registry = Arc::new(ModelRegistry::new(
            Arc::new(db.clone()),
            Duration::from_secs(600),
        ));
        registry
            .seed_defaults(default_catalogue("fast-model", "quality-model"))
            .await
            .unwrap();

        let openai = Arc::new(
            FakeGenerator::new("openai", options.openai_failures, options.backend_delay)
                .with_reply(options.reply),
        );
        let ollama = Arc::new(
            FakeGenerator::new("ollama", options.ollama_failures, options.backend_delay)
                .with_reply(options.reply),
        );
        let engine = SummarizationEngine::new(
            registry.clone(),
            EngineConfig {
                retry: RetryPolicy::immediate(3),
                ..EngineConfig::default()
            },
        )
        .with_generator(openai.clone())
        .with_generator(ollama.clone());

        let tiers: Vec<Arc<dyn CacheTier>> = vec![
            Arc::new(MemoryTier::new(100)),
            Arc::new(SqliteTier::new(db.clone())),
        ];
        let cache = Arc::new(CacheManager::new(tiers, CacheTtls::default()));

        let limiter = Arc::new(RateLimiter::new(
            Arc::new(db.clone()),
            options.rate_limits,
            options.quotas,
        ));

        let cost = CostConfig::new(
            BackendTarget {
                provider: "ollama".to_string(),
                model_id: "fast-model".to_string(),
                cost_per_1k_tokens: 0.0005,
            },
            BackendTarget {
                provider: "openai".to_string(),
                model_id: "quality-model".to_string(),
                cost_per_1k_tokens: 0.005,
            },
        );
        let optimizer = Arc::new(CostOptimizer::new(registry.clone(), cost));

        let pipeline = Arc::new(Pipeline::new(
            cache,
            limiter,
            optimizer,
            Arc::new(engine),
            Arc::new(db.clone()),
            options.tiers,
            None,
            DEFAULT_MAX_INPUT_CHARS,
        ));

        Harness {
            pipeline,
            db,
            registry,
            openai,
            ollama,
        }
    }

    pub async fn usage(&self, user_id: &str) -> Vec<ActionUsage> {
        self.db
            .usage_summary(user_id, Utc::now() - ChronoDuration::days(1))
            .await
            .unwrap()
    }

    pub fn backend_calls(&self) -> u32 {
        self.openai.calls() + self.ollama.calls()
    }
}
