use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::alert::SlackTarget;
use crate::cache::CacheTtls;
use crate::cost::{parse_tier_weights, BackendTarget, CostConfig, TierWeights};
use crate::engine::EngineConfig;
use crate::feedback::RetrainingPolicy;
use crate::pipeline::{UserTiers, DEFAULT_MAX_INPUT_CHARS};
use crate::rate_limit::{RateLimitConfig, TierQuotas};
use crate::types::UserTier;

pub const DEFAULT_FAST_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_OPENAI_QUALITY_MODEL: &str = "gpt-4o-mini";

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub redis_url: Option<String>,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub openai_api_key: Option<String>,
    pub fast_model: String,
    pub quality_model: String,
    pub temperature: f32,
    pub llm_timeout: Duration,
    pub max_input_chars: usize,
    pub rate_limits: RateLimitConfig,
    pub cache_ttls: CacheTtls,
    pub memory_cache_capacity: usize,
    pub jwt_secret: Option<String>,
    pub port: u16,
    pub slack: Option<SlackTarget>,
    pub retraining: RetrainingPolicy,
    pub tier_quotas: TierQuotas,
    pub tier_weights: HashMap<UserTier, TierWeights>,
    pub user_tiers: UserTiers,
    pub fallback_duration: Duration,
    pub hybrid_chunk_chars: usize,
    pub max_backend_chars: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the configuration from any variable source. Unset variables
    /// take their default; unparsable ones are logged and also take the
    /// default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let openai_api_key = vars.string("OPENAI_API_KEY");
        let fast_model = vars
            .string("FAST_MODEL")
            .unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string());
        let quality_model = vars.string("QUALITY_MODEL").unwrap_or_else(|| {
            if openai_api_key.is_some() {
                DEFAULT_OPENAI_QUALITY_MODEL.to_string()
            } else {
                fast_model.clone()
            }
        });

        let default_tier = vars.parsed("DEFAULT_USER_TIER", UserTier::Free);
        let user_tiers = vars.parsed_with("USER_TIERS", UserTiers::new(default_tier), |spec| {
            UserTiers::parse(spec, default_tier)
        });

        let slack = match (vars.string("SLACK_TOKEN"), vars.string("SLACK_CHANNEL")) {
            (Some(token), Some(channel)) => Some(SlackTarget { token, channel }),
            _ => None,
        };

        let retraining_defaults = RetrainingPolicy::default();
        let ttl_defaults = CacheTtls::default();
        let engine_defaults = EngineConfig::default();

        AppConfig {
            database_path: vars
                .string("DATABASE_PATH")
                .unwrap_or_else(|| "condense.db".to_string()),
            redis_url: vars.string("REDIS_URL"),
            ollama_host: vars
                .string("OLLAMA_HOST")
                .unwrap_or_else(|| "http://localhost".to_string()),
            ollama_port: vars.parsed("OLLAMA_PORT", 11434),
            openai_api_key,
            fast_model,
            quality_model,
            temperature: vars.parsed("LLM_TEMPERATURE", engine_defaults.temperature),
            llm_timeout: Duration::from_secs(
                vars.parsed("LLM_TIMEOUT_SECS", engine_defaults.timeout.as_secs()),
            ),
            max_input_chars: vars.parsed("MAX_INPUT_CHARS", DEFAULT_MAX_INPUT_CHARS),
            rate_limits: vars.parsed_with("RATE_LIMITS", RateLimitConfig::default(), RateLimitConfig::parse),
            cache_ttls: CacheTtls {
                extractive: Duration::from_secs(
                    vars.parsed("CACHE_TTL_EXTRACTIVE_SECS", ttl_defaults.extractive.as_secs()),
                ),
                generative: Duration::from_secs(
                    vars.parsed("CACHE_TTL_GENERATIVE_SECS", ttl_defaults.generative.as_secs()),
                ),
            },
            memory_cache_capacity: vars.parsed("MEMORY_CACHE_CAPACITY", 1_000),
            jwt_secret: vars.string("JWT_SECRET"),
            port: vars.parsed("PORT", 8080),
            slack,
            retraining: RetrainingPolicy {
                min_samples: vars.parsed("RETRAIN_MIN_SAMPLES", retraining_defaults.min_samples),
                rating_floor: vars.parsed("RETRAIN_RATING_FLOOR", retraining_defaults.rating_floor),
                window: retraining_defaults.window,
            },
            tier_quotas: vars.parsed_with("TIER_QUOTAS", TierQuotas::default(), TierQuotas::parse),
            tier_weights: vars.parsed_with(
                "TIER_WEIGHTS",
                crate::cost::default_tier_weights(),
                parse_tier_weights,
            ),
            user_tiers,
            fallback_duration: Duration::from_secs(60 * vars.parsed("FALLBACK_MINUTES", 30u64)),
            hybrid_chunk_chars: vars.parsed("HYBRID_CHUNK_CHARS", engine_defaults.hybrid_chunk_chars),
            max_backend_chars: vars.parsed("MAX_BACKEND_CHARS", 12_000),
        }
    }

    /// Provider serving the quality route: OpenAI when a key is configured,
    /// the local Ollama server otherwise.
    pub fn quality_provider(&self) -> &'static str {
        if self.openai_api_key.is_some() {
            "openai"
        } else {
            "ollama"
        }
    }

    pub fn cost_config(&self) -> CostConfig {
        let fast = BackendTarget {
            provider: "ollama".to_string(),
            model_id: self.fast_model.clone(),
            cost_per_1k_tokens: 0.0005,
        };
        let quality = BackendTarget {
            provider: self.quality_provider().to_string(),
            model_id: self.quality_model.clone(),
            cost_per_1k_tokens: 0.005,
        };
        let mut config = CostConfig::new(fast, quality);
        config.tier_weights = self.tier_weights.clone();
        config.max_backend_chars = self.max_backend_chars;
        config
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            temperature: self.temperature,
            timeout: self.llm_timeout,
            hybrid_chunk_chars: self.hybrid_chunk_chars,
            ..EngineConfig::default()
        }
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T>(&self, var: &str, default: T) -> T
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        match self.string(var) {
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(e) => {
                    warn!("Invalid {}='{}' ({}), using default {}", var, raw, e, default);
                    default
                }
            },
            None => default,
        }
    }

    fn parsed_with<T, P>(&self, var: &str, default: T, parse: P) -> T
    where
        P: Fn(&str) -> Result<T, String>,
    {
        match self.string(var) {
            Some(raw) => parse(&raw).unwrap_or_else(|e| {
                warn!("Invalid {}='{}' ({}), using default", var, raw, e);
                default
            }),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::ACTION_SUMMARIZE;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.max_input_chars, 50_000);
        assert_eq!(config.port, 8080);
        assert_eq!(config.fallback_duration, Duration::from_secs(30 * 60));
        assert_eq!(config.quality_provider(), "ollama");
        assert_eq!(config.quality_model, DEFAULT_FAST_MODEL);
        assert!(config.slack.is_none());
        assert_eq!(config.rate_limits.rule_for(ACTION_SUMMARIZE).max_requests, 10);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("PORT", "9000"),
            ("RATE_LIMITS", "summarize|3|60|120"),
            ("USER_TIERS", "alice=enterprise"),
            ("DEFAULT_USER_TIER", "basic"),
            ("SLACK_TOKEN", "xoxb"),
            ("SLACK_CHANNEL", "#alerts"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.quality_provider(), "openai");
        assert_eq!(config.quality_model, DEFAULT_OPENAI_QUALITY_MODEL);
        assert_eq!(config.rate_limits.rule_for(ACTION_SUMMARIZE).max_requests, 3);
        assert_eq!(config.user_tiers.tier_for("alice"), UserTier::Enterprise);
        assert_eq!(config.user_tiers.tier_for("bob"), UserTier::Basic);
        assert!(config.slack.is_some());
        assert_eq!(config.cost_config().quality.provider, "openai");
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("MAX_INPUT_CHARS", "-5"),
            ("RATE_LIMITS", "summarize|x|60|120"),
            ("TIER_QUOTAS", "gold=5"),
        ]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_input_chars, 50_000);
        assert_eq!(config.rate_limits, RateLimitConfig::default());
        assert_eq!(config.tier_quotas, TierQuotas::default());
    }
}
