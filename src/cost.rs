//! Model routing and input trimming.
//!
//! Routing policy, first match wins:
//! 1. extractive requests run locally,
//! 2. free-tier users get the fast backend,
//! 3. simple intents (grammar, simplify) get the fast backend,
//! 4. a cost-first paid tier sends standard-quality requests to the fast backend,
//! 5. everything else goes to the quality backend.
//!
//! On the quality route the registry's active variant replaces the configured
//! model when one exists.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Mode, Quality, SummarizationConfig};
use crate::engine::extractive::{BUILTIN_EXTRACTIVE_MODEL, BUILTIN_EXTRACTIVE_VERSION};
use crate::registry::{ModelRegistry, ModelType, PROVIDER_LOCAL};
use crate::types::UserTier;
use crate::TARGET_ENGINE;

pub const GAP_MARKER: &str = "\n\n[...]\n\n";
const HEAD_SHARE_PERCENT: usize = 70;

lazy_static! {
    static ref BOILERPLATE: Regex = Regex::new(
        r"(?i)^\s*(?:.*\b(?:accept (?:all )?cookies|cookie (?:policy|settings)|subscribe to (?:our|the) newsletter|sign up for (?:our|the) newsletter|share (?:this|on) (?:article|facebook|twitter|linkedin|x)|all rights reserved|click here to)\b.*|(?:page\s+)?\d+(?:\s*(?:of|/)\s*\d+)?)\s*$"
    )
    .expect("boilerplate regex is valid");
    static ref INLINE_SPACE: Regex = Regex::new(r"[ \t\u{a0}]+").expect("inline space regex is valid");
    static ref BLANK_LINES: Regex = Regex::new(r"\n{3,}").expect("blank line regex is valid");
}

/// A backend model the optimizer can route to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTarget {
    pub provider: String,
    pub model_id: String,
    pub cost_per_1k_tokens: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierWeights {
    pub cost_weight: f64,
    pub quality_weight: f64,
}

impl TierWeights {
    pub fn prefers_cost(&self) -> bool {
        self.cost_weight > self.quality_weight
    }
}

#[derive(Debug, Clone)]
pub struct CostConfig {
    pub fast: BackendTarget,
    pub quality: BackendTarget,
    pub tier_weights: HashMap<UserTier, TierWeights>,
    /// Input budget for single-call generative modes, in characters.
    pub max_backend_chars: usize,
}

impl CostConfig {
    pub fn new(fast: BackendTarget, quality: BackendTarget) -> Self {
        Self {
            fast,
            quality,
            tier_weights: default_tier_weights(),
            max_backend_chars: 12_000,
        }
    }

    pub fn weights_for(&self, tier: UserTier) -> TierWeights {
        self.tier_weights.get(&tier).copied().unwrap_or(TierWeights {
            cost_weight: 0.5,
            quality_weight: 0.5,
        })
    }
}

pub fn default_tier_weights() -> HashMap<UserTier, TierWeights> {
    HashMap::from([
        (UserTier::Free, TierWeights { cost_weight: 1.0, quality_weight: 0.0 }),
        (UserTier::Basic, TierWeights { cost_weight: 0.5, quality_weight: 0.5 }),
        (UserTier::Premium, TierWeights { cost_weight: 0.3, quality_weight: 0.7 }),
        (UserTier::Enterprise, TierWeights { cost_weight: 0.1, quality_weight: 0.9 }),
    ])
}

/// Parses `tier=cost:quality` pairs separated by `,`.
pub fn parse_tier_weights(spec: &str) -> Result<HashMap<UserTier, TierWeights>, String> {
    let mut weights = default_tier_weights();
    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (tier, pair) = item
            .split_once('=')
            .ok_or_else(|| format!("expected tier=cost:quality, got '{}'", item))?;
        let tier: UserTier = tier.parse().map_err(|e| format!("{}", e))?;
        let (cost, quality) = pair
            .split_once(':')
            .ok_or_else(|| format!("expected cost:quality, got '{}'", pair))?;
        let cost_weight: f64 = cost.trim().parse().map_err(|e| format!("{}: {}", item, e))?;
        let quality_weight: f64 = quality.trim().parse().map_err(|e| format!("{}: {}", item, e))?;
        weights.insert(tier, TierWeights { cost_weight, quality_weight });
    }
    Ok(weights)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Local,
    Fast,
    Quality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    pub provider: String,
    pub model_id: String,
    pub estimated_cost: f64,
    pub route: Route,
    /// Registry variant backing this selection, when there is one.
    pub variant_id: Option<Uuid>,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedInput {
    pub optimized_text: String,
    pub savings_percent: f64,
    pub truncated: bool,
}

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_chars(text.chars().count())
}

pub fn estimate_tokens_for_chars(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}

pub fn estimate_cost(tokens: u64, cost_per_1k_tokens: f64) -> f64 {
    tokens as f64 / 1000.0 * cost_per_1k_tokens
}

pub struct CostOptimizer {
    registry: Arc<ModelRegistry>,
    config: CostConfig,
}

impl CostOptimizer {
    pub fn new(registry: Arc<ModelRegistry>, config: CostConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    pub async fn select_model(
        &self,
        config: &SummarizationConfig,
        text_length: usize,
        tier: UserTier,
    ) -> ModelSelection {
        // Prompt plus an expected response of about a quarter of the input.
        let input_tokens = estimate_tokens_for_chars(text_length.min(self.input_budget(config.mode)));
        let total_tokens = input_tokens + input_tokens / 4;

        let route = self.route(config, tier);
        let model_type = ModelType::for_mode(config.mode);

        let selection = match route {
            Route::Local => {
                let active = self.active_variant(ModelType::Extractive).await;
                ModelSelection {
                    provider: PROVIDER_LOCAL.to_string(),
                    model_id: active
                        .as_ref()
                        .map(|v| v.backend_model_id.clone())
                        .unwrap_or_else(|| BUILTIN_EXTRACTIVE_MODEL.to_string()),
                    estimated_cost: 0.0,
                    route,
                    variant_id: active.as_ref().map(|v| v.id),
                    model_version: active
                        .map(|v| v.version_label())
                        .unwrap_or_else(|| BUILTIN_EXTRACTIVE_VERSION.to_string()),
                }
            }
            Route::Fast => self.from_target(&self.config.fast, route, total_tokens),
            Route::Quality => match self.active_variant(model_type).await {
                Some(variant) if variant.provider != PROVIDER_LOCAL => ModelSelection {
                    provider: variant.provider.clone(),
                    model_id: variant.backend_model_id.clone(),
                    estimated_cost: estimate_cost(total_tokens, variant.cost_per_1k_tokens),
                    route,
                    variant_id: Some(variant.id),
                    model_version: variant.version_label(),
                },
                _ => self.from_target(&self.config.quality, route, total_tokens),
            },
        };

        debug!(target: TARGET_ENGINE, "Selected {} {} ({:?}) for {} tier, ~{} tokens, est. ${:.5}", selection.provider, selection.model_id, selection.route, tier, total_tokens, selection.estimated_cost);
        selection
    }

    fn route(&self, config: &SummarizationConfig, tier: UserTier) -> Route {
        if config.mode == Mode::Extractive {
            return Route::Local;
        }
        if !tier.is_paid() {
            return Route::Fast;
        }
        if config.intent.is_some_and(|i| i.is_simple()) {
            return Route::Fast;
        }
        if config.quality == Quality::Standard && self.config.weights_for(tier).prefers_cost() {
            return Route::Fast;
        }
        Route::Quality
    }

    fn from_target(&self, target: &BackendTarget, route: Route, tokens: u64) -> ModelSelection {
        ModelSelection {
            provider: target.provider.clone(),
            model_id: target.model_id.clone(),
            estimated_cost: estimate_cost(tokens, target.cost_per_1k_tokens),
            route,
            variant_id: None,
            model_version: format!("{}:{}", target.provider, target.model_id),
        }
    }

    async fn active_variant(&self, model_type: ModelType) -> Option<crate::registry::ModelVariant> {
        match self.registry.get_active_model(model_type).await {
            Ok(variant) => variant,
            Err(e) => {
                warn!(target: TARGET_ENGINE, "Registry lookup for {} failed, using configured model: {}", model_type, e);
                None
            }
        }
    }

    fn input_budget(&self, mode: Mode) -> usize {
        match mode {
            Mode::Abstractive | Mode::Paraphrase => self.config.max_backend_chars,
            Mode::Extractive | Mode::Hybrid => usize::MAX,
        }
    }

    /// Truncates (single-call generative modes only), strips boilerplate and
    /// normalizes whitespace, in that order.
    pub fn optimize_input(&self, text: &str, config: &SummarizationConfig) -> OptimizedInput {
        let original_chars = text.chars().count();

        let budget = self.input_budget(config.mode);
        let (truncated_text, truncated) = if original_chars > budget {
            (truncate_head_tail(text, budget), true)
        } else {
            (text.to_string(), false)
        };

        let optimized_text = normalize_whitespace(&strip_boilerplate(&truncated_text));
        let optimized_chars = optimized_text.chars().count();

        let savings_percent = if original_chars == 0 {
            0.0
        } else {
            (1.0 - optimized_chars as f64 / original_chars as f64).max(0.0) * 100.0
        };

        OptimizedInput {
            optimized_text,
            savings_percent,
            truncated,
        }
    }
}

/// Byte offset of the `n`th character, or the end of the string.
fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map(|(i, _)| i).unwrap_or(text.len())
}

/// End of the last sentence inside `head`, if it falls in its second half.
fn last_sentence_end(head: &str) -> Option<usize> {
    let min = head.len() / 2;
    head.char_indices()
        .filter(|(i, c)| matches!(c, '.' | '!' | '?' | '\n') && *i >= min)
        .map(|(i, c)| i + c.len_utf8())
        .last()
}

/// Start of the first sentence inside `tail`, if it falls in its first half.
fn first_sentence_start(tail: &str) -> Option<usize> {
    let max = tail.len() / 2;
    tail.char_indices()
        .filter(|(i, c)| matches!(c, '.' | '!' | '?' | '\n') && *i < max)
        .map(|(i, c)| i + c.len_utf8())
        .next()
}

/// Keeps roughly the first 70% and last 30% of a `budget`-character window,
/// joined by [`GAP_MARKER`]. Cuts land on sentence boundaries when one is
/// close enough and never inside a character.
pub fn truncate_head_tail(text: &str, budget: usize) -> String {
    let total_chars = text.chars().count();
    if total_chars <= budget {
        return text.to_string();
    }
    let marker_chars = GAP_MARKER.chars().count();
    let usable = budget.saturating_sub(marker_chars);
    let head_chars = usable * HEAD_SHARE_PERCENT / 100;
    let tail_chars = usable - head_chars;

    let head_end = byte_offset(text, head_chars);
    let mut head = &text[..head_end];
    if let Some(end) = last_sentence_end(head) {
        head = &head[..end];
    }

    let tail_start = byte_offset(text, total_chars - tail_chars);
    let mut tail = &text[tail_start..];
    if let Some(start) = first_sentence_start(tail) {
        tail = &tail[start..];
    }

    format!("{}{}{}", head.trim_end(), GAP_MARKER, tail.trim_start())
}

pub fn strip_boilerplate(text: &str) -> String {
    text.lines()
        .filter(|line| !BOILERPLATE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapses runs of spaces and tabs, trims each line and keeps at most one
/// blank line between paragraphs.
pub fn normalize_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| INLINE_SPACE.replace_all(line.trim(), " ").into_owned())
        .collect();
    BLANK_LINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Intent, LengthPreset};
    use crate::db::Database;
    use crate::registry::{default_catalogue, ModelRegistry};
    use std::time::Duration;

    fn targets() -> CostConfig {
        CostConfig::new(
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
        )
    }

    async fn optimizer(seed: bool) -> CostOptimizer {
        let db = Database::in_memory().await.unwrap();
        let registry = Arc::new(ModelRegistry::new(Arc::new(db), Duration::from_secs(60)));
        if seed {
            registry
                .seed_defaults(default_catalogue("fast-model", "registry-quality"))
                .await
                .unwrap();
        }
        CostOptimizer::new(registry, targets())
    }

    #[tokio::test]
    async fn test_free_tier_always_fast() {
        let optimizer = optimizer(true).await;
        for intent in [
            None,
            Some(Intent::Summarize),
            Some(Intent::Grammar),
            Some(Intent::Paraphrase),
            Some(Intent::Expand),
        ] {
            let mut config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Medium);
            config.quality = Quality::Premium;
            config.intent = intent;
            let selection = optimizer.select_model(&config, 5_000, UserTier::Free).await;
            assert_eq!(selection.route, Route::Fast);
            assert_eq!(selection.provider, "ollama");
            assert_eq!(selection.model_id, "fast-model");
        }
    }

    #[tokio::test]
    async fn test_paid_routes() {
        let optimizer = optimizer(true).await;
        let simple = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short)
            .with_intent(Intent::Grammar);
        assert_eq!(
            optimizer.select_model(&simple, 1000, UserTier::Premium).await.route,
            Route::Fast
        );

        let full = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short)
            .with_intent(Intent::Summarize);
        let selection = optimizer.select_model(&full, 1000, UserTier::Basic).await;
        assert_eq!(selection.route, Route::Quality);
        // The registry's active variant overrides the configured model id.
        assert_eq!(selection.model_id, "registry-quality");
        assert!(selection.variant_id.is_some());
        assert!(selection.estimated_cost > 0.0);
    }

    #[tokio::test]
    async fn test_quality_route_without_registry_uses_configured_model() {
        let optimizer = optimizer(false).await;
        let config = SummarizationConfig::new(Mode::Paraphrase, LengthPreset::Medium);
        let selection = optimizer.select_model(&config, 400, UserTier::Enterprise).await;
        assert_eq!(selection.model_id, "quality-model");
        assert!(selection.variant_id.is_none());
    }

    #[tokio::test]
    async fn test_cost_first_tier_sends_standard_requests_to_fast_backend() {
        let db = Database::in_memory().await.unwrap();
        let registry = Arc::new(ModelRegistry::new(Arc::new(db), Duration::from_secs(60)));
        let mut config = targets();
        config.tier_weights = parse_tier_weights("basic=0.8:0.2").unwrap();
        let optimizer = CostOptimizer::new(registry, config);

        let mut request = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Medium);
        assert_eq!(
            optimizer.select_model(&request, 100, UserTier::Basic).await.route,
            Route::Fast
        );
        request.quality = Quality::Premium;
        assert_eq!(
            optimizer.select_model(&request, 100, UserTier::Basic).await.route,
            Route::Quality
        );
    }

    #[tokio::test]
    async fn test_extractive_is_local_and_free() {
        let optimizer = optimizer(true).await;
        let config = SummarizationConfig::new(Mode::Extractive, LengthPreset::Medium);
        let selection = optimizer.select_model(&config, 100_000, UserTier::Premium).await;
        assert_eq!(selection.route, Route::Local);
        assert_eq!(selection.estimated_cost, 0.0);
    }

    #[test]
    fn test_truncation_keeps_lead_and_conclusion() {
        let head: String = (0..100).map(|i| format!("Lead sentence {}. ", i)).collect();
        let tail: String = (0..100).map(|i| format!("Closing sentence {}. ", i)).collect();
        let text = format!("{}{}", head, tail);

        let out = truncate_head_tail(&text, 1000);
        assert!(out.chars().count() <= 1000);
        assert!(out.starts_with("Lead sentence 0."));
        assert!(out.contains("[...]"));
        assert!(out.ends_with("Closing sentence 99."));
        // Both halves end and start on sentence boundaries.
        let (before, after) = out.split_once(GAP_MARKER).unwrap();
        assert!(before.ends_with('.'));
        assert!(after.starts_with("Closing sentence"));
    }

    #[test]
    fn test_truncation_never_splits_characters() {
        let text = "日本語のテキスト".repeat(500);
        let out = truncate_head_tail(&text, 301);
        assert!(out.chars().count() <= 301);
        assert!(out.contains("[...]"));
    }

    #[tokio::test]
    async fn test_optimize_input_strips_boilerplate() {
        let optimizer = optimizer(false).await;
        let text = "Real content here.\nAccept all cookies to continue\n\n\n\nPage 2 of 7\nMore   real\tcontent.\nShare this article\n";
        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Medium);
        let optimized = optimizer.optimize_input(text, &config);
        assert_eq!(optimized.optimized_text, "Real content here.\n\nMore real content.");
        assert!(optimized.savings_percent > 0.0);
        assert!(!optimized.truncated);
    }

    #[tokio::test]
    async fn test_hybrid_is_not_truncated() {
        let optimizer = optimizer(false).await;
        let text = "A sentence that repeats. ".repeat(2_000);
        let config = SummarizationConfig::new(Mode::Hybrid, LengthPreset::Medium);
        assert!(!optimizer.optimize_input(&text, &config).truncated);

        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Medium);
        let optimized = optimizer.optimize_input(&text, &config);
        assert!(optimized.truncated);
        assert!(optimized.optimized_text.chars().count() <= 12_000);
    }

    #[test]
    fn test_token_estimates() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert!((estimate_cost(2000, 0.5) - 1.0).abs() < 1e-12);
    }
}
