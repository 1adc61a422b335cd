//! Turns a processed input into a summary, locally or through a
//! text-generation backend.
//!
//! Generative modes run behind [`state::AttemptMachine`]: retries with
//! backoff against the selected backend, one attempt against a registry
//! fallback, then degradation to the extractive algorithm.

pub mod abstractive;
pub mod extractive;
pub mod hybrid;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{LengthPreset, Mode, Quality, SummarizationConfig};
use crate::cost::ModelSelection;
use crate::error::SummarizeError;
use crate::llm::{GenerationParams, RetryPolicy, TextGenerator};
use crate::postprocess::PostProcessor;
use crate::prompt::{paraphrase_prompt, summary_prompt};
use crate::registry::ModelRegistry;
use crate::text::ProcessedDocument;
use crate::TARGET_ENGINE;

pub use state::{AttemptMachine, PipelineState, Step};

const CREATIVE_TEMPERATURE: f32 = 0.9;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub temperature: f32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Hybrid inputs longer than this are summarized chunk by chunk.
    pub hybrid_chunk_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            hybrid_chunk_chars: 4_000,
        }
    }
}

/// What the engine produced, before polishing.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub summary: String,
    pub method: String,
    pub model_version: String,
    /// Registry variant that actually produced the text.
    pub variant_id: Option<Uuid>,
    pub degraded: bool,
}

/// Backend the driver is currently calling.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Target {
    pub provider: String,
    pub model_id: String,
    pub model_version: String,
    pub variant_id: Option<Uuid>,
}

impl From<&ModelSelection> for Target {
    fn from(selection: &ModelSelection) -> Self {
        Self {
            provider: selection.provider.clone(),
            model_id: selection.model_id.clone(),
            model_version: selection.model_version.clone(),
            variant_id: selection.variant_id,
        }
    }
}

pub struct SummarizationEngine {
    generators: HashMap<String, Arc<dyn TextGenerator>>,
    registry: Arc<ModelRegistry>,
    config: EngineConfig,
    postprocessor: PostProcessor,
}

impl SummarizationEngine {
    pub fn new(registry: Arc<ModelRegistry>, config: EngineConfig) -> Self {
        Self {
            generators: HashMap::new(),
            registry,
            config,
            postprocessor: PostProcessor::default(),
        }
    }

    /// Registers a backend under its provider name, replacing any previous
    /// one for the same provider.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generators
            .insert(generator.provider().to_string(), generator);
        self
    }

    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.generators.keys().cloned().collect();
        providers.sort();
        providers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn postprocessor(&self) -> &PostProcessor {
        &self.postprocessor
    }

    pub(crate) fn generator_for(&self, provider: &str) -> Option<Arc<dyn TextGenerator>> {
        self.generators.get(provider).cloned()
    }

    pub(crate) fn params_for(&self, model_id: &str, config: &SummarizationConfig) -> GenerationParams {
        let temperature = if config.quality == Quality::Creative {
            CREATIVE_TEMPERATURE
        } else {
            self.config.temperature
        };
        let params = GenerationParams::new(model_id, temperature, self.config.timeout);
        match (config.length, config.max_length) {
            // Roughly two tokens per word, plus room for punctuation.
            (LengthPreset::Custom, Some(words)) => {
                params.with_max_tokens(u32::try_from(words * 2 + 64).unwrap_or(u32::MAX))
            }
            _ => params,
        }
    }

    pub async fn summarize(
        &self,
        text: &str,
        config: &SummarizationConfig,
        selection: &ModelSelection,
    ) -> Result<EngineOutput, SummarizeError> {
        let doc = ProcessedDocument::process(text);
        if doc.sentence_count() == 0 {
            return Err(SummarizeError::processing("input contains no sentences"));
        }
        debug!(target: TARGET_ENGINE, "Summarizing {} sentences ({} words) with mode {}", doc.sentence_count(), doc.word_count, config.mode);

        let output = match config.mode {
            Mode::Extractive => {
                let extract = extractive::summarize(&doc, config);
                EngineOutput {
                    summary: extract.text,
                    method: Mode::Extractive.to_string(),
                    model_version: selection.model_version.clone(),
                    variant_id: selection.variant_id,
                    degraded: false,
                }
            }
            Mode::Abstractive => {
                let generated = self
                    .generate_with_fallback(config, selection, |generator, params| async move {
                        generator.generate(&summary_prompt(text, config), &params).await
                    })
                    .await;
                self.finish(config, &doc, generated)
            }
            Mode::Paraphrase => {
                let generated = self
                    .generate_with_fallback(config, selection, |generator, params| async move {
                        generator.generate(&paraphrase_prompt(text, config), &params).await
                    })
                    .await;
                self.finish(config, &doc, generated)
            }
            Mode::Hybrid => {
                let doc = &doc;
                let generated = self
                    .generate_with_fallback(config, selection, |generator, params| async move {
                        self.hybrid_generate(generator, params, text, doc, config).await
                    })
                    .await;
                self.finish(config, doc, generated)
            }
        };

        if output.summary.trim().is_empty() {
            return Err(SummarizeError::processing(format!(
                "{} produced an empty summary",
                output.method
            )));
        }
        if output.degraded {
            info!(target: TARGET_ENGINE, "Generation failed for mode {}, served extractive summary", config.mode);
        }
        Ok(output)
    }

    /// Wraps a generated text, or degrades to an extractive summary.
    fn finish(
        &self,
        config: &SummarizationConfig,
        doc: &ProcessedDocument,
        generated: Option<(String, Target)>,
    ) -> EngineOutput {
        match generated {
            Some((summary, target)) => EngineOutput {
                summary,
                method: config.mode.to_string(),
                model_version: target.model_version,
                variant_id: target.variant_id,
                degraded: false,
            },
            None => {
                let extract = extractive::summarize(doc, config);
                EngineOutput {
                    summary: extract.text,
                    method: format!("{} (fallback)", config.mode),
                    model_version: extractive::BUILTIN_EXTRACTIVE_VERSION.to_string(),
                    variant_id: None,
                    degraded: true,
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Intent;
    use crate::cost::Route;
    use crate::db::Database;
    use crate::llm::BackendError;
    use crate::registry::{default_catalogue, ModelType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted backend: fails the first `failures` calls, then echoes a
    /// canned summary. Records every prompt it receives.
    pub(crate) struct FakeGenerator {
        pub provider: &'static str,
        pub failures: u32,
        pub error: BackendError,
        pub reply: String,
        pub calls: AtomicU32,
        pub prompts: Mutex<Vec<(String, String)>>,
    }

    impl FakeGenerator {
        pub(crate) fn new(provider: &'static str, reply: &str) -> Self {
            Self {
                provider,
                failures: 0,
                error: BackendError::Timeout(Duration::from_millis(10)),
                reply: reply.to_string(),
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(provider: &'static str, failures: u32) -> Self {
            Self {
                failures,
                ..Self::new(provider, "Recovered summary.")
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        fn provider(&self) -> &str {
            self.provider
        }

        async fn generate(
            &self,
            prompt: &str,
            params: &GenerationParams,
        ) -> Result<String, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts
                .lock()
                .unwrap()
                .push((params.model.clone(), prompt.to_string()));
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(self.reply.clone())
            }
        }
    }

    pub(crate) const ARTICLE: &str = "The council approved a new transport budget on Monday. \
        Bus fares will stay frozen for two years. Members argued the tram network needs more money. \
        The mayor called the plan balanced. Businesses welcomed longer night services. \
        Critics pointed to rising maintenance costs. A cycling consultation opens in spring. \
        Officials expect ridership to recover soon. Station accessibility funding was doubled. \
        The council called the budget a turning point.";

    pub(crate) async fn seeded_registry() -> Arc<ModelRegistry> {
        let db = Database::in_memory().await.unwrap();
        let registry = Arc::new(ModelRegistry::new(Arc::new(db), Duration::from_secs(600)));
        registry
            .seed_defaults(default_catalogue("fast-model", "quality-model"))
            .await
            .unwrap();
        registry
    }

    fn engine(registry: Arc<ModelRegistry>) -> SummarizationEngine {
        SummarizationEngine::new(
            registry,
            EngineConfig {
                retry: RetryPolicy::immediate(3),
                ..EngineConfig::default()
            },
        )
    }

    pub(crate) async fn quality_selection(registry: &ModelRegistry) -> ModelSelection {
        let variant = registry
            .get_active_model(ModelType::Abstractive)
            .await
            .unwrap()
            .unwrap();
        ModelSelection {
            provider: variant.provider.clone(),
            model_id: variant.backend_model_id.clone(),
            estimated_cost: 0.0,
            route: Route::Quality,
            variant_id: Some(variant.id),
            model_version: variant.version_label(),
        }
    }

    #[tokio::test]
    async fn test_three_failures_degrade_to_extractive() {
        let registry = seeded_registry().await;
        let openai = Arc::new(FakeGenerator::failing("openai", u32::MAX));
        let ollama = Arc::new(FakeGenerator::failing("ollama", u32::MAX));
        let engine = engine(registry.clone())
            .with_generator(openai.clone())
            .with_generator(ollama.clone());

        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short);
        let selection = quality_selection(&registry).await;
        let output = engine.summarize(ARTICLE, &config, &selection).await.unwrap();

        assert_eq!(output.method, "abstractive (fallback)");
        assert!(output.method.ends_with("(fallback)"));
        assert!(output.degraded);
        assert_eq!(openai.calls(), 3);
        // The registry fallback is tried exactly once.
        assert_eq!(ollama.calls(), 1);
        assert!(!output.summary.is_empty());
    }

    #[tokio::test]
    async fn test_label_only_replies_degrade_to_extractive() {
        let registry = seeded_registry().await;
        let openai = Arc::new(FakeGenerator::new("openai", "Summary:"));
        let ollama = Arc::new(FakeGenerator::new("ollama", "Here is a summary:"));
        let engine = engine(registry.clone())
            .with_generator(openai.clone())
            .with_generator(ollama.clone());

        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short);
        let selection = quality_selection(&registry).await;
        let output = engine.summarize(ARTICLE, &config, &selection).await.unwrap();

        assert_eq!(output.method, "abstractive (fallback)");
        assert!(output.degraded);
        assert_eq!(openai.calls(), 3);
        assert_eq!(ollama.calls(), 1);
        assert!(!engine.postprocessor().polish(&output.summary, &config).is_empty());
    }

    #[tokio::test]
    async fn test_registry_fallback_serves_request() {
        let registry = seeded_registry().await;
        let openai = Arc::new(FakeGenerator::failing("openai", u32::MAX));
        let ollama = Arc::new(FakeGenerator::new("ollama", "Fallback summary."));
        let engine = engine(registry.clone())
            .with_generator(openai.clone())
            .with_generator(ollama.clone());

        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short);
        let selection = quality_selection(&registry).await;
        let output = engine.summarize(ARTICLE, &config, &selection).await.unwrap();

        assert_eq!(output.method, "abstractive");
        assert_eq!(output.summary, "Fallback summary.");
        assert!(output.model_version.starts_with("fast-abstractive"));
        assert_eq!(ollama.prompts.lock().unwrap()[0].0, "fast-model");
        // The fallback is now the active abstractive variant.
        let active = registry
            .get_active_model(ModelType::Abstractive)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Some(active.id), output.variant_id);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let registry = seeded_registry().await;
        let mut failing = FakeGenerator::failing("openai", u32::MAX);
        failing.error = BackendError::Unauthorized("invalid api key".to_string());
        let openai = Arc::new(failing);
        let engine = engine(registry.clone()).with_generator(openai.clone());

        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short);
        let selection = quality_selection(&registry).await;
        let output = engine.summarize(ARTICLE, &config, &selection).await.unwrap();

        assert_eq!(openai.calls(), 1);
        // No ollama client is configured, so the fallback is unusable.
        assert!(output.degraded);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let registry = seeded_registry().await;
        let openai = Arc::new(FakeGenerator::failing("openai", 2));
        let engine = engine(registry.clone()).with_generator(openai.clone());

        let config = SummarizationConfig::new(Mode::Paraphrase, LengthPreset::Medium)
            .with_intent(Intent::Paraphrase);
        let selection = quality_selection(&registry).await;
        let output = engine.summarize(ARTICLE, &config, &selection).await.unwrap();

        assert_eq!(output.method, "paraphrase");
        assert_eq!(output.summary, "Recovered summary.");
        assert_eq!(openai.calls(), 3);
        let prompts = openai.prompts.lock().unwrap();
        assert!(prompts[2].1.contains("TEXT (TO BE REWRITTEN)"));
    }

    #[tokio::test]
    async fn test_extractive_needs_no_backend() {
        let registry = seeded_registry().await;
        let engine = engine(registry);
        let config = SummarizationConfig::new(Mode::Extractive, LengthPreset::Short);
        let selection = ModelSelection {
            provider: "local".to_string(),
            model_id: "tfidf-centroid".to_string(),
            estimated_cost: 0.0,
            route: Route::Local,
            variant_id: None,
            model_version: "tfidf-centroid:builtin".to_string(),
        };
        let output = engine.summarize(ARTICLE, &config, &selection).await.unwrap();
        assert_eq!(output.method, "extractive");
        assert!(!output.degraded);
    }

    #[tokio::test]
    async fn test_empty_input_is_a_processing_error() {
        let registry = seeded_registry().await;
        let engine = engine(registry.clone());
        let config = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Short);
        let selection = quality_selection(&registry).await;
        let err = engine.summarize("   ", &config, &selection).await.unwrap_err();
        assert!(matches!(err, SummarizeError::Processing { .. }));
    }
}
