use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use super::{extractive, SummarizationEngine};
use crate::config::{LengthPreset, SummarizationConfig};
use crate::llm::{BackendError, GenerationParams, TextGenerator};
use crate::prompt::{chunk_summary_prompt, combine_summaries_prompt};
use crate::text::{split_sentences, ProcessedDocument};
use crate::TARGET_ENGINE;

/// Reduction rounds before the final combine, whatever the input size.
const MAX_REDUCE_ROUNDS: usize = 3;

/// Packs sentences greedily into chunks of at most `max_chars` characters.
/// A sentence longer than the limit becomes a chunk of its own.
pub fn chunk_sentences(sentences: &[String], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for sentence in sentences {
        let chars = sentence.chars().count();
        if !current.is_empty() && current_chars + 1 + chars > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_chars += 1;
        }
        current.push_str(sentence);
        current_chars += chars;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl SummarizationEngine {
    /// Long inputs are summarized chunk by chunk and the partial summaries
    /// reduced until they fit in one call. Short inputs are first cut down
    /// extractively and the extract is rewritten.
    pub(crate) async fn hybrid_generate(
        &self,
        generator: Arc<dyn TextGenerator>,
        params: GenerationParams,
        text: &str,
        doc: &ProcessedDocument,
        config: &SummarizationConfig,
    ) -> Result<String, BackendError> {
        let chunk_chars = self.config.hybrid_chunk_chars.max(1);

        if text.chars().count() <= chunk_chars {
            let mut digest_config = config.clone();
            digest_config.length = LengthPreset::Long;
            let digest = extractive::summarize(doc, &digest_config);
            debug!(target: TARGET_ENGINE, "Hybrid: rewriting {}-sentence extract", digest.selected.len());
            let prompt = combine_summaries_prompt(&digest.text, doc.word_count, config);
            return generator.generate(&prompt, &params).await;
        }

        let mut chunks = chunk_sentences(&doc.sentences, chunk_chars);
        for round in 0..MAX_REDUCE_ROUNDS {
            debug!(target: TARGET_ENGINE, "Hybrid round {}: summarizing {} chunks", round + 1, chunks.len());
            let total = chunks.len();
            let calls = chunks.iter().enumerate().map(|(index, chunk)| {
                let prompt = chunk_summary_prompt(chunk, index, total, config);
                let generator = generator.clone();
                let params = params.clone();
                async move { generator.generate(&prompt, &params).await }
            });
            let partials = join_all(calls)
                .await
                .into_iter()
                .collect::<Result<Vec<String>, BackendError>>()?;

            let combined = partials.join("\n\n");
            if combined.chars().count() <= chunk_chars || round + 1 == MAX_REDUCE_ROUNDS {
                let prompt = combine_summaries_prompt(&combined, doc.word_count, config);
                return generator.generate(&prompt, &params).await;
            }
            let sentences: Vec<String> = partials.iter().flat_map(|p| split_sentences(p)).collect();
            chunks = chunk_sentences(&sentences, chunk_chars);
        }

        // MAX_REDUCE_ROUNDS is non-zero, so the loop always returns.
        Err(BackendError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::engine::tests::{quality_selection, seeded_registry, FakeGenerator};
    use crate::engine::EngineConfig;
    use crate::llm::RetryPolicy;

    fn sentences(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect()
    }

    #[test]
    fn test_chunks_respect_limit_and_order() {
        let input = sentences(40);
        let chunks = chunk_sentences(&input, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 200);
        }
        assert_eq!(chunks.join(" "), input.join(" "));
    }

    #[test]
    fn test_oversized_sentence_is_its_own_chunk() {
        let input = vec!["short.".to_string(), "x".repeat(50), "tail.".to_string()];
        let chunks = chunk_sentences(&input, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 50);
    }

    #[tokio::test]
    async fn test_long_input_is_mapped_then_reduced() {
        let registry = seeded_registry().await;
        let generator = Arc::new(FakeGenerator::new("openai", "A partial summary."));
        let engine = SummarizationEngine::new(
            registry.clone(),
            EngineConfig {
                retry: RetryPolicy::immediate(3),
                hybrid_chunk_chars: 300,
                ..EngineConfig::default()
            },
        )
        .with_generator(generator.clone());

        let text = sentences(30).join(" ");
        let config = SummarizationConfig::new(Mode::Hybrid, LengthPreset::Medium);
        let selection = quality_selection(&registry).await;
        let output = engine.summarize(&text, &config, &selection).await.unwrap();

        assert_eq!(output.method, "hybrid");
        let chunk_count = chunk_sentences(&split_sentences(&text), 300).len();
        // One call per chunk plus the final combine.
        assert_eq!(generator.calls() as usize, chunk_count + 1);
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts.last().unwrap().1.contains("Rewrite these notes"));
    }

    #[tokio::test]
    async fn test_short_input_rewrites_extract() {
        let registry = seeded_registry().await;
        let generator = Arc::new(FakeGenerator::new("openai", "Rewritten extract."));
        let engine = SummarizationEngine::new(registry.clone(), EngineConfig::default())
            .with_generator(generator.clone());

        let config = SummarizationConfig::new(Mode::Hybrid, LengthPreset::Short);
        let selection = quality_selection(&registry).await;
        let output = engine
            .summarize(crate::engine::tests::ARTICLE, &config, &selection)
            .await
            .unwrap();
        assert_eq!(output.summary, "Rewritten extract.");
        assert_eq!(generator.calls(), 1);
    }
}
