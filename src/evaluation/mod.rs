//! Summary quality scoring.
//!
//! Reference-based scores (ROUGE, BLEU) are only computed when a reference
//! summary is supplied and are 0 otherwise. The overall score uses fixed
//! weights; `confidence` renormalizes the same weighted sum over the metrics
//! that were actually computed, so reference-free evaluations are not
//! penalized for the missing reference.

pub mod heuristics;
pub mod ngram;

use serde::{Deserialize, Serialize};

use crate::text::{split_sentences, word_count, words};
use crate::types::SummaryMetrics;
use heuristics::{
    coherence, compression_score, entity_preservation, factual_consistency, jaccard_similarity,
    readability,
};
use ngram::{bleu, rouge_l, rouge_n};

const ROUGE_WEIGHT: f64 = 0.20;
const BLEU_WEIGHT: f64 = 0.10;
const SEMANTIC_WEIGHT: f64 = 0.15;
const COHERENCE_WEIGHT: f64 = 0.15;
const ENTITY_WEIGHT: f64 = 0.10;
const FACTUAL_WEIGHT: f64 = 0.15;
const READABILITY_WEIGHT: f64 = 0.05;
const COMPRESSION_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub metrics: SummaryMetrics,
    pub entity_preservation: f64,
    pub factual_consistency: f64,
    pub overall_score: f64,
    pub confidence: f64,
}

pub fn evaluate_summary(source: &str, summary: &str, reference: Option<&str>) -> EvaluationResult {
    let source_sentences = split_sentences(source);
    let summary_sentences = split_sentences(summary);

    let source_words = word_count(source);
    let summary_words = word_count(summary);
    let compression_ratio = if source_words == 0 {
        0.0
    } else {
        summary_words as f64 / source_words as f64
    };

    let mut metrics = SummaryMetrics {
        compression_ratio,
        word_count: summary_words,
        sentence_count: summary_sentences.len(),
        readability: readability(summary),
        coherence: coherence(&summary_sentences),
        semantic_similarity: jaccard_similarity(source, summary),
        ..SummaryMetrics::default()
    };

    let reference = reference.filter(|r| !r.trim().is_empty());
    if let Some(reference) = reference {
        let candidate = words(summary);
        let reference = words(reference);
        metrics.rouge1 = rouge_n(&candidate, &reference, 1);
        metrics.rouge2 = rouge_n(&candidate, &reference, 2);
        metrics.rouge_l = rouge_l(&candidate, &reference);
        metrics.bleu = bleu(&candidate, &reference);
    }

    let entity_preservation = entity_preservation(&source_sentences, summary);
    let factual_consistency = factual_consistency(&source_sentences, &summary_sentences);

    let mut weighted = metrics.semantic_similarity * SEMANTIC_WEIGHT
        + metrics.coherence * COHERENCE_WEIGHT
        + entity_preservation * ENTITY_WEIGHT
        + factual_consistency * FACTUAL_WEIGHT
        + metrics.readability * READABILITY_WEIGHT
        + compression_score(compression_ratio) * COMPRESSION_WEIGHT;
    let mut computed_weight = SEMANTIC_WEIGHT
        + COHERENCE_WEIGHT
        + ENTITY_WEIGHT
        + FACTUAL_WEIGHT
        + READABILITY_WEIGHT
        + COMPRESSION_WEIGHT;
    if reference.is_some() {
        let rouge = (metrics.rouge1 + metrics.rouge2 + metrics.rouge_l) / 3.0;
        weighted += rouge * ROUGE_WEIGHT + metrics.bleu * BLEU_WEIGHT;
        computed_weight += ROUGE_WEIGHT + BLEU_WEIGHT;
    }

    EvaluationResult {
        metrics,
        entity_preservation,
        factual_consistency,
        overall_score: weighted.clamp(0.0, 1.0),
        confidence: (weighted / computed_weight).clamp(0.0, 1.0),
    }
}
