//! Sentence scoring for extractive summaries.
//!
//! Each sentence gets a weighted score from five signals, all in [0, 1]:
//!
//! | signal   | weight | meaning                                               |
//! |----------|--------|-------------------------------------------------------|
//! | centroid | 0.35   | cosine similarity to the document's TF-IDF centroid   |
//! | position | 0.25   | early sentences first, with a boost for the last 10%  |
//! | length   | 0.15   | Gaussian around the average sentence length           |
//! | keyword  | 0.15   | share of focus keywords (or top terms) it contains    |
//! | entity   | 0.10   | named-entity density, relative to the densest sentence|
//!
//! The top K sentences are returned in document order.

use std::collections::{HashMap, HashSet};

use crate::config::SummarizationConfig;
use crate::text::{centroid, content_tokens, cosine_similarity, word_count, ProcessedDocument};

/// Backend id and version label used when no extractive variant is registered.
pub const BUILTIN_EXTRACTIVE_MODEL: &str = "tfidf-centroid";
pub const BUILTIN_EXTRACTIVE_VERSION: &str = "tfidf-centroid:builtin";

const CENTROID_WEIGHT: f64 = 0.35;
const POSITION_WEIGHT: f64 = 0.25;
const LENGTH_WEIGHT: f64 = 0.15;
const KEYWORD_WEIGHT: f64 = 0.15;
const ENTITY_WEIGHT: f64 = 0.10;

const CONCLUSION_BOOST: f64 = 0.15;
const TOP_TERMS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SentenceScore {
    pub index: usize,
    pub centroid: f64,
    pub position: f64,
    pub length: f64,
    pub keyword: f64,
    pub entity: f64,
}

impl SentenceScore {
    pub fn total(&self) -> f64 {
        self.centroid * CENTROID_WEIGHT
            + self.position * POSITION_WEIGHT
            + self.length * LENGTH_WEIGHT
            + self.keyword * KEYWORD_WEIGHT
            + self.entity * ENTITY_WEIGHT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractiveSummary {
    /// Indices into the document's sentences, ascending.
    pub selected: Vec<usize>,
    pub text: String,
}

/// Number of sentences to keep.
pub fn target_sentence_count(doc: &ProcessedDocument, config: &SummarizationConfig) -> usize {
    let n = doc.sentence_count();
    if n == 0 {
        return 0;
    }
    let k = match (config.length.sentence_percent(), config.max_length) {
        (Some(percent), _) => (n * percent).div_ceil(100),
        (None, Some(max_words)) => {
            let average = doc.average_sentence_words().max(1.0);
            (max_words as f64 / average).ceil() as usize
        }
        (None, None) => (n * 30).div_ceil(100),
    };
    k.clamp(1, n)
}

fn position_score(index: usize, n: usize) -> f64 {
    let relative = if n > 1 {
        index as f64 / (n - 1) as f64
    } else {
        0.0
    };
    let mut score = (-2.0 * relative).exp();
    if relative >= 0.9 {
        score += CONCLUSION_BOOST;
    }
    score.min(1.0)
}

fn length_score(words: usize, mean: f64) -> f64 {
    let sigma = (mean * 0.5).max(1.0);
    let delta = words as f64 - mean;
    (-(delta * delta) / (2.0 * sigma * sigma)).exp()
}

/// Stemmed focus keywords, or the document's most frequent terms when the
/// caller gave none.
fn keyword_set(doc: &ProcessedDocument, config: &SummarizationConfig) -> HashSet<String> {
    if !config.focus_keywords.is_empty() {
        return config
            .focus_keywords
            .iter()
            .flat_map(|k| content_tokens(k))
            .collect();
    }

    let mut frequency: HashMap<&str, usize> = HashMap::new();
    for token in doc.tokens.iter().flatten() {
        *frequency.entry(token.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(&str, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(TOP_TERMS)
        .map(|(term, _)| term.to_string())
        .collect()
}

pub fn score_sentences(doc: &ProcessedDocument, config: &SummarizationConfig) -> Vec<SentenceScore> {
    let n = doc.sentence_count();
    if n == 0 {
        return Vec::new();
    }

    let center = centroid(&doc.embeddings);
    let mean_words = doc.average_sentence_words();
    let keywords = keyword_set(doc, config);

    let densities: Vec<f64> = (0..n)
        .map(|i| {
            let words = word_count(&doc.sentences[i]).max(1);
            doc.entities_in(i).count() as f64 / words as f64
        })
        .collect();
    let max_density = densities.iter().cloned().fold(0.0f64, f64::max);

    (0..n)
        .map(|i| {
            let centroid_score = doc
                .embeddings
                .get(i)
                .map(|v| f64::from(cosine_similarity(v, &center)).clamp(0.0, 1.0))
                .unwrap_or(0.0);

            let keyword_score = if keywords.is_empty() {
                0.0
            } else {
                let present: HashSet<&String> = doc.tokens[i].iter().collect();
                let hits = keywords.iter().filter(|k| present.contains(k)).count();
                if config.focus_keywords.is_empty() {
                    // Top terms: a sentence needs only a few to be on topic.
                    (hits as f64 / 3.0).min(1.0)
                } else {
                    hits as f64 / keywords.len() as f64
                }
            };

            SentenceScore {
                index: i,
                centroid: centroid_score,
                position: position_score(i, n),
                length: length_score(word_count(&doc.sentences[i]), mean_words),
                keyword: keyword_score,
                entity: if max_density > 0.0 {
                    densities[i] / max_density
                } else {
                    0.0
                },
            }
        })
        .collect()
}

pub fn summarize(doc: &ProcessedDocument, config: &SummarizationConfig) -> ExtractiveSummary {
    let k = target_sentence_count(doc, config);
    let mut scores = score_sentences(doc, config);
    scores.sort_by(|a, b| {
        b.total()
            .partial_cmp(&a.total())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.index.cmp(&b.index))
    });

    let mut selected: Vec<usize> = scores.into_iter().take(k).map(|s| s.index).collect();
    selected.sort_unstable();

    let text = selected
        .iter()
        .map(|&i| doc.sentences[i].as_str())
        .collect::<Vec<_>>()
        .join(" ");

    ExtractiveSummary { selected, text }
}
