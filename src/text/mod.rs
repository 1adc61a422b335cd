//! Approximate lexical analysis shared by the extractive engine, the
//! post-processor and the evaluation engine.
//!
//! Sentence splitting, stemming and entity spotting here are heuristics,
//! not a general NLP toolkit.

pub mod document;
pub mod embedding;
pub mod entities;
pub mod segment;
pub mod tokenize;

pub use document::ProcessedDocument;
pub use embedding::{centroid, cosine_similarity, TfIdf};
pub use entities::{extract_entities, Entity, EntityType};
pub use segment::split_sentences;
pub use tokenize::{content_tokens, is_stop_word, words};

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// ISO 639-3 code of the text's language, when detection is reliable.
pub fn detect_language(text: &str) -> Option<String> {
    whatlang::detect(text)
        .filter(|info| info.is_reliable())
        .map(|info| info.lang().code().to_string())
}

/// Number of whitespace separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
