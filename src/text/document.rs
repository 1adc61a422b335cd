use super::embedding::TfIdf;
use super::entities::{extract_entities, Entity};
use super::segment::split_sentences;
use super::tokenize::content_tokens;

/// Everything the extractive engine needs to know about one input text.
/// Built once per request and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProcessedDocument {
    pub sentences: Vec<String>,
    pub tokens: Vec<Vec<String>>,
    pub entities: Vec<Entity>,
    pub embeddings: Vec<Vec<f32>>,
    /// ISO 639-3 code, when detection is reliable.
    pub language: Option<String>,
    pub word_count: usize,
}

impl ProcessedDocument {
    pub fn process(text: &str) -> Self {
        let sentences = split_sentences(text);
        let tokens: Vec<Vec<String>> = sentences.iter().map(|s| content_tokens(s)).collect();
        let entities = extract_entities(&sentences);

        let model = TfIdf::fit(&tokens);
        let embeddings = if model.dimensions() == 0 {
            Vec::new()
        } else {
            model.transform_all(&tokens)
        };

        let language = super::detect_language(text);

        Self {
            word_count: super::word_count(text),
            sentences,
            tokens,
            entities,
            embeddings,
            language,
        }
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn average_sentence_words(&self) -> f64 {
        if self.sentences.is_empty() {
            return 0.0;
        }
        let total: usize = self.sentences.iter().map(|s| super::word_count(s)).sum();
        total as f64 / self.sentences.len() as f64
    }

    /// Entities found in the given sentence.
    pub fn entities_in(&self, sentence_index: usize) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .filter(move |e| e.sentence_index == sentence_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_builds_parallel_structures() {
        let doc = ProcessedDocument::process(
            "The central bank raised interest rates on Tuesday. Markets in London fell \
             sharply after the announcement. Analysts expect further increases this year.",
        );
        assert_eq!(doc.sentence_count(), 3);
        assert_eq!(doc.tokens.len(), 3);
        assert_eq!(doc.embeddings.len(), 3);
        assert!(doc.entities.iter().any(|e| e.text == "London"));
        if let Some(language) = &doc.language {
            assert_eq!(language, "eng");
        }
        assert!(doc.average_sentence_words() > 5.0);
    }

    #[test]
    fn test_empty_document() {
        let doc = ProcessedDocument::process("");
        assert_eq!(doc.sentence_count(), 0);
        assert!(doc.embeddings.is_empty());
        assert_eq!(doc.average_sentence_words(), 0.0);
    }
}
