//! Reference-free quality heuristics. These are lexical approximations,
//! not semantic judgements.

use std::collections::HashSet;

use crate::text::{content_tokens, extract_entities, split_sentences, words};

/// Leading summary sentences checked for support in the source.
const FACT_CHECK_SENTENCES: usize = 3;
/// Share of a summary sentence's terms a source sentence must contain.
const SUPPORT_THRESHOLD: f64 = 0.5;

fn token_set(text: &str) -> HashSet<String> {
    content_tokens(text).into_iter().collect()
}

fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Jaccard similarity of the two texts' content terms. Stands in for a
/// semantic similarity score.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    jaccard_sets(&token_set(a), &token_set(b))
}

/// Mean term overlap between adjacent sentences. A single sentence is
/// trivially coherent.
pub fn coherence(sentences: &[String]) -> f64 {
    match sentences.len() {
        0 => 0.0,
        1 => 1.0,
        _ => {
            let sets: Vec<HashSet<String>> = sentences.iter().map(|s| token_set(s)).collect();
            let total: f64 = sets.windows(2).map(|pair| jaccard_sets(&pair[0], &pair[1])).sum();
            total / (sets.len() - 1) as f64
        }
    }
}

/// Share of the source's named entities that the summary mentions. An
/// entity counts only when all of its words appear as a contiguous run of
/// whole summary words.
pub fn entity_preservation(source_sentences: &[String], summary: &str) -> f64 {
    let source_entities: HashSet<Vec<String>> = extract_entities(source_sentences)
        .into_iter()
        .map(|e| words(&e.text))
        .filter(|w| !w.is_empty())
        .collect();
    if source_entities.is_empty() {
        return 1.0;
    }
    let summary_words = words(summary);
    let kept = source_entities
        .iter()
        .filter(|entity| {
            summary_words
                .windows(entity.len())
                .any(|run| run == entity.as_slice())
        })
        .count();
    kept as f64 / source_entities.len() as f64
}

/// Share of the leading summary sentences that are supported by some source
/// sentence, meaning that sentence contains more than half of their terms.
pub fn factual_consistency(source_sentences: &[String], summary_sentences: &[String]) -> f64 {
    let source_sets: Vec<HashSet<String>> = source_sentences.iter().map(|s| token_set(s)).collect();
    let checked: Vec<HashSet<String>> = summary_sentences
        .iter()
        .take(FACT_CHECK_SENTENCES)
        .map(|s| token_set(s))
        .filter(|set| !set.is_empty())
        .collect();
    if checked.is_empty() {
        return 0.0;
    }

    let supported = checked
        .iter()
        .filter(|claim| {
            source_sets.iter().any(|source| {
                let shared = claim.intersection(source).count();
                shared as f64 / claim.len() as f64 > SUPPORT_THRESHOLD
            })
        })
        .count();
    supported as f64 / checked.len() as f64
}

fn syllables(word: &str) -> usize {
    let lower = word.to_lowercase();
    let mut count = 0;
    let mut previous_vowel = false;
    for c in lower.chars() {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }
    // Silent final "e", as in "make".
    if lower.ends_with('e') && !lower.ends_with("le") && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Flesch reading ease mapped from 0..100 to 0..1.
pub fn readability(text: &str) -> f64 {
    let tokens = words(text);
    let sentence_count = split_sentences(text).len();
    if tokens.is_empty() || sentence_count == 0 {
        return 0.0;
    }
    let word_count = tokens.len() as f64;
    let syllable_count: usize = tokens.iter().map(|w| syllables(w)).sum();
    let ease = 206.835
        - 1.015 * (word_count / sentence_count as f64)
        - 84.6 * (syllable_count as f64 / word_count);
    (ease / 100.0).clamp(0.0, 1.0)
}

/// 1.0 when the summary keeps 20-40% of the source words, falling off
/// linearly on both sides.
pub fn compression_score(ratio: f64) -> f64 {
    if ratio <= 0.0 {
        0.0
    } else if ratio < 0.2 {
        ratio / 0.2
    } else if ratio <= 0.4 {
        1.0
    } else {
        (1.0 - (ratio - 0.4) / 0.6).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(text: &str) -> Vec<String> {
        split_sentences(text)
    }

    #[test]
    fn test_syllable_heuristic() {
        assert_eq!(syllables("cat"), 1);
        assert_eq!(syllables("make"), 1);
        assert_eq!(syllables("table"), 2);
        assert_eq!(syllables("education"), 4);
    }

    #[test]
    fn test_simple_text_reads_easier() {
        let simple = readability("The cat sat. The dog ran. We had fun.");
        let dense = readability(
            "Institutional considerations notwithstanding, comprehensive deliberation \
             regarding infrastructural modernization necessitates extraordinary collaboration.",
        );
        assert!(simple > dense);
        assert!((0.0..=1.0).contains(&simple));
        assert!((0.0..=1.0).contains(&dense));
    }

    #[test]
    fn test_entity_preservation() {
        let source = sentences("Officials in Paris met the World Bank delegation. Talks went well.");
        assert_eq!(entity_preservation(&source, "Paris hosted the World Bank."), 1.0);
        assert_eq!(entity_preservation(&source, "A meeting happened."), 0.0);
        assert_eq!(entity_preservation(&sentences("nothing named here."), "x"), 1.0);
    }

    #[test]
    fn test_entity_preservation_matches_whole_words() {
        let source = sentences("Visitors praised the Art in the gallery. Crowds were large.");
        assert_eq!(entity_preservation(&source, "The start was slow."), 0.0);
        assert_eq!(entity_preservation(&source, "Everyone liked the art."), 1.0);
    }

    #[test]
    fn test_factual_consistency() {
        let source = sentences(
            "The council approved the transport budget on Monday. Fares will stay frozen.",
        );
        let supported = sentences("The council approved the transport budget. Fares stay frozen.");
        assert_eq!(factual_consistency(&source, &supported), 1.0);
        let invented = sentences("Aliens landed in the harbour yesterday.");
        assert_eq!(factual_consistency(&source, &invented), 0.0);
    }

    #[test]
    fn test_coherence_and_similarity() {
        assert_eq!(coherence(&sentences("Just one sentence.")), 1.0);
        let linked = coherence(&sentences("The budget grew. The budget grew again."));
        let unrelated = coherence(&sentences("The budget grew. Penguins swim fast."));
        assert!(linked > unrelated);
        assert_eq!(jaccard_similarity("budget vote", "budget vote"), 1.0);
    }

    #[test]
    fn test_compression_band() {
        assert_eq!(compression_score(0.3), 1.0);
        assert_eq!(compression_score(0.2), 1.0);
        assert!((compression_score(0.1) - 0.5).abs() < 1e-9);
        assert!(compression_score(0.7) < 1.0);
        assert_eq!(compression_score(1.0), 0.0);
    }
}
