//! Reference-based overlap scores. All inputs are pre-tokenized words.

use std::collections::HashMap;

const MAX_BLEU_ORDER: usize = 4;

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Candidate n-grams that also occur in the reference, clipped by the
/// reference count.
fn clipped_matches(candidate: &[String], reference: &[String], n: usize) -> (usize, usize, usize) {
    let candidate_counts = ngram_counts(candidate, n);
    let reference_counts = ngram_counts(reference, n);
    let matches = candidate_counts
        .iter()
        .map(|(gram, count)| (*count).min(reference_counts.get(gram).copied().unwrap_or(0)))
        .sum();
    let candidate_total = candidate.len().saturating_sub(n - 1);
    let reference_total = reference.len().saturating_sub(n - 1);
    (matches, candidate_total, reference_total)
}

/// ROUGE-N recall.
pub fn rouge_n(candidate: &[String], reference: &[String], n: usize) -> f64 {
    let (matches, _, reference_total) = clipped_matches(candidate, reference, n);
    if reference_total == 0 {
        return 0.0;
    }
    matches as f64 / reference_total as f64
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// ROUGE-L recall: longest common subsequence over reference length.
pub fn rouge_l(candidate: &[String], reference: &[String]) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    lcs_length(candidate, reference) as f64 / reference.len() as f64
}

/// Sentence BLEU with up to 4-gram precision, brevity penalty and add-one
/// smoothing for orders above one.
pub fn bleu(candidate: &[String], reference: &[String]) -> f64 {
    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }
    let max_order = MAX_BLEU_ORDER.min(candidate.len());

    let mut log_sum = 0.0;
    for n in 1..=max_order {
        let (matches, candidate_total, _) = clipped_matches(candidate, reference, n);
        let precision = if n == 1 {
            if matches == 0 {
                return 0.0;
            }
            matches as f64 / candidate_total as f64
        } else {
            (matches as f64 + 1.0) / (candidate_total as f64 + 1.0)
        };
        log_sum += precision.ln();
    }
    let geometric_mean = (log_sum / max_order as f64).exp();

    let c = candidate.len() as f64;
    let r = reference.len() as f64;
    let brevity_penalty = if c > r { 1.0 } else { (1.0 - r / c).exp() };

    (brevity_penalty * geometric_mean).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::words;

    #[test]
    fn test_identical_text_scores_one() {
        let tokens = words("the cat sat on the mat today");
        assert_eq!(rouge_n(&tokens, &tokens, 1), 1.0);
        assert_eq!(rouge_n(&tokens, &tokens, 2), 1.0);
        assert_eq!(rouge_l(&tokens, &tokens), 1.0);
        assert!((bleu(&tokens, &tokens) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_overlap() {
        let reference = words("the cat sat on the mat");
        let candidate = words("the cat lay on a mat");
        // the, cat, on, mat out of six reference unigrams.
        assert!((rouge_n(&candidate, &reference, 1) - 4.0 / 6.0).abs() < 1e-9);
        assert!((rouge_n(&candidate, &reference, 2) - 1.0 / 5.0).abs() < 1e-9);
        assert!((rouge_l(&candidate, &reference) - 4.0 / 6.0).abs() < 1e-9);
        let score = bleu(&candidate, &reference);
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_disjoint_and_empty() {
        let a = words("alpha beta gamma");
        let b = words("delta epsilon");
        assert_eq!(rouge_n(&a, &b, 1), 0.0);
        assert_eq!(bleu(&a, &b), 0.0);
        assert_eq!(rouge_l(&a, &[]), 0.0);
    }

    #[test]
    fn test_brevity_penalty() {
        let reference = words("one two three four five six seven eight");
        let short = words("one two three four");
        assert!(bleu(&short, &reference) < 0.5);
    }
}
