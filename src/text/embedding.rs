use std::collections::{BTreeMap, HashMap};

/// TF·IDF model fitted on the sentences of one document.
#[derive(Debug, Clone, Default)]
pub struct TfIdf {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f32>,
}

impl TfIdf {
    /// Builds the vocabulary and smoothed inverse document frequencies,
    /// treating each sentence as a document:
    /// `idf = ln((N + 1) / (df + 1)) + 1`.
    pub fn fit(sentence_tokens: &[Vec<String>]) -> Self {
        let mut vocabulary = BTreeMap::new();
        for tokens in sentence_tokens {
            for token in tokens {
                let next = vocabulary.len();
                vocabulary.entry(token.clone()).or_insert(next);
            }
        }

        let mut document_frequency = vec![0usize; vocabulary.len()];
        for tokens in sentence_tokens {
            let mut seen = vec![false; vocabulary.len()];
            for token in tokens {
                if let Some(&index) = vocabulary.get(token) {
                    if !seen[index] {
                        seen[index] = true;
                        document_frequency[index] += 1;
                    }
                }
            }
        }

        let n = sentence_tokens.len() as f32;
        let idf = document_frequency
            .iter()
            .map(|&df| ((n + 1.0) / (df as f32 + 1.0)).ln() + 1.0)
            .collect();

        Self { vocabulary, idf }
    }

    pub fn dimensions(&self) -> usize {
        self.vocabulary.len()
    }

    /// Term-frequency weighted vector for one sentence. Unknown terms are
    /// ignored; an empty sentence yields the zero vector.
    pub fn transform(&self, tokens: &[String]) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.vocabulary.len()];
        if tokens.is_empty() {
            return vector;
        }
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for token in tokens {
            if let Some(&index) = self.vocabulary.get(token) {
                *counts.entry(index).or_default() += 1;
            }
        }
        let length = tokens.len() as f32;
        for (index, count) in counts {
            vector[index] = (count as f32 / length) * self.idf[index];
        }
        vector
    }

    pub fn transform_all(&self, sentence_tokens: &[Vec<String>]) -> Vec<Vec<f32>> {
        sentence_tokens.iter().map(|t| self.transform(t)).collect()
    }
}

/// Mean of the given vectors. Empty input yields an empty vector.
pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f32; first.len()];
    for vector in vectors {
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
    }
    let count = vectors.len() as f32;
    sum.iter_mut().for_each(|v| *v /= count);
    sum
}

/// Cosine similarity, 0.0 when either vector has (near) zero magnitude or
/// the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < 1e-6 || mag_b < 1e-6 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let sentences = vec![
            toks(&["market", "rally"]),
            toks(&["market", "crash"]),
            toks(&["market", "open"]),
        ];
        let model = TfIdf::fit(&sentences);
        assert_eq!(model.dimensions(), 4);
        let weights: Vec<f32> = model
            .transform(&sentences[0])
            .into_iter()
            .filter(|w| *w > 0.0)
            .collect();
        assert_eq!(weights.len(), 2);
        // "rally" appears once in the corpus, "market" everywhere.
        assert!((weights[0] - weights[1]).abs() > 0.1);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_centroid_is_mean() {
        let c = centroid(&[vec![1.0, 3.0], vec![3.0, 5.0]]);
        assert_eq!(c, vec![2.0, 4.0]);
        assert!(centroid(&[]).is_empty());
    }
}
