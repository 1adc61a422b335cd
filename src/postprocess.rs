//! Cleanup applied to every summary before evaluation.

use lazy_static::lazy_static;
use regex::Regex;
use strsim::jaro_winkler;
use tracing::debug;

use crate::config::{OutputFormat, SummarizationConfig};
use crate::text::{split_sentences, word_count};
use crate::TARGET_ENGINE;

lazy_static! {
    static ref PREAMBLE: Regex = Regex::new(
        r"(?i)^\s*(?:(?:sure|certainly|okay)[,!.]?\s*)?(?:here(?:'s| is| are)|below is|the following is)\b[^:\n]{0,80}:\s*"
    )
    .expect("preamble regex is valid");
    static ref LABEL: Regex =
        Regex::new(r"(?i)^\s*(?:summary|tl;dr|paraphrase)\s*:\s*").expect("label regex is valid");
    static ref LIST_MARKER: Regex =
        Regex::new(r"(?m)^\s*(?:[-*•‣·]|\d{1,2}[.)])\s+").expect("list marker regex is valid");
    static ref SPACE_BEFORE_PUNCT: Regex =
        Regex::new(r"\s+([,.;:!?])").expect("punctuation spacing regex is valid");
    static ref REPEATED_TERMINAL: Regex =
        Regex::new(r"[,;:]*([.!?])[,;:.!?]*").expect("terminal punctuation regex is valid");
    static ref REPEATED_SEPARATOR: Regex =
        Regex::new(r"([,;:])[,;:]+").expect("separator regex is valid");
    static ref NON_ALNUM: Regex = Regex::new(r"[^\p{L}\p{N}]+").expect("normalize regex is valid");
}

#[derive(Debug, Clone)]
pub struct PostProcessor {
    /// Jaro-Winkler similarity at which a sentence counts as a repeat.
    pub duplicate_threshold: f64,
    pub sentences_per_paragraph: usize,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.92,
            sentences_per_paragraph: 4,
        }
    }
}

impl PostProcessor {
    pub fn polish(&self, summary: &str, config: &SummarizationConfig) -> String {
        let cleaned = clean_artifacts(summary);
        let sentences: Vec<String> = split_sentences(&cleaned)
            .into_iter()
            .map(|s| capitalize_first(&s))
            .collect();
        let sentences = self.remove_redundancy(sentences);
        let sentences = enforce_max_length(sentences, config.max_length);

        if let Some(min) = config.min_length {
            let words: usize = sentences.iter().map(|s| word_count(s)).sum();
            if words < min {
                debug!(target: TARGET_ENGINE, "Summary has {} words, below the requested minimum of {}", words, min);
            }
        }

        self.format(&sentences, config.output_format)
    }

    /// Drops sentences that nearly repeat an earlier one.
    pub fn remove_redundancy(&self, sentences: Vec<String>) -> Vec<String> {
        let mut kept: Vec<(String, String)> = Vec::with_capacity(sentences.len());
        for sentence in sentences {
            let normalized = normalize(&sentence);
            if normalized.is_empty() {
                continue;
            }
            let duplicate = kept
                .iter()
                .any(|(_, seen)| jaro_winkler(seen, &normalized) >= self.duplicate_threshold);
            if duplicate {
                debug!(target: TARGET_ENGINE, "Dropping repeated sentence: {}", sentence);
            } else {
                kept.push((sentence, normalized));
            }
        }
        kept.into_iter().map(|(sentence, _)| sentence).collect()
    }

    fn format(&self, sentences: &[String], format: OutputFormat) -> String {
        match format {
            OutputFormat::Bullets => sentences
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n"),
            OutputFormat::Paragraphs => sentences
                .chunks(self.sentences_per_paragraph.max(1))
                .map(|group| group.join(" "))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// Removes model chatter, list markers and punctuation glitches, and
/// flattens the text to one line.
pub fn clean_artifacts(text: &str) -> String {
    let text = PREAMBLE.replace(text, "");
    let text = LABEL.replace(&text, "");
    // Each list item becomes its own sentence.
    let text = LIST_MARKER.replace_all(&text, "\n");
    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.ends_with(|c: char| matches!(c, '.' | '!' | '?' | '"' | '\'')) {
                line.to_string()
            } else {
                format!("{}.", line.trim_end_matches([',', ';', ':']))
            }
        })
        .collect();
    let text = crate::text::collapse_whitespace(&lines.join(" "));
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = REPEATED_SEPARATOR.replace_all(&text, "$1");
    REPEATED_TERMINAL.replace_all(&text, "$1").into_owned()
}

fn capitalize_first(sentence: &str) -> String {
    let mut chars = sentence.chars();
    match chars.next() {
        Some(first) if first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => sentence.to_string(),
    }
}

fn normalize(sentence: &str) -> String {
    NON_ALNUM
        .replace_all(&sentence.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Keeps whole sentences while they fit in `max_words`. If even the first
/// sentence is too long it is cut at a word boundary and closed with a period.
pub fn enforce_max_length(sentences: Vec<String>, max_words: Option<usize>) -> Vec<String> {
    let Some(max_words) = max_words else {
        return sentences;
    };

    let mut kept = Vec::new();
    let mut total = 0;
    for sentence in sentences {
        let words = word_count(&sentence);
        if total + words <= max_words {
            total += words;
            kept.push(sentence);
            continue;
        }
        if kept.is_empty() {
            let cut: Vec<&str> = sentence.split_whitespace().take(max_words).collect();
            let joined = cut.join(" ");
            let trimmed = joined.trim_end_matches(|c: char| !c.is_alphanumeric());
            kept.push(format!("{}.", trimmed));
        }
        break;
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LengthPreset, Mode};

    fn config() -> SummarizationConfig {
        SummarizationConfig::new(Mode::Abstractive, LengthPreset::Medium)
    }

    #[test]
    fn test_preamble_and_spacing_are_removed() {
        let polished = PostProcessor::default().polish(
            "Here is a summary of the article:  the budget passed , with  a small majority..",
            &config(),
        );
        assert_eq!(polished, "The budget passed, with a small majority.");
    }

    #[test]
    fn test_list_markers_become_sentences() {
        let polished = PostProcessor::default().polish(
            "- Fares are frozen\n- Night buses run longer\n* Cycling lanes are planned",
            &config(),
        );
        assert_eq!(
            polished,
            "Fares are frozen. Night buses run longer. Cycling lanes are planned."
        );
    }

    #[test]
    fn test_near_duplicates_are_dropped() {
        let polished = PostProcessor::default().polish(
            "The council approved the budget on Monday. The council approved the budget on Monday! \
             Critics were unconvinced.",
            &config(),
        );
        assert_eq!(
            polished,
            "The council approved the budget on Monday. Critics were unconvinced."
        );
    }

    #[test]
    fn test_max_length_cuts_at_sentence_boundary() {
        let config = config().with_max_length(8);
        let polished = PostProcessor::default().polish(
            "Fares are frozen for two years. Night buses will run longer. Lanes are planned.",
            &config,
        );
        assert_eq!(polished, "Fares are frozen for two years.");
    }

    #[test]
    fn test_single_long_sentence_is_cut_at_word_boundary() {
        let kept = enforce_max_length(
            vec!["One two three four five six, seven eight.".to_string()],
            Some(6),
        );
        assert_eq!(kept, vec!["One two three four five six.".to_string()]);
    }

    #[test]
    fn test_output_formats() {
        let processor = PostProcessor::default();
        let text = "One. Two. Three. Four. Five.";
        let mut bullets = config();
        bullets.output_format = OutputFormat::Bullets;
        assert_eq!(
            processor.polish(text, &bullets),
            "- One.\n- Two.\n- Three.\n- Four.\n- Five."
        );
        assert_eq!(
            processor.polish(text, &config()),
            "One. Two. Three. Four.\n\nFive."
        );
    }
}
