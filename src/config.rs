//! Per-request summarization options.
//!
//! A [`SummarizationConfig`] is built from closed enums and checked once with
//! [`SummarizationConfig::validate`] before it enters the pipeline. Together
//! with the input text it fully determines the cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SummarizeError;

pub const MAX_FOCUS_KEYWORDS: usize = 20;
pub const MAX_KEYWORD_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Extractive,
    Abstractive,
    Hybrid,
    Paraphrase,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Extractive => "extractive",
            Mode::Abstractive => "abstractive",
            Mode::Hybrid => "hybrid",
            Mode::Paraphrase => "paraphrase",
        }
    }

    /// Whether this mode calls an external text-generation backend.
    pub fn uses_backend(&self) -> bool {
        !matches!(self, Mode::Extractive)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = SummarizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "extractive" => Ok(Mode::Extractive),
            "abstractive" => Ok(Mode::Abstractive),
            "hybrid" => Ok(Mode::Hybrid),
            "paraphrase" => Ok(Mode::Paraphrase),
            other => Err(SummarizeError::validation(format!("unknown mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Premium,
    Creative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Formal,
    Casual,
    Academic,
    Simple,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Neutral => "neutral",
            Tone::Formal => "formal",
            Tone::Casual => "casual",
            Tone::Academic => "academic",
            Tone::Simple => "simple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthPreset {
    Short,
    #[default]
    Medium,
    Long,
    Custom,
}

impl LengthPreset {
    /// Share of source sentences kept by extractive selection, in percent.
    pub fn sentence_percent(&self) -> Option<usize> {
        match self {
            LengthPreset::Short => Some(20),
            LengthPreset::Medium => Some(30),
            LengthPreset::Long => Some(50),
            LengthPreset::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Paragraphs,
    Bullets,
}

/// What the caller wants done with the text. Grammar and simplification are
/// cheap tasks and are routed to the fast backend for paid tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Summarize,
    Grammar,
    Simplify,
    Paraphrase,
    Expand,
}

impl Intent {
    pub fn is_simple(&self) -> bool {
        matches!(self, Intent::Grammar | Intent::Simplify)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizationConfig {
    pub mode: Mode,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub length: LengthPreset,
    /// Upper bound on summary length, in words.
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Advisory lower bound on summary length, in words.
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub focus_keywords: Vec<String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub intent: Option<Intent>,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Extractive,
            quality: Quality::Standard,
            tone: Tone::Neutral,
            length: LengthPreset::Medium,
            max_length: None,
            min_length: None,
            focus_keywords: Vec::new(),
            output_format: OutputFormat::Paragraphs,
            intent: None,
        }
    }
}

impl SummarizationConfig {
    pub fn new(mode: Mode, length: LengthPreset) -> Self {
        Self {
            mode,
            length,
            ..Default::default()
        }
    }

    pub fn with_max_length(mut self, words: usize) -> Self {
        self.max_length = Some(words);
        self
    }

    pub fn with_focus_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.focus_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Rejects combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<(), SummarizeError> {
        if self.length == LengthPreset::Custom && self.max_length.is_none() {
            return Err(SummarizeError::validation(
                "length 'custom' requires maxLength",
            ));
        }
        if self.max_length == Some(0) {
            return Err(SummarizeError::validation("maxLength must be greater than zero"));
        }
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(SummarizeError::validation(format!(
                    "minLength ({}) exceeds maxLength ({})",
                    min, max
                )));
            }
        }
        if self.focus_keywords.len() > MAX_FOCUS_KEYWORDS {
            return Err(SummarizeError::validation(format!(
                "at most {} focus keywords are allowed",
                MAX_FOCUS_KEYWORDS
            )));
        }
        for keyword in &self.focus_keywords {
            let trimmed = keyword.trim();
            if trimmed.is_empty() {
                return Err(SummarizeError::validation("focus keywords must not be blank"));
            }
            if trimmed.chars().count() > MAX_KEYWORD_CHARS {
                return Err(SummarizeError::validation(format!(
                    "focus keyword exceeds {} characters",
                    MAX_KEYWORD_CHARS
                )));
            }
        }
        Ok(())
    }

    /// Stable serialization used for cache keys: keywords are trimmed,
    /// lower-cased, sorted and de-duplicated so equivalent configs collide.
    pub fn fingerprint(&self) -> String {
        let mut canonical = self.clone();
        let mut keywords: Vec<String> = canonical
            .focus_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .collect();
        keywords.sort();
        keywords.dedup();
        canonical.focus_keywords = keywords;

        // Serializing a struct of enums, options and strings cannot fail.
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_length_requires_max_length() {
        let config = SummarizationConfig::new(Mode::Extractive, LengthPreset::Custom);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SummarizeError::Validation { .. }));

        let config = config.with_max_length(120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_length_above_max_is_rejected() {
        let mut config = SummarizationConfig::default().with_max_length(50);
        config.min_length = Some(80);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_keywords_are_rejected() {
        let config = SummarizationConfig::default().with_focus_keywords(["rust", "  "]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_keyword_order_and_case() {
        let a = SummarizationConfig::default().with_focus_keywords(["Rust", "tokio"]);
        let b = SummarizationConfig::default().with_focus_keywords(["tokio", "rust "]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = SummarizationConfig::new(Mode::Abstractive, LengthPreset::Medium);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_deserializes_camel_case_with_defaults() {
        let config: SummarizationConfig = serde_json::from_str(
            r#"{"mode":"hybrid","length":"custom","maxLength":80,"outputFormat":"bullets"}"#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Hybrid);
        assert_eq!(config.max_length, Some(80));
        assert_eq!(config.output_format, OutputFormat::Bullets);
        assert_eq!(config.tone, Tone::Neutral);
        assert!(config.validate().is_ok());
    }
}
