use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::SummarizationConfig;
use crate::error::SummarizeError;

/// Quality measurements attached to every summary. Ratios and scores are in
/// `[0, 1]`; counts are raw.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetrics {
    pub compression_ratio: f64,
    pub word_count: usize,
    pub sentence_count: usize,
    pub readability: f64,
    pub coherence: f64,
    pub rouge1: f64,
    pub rouge2: f64,
    pub rouge_l: f64,
    pub bleu: f64,
    pub semantic_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    pub id: Uuid,
    pub summary: String,
    pub method: String,
    pub config: SummarizationConfig,
    pub metrics: SummaryMetrics,
    pub model_version: String,
    pub processing_time_ms: u64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Billing tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl UserTier {
    pub const ALL: [UserTier; 4] = [
        UserTier::Free,
        UserTier::Basic,
        UserTier::Premium,
        UserTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserTier::Free => "free",
            UserTier::Basic => "basic",
            UserTier::Premium => "premium",
            UserTier::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, UserTier::Free)
    }
}

impl fmt::Display for UserTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserTier {
    type Err = SummarizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(UserTier::Free),
            "basic" => Ok(UserTier::Basic),
            "premium" | "pro" => Ok(UserTier::Premium),
            "enterprise" => Ok(UserTier::Enterprise),
            other => Err(SummarizeError::validation(format!("unknown user tier '{}'", other))),
        }
    }
}

/// One billable operation. Never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user_id: String,
    pub action: String,
    pub tokens_used: i64,
    pub cost: f64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(user_id: &str, action: &str, tokens_used: i64, cost: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            action: action.to_string(),
            tokens_used,
            cost,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
impl SummaryResult {
    pub(crate) fn sample(summary: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            summary: summary.to_string(),
            method: "extractive".to_string(),
            config: SummarizationConfig::default(),
            metrics: SummaryMetrics::default(),
            model_version: "extractive-local:1".to_string(),
            processing_time_ms: 3,
            confidence: 0.5,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_tier_parsing() {
        assert_eq!("Premium".parse::<UserTier>().unwrap(), UserTier::Premium);
        assert_eq!(" free ".parse::<UserTier>().unwrap(), UserTier::Free);
        assert!("platinum".parse::<UserTier>().is_err());
        assert!(!UserTier::Free.is_paid());
        assert!(UserTier::Basic.is_paid());
    }
}
