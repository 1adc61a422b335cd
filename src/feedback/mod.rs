//! User feedback on summaries and the retraining trigger.
//!
//! Ratings are persisted synchronously. Everything derived from them (model
//! quality updates, retraining examples) happens on [`worker::feedback_worker`]
//! so a feedback request never waits on it.

pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert::{Alert, AlertSender};
use crate::error::{Severity, StoreError, SummarizeError};
use crate::TARGET_FEEDBACK;

pub use worker::feedback_worker;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
/// Ratings at or below this become retraining examples.
pub const LOW_RATING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    #[default]
    Rating,
    Edit,
    Report,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Rating => "rating",
            FeedbackType::Edit => "edit",
            FeedbackType::Report => "report",
        }
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rating" => Ok(FeedbackType::Rating),
            "edit" => Ok(FeedbackType::Edit),
            "report" => Ok(FeedbackType::Report),
            other => Err(StoreError::Corrupt(format!("unknown feedback type '{}'", other))),
        }
    }
}

/// Feedback as submitted by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackData {
    pub summary_id: Uuid,
    pub rating: u8,
    #[serde(default)]
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub edited_summary: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub summary_id: Uuid,
    pub user_id: String,
    pub rating: u8,
    pub feedback_type: FeedbackType,
    pub edited_summary: Option<String>,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Low ratings and user edits are worth learning from.
    pub fn wants_retraining(&self) -> bool {
        self.rating <= LOW_RATING
            || self
                .edited_summary
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrainingExample {
    pub id: Uuid,
    pub summary_id: Uuid,
    pub source_text: String,
    /// The user's edit when there is one, otherwise the rejected summary.
    pub target_summary: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// The stored source text and output behind a summary id.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySource {
    pub source_text: String,
    pub summary: String,
    pub model_id: Option<Uuid>,
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<(), StoreError>;

    async fn ratings_since(&self, since: DateTime<Utc>) -> Result<Vec<u8>, StoreError>;

    async fn enqueue_retraining(&self, example: &RetrainingExample) -> Result<(), StoreError>;

    async fn pending_retraining_count(&self) -> Result<u64, StoreError>;

    async fn summary_source(&self, summary_id: Uuid) -> Result<Option<SummarySource>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackStats {
    pub count: u64,
    pub average_rating: Option<f64>,
    /// Number of ratings of 1 through 5.
    pub distribution: [u64; 5],
}

impl FeedbackStats {
    pub fn from_ratings(ratings: &[u8]) -> Self {
        let mut distribution = [0u64; 5];
        for &rating in ratings {
            if (MIN_RATING..=MAX_RATING).contains(&rating) {
                distribution[usize::from(rating - 1)] += 1;
            }
        }
        let count: u64 = distribution.iter().sum();
        let sum: u64 = distribution
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u64 + 1) * n)
            .sum();
        Self {
            count,
            average_rating: (count > 0).then(|| sum as f64 / count as f64),
            distribution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum RetrainingDecision {
    #[serde(rename_all = "camelCase")]
    Triggered {
        average_rating: f64,
        samples: u64,
        pending_examples: u64,
    },
    #[serde(rename_all = "camelCase")]
    InsufficientSamples { samples: u64, required: u64 },
    #[serde(rename_all = "camelCase")]
    QualityAcceptable { average_rating: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrainingPolicy {
    pub min_samples: u64,
    /// Retraining is triggered when the average rating falls below this.
    pub rating_floor: f64,
    pub window: Duration,
}

impl Default for RetrainingPolicy {
    fn default() -> Self {
        Self {
            min_samples: 100,
            rating_floor: 3.5,
            window: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Work handed to the feedback worker.
#[derive(Debug, Clone)]
pub enum FeedbackEvent {
    Received(FeedbackRecord),
}

pub struct FeedbackManager {
    store: Arc<dyn FeedbackStore>,
    events: mpsc::Sender<FeedbackEvent>,
    policy: RetrainingPolicy,
    alerts: Option<AlertSender>,
}

impl FeedbackManager {
    /// Returns the manager and the receiving end of its event queue, to be
    /// passed to [`feedback_worker`].
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        policy: RetrainingPolicy,
        alerts: Option<AlertSender>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<FeedbackEvent>) {
        let (events, rx) = mpsc::channel(capacity);
        (
            Self {
                store,
                events,
                policy,
                alerts,
            },
            rx,
        )
    }

    pub fn policy(&self) -> &RetrainingPolicy {
        &self.policy
    }

    pub async fn collect_feedback(
        &self,
        user_id: &str,
        data: FeedbackData,
    ) -> Result<FeedbackRecord, SummarizeError> {
        if !(MIN_RATING..=MAX_RATING).contains(&data.rating) {
            return Err(SummarizeError::validation(format!(
                "rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }
        let edited_summary = data
            .edited_summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if data.feedback_type == FeedbackType::Edit && edited_summary.is_none() {
            return Err(SummarizeError::validation(
                "edit feedback requires editedSummary",
            ));
        }

        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            summary_id: data.summary_id,
            user_id: user_id.to_string(),
            rating: data.rating,
            feedback_type: data.feedback_type,
            edited_summary,
            comments: data.comments.filter(|c| !c.trim().is_empty()),
            created_at: Utc::now(),
        };
        self.store.insert_feedback(&record).await?;
        info!(target: TARGET_FEEDBACK, "Stored {} feedback {} for summary {} (rating {})", record.feedback_type, record.id, record.summary_id, record.rating);

        if let Err(e) = self.events.try_send(FeedbackEvent::Received(record.clone())) {
            warn!(target: TARGET_FEEDBACK, "Feedback queue unavailable, skipping follow-up for {}: {}", record.id, e);
        }
        Ok(record)
    }

    pub async fn feedback_stats(&self, window: Duration) -> Result<FeedbackStats, StoreError> {
        let period = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(30));
        let ratings = self.store.ratings_since(Utc::now() - period).await?;
        Ok(FeedbackStats::from_ratings(&ratings))
    }

    pub async fn average_rating(&self, window: Duration) -> Result<Option<f64>, StoreError> {
        Ok(self.feedback_stats(window).await?.average_rating)
    }

    /// Decides whether recent ratings justify retraining, and raises an
    /// alert when they do.
    pub async fn trigger_retraining(&self) -> Result<RetrainingDecision, StoreError> {
        let stats = self.feedback_stats(self.policy.window).await?;

        let decision = match stats.average_rating {
            _ if stats.count < self.policy.min_samples => RetrainingDecision::InsufficientSamples {
                samples: stats.count,
                required: self.policy.min_samples,
            },
            Some(average) if average < self.policy.rating_floor => RetrainingDecision::Triggered {
                average_rating: average,
                samples: stats.count,
                pending_examples: self.store.pending_retraining_count().await?,
            },
            average => RetrainingDecision::QualityAcceptable {
                average_rating: average.unwrap_or_default(),
            },
        };

        if let RetrainingDecision::Triggered {
            average_rating,
            samples,
            pending_examples,
        } = &decision
        {
            warn!(target: TARGET_FEEDBACK, "Retraining triggered: average rating {:.2} over {} samples, {} examples queued", average_rating, samples, pending_examples);
            if let Some(alerts) = &self.alerts {
                alerts.raise(Alert::new(
                    Severity::High,
                    "Summary quality below threshold",
                    format!(
                        "Average rating {:.2} over {} ratings is below {:.2}. {} retraining examples are queued.",
                        average_rating, samples, self.policy.rating_floor, pending_examples
                    ),
                    Uuid::new_v4(),
                ));
            }
        } else {
            info!(target: TARGET_FEEDBACK, "Retraining not needed: {:?}", decision);
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::pipeline::{SummaryRecord, SummaryStore};
    use crate::types::SummaryResult;

    async fn manager(
        policy: RetrainingPolicy,
    ) -> (FeedbackManager, mpsc::Receiver<FeedbackEvent>, Arc<Database>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let (manager, rx) = FeedbackManager::new(db.clone(), policy, None, 16);
        (manager, rx, db)
    }

    async fn stored_summary(db: &Database) -> Uuid {
        let result = SummaryResult::sample("Fares are frozen.");
        let id = result.id;
        db.persist_summary(&SummaryRecord::new("u1", "Fares are frozen for two years.", None, result, None))
            .await
            .unwrap();
        id
    }

    fn rating(summary_id: Uuid, rating: u8) -> FeedbackData {
        FeedbackData {
            summary_id,
            rating,
            feedback_type: FeedbackType::Rating,
            edited_summary: None,
            comments: None,
        }
    }

    #[tokio::test]
    async fn test_rating_out_of_range_is_rejected() {
        let (manager, _rx, db) = manager(RetrainingPolicy::default()).await;
        let id = stored_summary(&db).await;
        for bad in [0, 6] {
            let err = manager.collect_feedback("u1", rating(id, bad)).await.unwrap_err();
            assert!(matches!(err, SummarizeError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn test_edit_requires_text() {
        let (manager, _rx, db) = manager(RetrainingPolicy::default()).await;
        let id = stored_summary(&db).await;
        let mut data = rating(id, 4);
        data.feedback_type = FeedbackType::Edit;
        data.edited_summary = Some("   ".to_string());
        assert!(manager.collect_feedback("u1", data).await.is_err());
    }

    #[tokio::test]
    async fn test_feedback_is_stored_and_queued() {
        let (manager, mut rx, db) = manager(RetrainingPolicy::default()).await;
        let id = stored_summary(&db).await;
        let record = manager.collect_feedback("u1", rating(id, 2)).await.unwrap();
        assert!(record.wants_retraining());

        let FeedbackEvent::Received(queued) = rx.recv().await.unwrap();
        assert_eq!(queued.id, record.id);

        let stats = manager.feedback_stats(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.distribution, [0, 1, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_retraining_decisions() {
        let policy = RetrainingPolicy {
            min_samples: 3,
            rating_floor: 3.0,
            window: Duration::from_secs(3600),
        };
        let (manager, _rx, db) = manager(policy).await;
        let id = stored_summary(&db).await;

        manager.collect_feedback("u1", rating(id, 1)).await.unwrap();
        manager.collect_feedback("u2", rating(id, 2)).await.unwrap();
        assert_eq!(
            manager.trigger_retraining().await.unwrap(),
            RetrainingDecision::InsufficientSamples {
                samples: 2,
                required: 3
            }
        );

        manager.collect_feedback("u3", rating(id, 3)).await.unwrap();
        assert!(matches!(
            manager.trigger_retraining().await.unwrap(),
            RetrainingDecision::Triggered { samples: 3, .. }
        ));

        for user in ["u4", "u5", "u6"] {
            manager.collect_feedback(user, rating(id, 5)).await.unwrap();
        }
        assert!(matches!(
            manager.trigger_retraining().await.unwrap(),
            RetrainingDecision::QualityAcceptable { .. }
        ));
    }

    #[test]
    fn test_stats_from_ratings() {
        let stats = FeedbackStats::from_ratings(&[5, 4, 4, 1, 9]);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.average_rating, Some(3.5));
        assert_eq!(stats.distribution, [1, 0, 0, 2, 1]);
        assert_eq!(FeedbackStats::from_ratings(&[]).average_rating, None);
    }
}
