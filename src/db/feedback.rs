use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use super::core::{to_millis, Database};
use crate::error::StoreError;
use crate::feedback::{FeedbackRecord, FeedbackStore, RetrainingExample, SummarySource};

#[async_trait]
impl FeedbackStore for Database {
    #[instrument(target = "db", level = "info", skip(self, record), fields(summary_id = %record.summary_id, rating = record.rating))]
    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<(), StoreError> {
        let id = record.id.to_string();
        let summary_id = record.summary_id.to_string();
        self.retry_on_lock("insert feedback", || {
            sqlx::query(
                r#"
                INSERT INTO feedback (
                    id, summary_id, user_id, rating, feedback_type, edited_summary, comments, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&id)
            .bind(&summary_id)
            .bind(&record.user_id)
            .bind(i64::from(record.rating))
            .bind(record.feedback_type.as_str())
            .bind(&record.edited_summary)
            .bind(&record.comments)
            .bind(to_millis(record.created_at))
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    async fn ratings_since(&self, since: DateTime<Utc>) -> Result<Vec<u8>, StoreError> {
        let ratings: Vec<i64> =
            sqlx::query_scalar("SELECT rating FROM feedback WHERE created_at >= ?1")
                .bind(to_millis(since))
                .fetch_all(self.pool())
                .await?;
        Ok(ratings
            .into_iter()
            .filter_map(|r| u8::try_from(r).ok())
            .collect())
    }

    #[instrument(target = "db", level = "info", skip(self, example), fields(summary_id = %example.summary_id, reason = %example.reason))]
    async fn enqueue_retraining(&self, example: &RetrainingExample) -> Result<(), StoreError> {
        let id = example.id.to_string();
        let summary_id = example.summary_id.to_string();
        self.retry_on_lock("enqueue retraining example", || {
            sqlx::query(
                r#"
                INSERT INTO retraining_queue (
                    id, summary_id, source_text, target_summary, reason, created_at, processed
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
                "#,
            )
            .bind(&id)
            .bind(&summary_id)
            .bind(&example.source_text)
            .bind(&example.target_summary)
            .bind(&example.reason)
            .bind(to_millis(example.created_at))
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    async fn pending_retraining_count(&self) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM retraining_queue WHERE processed = 0")
                .fetch_one(self.pool())
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn summary_source(&self, summary_id: Uuid) -> Result<Option<SummarySource>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT d.content, s.summary, s.model_id
            FROM summaries s
            JOIN documents d ON d.id = s.document_id
            WHERE s.id = ?1
            "#,
        )
        .bind(summary_id.to_string())
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let model_id: Option<String> = row.get("model_id");
        let model_id = model_id
            .map(|id| {
                Uuid::parse_str(&id)
                    .map_err(|e| StoreError::Corrupt(format!("bad model id '{}': {}", id, e)))
            })
            .transpose()?;

        Ok(Some(SummarySource {
            source_text: row.get("content"),
            summary: row.get("summary"),
            model_id,
        }))
    }
}
