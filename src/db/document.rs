use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::core::{from_millis, to_millis, Database};
use crate::error::StoreError;
use crate::pipeline::{SummaryRecord, SummaryStore};
use crate::types::SummaryResult;
use crate::TARGET_DB;

impl Database {
    /// Id of the user's document with this content hash, inserting it first
    /// when it is new.
    async fn ensure_document(&self, record: &SummaryRecord) -> Result<String, StoreError> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE user_id = ?1 AND content_hash = ?2 LIMIT 1",
        )
        .bind(&record.user_id)
        .bind(&record.content_hash)
        .fetch_optional(self.pool())
        .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        let word_count = crate::text::word_count(&record.source_text) as i64;
        self.retry_on_lock("insert document", || {
            sqlx::query(
                r#"
                INSERT INTO documents (id, user_id, content, content_hash, language, word_count, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&id)
            .bind(&record.user_id)
            .bind(&record.source_text)
            .bind(&record.content_hash)
            .bind(&record.language)
            .bind(word_count)
            .bind(to_millis(record.result.created_at))
            .execute(self.pool())
        })
        .await?;
        debug!(target: TARGET_DB, "Stored document {} for user {}", id, record.user_id);
        Ok(id)
    }
}

#[async_trait]
impl SummaryStore for Database {
    #[instrument(target = "db", level = "info", skip(self, record), fields(user_id = %record.user_id, summary_id = %record.result.id))]
    async fn persist_summary(&self, record: &SummaryRecord) -> Result<(), StoreError> {
        let document_id = self.ensure_document(record).await?;
        let result = &record.result;
        let id = result.id.to_string();
        let config = serde_json::to_string(&result.config)?;
        let metrics = serde_json::to_string(&result.metrics)?;
        let model_id = record.model_id.map(|id| id.to_string());

        self.retry_on_lock("insert summary", || {
            sqlx::query(
                r#"
                INSERT INTO summaries (
                    id, document_id, user_id, summary, method, config, metrics, model_version,
                    model_id, processing_time_ms, confidence, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )
            .bind(&id)
            .bind(&document_id)
            .bind(&record.user_id)
            .bind(&result.summary)
            .bind(&result.method)
            .bind(&config)
            .bind(&metrics)
            .bind(&result.model_version)
            .bind(&model_id)
            .bind(i64::try_from(result.processing_time_ms).unwrap_or(i64::MAX))
            .bind(result.confidence)
            .bind(to_millis(result.created_at))
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    async fn get_summary(&self, id: Uuid) -> Result<Option<SummaryResult>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, summary, method, config, metrics, model_version, processing_time_ms,
                   confidence, created_at
            FROM summaries
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let config: String = row.get("config");
        let metrics: String = row.get("metrics");
        let processing_time_ms: i64 = row.get("processing_time_ms");

        Ok(Some(SummaryResult {
            id,
            summary: row.get("summary"),
            method: row.get("method"),
            config: serde_json::from_str(&config)?,
            metrics: serde_json::from_str(&metrics)?,
            model_version: row.get("model_version"),
            processing_time_ms: u64::try_from(processing_time_ms).unwrap_or_default(),
            confidence: row.get("confidence"),
            created_at: from_millis(row.get("created_at")),
        }))
    }
}
