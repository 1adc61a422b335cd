use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    /// All timestamps are stored as integer milliseconds since the epoch.
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                language TEXT,
                word_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_documents_user_id ON documents (user_id);
            CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents (content_hash);

            CREATE TABLE IF NOT EXISTS summaries (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                method TEXT NOT NULL,
                config TEXT NOT NULL, -- JSON SummarizationConfig
                metrics TEXT NOT NULL, -- JSON SummaryMetrics
                model_version TEXT NOT NULL,
                model_id TEXT,
                processing_time_ms INTEGER NOT NULL,
                confidence REAL NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_document_id ON summaries (document_id);
            CREATE INDEX IF NOT EXISTS idx_summaries_user_id ON summaries (user_id, created_at);

            CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                action TEXT NOT NULL,
                tokens_used INTEGER NOT NULL,
                cost REAL NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_usage_user_action_time ON usage_logs (user_id, action, timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_user_time ON usage_logs (user_id, timestamp);

            CREATE TABLE IF NOT EXISTS model_versions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                model_type TEXT NOT NULL, -- extractive, abstractive, hybrid
                provider TEXT NOT NULL,
                backend_model_id TEXT NOT NULL,
                cost_per_1k_tokens REAL NOT NULL,
                quality REAL NOT NULL,
                speed REAL NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 0,
                config TEXT NOT NULL, -- JSON
                metrics TEXT NOT NULL, -- JSON ModelMetrics
                created_at INTEGER NOT NULL,
                deployed_at INTEGER,
                UNIQUE(name, version)
            );
            CREATE INDEX IF NOT EXISTS idx_model_versions_type_active ON model_versions (model_type, is_active);

            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                summary_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                rating INTEGER NOT NULL,
                feedback_type TEXT NOT NULL,
                edited_summary TEXT,
                comments TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_created_at ON feedback (created_at);
            CREATE INDEX IF NOT EXISTS idx_feedback_summary_id ON feedback (summary_id);

            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL, -- JSON CacheEntry
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                hits INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries (expires_at);

            CREATE TABLE IF NOT EXISTS retraining_queue (
                id TEXT PRIMARY KEY,
                summary_id TEXT NOT NULL,
                source_text TEXT NOT NULL,
                target_summary TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_retraining_queue_processed ON retraining_queue (processed, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await?;
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
