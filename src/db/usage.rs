use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

use super::core::{from_millis, to_millis, Database};
use crate::error::StoreError;
use crate::rate_limit::{ActionUsage, UsageLog};
use crate::types::UsageRecord;

#[async_trait]
impl UsageLog for Database {
    #[instrument(target = "db", level = "debug", skip(self, record), fields(user_id = %record.user_id, action = %record.action))]
    async fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let timestamp = to_millis(record.timestamp);
        self.retry_on_lock("record usage", || {
            sqlx::query(
                r#"
                INSERT INTO usage_logs (user_id, action, tokens_used, cost, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&record.user_id)
            .bind(&record.action)
            .bind(record.tokens_used)
            .bind(record.cost)
            .bind(timestamp)
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    async fn count_usage_since(
        &self,
        user_id: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_logs WHERE user_id = ?1 AND action = ?2 AND timestamp >= ?3",
        )
        .bind(user_id)
        .bind(action)
        .bind(to_millis(since))
        .fetch_one(self.pool())
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn oldest_usage_since(
        &self,
        user_id: &str,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let oldest: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(timestamp) FROM usage_logs WHERE user_id = ?1 AND action = ?2 AND timestamp >= ?3",
        )
        .bind(user_id)
        .bind(action)
        .bind(to_millis(since))
        .fetch_one(self.pool())
        .await?;
        Ok(oldest.map(from_millis))
    }

    async fn tokens_used_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let used: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(tokens_used) FROM usage_logs WHERE user_id = ?1 AND timestamp >= ?2",
        )
        .bind(user_id)
        .bind(to_millis(since))
        .fetch_one(self.pool())
        .await?;
        Ok(used.unwrap_or(0))
    }

    async fn usage_summary(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ActionUsage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT action, COUNT(*) AS requests, COALESCE(SUM(tokens_used), 0) AS tokens,
                   COALESCE(SUM(cost), 0.0) AS cost
            FROM usage_logs
            WHERE user_id = ?1 AND timestamp >= ?2
            GROUP BY action
            ORDER BY action
            "#,
        )
        .bind(user_id)
        .bind(to_millis(since))
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ActionUsage {
                action: row.get("action"),
                requests: row.get::<i64, _>("requests").max(0) as u64,
                tokens_used: row.get("tokens"),
                cost: row.get("cost"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_usage_log_queries() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let mut old = UsageRecord::new("u1", "summarize", 100, 0.01);
        old.timestamp = now - chrono::Duration::hours(2);
        db.append_usage(&old).await.unwrap();
        db.append_usage(&UsageRecord::new("u1", "summarize", 40, 0.002)).await.unwrap();
        db.append_usage(&UsageRecord::new("u1", "upload", 0, 0.0)).await.unwrap();
        db.append_usage(&UsageRecord::new("u2", "summarize", 7, 0.0)).await.unwrap();

        let hour_ago = now - chrono::Duration::hours(1);
        assert_eq!(db.count_usage_since("u1", "summarize", hour_ago).await.unwrap(), 1);
        assert_eq!(db.tokens_used_since("u1", hour_ago).await.unwrap(), 40);
        assert_eq!(
            db.tokens_used_since("u1", now - chrono::Duration::days(1)).await.unwrap(),
            140
        );
        assert!(db
            .oldest_usage_since("u1", "summarize", hour_ago)
            .await
            .unwrap()
            .is_some());
        assert_eq!(db.tokens_used_since("nobody", hour_ago).await.unwrap(), 0);

        let summary = db.usage_summary("u1", now - chrono::Duration::days(1)).await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].action, "summarize");
        assert_eq!(summary[0].requests, 2);
        assert_eq!(summary[0].tokens_used, 140);
    }
}
