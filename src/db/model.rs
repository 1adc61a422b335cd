use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::core::{from_millis, to_millis, Database};
use crate::error::StoreError;
use crate::registry::{ModelStore, ModelType, ModelVariant};
use crate::TARGET_DB;

const SELECT_MODEL: &str = r#"
    SELECT id, name, version, model_type, provider, backend_model_id, cost_per_1k_tokens,
           quality, speed, is_active, config, metrics, created_at, deployed_at
    FROM model_versions
"#;

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad uuid '{}': {}", value, e)))
}

fn row_to_variant(row: &SqliteRow) -> Result<ModelVariant, StoreError> {
    let id: String = row.get("id");
    let model_type: String = row.get("model_type");
    let config: String = row.get("config");
    let metrics: String = row.get("metrics");
    let version: i64 = row.get("version");
    let deployed_at: Option<i64> = row.get("deployed_at");

    Ok(ModelVariant {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        version: u32::try_from(version).unwrap_or_default(),
        model_type: model_type.parse()?,
        provider: row.get("provider"),
        backend_model_id: row.get("backend_model_id"),
        cost_per_1k_tokens: row.get("cost_per_1k_tokens"),
        quality: row.get("quality"),
        speed: row.get("speed"),
        is_active: row.get("is_active"),
        config: serde_json::from_str(&config)?,
        created_at: from_millis(row.get("created_at")),
        deployed_at: deployed_at.map(from_millis),
        metrics: serde_json::from_str(&metrics)?,
    })
}

#[async_trait]
impl ModelStore for Database {
    #[instrument(target = "db", level = "info", skip(self, variant), fields(name = %variant.name, version = variant.version))]
    async fn insert_model(&self, variant: &ModelVariant) -> Result<(), StoreError> {
        let config = serde_json::to_string(&variant.config)?;
        let metrics = serde_json::to_string(&variant.metrics)?;
        let id = variant.id.to_string();

        self.retry_on_lock("insert model", || {
            sqlx::query(
                r#"
                INSERT INTO model_versions (
                    id, name, version, model_type, provider, backend_model_id,
                    cost_per_1k_tokens, quality, speed, is_active, config, metrics,
                    created_at, deployed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )
            .bind(&id)
            .bind(&variant.name)
            .bind(variant.version as i64)
            .bind(variant.model_type.as_str())
            .bind(&variant.provider)
            .bind(&variant.backend_model_id)
            .bind(variant.cost_per_1k_tokens)
            .bind(variant.quality)
            .bind(variant.speed)
            .bind(variant.is_active)
            .bind(&config)
            .bind(&metrics)
            .bind(to_millis(variant.created_at))
            .bind(variant.deployed_at.map(to_millis))
            .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    async fn get_model(&self, id: Uuid) -> Result<Option<ModelVariant>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_MODEL))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_variant).transpose()
    }

    async fn active_model(
        &self,
        model_type: ModelType,
    ) -> Result<Option<ModelVariant>, StoreError> {
        let row = sqlx::query(&format!(
            "{} WHERE model_type = ?1 AND is_active = 1 LIMIT 1",
            SELECT_MODEL
        ))
        .bind(model_type.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_variant).transpose()
    }

    async fn list_models(
        &self,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelVariant>, StoreError> {
        let rows = match model_type {
            Some(model_type) => {
                sqlx::query(&format!(
                    "{} WHERE model_type = ?1 ORDER BY name, version",
                    SELECT_MODEL
                ))
                .bind(model_type.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY model_type, name, version", SELECT_MODEL))
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(row_to_variant).collect()
    }

    #[instrument(target = "db", level = "info", skip(self))]
    async fn activate_model(
        &self,
        id: Uuid,
        deployed_at: DateTime<Utc>,
    ) -> Result<ModelVariant, StoreError> {
        let id_str = id.to_string();
        let mut tx = self.pool().begin().await?;

        let model_type: Option<String> =
            sqlx::query_scalar("SELECT model_type FROM model_versions WHERE id = ?1")
                .bind(&id_str)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(model_type) = model_type else {
            return Err(StoreError::NotFound(format!("model {}", id)));
        };

        let deactivated = sqlx::query(
            "UPDATE model_versions SET is_active = 0 WHERE model_type = ?1 AND is_active = 1 AND id != ?2",
        )
        .bind(&model_type)
        .bind(&id_str)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("UPDATE model_versions SET is_active = 1, deployed_at = ?2 WHERE id = ?1")
            .bind(&id_str)
            .bind(to_millis(deployed_at))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(target: TARGET_DB, "Activated model {} ({} sibling(s) deactivated)", id, deactivated);

        self.get_model(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("model {}", id)))
    }

    async fn deactivate_model(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE model_versions SET is_active = 0 WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("model {}", id)));
        }
        Ok(())
    }

    async fn save_model_metrics(&self, variant: &ModelVariant) -> Result<(), StoreError> {
        let metrics = serde_json::to_string(&variant.metrics)?;
        let id = variant.id.to_string();
        self.retry_on_lock("update model metrics", || {
            sqlx::query("UPDATE model_versions SET quality = ?2, metrics = ?3 WHERE id = ?1")
                .bind(&id)
                .bind(variant.quality)
                .bind(&metrics)
                .execute(self.pool())
        })
        .await?;
        Ok(())
    }

    async fn latest_inactive_model(
        &self,
        model_type: ModelType,
        exclude: Uuid,
    ) -> Result<Option<ModelVariant>, StoreError> {
        // Never-deployed variants sort last; rowid breaks ties in insertion order.
        let row = sqlx::query(&format!(
            r#"{} WHERE model_type = ?1 AND is_active = 0 AND id != ?2
               ORDER BY deployed_at IS NULL, deployed_at DESC, created_at DESC, rowid DESC
               LIMIT 1"#,
            SELECT_MODEL
        ))
        .bind(model_type.as_str())
        .bind(exclude.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_variant).transpose()
    }

    async fn next_model_version(&self, name: &str) -> Result<u32, StoreError> {
        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM model_versions WHERE name = ?1")
                .bind(name)
                .fetch_one(self.pool())
                .await?;
        Ok(u32::try_from(current.unwrap_or(0) + 1).unwrap_or(u32::MAX))
    }

    async fn count_models(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM model_versions")
            .fetch_one(self.pool())
            .await?;
        Ok(count.max(0) as u64)
    }
}
