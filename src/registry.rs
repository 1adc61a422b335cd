//! Versioned catalogue of summarization models.
//!
//! At most one variant per [`ModelType`] is active. Variants are never
//! deleted; retiring one only clears its active flag so it stays available as
//! a fallback candidate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Mode;
use crate::error::StoreError;
use crate::TARGET_REGISTRY;

/// Weight of a new observation when blending metrics.
pub const EMA_ALPHA: f64 = 0.1;

pub const PROVIDER_LOCAL: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Extractive,
    Abstractive,
    Hybrid,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Extractive => "extractive",
            ModelType::Abstractive => "abstractive",
            ModelType::Hybrid => "hybrid",
        }
    }

    /// Paraphrasing is served by the abstractive models.
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Extractive => ModelType::Extractive,
            Mode::Abstractive | Mode::Paraphrase => ModelType::Abstractive,
            Mode::Hybrid => ModelType::Hybrid,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extractive" => Ok(ModelType::Extractive),
            "abstractive" => Ok(ModelType::Abstractive),
            "hybrid" => Ok(ModelType::Hybrid),
            other => Err(StoreError::Corrupt(format!("unknown model type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetrics {
    pub success_rate: f64,
    pub latency_ms: f64,
    pub samples: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            latency_ms: 0.0,
            samples: 0,
            updated_at: None,
        }
    }
}

/// Observations to blend into a variant. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsUpdate {
    pub quality: Option<f64>,
    pub success_rate: Option<f64>,
    pub latency_ms: Option<f64>,
}

fn blend(old: f64, observed: f64) -> f64 {
    old * (1.0 - EMA_ALPHA) + observed * EMA_ALPHA
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVariant {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub model_type: ModelType,
    pub provider: String,
    pub backend_model_id: String,
    pub cost_per_1k_tokens: f64,
    pub quality: f64,
    pub speed: f64,
    pub is_active: bool,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub metrics: ModelMetrics,
}

impl ModelVariant {
    /// Label stored on summaries, e.g. `openai-quality:3`.
    pub fn version_label(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    pub fn apply(&mut self, update: &MetricsUpdate, now: DateTime<Utc>) {
        if let Some(quality) = update.quality {
            self.quality = blend(self.quality, quality.clamp(0.0, 1.0)).clamp(0.0, 1.0);
        }
        if let Some(success_rate) = update.success_rate {
            self.metrics.success_rate =
                blend(self.metrics.success_rate, success_rate.clamp(0.0, 1.0));
        }
        if let Some(latency_ms) = update.latency_ms {
            self.metrics.latency_ms = if self.metrics.samples == 0 {
                latency_ms
            } else {
                blend(self.metrics.latency_ms, latency_ms)
            };
        }
        self.metrics.samples += 1;
        self.metrics.updated_at = Some(now);
    }
}

/// Registration request; id and version are assigned by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewModel {
    pub name: String,
    pub model_type: ModelType,
    pub provider: String,
    pub backend_model_id: String,
    pub cost_per_1k_tokens: f64,
    pub quality: f64,
    pub speed: f64,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Durable storage for model variants.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn insert_model(&self, variant: &ModelVariant) -> Result<(), StoreError>;

    async fn get_model(&self, id: Uuid) -> Result<Option<ModelVariant>, StoreError>;

    async fn active_model(&self, model_type: ModelType)
        -> Result<Option<ModelVariant>, StoreError>;

    async fn list_models(
        &self,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelVariant>, StoreError>;

    /// Deactivates every variant of the target's type and activates the
    /// target, atomically.
    async fn activate_model(
        &self,
        id: Uuid,
        deployed_at: DateTime<Utc>,
    ) -> Result<ModelVariant, StoreError>;

    async fn deactivate_model(&self, id: Uuid) -> Result<(), StoreError>;

    async fn save_model_metrics(&self, variant: &ModelVariant) -> Result<(), StoreError>;

    /// Most recently deployed inactive variant of the type, other than `exclude`.
    async fn latest_inactive_model(
        &self,
        model_type: ModelType,
        exclude: Uuid,
    ) -> Result<Option<ModelVariant>, StoreError>;

    async fn next_model_version(&self, name: &str) -> Result<u32, StoreError>;

    async fn count_models(&self) -> Result<u64, StoreError>;
}

/// A fallback that was activated after the primary failed. Once it expires
/// the primary is re-activated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackLease {
    pub primary_id: Uuid,
    pub fallback_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedModel {
    pub variant: ModelVariant,
    pub score: f64,
}

pub struct ModelRegistry {
    store: Arc<dyn ModelStore>,
    active: DashMap<ModelType, ModelVariant>,
    leases: DashMap<ModelType, FallbackLease>,
    /// Serializes read-blend-write metric updates per variant.
    metric_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    fallback_duration: Duration,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ModelStore>, fallback_duration: Duration) -> Self {
        Self {
            store,
            active: DashMap::new(),
            leases: DashMap::new(),
            metric_locks: DashMap::new(),
            fallback_duration,
        }
    }

    #[tracing::instrument(target = "model_registry", level = "info", skip(self, model), fields(name = %model.name))]
    pub async fn register_model(&self, model: NewModel) -> Result<ModelVariant, StoreError> {
        let version = self.store.next_model_version(&model.name).await?;
        let variant = ModelVariant {
            id: Uuid::new_v4(),
            name: model.name,
            version,
            model_type: model.model_type,
            provider: model.provider,
            backend_model_id: model.backend_model_id,
            cost_per_1k_tokens: model.cost_per_1k_tokens.max(0.0),
            quality: model.quality.clamp(0.0, 1.0),
            speed: model.speed.clamp(0.0, 1.0),
            is_active: false,
            config: model.config,
            created_at: Utc::now(),
            deployed_at: None,
            metrics: ModelMetrics::default(),
        };
        self.store.insert_model(&variant).await?;
        info!(target: TARGET_REGISTRY, "Registered model {} ({})", variant.version_label(), variant.model_type);
        Ok(variant)
    }

    pub async fn get_active_model(
        &self,
        model_type: ModelType,
    ) -> Result<Option<ModelVariant>, StoreError> {
        self.restore_expired_fallback(model_type).await;

        if let Some(cached) = self.active.get(&model_type) {
            return Ok(Some(cached.clone()));
        }

        let active = self.store.active_model(model_type).await?;
        if let Some(variant) = &active {
            debug!(target: TARGET_REGISTRY, "Cached active {} model {}", model_type, variant.version_label());
            self.active.insert(model_type, variant.clone());
        }
        Ok(active)
    }

    /// Makes `id` the only active variant of its type. Cancels any fallback
    /// lease for that type.
    pub async fn activate_model(&self, id: Uuid) -> Result<ModelVariant, StoreError> {
        let variant = self.activate_internal(id).await?;
        self.leases.remove(&variant.model_type);
        Ok(variant)
    }

    async fn activate_internal(&self, id: Uuid) -> Result<ModelVariant, StoreError> {
        let variant = self.store.activate_model(id, Utc::now()).await?;
        self.active.insert(variant.model_type, variant.clone());
        info!(target: TARGET_REGISTRY, "Activated {} model {}", variant.model_type, variant.version_label());
        Ok(variant)
    }

    pub async fn update_metrics(
        &self,
        id: Uuid,
        update: &MetricsUpdate,
    ) -> Result<ModelVariant, StoreError> {
        let lock = Arc::clone(&self.metric_locks.entry(id).or_default());
        let _guard = lock.lock().await;

        let mut variant = self
            .store
            .get_model(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("model {}", id)))?;
        variant.apply(update, Utc::now());
        self.store.save_model_metrics(&variant).await?;

        if let Some(mut cached) = self.active.get_mut(&variant.model_type) {
            if cached.id == id {
                *cached = variant.clone();
            }
        }
        debug!(target: TARGET_REGISTRY, "Updated metrics for {}: quality {:.3}, success {:.3}", variant.version_label(), variant.quality, variant.metrics.success_rate);
        Ok(variant)
    }

    /// Activates the most recently deployed inactive variant of `model_type`
    /// other than `failed_id` and returns it. The failed variant is restored
    /// once the fallback period ends.
    pub async fn fallback_model(
        &self,
        failed_id: Uuid,
        model_type: ModelType,
    ) -> Result<Option<ModelVariant>, StoreError> {
        // Another request already failed over away from this primary.
        let existing = self
            .leases
            .get(&model_type)
            .filter(|lease| lease.primary_id == failed_id && lease.expires_at > Utc::now())
            .map(|lease| lease.fallback_id);
        if let Some(fallback_id) = existing {
            if let Some(variant) = self.store.get_model(fallback_id).await? {
                return Ok(Some(variant));
            }
        }

        let Some(candidate) = self
            .store
            .latest_inactive_model(model_type, failed_id)
            .await?
        else {
            warn!(target: TARGET_REGISTRY, "No fallback available for {} model {}", model_type, failed_id);
            return Ok(None);
        };

        let variant = self.activate_internal(candidate.id).await?;
        let period = chrono::Duration::from_std(self.fallback_duration)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        self.leases.insert(
            model_type,
            FallbackLease {
                primary_id: failed_id,
                fallback_id: variant.id,
                expires_at: Utc::now() + period,
            },
        );
        warn!(target: TARGET_REGISTRY, "Switched {} model from {} to fallback {} for {:?}", model_type, failed_id, variant.version_label(), self.fallback_duration);
        Ok(Some(variant))
    }

    async fn restore_expired_fallback(&self, model_type: ModelType) {
        let expired = self
            .leases
            .get(&model_type)
            .filter(|lease| lease.expires_at <= Utc::now())
            .map(|lease| lease.clone());
        let Some(lease) = expired else {
            return;
        };
        self.leases.remove(&model_type);

        match self.activate_internal(lease.primary_id).await {
            Ok(variant) => {
                info!(target: TARGET_REGISTRY, "Fallback period over, switched back to {}", variant.version_label());
            }
            Err(e) => {
                warn!(target: TARGET_REGISTRY, "Failed to restore primary {} model {}: {}", model_type, lease.primary_id, e);
            }
        }
    }

    pub fn current_lease(&self, model_type: ModelType) -> Option<FallbackLease> {
        self.leases.get(&model_type).map(|l| l.clone())
    }

    pub async fn list_models(
        &self,
        model_type: Option<ModelType>,
    ) -> Result<Vec<ModelVariant>, StoreError> {
        self.store.list_models(model_type).await
    }

    pub async fn get_model(&self, id: Uuid) -> Result<Option<ModelVariant>, StoreError> {
        self.store.get_model(id).await
    }

    /// Clears the active flag. The variant stays in the catalogue.
    pub async fn retire_model(&self, id: Uuid) -> Result<(), StoreError> {
        self.store.deactivate_model(id).await?;
        self.active.retain(|_, v| v.id != id);
        self.leases
            .retain(|_, lease| lease.fallback_id != id && lease.primary_id != id);
        info!(target: TARGET_REGISTRY, "Retired model {}", id);
        Ok(())
    }

    /// Variants of a type ranked by
    /// `quality * 0.6 + speed * 0.2 + (1 - relative cost) * 0.2`.
    pub async fn compare_models(&self, model_type: ModelType) -> Result<Vec<RankedModel>, StoreError> {
        let variants = self.store.list_models(Some(model_type)).await?;
        Ok(rank_variants(variants))
    }

    /// Registers `catalogue` and activates the first variant of each type,
    /// but only when the store holds no models yet.
    pub async fn seed_defaults(&self, catalogue: Vec<NewModel>) -> Result<usize, StoreError> {
        if self.store.count_models().await? > 0 {
            return Ok(0);
        }

        let mut seeded = 0;
        let mut activated: Vec<ModelType> = Vec::new();
        for model in catalogue {
            let variant = self.register_model(model).await?;
            if !activated.contains(&variant.model_type) {
                activated.push(variant.model_type);
                self.activate_model(variant.id).await?;
            }
            seeded += 1;
        }
        info!(target: TARGET_REGISTRY, "Seeded {} default models", seeded);
        Ok(seeded)
    }
}

pub fn rank_variants(variants: Vec<ModelVariant>) -> Vec<RankedModel> {
    let max_cost = variants
        .iter()
        .map(|v| v.cost_per_1k_tokens)
        .fold(0.0f64, f64::max);
    let mut ranked: Vec<RankedModel> = variants
        .into_iter()
        .map(|variant| {
            let relative_cost = if max_cost > 0.0 {
                variant.cost_per_1k_tokens / max_cost
            } else {
                0.0
            };
            let score = variant.quality * 0.6 + variant.speed * 0.2 + (1.0 - relative_cost) * 0.2;
            RankedModel { variant, score }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// Catalogue installed on first start. The first variant of each type is
/// activated; the cheaper abstractive model stays inactive as the fallback.
pub fn default_catalogue(fast_model: &str, quality_model: &str) -> Vec<NewModel> {
    vec![
        NewModel {
            name: "tfidf-extractive".to_string(),
            model_type: ModelType::Extractive,
            provider: PROVIDER_LOCAL.to_string(),
            backend_model_id: "tfidf-centroid".to_string(),
            cost_per_1k_tokens: 0.0,
            quality: 0.6,
            speed: 1.0,
            config: serde_json::json!({}),
        },
        NewModel {
            name: "quality-abstractive".to_string(),
            model_type: ModelType::Abstractive,
            provider: "openai".to_string(),
            backend_model_id: quality_model.to_string(),
            cost_per_1k_tokens: 0.005,
            quality: 0.9,
            speed: 0.6,
            config: serde_json::json!({}),
        },
        NewModel {
            name: "fast-abstractive".to_string(),
            model_type: ModelType::Abstractive,
            provider: "ollama".to_string(),
            backend_model_id: fast_model.to_string(),
            cost_per_1k_tokens: 0.0005,
            quality: 0.7,
            speed: 0.9,
            config: serde_json::json!({}),
        },
        NewModel {
            name: "quality-hybrid".to_string(),
            model_type: ModelType::Hybrid,
            provider: "openai".to_string(),
            backend_model_id: quality_model.to_string(),
            cost_per_1k_tokens: 0.005,
            quality: 0.85,
            speed: 0.5,
            config: serde_json::json!({ "chunkChars": 4000 }),
        },
    ]
}
