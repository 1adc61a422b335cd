use anyhow::Result;
use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use chrono::Utc;
use ollama_rs::Ollama;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{interval, timeout, Duration};
use tracing::{error, info, warn};

use condense::alert::{alert_channel, alert_worker};
use condense::app::{app_api_loop, AppState, JwtKeys};
use condense::cache::{CacheManager, CacheTier, MemoryTier, RedisTier, SqliteTier};
use condense::cost::CostOptimizer;
use condense::db::Database;
use condense::engine::SummarizationEngine;
use condense::environment::AppConfig;
use condense::feedback::{feedback_worker, FeedbackManager, FeedbackStore, RetrainingDecision};
use condense::logging::configure_logging;
use condense::pipeline::Pipeline;
use condense::rate_limit::RateLimiter;
use condense::registry::{default_catalogue, ModelRegistry};
use condense::LLMClient;

const RETRAINING_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging();
    let config = AppConfig::from_env();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to listen for ctrl-c");
        }
        info!("Shutdown requested");
        let _ = cancel_tx.send(true);
    });

    let db = Database::new(&config.database_path).await?;

    let (alerts, alert_rx) = alert_channel(64);
    let alert_handle = tokio::spawn(alert_worker(alert_rx, config.slack.clone()));

    let registry = Arc::new(ModelRegistry::new(
        Arc::new(db.clone()),
        config.fallback_duration,
    ));
    let mut catalogue = default_catalogue(&config.fast_model, &config.quality_model);
    if config.openai_api_key.is_none() {
        for model in catalogue.iter_mut().filter(|m| m.provider == "openai") {
            model.provider = "ollama".to_string();
        }
    }
    registry.seed_defaults(catalogue).await?;

    info!("Connecting to Ollama at {}:{}", config.ollama_host, config.ollama_port);
    let ollama = Ollama::new(config.ollama_host.clone(), config.ollama_port);
    let mut engine = SummarizationEngine::new(registry.clone(), config.engine_config())
        .with_generator(Arc::new(LLMClient::Ollama(ollama)));
    if let Some(api_key) = &config.openai_api_key {
        let client = OpenAIClient::with_config(OpenAIConfig::new().with_api_key(api_key));
        engine = engine.with_generator(Arc::new(LLMClient::OpenAI(client)));
    }
    info!("Text generation providers: {}", engine.providers().join(", "));

    let mut tiers: Vec<Arc<dyn CacheTier>> =
        vec![Arc::new(MemoryTier::new(config.memory_cache_capacity))];
    if let Some(redis_url) = &config.redis_url {
        match RedisTier::new(redis_url).await {
            Ok(tier) => tiers.push(Arc::new(tier)),
            Err(e) => warn!("Redis cache tier disabled: {}", e),
        }
    }
    tiers.push(Arc::new(SqliteTier::new(db.clone())));
    let cache = Arc::new(CacheManager::new(tiers, config.cache_ttls));
    info!("Cache tiers: {}", cache.tier_names().join(" -> "));

    let limiter = Arc::new(RateLimiter::new(
        Arc::new(db.clone()),
        config.rate_limits.clone(),
        config.tier_quotas.clone(),
    ));
    let optimizer = Arc::new(CostOptimizer::new(registry.clone(), config.cost_config()));
    let pipeline = Arc::new(Pipeline::new(
        cache,
        limiter,
        optimizer,
        Arc::new(engine),
        Arc::new(db.clone()),
        config.user_tiers.clone(),
        Some(alerts.clone()),
        config.max_input_chars,
    ));

    let feedback_store: Arc<dyn FeedbackStore> = Arc::new(db.clone());
    let (feedback, feedback_rx) = FeedbackManager::new(
        feedback_store.clone(),
        config.retraining,
        Some(alerts.clone()),
        256,
    );
    let feedback = Arc::new(feedback);
    let feedback_handle = tokio::spawn(feedback_worker(
        feedback_rx,
        feedback_store,
        registry.clone(),
    ));

    let retraining_handle = tokio::spawn(retraining_loop(feedback.clone(), cancel_rx.clone()));

    let keys = match &config.jwt_secret {
        Some(secret) => JwtKeys::from_secret(secret.as_bytes()),
        None => {
            warn!("JWT_SECRET not set, using a random key: no externally issued token will validate");
            JwtKeys::random()
        }
    };

    let state = Arc::new(AppState {
        pipeline,
        feedback,
        registry,
        keys,
        started_at: Utc::now(),
    });

    if let Err(e) = app_api_loop(state, config.port, cancel_rx).await {
        error!("API server failed: {:?}", e);
    }

    // Workers exit once every sender is gone.
    drop(alerts);
    let _ = retraining_handle.await;
    for (name, handle) in [("feedback", feedback_handle), ("alert", alert_handle)] {
        if timeout(Duration::from_secs(10), handle).await.is_err() {
            warn!("{} worker did not stop in time", name);
        }
    }
    info!("Shutdown complete");
    Ok(())
}

/// Periodically checks whether recent feedback justifies retraining.
async fn retraining_loop(feedback: Arc<FeedbackManager>, mut cancel: watch::Receiver<bool>) {
    let mut ticker = interval(RETRAINING_CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match feedback.trigger_retraining().await {
                    Ok(RetrainingDecision::Triggered { average_rating, samples, pending_examples }) => {
                        info!("Retraining triggered: average rating {:.2} over {} samples, {} pending examples", average_rating, samples, pending_examples);
                    }
                    Ok(decision) => info!("Retraining not needed: {:?}", decision),
                    Err(e) => error!("Retraining check failed: {}", e),
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
        }
    }
}
