//! HTTP surface of the summarization service.

pub mod api;
pub mod auth;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::feedback::FeedbackManager;
use crate::pipeline::Pipeline;
use crate::registry::ModelRegistry;
use crate::TARGET_WEB_REQUEST;

pub use auth::{Claims, JwtKeys};

/// Everything the handlers need, shared across requests.
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub feedback: Arc<FeedbackManager>,
    pub registry: Arc<ModelRegistry>,
    pub keys: JwtKeys,
    pub started_at: DateTime<Utc>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(api::status_check))
        .route("/summarize", post(api::summarize))
        .route("/feedback", post(api::submit_feedback))
        .route("/models", get(api::list_models))
        .route("/models/{id}/activate", post(api::activate_model))
        .route("/usage", get(api::usage))
        .route("/usage/{user_id}/unblock", post(api::unblock_user))
        .route("/cache/invalidate", post(api::invalidate_cache))
        .with_state(state)
}

/// Serves the API on `port` until `shutdown` reads `true`.
pub async fn app_api_loop(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(target: TARGET_WEB_REQUEST, "Server running on http://{}", addr);

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!(target: TARGET_WEB_REQUEST, "Server shutting down");
        })
        .await?;

    Ok(())
}
