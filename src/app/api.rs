use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{authorization::Bearer, Authorization};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AppState, Claims};
use crate::cache::{CacheManager, CacheStats};
use crate::config::SummarizationConfig;
use crate::error::{report, ErrorKind, ErrorReport, StoreError, SummarizeError};
use crate::feedback::{FeedbackData, FeedbackRecord};
use crate::pipeline::Caller;
use crate::rate_limit::{month_bounds, ActionUsage, QuotaStatus, ACTION_SUMMARIZE};
use crate::registry::{FallbackLease, ModelType, ModelVariant};
use crate::types::{SummaryResult, UserTier};
use crate::TARGET_WEB_REQUEST;

type AuthHeader = Option<TypedHeader<Authorization<Bearer>>>;

/// An error as the client sees it: a status code and a report without
/// internal detail.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    report: ErrorReport,
}

impl ApiError {
    fn new(err: SummarizeError, state: &AppState) -> Self {
        let status = status_for(&err);
        let report = report(&err, state.pipeline.alerts());
        Self { status, report }
    }

    fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

pub fn status_for(err: &SummarizeError) -> StatusCode {
    match err {
        SummarizeError::Database(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::ExternalApi => StatusCode::BAD_GATEWAY,
            ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Database | ErrorKind::Processing | ErrorKind::Unknown => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.report.retry_after.map(|at| {
            let seconds = (at - Utc::now()).num_seconds().max(1);
            HeaderValue::from(seconds)
        });
        let mut response = (self.status, Json(self.report)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

fn authenticate(state: &AppState, auth_header: AuthHeader) -> Result<Claims, ApiError> {
    let Some(TypedHeader(auth_header)) = auth_header else {
        let err = SummarizeError::Authentication {
            reason: "missing bearer token".to_string(),
        };
        return Err(ApiError::new(err, state));
    };
    state
        .keys
        .verify(auth_header.token())
        .map_err(|e| ApiError::new(e, state))
}

fn require_admin(state: &AppState, claims: &Claims, action: &str) -> Result<(), ApiError> {
    if claims.admin {
        return Ok(());
    }
    warn!(target: TARGET_WEB_REQUEST, "app::api {} refused for non-admin {}", action, claims.sub);
    let err = SummarizeError::Authentication {
        reason: "administrator token required".to_string(),
    };
    Err(ApiError::new(err, state).with_status(StatusCode::FORBIDDEN))
}

fn caller_for(state: &AppState, claims: &Claims) -> Caller {
    let mut caller = state.pipeline.caller(&claims.sub);
    if let Some(tier) = claims.tier {
        caller.tier = tier;
    }
    caller
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,
    #[serde(default)]
    pub config: SummarizationConfig,
}

/// Summarizes the posted text for the authenticated user.
pub async fn summarize(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
    Json(payload): Json<SummarizeRequest>,
) -> Result<Json<SummaryResult>, ApiError> {
    let claims = authenticate(&state, auth_header)?;
    let caller = caller_for(&state, &claims);
    info!(target: TARGET_WEB_REQUEST, "app::api summarize starting for user {} ({}, {} chars)", caller.user_id, payload.config.mode.as_str(), payload.text.len());

    let result = state
        .pipeline
        .summarize_for(&payload.text, &payload.config, &caller)
        .await
        .map_err(|e| ApiError::new(e, &state))?;
    Ok(Json(result))
}

/// Records a rating or edit for a summary.
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
    Json(payload): Json<FeedbackData>,
) -> Result<(StatusCode, Json<FeedbackRecord>), ApiError> {
    let claims = authenticate(&state, auth_header)?;

    match state.pipeline.get_summary(payload.summary_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            let err = SummarizeError::validation(format!("unknown summary {}", payload.summary_id));
            return Err(ApiError::new(err, &state).with_status(StatusCode::NOT_FOUND));
        }
        Err(e) => return Err(ApiError::new(e.into(), &state)),
    }

    let record = state
        .feedback
        .collect_feedback(&claims.sub, payload)
        .await
        .map_err(|e| ApiError::new(e, &state))?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    #[serde(rename = "type")]
    pub model_type: Option<ModelType>,
}

pub async fn list_models(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
    Query(query): Query<ModelsQuery>,
) -> Result<Json<Vec<ModelVariant>>, ApiError> {
    authenticate(&state, auth_header)?;
    let models = state
        .registry
        .list_models(query.model_type)
        .await
        .map_err(|e| ApiError::new(e.into(), &state))?;
    Ok(Json(models))
}

/// Makes a variant the active model of its type. Administrators only.
pub async fn activate_model(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
    Path(id): Path<Uuid>,
) -> Result<Json<ModelVariant>, ApiError> {
    let claims = authenticate(&state, auth_header)?;
    require_admin(&state, &claims, "activate_model")?;

    let variant = state
        .registry
        .activate_model(id)
        .await
        .map_err(|e| ApiError::new(e.into(), &state))?;
    info!(target: TARGET_WEB_REQUEST, "app::api activate_model {} activated {} by {}", variant.model_type, variant.version_label(), claims.sub);
    Ok(Json(variant))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub user_id: String,
    pub tier: UserTier,
    pub quota: QuotaStatus,
    pub actions: Vec<ActionUsage>,
}

/// Token quota and per-action usage for the current calendar month.
pub async fn usage(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
) -> Result<Json<UsageResponse>, ApiError> {
    let claims = authenticate(&state, auth_header)?;
    let caller = caller_for(&state, &claims);

    let limiter = state.pipeline.limiter();
    let quota = limiter.check_quota(&caller.user_id, caller.tier).await;
    let (period_start, _) = month_bounds(Utc::now());
    let actions = limiter
        .usage_stats(&caller.user_id, period_start)
        .await
        .map_err(|e| ApiError::new(e.into(), &state))?;

    Ok(Json(UsageResponse {
        user_id: caller.user_id,
        tier: caller.tier,
        quota,
        actions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UnblockQuery {
    pub action: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnblockResponse {
    pub user_id: String,
    pub action: String,
    pub unblocked: bool,
}

/// Lifts a user's rate-limit block early. Administrators only.
pub async fn unblock_user(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
    Path(user_id): Path<String>,
    Query(query): Query<UnblockQuery>,
) -> Result<Json<UnblockResponse>, ApiError> {
    let claims = authenticate(&state, auth_header)?;
    require_admin(&state, &claims, "unblock_user")?;

    let action = query.action.unwrap_or_else(|| ACTION_SUMMARIZE.to_string());
    let unblocked = state.pipeline.limiter().reset_block(&user_id, &action);
    info!(target: TARGET_WEB_REQUEST, "app::api unblock_user {} ({}) by {}: {}", user_id, action, claims.sub, unblocked);
    Ok(Json(UnblockResponse {
        user_id,
        action,
        unblocked,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateResponse {
    pub key: String,
    pub failed_tiers: usize,
}

/// Drops the cached summary for a (text, config) pair from every tier.
/// Administrators only.
pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
    Json(payload): Json<SummarizeRequest>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let claims = authenticate(&state, auth_header)?;
    require_admin(&state, &claims, "invalidate_cache")?;

    let key = CacheManager::generate_key(&payload.text, &payload.config);
    let failed_tiers = state.pipeline.cache().invalidate(&key).await;
    info!(target: TARGET_WEB_REQUEST, "app::api invalidate_cache {} by {} ({} tier failures)", key, claims.sub, failed_tiers);
    Ok(Json(InvalidateResponse { key, failed_tiers }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<&'static str>,
    pub uptime_secs: i64,
    pub providers: Vec<String>,
    pub cache_tiers: Vec<String>,
    pub cache: CacheStats,
    /// Fallback variants currently standing in for a failed primary.
    pub fallbacks: Vec<FallbackLease>,
}

/// Checks the server's status, validating a JWT only if one is provided.
pub async fn status_check(
    State(state): State<Arc<AppState>>,
    auth_header: AuthHeader,
) -> Result<Json<StatusResponse>, ApiError> {
    if auth_header.is_some() {
        authenticate(&state, auth_header)?;
    }

    let cache = state.pipeline.cache();
    Ok(Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        git_hash: option_env!("GIT_HASH").filter(|h| !h.is_empty()),
        built_at: option_env!("BUILD_TIMESTAMP"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        providers: state.pipeline.engine().providers(),
        cache_tiers: cache.tier_names(),
        cache: cache.stats(),
        fallbacks: [ModelType::Extractive, ModelType::Abstractive, ModelType::Hybrid]
            .into_iter()
            .filter_map(|model_type| state.registry.current_lease(model_type))
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_for(&SummarizeError::validation("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SummarizeError::RateLimited {
                action: "summarize".to_string(),
                reset_time: Utc::now(),
                blocked_until: None,
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&BackendError::Api("boom".to_string()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&BackendError::Connection("refused".to_string()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&StoreError::NotFound("model".to_string()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&SummarizeError::processing("empty")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
