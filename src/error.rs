use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::alert::{Alert, AlertSender};
use crate::llm::BackendError;

/// Error families surfaced to callers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    RateLimit,
    Network,
    ExternalApi,
    Database,
    Authentication,
    Processing,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::ExternalApi => "external_api",
            ErrorKind::Database => "database",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Processing => "processing",
            ErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Failures of the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("stored value is invalid: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    #[error("rate limit exceeded for '{action}', resets at {reset_time}")]
    RateLimited {
        action: String,
        reset_time: DateTime<Utc>,
        blocked_until: Option<DateTime<Utc>>,
    },

    #[error("monthly quota exceeded: {used} of {limit} tokens used")]
    QuotaExceeded {
        used: i64,
        limit: i64,
        reset_time: DateTime<Utc>,
    },

    #[error("network failure: {0}")]
    Network(String),

    #[error("text generation backend failed: {0}")]
    ExternalApi(BackendError),

    #[error("store failure: {0}")]
    Database(#[from] StoreError),

    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("processing failed: {reason}")]
    Processing { reason: String },

    #[error("request was cancelled")]
    Cancelled,

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl From<BackendError> for SummarizeError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Connection(msg) => SummarizeError::Network(msg),
            other => SummarizeError::ExternalApi(other),
        }
    }
}

impl SummarizeError {
    pub fn validation(reason: impl Into<String>) -> Self {
        SummarizeError::Validation {
            reason: reason.into(),
        }
    }

    pub fn processing(reason: impl Into<String>) -> Self {
        SummarizeError::Processing {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SummarizeError::Validation { .. } => ErrorKind::Validation,
            SummarizeError::RateLimited { .. } | SummarizeError::QuotaExceeded { .. } => {
                ErrorKind::RateLimit
            }
            SummarizeError::Network(_) => ErrorKind::Network,
            SummarizeError::ExternalApi(_) => ErrorKind::ExternalApi,
            SummarizeError::Database(_) => ErrorKind::Database,
            SummarizeError::Authentication { .. } => ErrorKind::Authentication,
            SummarizeError::Processing { .. } => ErrorKind::Processing,
            SummarizeError::Cancelled | SummarizeError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SummarizeError::Validation { .. }
            | SummarizeError::RateLimited { .. }
            | SummarizeError::QuotaExceeded { .. }
            | SummarizeError::Cancelled => Severity::Low,
            SummarizeError::Network(_)
            | SummarizeError::Authentication { .. }
            | SummarizeError::Processing { .. } => Severity::Medium,
            // Our own credentials or billing with the provider are broken.
            SummarizeError::ExternalApi(BackendError::Unauthorized(_))
            | SummarizeError::ExternalApi(BackendError::QuotaExhausted(_)) => Severity::Critical,
            SummarizeError::ExternalApi(_) => Severity::High,
            SummarizeError::Database(_) => Severity::High,
            SummarizeError::Unknown(_) => Severity::High,
        }
    }

    /// Whether the system itself may retry the failed operation.
    ///
    /// Validation, rate-limit and authentication failures require the client
    /// to change its input or wait; they are never retried internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            SummarizeError::Network(_) | SummarizeError::Database(_) => true,
            SummarizeError::ExternalApi(err) => err.is_retryable(),
            SummarizeError::Processing { .. } => true,
            _ => false,
        }
    }

    /// Time after which a rate-limited caller may try again.
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        match self {
            SummarizeError::RateLimited {
                reset_time,
                blocked_until,
                ..
            } => Some(blocked_until.unwrap_or(*reset_time)),
            SummarizeError::QuotaExceeded { reset_time, .. } => Some(*reset_time),
            _ => None,
        }
    }

    /// Generic message safe to show to end users; never includes internals.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "The request could not be processed. Please check the input text and options.",
            ErrorKind::RateLimit => "Too many requests. Please wait before trying again.",
            ErrorKind::Network | ErrorKind::ExternalApi => {
                "The summarization service is temporarily unavailable. Please try again shortly."
            }
            ErrorKind::Database => "A temporary storage problem occurred. Please try again shortly.",
            ErrorKind::Authentication => "Authentication is required to use this service.",
            ErrorKind::Processing => "The text could not be summarized. Please try again.",
            ErrorKind::Unknown => "Something went wrong. Please try again later.",
        }
    }
}

/// What a caller is shown about a failure. Detail stays in the logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: &'static str,
    pub correlation_id: Uuid,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

/// Logs the full error under a fresh correlation id and, for critical
/// failures, raises an out-of-band alert.
pub fn report(err: &SummarizeError, alerts: Option<&AlertSender>) -> ErrorReport {
    let correlation_id = Uuid::new_v4();
    let severity = err.severity();
    let kind = err.kind();

    match severity {
        Severity::Low => {
            warn!("[{}] {} error: {}", correlation_id, kind.as_str(), err);
        }
        _ => {
            error!("[{}] {} error ({:?}): {:?}", correlation_id, kind.as_str(), severity, err);
        }
    }

    if severity == Severity::Critical {
        if let Some(alerts) = alerts {
            alerts.raise(Alert::new(
                severity,
                format!("Critical {} failure", kind.as_str()),
                err.to_string(),
                correlation_id,
            ));
        }
    }

    ErrorReport {
        kind,
        severity,
        message: err.user_message(),
        correlation_id,
        retryable: err.is_retryable(),
        retry_after: err.retry_after(),
    }
}
