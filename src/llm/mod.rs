pub mod ollama;
pub mod openai;
pub mod retry;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{LLMClient, TARGET_LLM_REQUEST};

pub use retry::RetryPolicy;

/// Failure reported by a text-generation backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("backend rejected credentials: {0}")]
    Unauthorized(String),

    #[error("backend quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("backend returned an error: {0}")]
    Api(String),

    #[error("backend returned an empty response")]
    EmptyResponse,
}

impl BackendError {
    /// Transient failures are retried; credential and billing problems are
    /// not, because repeating the call cannot fix them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BackendError::Unauthorized(_) | BackendError::QuotaExhausted(_)
        )
    }

    /// Best-effort classification of an error message returned by a client
    /// library that does not expose structured status codes.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("incorrect api key")
        {
            BackendError::Unauthorized(message)
        } else if lower.contains("insufficient_quota") || lower.contains("billing") {
            BackendError::QuotaExhausted(message)
        } else if lower.contains("connection")
            || lower.contains("connect error")
            || lower.contains("dns")
            || lower.contains("broken pipe")
        {
            BackendError::Connection(message)
        } else {
            BackendError::Api(message)
        }
    }
}

/// Sampling options for a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>, temperature: f32, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens: None,
            timeout,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams)
        -> Result<String, BackendError>;
}

#[async_trait]
impl TextGenerator for LLMClient {
    fn provider(&self) -> &str {
        LLMClient::provider(self)
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        debug!(target: TARGET_LLM_REQUEST, "Sending {} request to model {} ({} chars)", self.provider(), params.model, prompt.len());

        let call = async {
            match self {
                LLMClient::Ollama(client) => ollama::generate(client, prompt, params).await,
                LLMClient::OpenAI(client) => openai::generate(client, prompt, params).await,
            }
        };

        let text = match timeout(params.timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(target: TARGET_LLM_REQUEST, "{} request to {} timed out after {:?}", self.provider(), params.model, params.timeout);
                return Err(BackendError::Timeout(params.timeout));
            }
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text)
    }
}
