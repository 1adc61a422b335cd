pub mod alert;
pub mod app;
pub mod cache;
pub mod config;
pub mod cost;
pub mod db;
pub mod engine;
pub mod environment;
pub mod error;
pub mod evaluation;
pub mod feedback;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod postprocess;
pub mod prompt;
pub mod rate_limit;
pub mod registry;
pub mod slack;
pub mod text;
pub mod types;

use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use ollama_rs::Ollama;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_LLM_REQUEST: &str = "llm_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_CACHE: &str = "cache";
pub const TARGET_RATE_LIMIT: &str = "rate_limit";
pub const TARGET_REGISTRY: &str = "model_registry";
pub const TARGET_ENGINE: &str = "engine";
pub const TARGET_FEEDBACK: &str = "feedback";

/// A configured connection to one text-generation service.
#[derive(Clone, Debug)]
pub enum LLMClient {
    Ollama(Ollama),
    OpenAI(OpenAIClient<OpenAIConfig>),
}

impl LLMClient {
    /// Provider name used to route model selections to this client.
    pub fn provider(&self) -> &'static str {
        match self {
            LLMClient::Ollama(_) => "ollama",
            LLMClient::OpenAI(_) => "openai",
        }
    }
}
