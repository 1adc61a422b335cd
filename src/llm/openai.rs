use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;

use super::{BackendError, GenerationParams};

pub(super) async fn generate(
    client: &Client<OpenAIConfig>,
    prompt: &str,
    params: &GenerationParams,
) -> Result<String, BackendError> {
    let messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| BackendError::Api(e.to_string()))?
            .into(),
    ];

    let mut args = CreateChatCompletionRequestArgs::default();
    args.model(params.model.clone())
        .messages(messages)
        .temperature(params.temperature);
    if let Some(max_tokens) = params.max_tokens {
        args.max_completion_tokens(max_tokens);
    }
    let request = args.build().map_err(|e| BackendError::Api(e.to_string()))?;

    let response = client.chat().create(request).await.map_err(map_error)?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(BackendError::EmptyResponse)
}

fn map_error(err: OpenAIError) -> BackendError {
    match err {
        OpenAIError::Reqwest(e) if e.is_connect() || e.is_timeout() => {
            BackendError::Connection(e.to_string())
        }
        other => BackendError::classify(other.to_string()),
    }
}
