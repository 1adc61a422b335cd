use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;

use super::{BackendError, GenerationParams};

pub(super) async fn generate(
    client: &Ollama,
    prompt: &str,
    params: &GenerationParams,
) -> Result<String, BackendError> {
    let mut options = GenerationOptions::default().temperature(params.temperature);
    if let Some(max_tokens) = params.max_tokens {
        options = options.num_predict(max_tokens as i32);
    }

    let mut request = GenerationRequest::new(params.model.clone(), prompt.to_string());
    request.options = Some(options);

    match client.generate(request).await {
        Ok(response) => Ok(response.response),
        Err(e) => Err(BackendError::classify(e.to_string())),
    }
}
