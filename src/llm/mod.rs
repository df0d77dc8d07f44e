//! Language model clients
//!
//! The turn engine talks to the model only through [`ModelClient`]. Two
//! backends are provided: the native Gemini API and any OpenAI-compatible
//! chat completions gateway.

mod gemini;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use crate::agent::Message;
use crate::config::{LlmBackend, LlmConfig};
use crate::tools::ToolSchema;
use crate::{Error, Result};

/// A chat model that can request tool calls
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the next assistant message for `history`
    ///
    /// # Errors
    ///
    /// Returns `Error::Model` on transport failures, non-success responses
    /// or responses that carry no message
    async fn complete(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Message>;
}

/// Build the configured backend
///
/// # Errors
///
/// Returns error if the backend's API key is missing
pub fn from_config(config: LlmConfig) -> Result<Arc<dyn ModelClient>> {
    let client: Arc<dyn ModelClient> = match config.backend {
        LlmBackend::Gemini => Arc::new(GeminiClient::new(config)?),
        LlmBackend::OpenAi => Arc::new(OpenAiClient::new(config)?),
    };
    Ok(client)
}

/// Send a JSON request and decode a JSON response, mapping failures to
/// `Error::Model`
async fn post_json<T>(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| Error::Model(format!("{provider} request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Model(format!("{provider} error {status}: {body}")));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::Model(format!("{provider} response decode failed: {e}")))
}
