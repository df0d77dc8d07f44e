//! OpenAI-compatible chat completions backend

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ModelClient, post_json};
use crate::agent::{Message, Role, ToolCallRequest};
use crate::config::LlmConfig;
use crate::tools::{ToolArgs, ToolSchema};
use crate::{Error, Result};

/// Default OpenAI API endpoint
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any `/chat/completions` compatible gateway
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    /// Create a client from LLM configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| Error::Config("OPENAI_API_KEY required for the openai backend".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Message> {
        let body = build_request(&self.model, history, tools, self.temperature);

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret());

        let response: ChatResponse = post_json("OpenAI", request, &body).await?;
        parse_response(response)
    }
}

/// Build a chat completions request body
fn build_request(model: &str, history: &[Message], tools: &[ToolSchema], temperature: f32) -> Value {
    let messages: Vec<Value> = history.iter().map(encode_message).collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
    });

    if !tools.is_empty() {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn encode_message(message: &Message) -> Value {
    match message.role {
        Role::System => json!({ "role": "system", "content": message.content }),
        Role::User => json!({ "role": "user", "content": message.content }),
        Role::Assistant if message.has_tool_calls() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": Value::Object(c.arguments.clone()).to_string(),
                        },
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        Role::Assistant => json!({ "role": "assistant", "content": message.content }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_response(response: ChatResponse) -> Result<Message> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Model("OpenAI returned no choices".to_string()))?;

    let calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let arguments = parse_arguments(&tc.function.name, &tc.function.arguments);
            ToolCallRequest::new(tc.id, tc.function.name, arguments)
        })
        .collect();

    Ok(Message::assistant_with_tool_calls(
        choice.message.content.unwrap_or_default(),
        calls,
    ))
}

/// Decode a JSON argument string, treating anything unusable as no arguments
fn parse_arguments(tool: &str, raw: &str) -> ToolArgs {
    if raw.trim().is_empty() {
        return ToolArgs::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::warn!(tool, arguments = raw, "ignoring unparseable tool arguments");
            ToolArgs::new()
        }
    }
}
