//! Native Gemini `generateContent` backend

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ModelClient, post_json};
use crate::agent::{Message, Role, ToolCallRequest};
use crate::config::LlmConfig;
use crate::tools::{ToolArgs, ToolSchema};
use crate::{Error, Result};

/// Default Gemini API endpoint
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini chat client
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    temperature: f32,
    disable_thinking: bool,
}

impl GeminiClient {
    /// Create a client from LLM configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .ok_or_else(|| Error::Config("GEMINI_API_KEY required for the gemini backend".to_string()))?;

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
            disable_thinking: config.disable_thinking,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn complete(&self, history: &[Message], tools: &[ToolSchema]) -> Result<Message> {
        let body = build_request(history, tools, self.temperature, self.disable_thinking);

        let request = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret());

        let response: GenerateResponse = post_json("Gemini", request, &body).await?;
        parse_response(response)
    }
}

/// Build a `generateContent` request body
fn build_request(
    history: &[Message],
    tools: &[ToolSchema],
    temperature: f32,
    disable_thinking: bool,
) -> Value {
    let system: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut contents: Vec<Value> = Vec::new();
    for message in history {
        match message.role {
            Role::System => {}
            Role::User => contents.push(json!({
                "role": "user",
                "parts": [{ "text": message.content }],
            })),
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(json!({ "text": message.content }));
                }
                for call in &message.tool_calls {
                    parts.push(json!({
                        "functionCall": { "name": call.name, "args": call.arguments },
                    }));
                }
                // Gemini rejects empty text parts
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            Role::Tool => {
                let part = json!({
                    "functionResponse": {
                        "name": message.name.clone().unwrap_or_default(),
                        "response": message.tool_payload().unwrap_or_default(),
                    },
                });
                // Responses to one batch of calls share a single content entry
                let merged = contents.last_mut().and_then(|last| {
                    let is_response = last["parts"][0].get("functionResponse").is_some();
                    if is_response {
                        last["parts"].as_array_mut()
                    } else {
                        None
                    }
                });
                match merged {
                    Some(parts) => parts.push(part),
                    None => contents.push(json!({ "role": "user", "parts": [part] })),
                }
            }
        }
    }

    let mut generation_config = json!({ "temperature": temperature });
    if disable_thinking {
        generation_config["thinkingConfig"] = json!({ "thinkingBudget": 0 });
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": generation_config,
    });

    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
    }

    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": upper_case_types(&t.parameters),
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    body
}

/// Gemini schemas spell JSON schema type names in upper case
fn upper_case_types(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match (k.as_str(), v) {
                        ("type", Value::String(s)) => Value::String(s.to_uppercase()),
                        _ => upper_case_types(v),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(upper_case_types).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Option<ToolArgs>,
}

fn parse_response(response: GenerateResponse) -> Result<Message> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .map_or_else(|| "no candidates".to_string(), |f| f.to_string());
        return Err(Error::Model(format!("Gemini returned no candidates: {reason}")));
    };

    let finish_reason = candidate.finish_reason;
    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    let mut text = String::new();
    let mut calls = Vec::new();
    for part in parts {
        if part.thought {
            continue;
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(fc) = part.function_call {
            // Gemini usually omits call ids; correlate with a fresh one
            let id = fc
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().as_simple()));
            calls.push(ToolCallRequest::new(id, fc.name, fc.args.unwrap_or_default()));
        }
    }

    if text.trim().is_empty() && calls.is_empty() {
        let reason = finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(Error::Model(format!(
            "Gemini returned an empty candidate (finish reason: {reason})"
        )));
    }

    Ok(Message::assistant_with_tool_calls(text, calls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;

    fn date_tool() -> ToolSchema {
        ToolSchema::without_parameters("get_today_date", "Get today's date.")
    }

    #[test]
    fn system_messages_become_instruction() {
        let history = vec![Message::system("Be Jarvis."), Message::user("hi")];
        let body = build_request(&history, &[], 0.7, true);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be Jarvis.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_round_trip_is_encoded_as_function_parts() {
        let call = ToolCallRequest::new("call_1", "get_today_date", ToolArgs::new());
        let mut result = ToolResult::new();
        result.insert("text".to_string(), "Today is Friday".into());

        let history = vec![
            Message::user("what day is it"),
            Message::assistant_with_tool_calls("", vec![call.clone()]),
            Message::tool_result(&call, &result),
        ];
        let body = build_request(&history, &[date_tool()], 0.7, false);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "get_today_date");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["text"],
            "Today is Friday"
        );
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["parameters"]["type"],
            "OBJECT"
        );
        assert!(body["generationConfig"].get("thinkingConfig").is_none());
    }

    #[test]
    fn parallel_tool_results_share_one_content() {
        let a = ToolCallRequest::new("a", "x", ToolArgs::new());
        let b = ToolCallRequest::new("b", "y", ToolArgs::new());
        let history = vec![
            Message::user("go"),
            Message::assistant_with_tool_calls("", vec![a.clone(), b.clone()]),
            Message::tool_result(&a, &ToolResult::new()),
            Message::tool_result(&b, &ToolResult::new()),
        ];
        let body = build_request(&history, &[], 0.7, true);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2]["parts"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn upper_cases_nested_types() {
        let schema = json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
        });
        let upper = upper_case_types(&schema);
        assert_eq!(upper["type"], "OBJECT");
        assert_eq!(upper["properties"]["city"]["type"], "STRING");
    }

    #[test]
    fn parses_text_and_skips_thoughts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "text": "It's teatime, " },
                        { "text": "Sir." }
                    ]
                }
            }]
        }))
        .unwrap();

        let message = parse_response(response).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "It's teatime, Sir.");
        assert!(!message.has_tool_calls());
    }

    #[test]
    fn parses_function_call_and_assigns_id() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [{ "functionCall": { "name": "get_today_date", "args": {} } }]
                }
            }]
        }))
        .unwrap();

        let message = parse_response(response).unwrap();
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "get_today_date");
        assert!(message.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn empty_candidate_is_model_error() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "role": "model" }, "finishReason": "SAFETY" }]
        }))
        .unwrap();

        let err = parse_response(response).unwrap_err();
        assert!(matches!(err, Error::Model(msg) if msg.contains("SAFETY")));
    }

    #[test]
    fn empty_assistant_message_is_not_sent() {
        let history = vec![
            Message::user("tell me something risky"),
            Message::assistant(""),
            Message::user("what day is it"),
        ];
        let body = build_request(&history, &[], 0.7, true);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|c| c["role"] == "user"));
        assert!(
            contents
                .iter()
                .flat_map(|c| c["parts"].as_array().unwrap())
                .all(|p| p["text"] != "")
        );
    }

    #[test]
    fn missing_candidates_is_model_error() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();

        let err = parse_response(response).unwrap_err();
        assert!(matches!(err, Error::Model(msg) if msg.contains("SAFETY")));
    }
}
