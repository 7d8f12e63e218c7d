//! Native tool-calling backend (responses-style API)
//!
//! Requests carry an `input` item list instead of chat messages: assistant
//! tool calls become `function_call` items and tool results become
//! `function_call_output` items. Given a continuation token, only the items
//! after the last assistant turn are sent along with `previous_response_id`.

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::backend::{BackendKind, BackendSettings, ModelBackend};
use super::error::LlmError;
use super::http::HttpEndpoint;
use super::normalize::{decode_embedding, decode_responses_text, parse_responses_output, to_responses_tool};
use super::types::{Completion, Embedding, Message, Role, ToolDeclaration, ToolResponse};

/// Responses API client
#[derive(Debug, Clone)]
pub struct ResponsesBackend {
    endpoint: HttpEndpoint,
    model: String,
    embedding_model: String,
    reasoning_effort: Option<String>,
}

impl ResponsesBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(settings.base_url, settings.api_key, settings.timeout)?,
            model: settings.model,
            embedding_model: settings.embedding_model,
            reasoning_effort: settings.reasoning_effort,
        })
    }

    fn base_body(&self, input: Vec<Value>, max_tokens: u32) -> Value {
        let mut body = json!({
            "model": self.model,
            "input": input,
            "max_output_tokens": max_tokens,
        });
        if let Some(effort) = &self.reasoning_effort {
            body["reasoning"] = json!({"effort": effort});
        }
        body
    }

    /// Build the request body for a plain call
    fn build_request(&self, messages: &[Message], max_tokens: u32) -> Value {
        self.base_body(input_items(messages), max_tokens)
    }

    /// Build the request body for a tool-augmented call
    fn build_tools_request(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        continuation: Option<&str>,
        max_tokens: u32,
    ) -> Value {
        let input = match continuation {
            Some(_) => input_items(pending_messages(messages)),
            None => input_items(messages),
        };
        let mut body = self.base_body(input, max_tokens);
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(to_responses_tool).collect::<Vec<_>>());
        }
        if let Some(previous) = continuation {
            body["previous_response_id"] = json!(previous);
        }
        body
    }
}

/// Messages the server has not seen yet: everything after the last
/// assistant turn, or the whole list when there is none.
fn pending_messages(messages: &[Message]) -> &[Message] {
    match messages.iter().rposition(|m| m.role == Role::Assistant) {
        Some(last) if last + 1 < messages.len() => &messages[last + 1..],
        _ => messages,
    }
}

/// Translate messages into responses-style input items
fn input_items(messages: &[Message]) -> Vec<Value> {
    let mut items = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::Tool => items.push(json!({
                "type": "function_call_output",
                "call_id": message.tool_call_id.clone().unwrap_or_default(),
                "output": message.text(),
            })),
            Role::Assistant if !message.tool_calls.is_empty() => {
                if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
                    items.push(json!({"role": "assistant", "content": text}));
                }
                for call in &message.tool_calls {
                    items.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.name,
                        "arguments": call.arguments_json(),
                    }));
                }
            }
            role => items.push(json!({"role": role.as_str(), "content": message.text()})),
        }
    }
    items
}

#[async_trait]
impl ModelBackend for ResponsesBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeTooling
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, messages: &[Message], max_tokens: u32) -> Result<Completion, LlmError> {
        let body = self.build_request(messages, max_tokens);
        let raw = self.endpoint.post_json("/responses", &body).await?;
        let text = match decode_responses_text(&raw) {
            Ok(text) => text,
            Err(e) => {
                debug!("Response carried no text: {}", e);
                String::new()
            }
        };
        Ok(Completion { text, raw })
    }

    async fn send_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        continuation: Option<&str>,
        max_tokens: u32,
    ) -> Result<ToolResponse, LlmError> {
        let body = self.build_tools_request(messages, tools, continuation, max_tokens);
        let raw = self.endpoint.post_json("/responses", &body).await?;
        Ok(ToolResponse {
            id: raw.get("id").and_then(|i| i.as_str()).map(str::to_string),
            output: parse_responses_output(&raw),
            raw,
        })
    }

    async fn send_embedding(&self, text: &str) -> Result<Embedding, LlmError> {
        let body = json!({"model": self.embedding_model, "input": text});
        let raw = self.endpoint.post_json("/embeddings", &body).await?;
        let vector = decode_embedding(&raw).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(Embedding::new(vector, self.embedding_model.clone()))
    }
}
