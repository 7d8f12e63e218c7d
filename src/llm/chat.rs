//! Chat-completion backend
//!
//! Speaks the plain `/chat/completions` protocol. Tool calls come back as
//! `choices[0].message.tool_calls` and are normalized into the generic
//! output sequence. Server-side continuation is not available, so the
//! continuation token is ignored and the full history is always sent.

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::backend::{BackendKind, BackendSettings, ModelBackend};
use super::error::LlmError;
use super::http::HttpEndpoint;
use super::normalize::{chat_output_items, decode_chat_text, decode_embedding, to_chat_tool};
use super::types::{Completion, Embedding, Message, ToolDeclaration, ToolResponse};

/// Chat-completion API client
#[derive(Debug, Clone)]
pub struct ChatCompletionBackend {
    endpoint: HttpEndpoint,
    model: String,
    embedding_model: String,
}

impl ChatCompletionBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, LlmError> {
        Ok(Self {
            endpoint: HttpEndpoint::new(settings.base_url, settings.api_key, settings.timeout)?,
            model: settings.model,
            embedding_model: settings.embedding_model,
        })
    }

    /// Build the request body for a plain call
    fn build_request(&self, messages: &[Message], max_tokens: u32) -> Value {
        json!({
            "model": self.model,
            "messages": messages.iter().map(|m| wire_message(m, false)).collect::<Vec<_>>(),
            "max_tokens": max_tokens,
        })
    }

    /// Build the request body for a tool-augmented call
    fn build_tools_request(&self, messages: &[Message], tools: &[ToolDeclaration], max_tokens: u32) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(|m| wire_message(m, true)).collect::<Vec<_>>(),
            "max_tokens": max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(to_chat_tool).collect::<Vec<_>>());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Serialize one message into chat-completion wire form.
///
/// With `cache_hint`, non-empty text contents carry an ephemeral
/// cache-control marker.
fn wire_message(message: &Message, cache_hint: bool) -> Value {
    let mut wire = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = json!(
            message
                .tool_calls
                .iter()
                .map(|call| json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments_json()},
                }))
                .collect::<Vec<_>>()
        );
    }
    if let Some(call_id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(call_id);
    }
    if cache_hint && message.content.as_deref().is_some_and(|c| !c.is_empty()) {
        wire["cache_control"] = json!({"type": "ephemeral"});
    }
    wire
}

#[async_trait]
impl ModelBackend for ChatCompletionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ChatCompletion
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, messages: &[Message], max_tokens: u32) -> Result<Completion, LlmError> {
        let body = self.build_request(messages, max_tokens);
        let raw = self.endpoint.post_json("/chat/completions", &body).await?;
        let text = match decode_chat_text(&raw) {
            Ok(text) => text,
            Err(e) => {
                debug!("Chat completion carried no text: {}", e);
                String::new()
            }
        };
        Ok(Completion { text, raw })
    }

    async fn send_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        _continuation: Option<&str>,
        max_tokens: u32,
    ) -> Result<ToolResponse, LlmError> {
        let body = self.build_tools_request(messages, tools, max_tokens);
        let raw = self.endpoint.post_json("/chat/completions", &body).await?;
        Ok(ToolResponse {
            id: raw.get("id").and_then(|i| i.as_str()).map(str::to_string),
            output: chat_output_items(&raw),
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
