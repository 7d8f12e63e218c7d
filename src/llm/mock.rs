//! Scripted in-process backend for tests and dry runs

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::backend::{BackendKind, ModelBackend};
use super::error::LlmError;
use super::types::{Completion, Embedding, Message, OutputItem, ToolDeclaration, ToolResponse};

type TextReply = Box<dyn Fn(&[Message]) -> Result<String, LlmError> + Send + Sync>;
type Delay = Box<dyn Fn(&[Message]) -> Duration + Send + Sync>;

/// What a tool-augmented call was asked to do
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub continuation: Option<String>,
}

/// Backend that answers from a script instead of the network.
///
/// Tool-augmented calls pop queued responses in order; once the queue is
/// empty they answer with an empty response.
pub struct MockBackend {
    kind: BackendKind,
    model: String,
    text_reply: TextReply,
    delay: Option<Delay>,
    embedding: Option<Vec<f64>>,
    tool_script: Mutex<VecDeque<Result<ToolResponse, LlmError>>>,
    tool_requests: Mutex<Vec<ToolRequest>>,
    send_count: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            kind: BackendKind::ChatCompletion,
            model: "mock-model".to_string(),
            text_reply: Box::new(|_| Ok(String::new())),
            delay: None,
            embedding: None,
            tool_script: Mutex::new(VecDeque::new()),
            tool_requests: Mutex::new(Vec::new()),
            send_count: AtomicUsize::new(0),
        }
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Answer plain calls with a function of the message list
    pub fn with_text_reply<F>(mut self, reply: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.text_reply = Box::new(reply);
        self
    }

    /// Answer plain calls with a fixed text
    pub fn with_fixed_reply(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.with_text_reply(move |_| Ok(text.clone()))
    }

    /// Delay plain calls by a function of the message list
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&[Message]) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn with_embedding(mut self, vector: Vec<f64>) -> Self {
        self.embedding = Some(vector);
        self
    }

    pub fn push_tool_response(&self, response: ToolResponse) {
        self.lock_script().push_back(Ok(response));
    }

    pub fn push_tool_error(&self, error: LlmError) {
        self.lock_script().push_back(Err(error));
    }

    /// Every tool-augmented request received so far
    pub fn tool_requests(&self) -> Vec<ToolRequest> {
        self.tool_requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of plain calls received so far
    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ToolResponse, LlmError>>> {
        self.tool_script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Response requesting the given `(call_id, name, arguments)` calls
pub fn function_call_response(id: &str, calls: &[(&str, &str, Value)]) -> ToolResponse {
    let output = calls
        .iter()
        .map(|(call_id, name, arguments)| OutputItem::FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
            call_id: call_id.to_string(),
        })
        .collect();
    ToolResponse {
        id: Some(id.to_string()),
        output,
        raw: json!({"id": id}),
    }
}

/// Response carrying only text
pub fn text_response(id: &str, text: &str) -> ToolResponse {
    ToolResponse {
        id: Some(id.to_string()),
        output: vec![OutputItem::Message { text: text.to_string() }],
        raw: json!({"id": id}),
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, messages: &[Message], _max_tokens: u32) -> Result<Completion, LlmError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(messages)).await;
        }
        let text = (self.text_reply)(messages)?;
        Ok(Completion {
            raw: json!({"text": text}),
            text,
        })
    }

    async fn send_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        continuation: Option<&str>,
        _max_tokens: u32,
    ) -> Result<ToolResponse, LlmError> {
        if let Ok(mut requests) = self.tool_requests.lock() {
            requests.push(ToolRequest {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
                continuation: continuation.map(str::to_string),
            });
        }
        self.lock_script().pop_front().unwrap_or_else(|| Ok(ToolResponse::default()))
    }

    async fn send_embedding(&self, _text: &str) -> Result<Embedding, LlmError> {
        match &self.embedding {
            Some(vector) => Ok(Embedding::new(vector.clone(), "mock-embedding")),
            None => Err(LlmError::InvalidResponse("no embedding configured".to_string())),
        }
    }
}
