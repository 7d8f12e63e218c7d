//! Backend capability set and the tagged backend variant
//!
//! The client holds exactly one backend, chosen at construction. Nothing
//! above this layer branches on which protocol is in use.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chat::ChatCompletionBackend;
use super::error::LlmError;
use super::responses::ResponsesBackend;
use super::types::{Completion, Embedding, Message, ToolDeclaration, ToolResponse};

/// Default max tokens
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Which hosted protocol a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Responses-style API with native tool calling and server-side continuation
    NativeTooling,
    /// Plain chat-completion API
    ChatCompletion,
}

impl BackendKind {
    /// Protocol used for a model when none is configured explicitly
    pub fn for_model(model: &str) -> Self {
        if model == "gpt-5" {
            BackendKind::NativeTooling
        } else {
            BackendKind::ChatCompletion
        }
    }

    /// Whether the backend can resume a conversation from a response id
    pub fn supports_continuation(&self) -> bool {
        matches!(self, BackendKind::NativeTooling)
    }
}

/// Everything needed to build a backend
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub model: String,
    pub kind: BackendKind,
    pub base_url: String,
    pub api_key: String,
    pub embedding_model: String,
    pub timeout: Duration,
    /// Reasoning effort hint for the native backend
    pub reasoning_effort: Option<String>,
}

impl BackendSettings {
    pub fn new(model: impl Into<String>, kind: BackendKind, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            kind,
            base_url: base_url.into(),
            api_key: api_key.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout: Duration::from_secs(300),
            reasoning_effort: None,
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }
}

/// The capability set every hosted-model protocol provides
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model(&self) -> &str;

    /// Plain call: full message history in, text out
    async fn send(&self, messages: &[Message], max_tokens: u32) -> Result<Completion, LlmError>;

    /// Tool-augmented call, normalized to the generic output sequence
    async fn send_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        continuation: Option<&str>,
        max_tokens: u32,
    ) -> Result<ToolResponse, LlmError>;

    /// Raw (unnormalized) embedding of one text
    async fn send_embedding(&self, text: &str) -> Result<Embedding, LlmError>;
}

/// Tagged backend variant held by the model client
#[derive(Debug, Clone)]
pub enum Backend {
    NativeTooling(ResponsesBackend),
    ChatCompletion(ChatCompletionBackend),
}

impl Backend {
    pub fn new(settings: BackendSettings) -> Result<Self, LlmError> {
        if settings.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey {
                env_var: match settings.kind {
                    BackendKind::NativeTooling => "OPENAI_API_KEY".to_string(),
                    BackendKind::ChatCompletion => "LLM_API_KEY".to_string(),
                },
            });
        }
        Ok(match settings.kind {
            BackendKind::NativeTooling => Backend::NativeTooling(ResponsesBackend::new(settings)?),
            BackendKind::ChatCompletion => Backend::ChatCompletion(ChatCompletionBackend::new(settings)?),
        })
    }
}

#[async_trait]
impl ModelBackend for Backend {
    fn kind(&self) -> BackendKind {
        match self {
            Backend::NativeTooling(_) => BackendKind::NativeTooling,
            Backend::ChatCompletion(_) => BackendKind::ChatCompletion,
        }
    }

    fn model(&self) -> &str {
        match self {
            Backend::NativeTooling(b) => b.model(),
            Backend::ChatCompletion(b) => b.model(),
        }
    }

    async fn send(&self, messages: &[Message], max_tokens: u32) -> Result<Completion, LlmError> {
        match self {
            Backend::NativeTooling(b) => b.send(messages, max_tokens).await,
            Backend::ChatCompletion(b) => b.send(messages, max_tokens).await,
        }
    }

    async fn send_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        continuation: Option<&str>,
        max_tokens: u32,
    ) -> Result<ToolResponse, LlmError> {
        match self {
            Backend::NativeTooling(b) => b.send_tools(messages, tools, continuation, max_tokens).await,
            Backend::ChatCompletion(b) => b.send_tools(messages, tools, continuation, max_tokens).await,
        }
    }

    async fn send_embedding(&self, text: &str) -> Result<Embedding, LlmError> {
        match self {
            Backend::NativeTooling(b) => b.send_embedding(text).await,
            Backend::ChatCompletion(b) => b.send_embedding(text).await,
        }
    }
}
