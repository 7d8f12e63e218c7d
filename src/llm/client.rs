//! Model client - one call surface over both hosted-model protocols
//!
//! The client exclusively owns its conversation history for the plain
//! single-thread `generate` use case. Callers that need isolated
//! conversations build separate clients or pass history explicitly to
//! `generate_messages` / `generate_with_tools`.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::backend::{Backend, BackendKind, BackendSettings, DEFAULT_MAX_TOKENS, ModelBackend};
use super::error::LlmError;
use super::retry::{RetryPolicy, Transport};
use super::types::{
    Completion, Embedding, GenerateOutput, HistoryEntry, Message, ModelConfig, ToolDeclaration, ToolResponse,
    normalize_l2,
};

/// Default number of concurrent calls in a batch
pub const DEFAULT_PARALLELISM: usize = 8;

/// Argument of `generate_messages`; its shape selects single or batch mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Conversation {
    /// One flat list of messages
    Single(Vec<Message>),
    /// A list of independent message lists
    Batch(Vec<Vec<Message>>),
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Conversation::Single(messages)
    }
}

impl From<Vec<Vec<Message>>> for Conversation {
    fn from(batches: Vec<Vec<Message>>) -> Self {
        Conversation::Batch(batches)
    }
}

/// Result of `generate_messages`, mirroring the argument's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Generated {
    Single(String),
    Batch(Vec<String>),
}

impl Generated {
    /// The single answer, or the first answer of a batch
    pub fn into_single(self) -> String {
        match self {
            Generated::Single(text) => text,
            Generated::Batch(texts) => texts.into_iter().next().unwrap_or_default(),
        }
    }

    /// The batch answers, or a one-element list for a single answer
    pub fn into_batch(self) -> Vec<String> {
        match self {
            Generated::Single(text) => vec![text],
            Generated::Batch(texts) => texts,
        }
    }
}

/// Model client over one backend
pub struct ModelClient<B: ModelBackend = Backend> {
    config: ModelConfig,
    backend: Arc<B>,
    transport: Transport,
    max_tokens: u32,
    message_history: Vec<Message>,
    history: Vec<HistoryEntry>,
}

impl ModelClient<Backend> {
    /// Build a client talking to a hosted backend
    pub fn connect(settings: BackendSettings, system_prompt: Option<String>, retry: RetryPolicy) -> Result<Self, LlmError> {
        let backend = Backend::new(settings)?;
        info!("Model client ready: {} ({:?})", backend.model(), backend.kind());
        Ok(Self::new(backend, system_prompt).with_transport(Transport::new(retry)))
    }
}

impl<B: ModelBackend> ModelClient<B> {
    pub fn new(backend: B, system_prompt: Option<String>) -> Self {
        let config = ModelConfig::new(backend.model(), system_prompt);
        let mut client = Self {
            config,
            backend: Arc::new(backend),
            transport: Transport::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
            message_history: Vec::new(),
            history: Vec::new(),
        };
        client.reset();
        client
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Drop the conversation back to the persona message and clear the call history
    pub fn reset(&mut self) {
        self.message_history = vec![Message::system(self.config.system_prompt.clone())];
        self.history.clear();
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn message_history(&self) -> &[Message] {
        &self.message_history
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn last_output_text(&self) -> Option<&str> {
        self.history.last().map(|entry| entry.output_text.as_str())
    }

    /// Continue the client-owned conversation with one user turn.
    ///
    /// The whole history is sent; the reply is appended to it and recorded
    /// in the call history. An exhausted retry budget yields empty output.
    pub async fn generate(&mut self, input_text: impl Into<String>) -> GenerateOutput {
        let input_text = input_text.into();
        self.message_history.push(Message::user(input_text.clone()));

        let completion: Completion = {
            let backend = &self.backend;
            let messages = &self.message_history;
            let max_tokens = self.max_tokens;
            self.transport
                .call_or_default("generate", |_| backend.send(messages, max_tokens))
                .await
        };

        self.message_history.push(Message::assistant(completion.text.clone()));
        self.history.push(HistoryEntry {
            input_text: input_text.clone(),
            output_text: completion.text.clone(),
            raw_response: completion.raw,
        });

        GenerateOutput {
            input_text,
            output_text: completion.text,
        }
    }

    /// One independent call on an explicit message list; empty on failure
    async fn call_one(&self, messages: &[Message]) -> String {
        let completion: Completion = self
            .transport
            .call_or_default("generate_messages", |_| self.backend.send(messages, self.max_tokens))
            .await;
        completion.text
    }

    /// Run independent conversations with bounded concurrency.
    ///
    /// At most `min(parallelism, N)` calls are in flight. The result is
    /// position-preserving: `result[i]` answers `batches[i]`, and a failed
    /// call contributes an empty string.
    pub async fn generate_batch(&self, batches: &[Vec<Message>], parallelism: usize) -> Vec<String> {
        let n = batches.len();
        if n == 0 {
            return Vec::new();
        }
        let workers = parallelism.clamp(1, n);
        debug!("Dispatching batch of {} conversations over {} workers", n, workers);

        let mut results = vec![String::new(); n];
        let mut completed = stream::iter(batches.iter().enumerate())
            .map(|(index, messages)| async move { (index, self.call_one(messages).await) })
            .buffer_unordered(workers);

        while let Some((index, text)) = completed.next().await {
            results[index] = text;
        }
        results
    }

    /// Single or batch call, selected by the argument's shape
    pub async fn generate_messages(&self, conversation: impl Into<Conversation>, parallelism: usize) -> Generated {
        match conversation.into() {
            Conversation::Single(messages) => Generated::Single(self.call_one(&messages).await),
            Conversation::Batch(batches) => Generated::Batch(self.generate_batch(&batches, parallelism).await),
        }
    }

    /// Tool-augmented call, normalized across backends.
    ///
    /// Transient failures are retried and then absorbed into an empty
    /// response. Only a rejection of the tool-calling protocol itself is
    /// returned as an error.
    pub async fn generate_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        continuation: Option<&str>,
    ) -> Result<ToolResponse, LlmError> {
        let result = self
            .transport
            .call("generate_with_tools", |_| {
                self.backend.send_tools(messages, tools, continuation, self.max_tokens)
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(e) if e.is_tools_unsupported() => Err(e),
            Err(e) => {
                warn!("Tool-augmented call produced no response: {}", e);
                Ok(ToolResponse::default())
            }
        }
    }

    /// Vector embedding of `text`, optionally rescaled to unit norm.
    ///
    /// Empty input or an exhausted retry budget yields a zero-length embedding.
    pub async fn embed(&self, text: &str, normalize: bool) -> Embedding {
        let text = text.trim();
        if text.is_empty() {
            return Embedding::empty("");
        }

        let result = self
            .transport
            .call("embed", |_| self.backend.send_embedding(text))
            .await;

        match result {
            Ok(mut embedding) => {
                if normalize {
                    normalize_l2(&mut embedding.embedding);
                }
                embedding.dim = embedding.embedding.len();
                embedding
            }
            Err(e) => {
                warn!("Embedding failed: {}", e);
                Embedding::empty("")
            }
        }
    }
}

impl<B: ModelBackend> std::fmt::Debug for ModelClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("model", &self.config.model_name)
            .field("kind", &self.backend.kind())
            .field("messages", &self.message_history.len())
            .finish()
    }
}
