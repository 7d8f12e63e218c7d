//! Model client layer - one surface over two hosted-model protocols
//!
//! This module provides:
//! - Backend-neutral message, tool and response types
//! - The native tool-calling and chat-completion backends
//! - Response normalization for both protocols
//! - A backoff-retrying transport
//! - The `ModelClient` with single, batch, tool-augmented and embedding calls

pub mod backend;
pub mod chat;
pub mod client;
pub mod error;
pub mod http;
pub mod mock;
pub mod normalize;
pub mod responses;
pub mod retry;
pub mod types;

pub use backend::{Backend, BackendKind, BackendSettings, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_TOKENS, ModelBackend};
pub use client::{Conversation, DEFAULT_PARALLELISM, Generated, ModelClient};
pub use error::LlmError;
pub use mock::MockBackend;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper, Transport};
pub use types::{
    Completion, DEFAULT_SYSTEM_PROMPT, Embedding, GenerateOutput, HistoryEntry, Message, ModelConfig, OutputItem,
    Role, ToolCall, ToolDeclaration, ToolResponse, normalize_l2,
};
