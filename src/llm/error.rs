//! Errors that can occur during model calls

use std::time::Duration;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    /// The backend rejected the tool-calling protocol for this model/configuration
    #[error("Tool calling not supported: {0}")]
    ToolsUnsupported(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    pub fn is_tools_unsupported(&self) -> bool {
        matches!(self, LlmError::ToolsUnsupported(_))
    }

    /// Whether another attempt could succeed
    ///
    /// Transport, rate-limit and parse failures are transient. A capability
    /// rejection or a missing credential will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { .. } => true,
            LlmError::Network(_) => true,
            LlmError::InvalidResponse(_) => true,
            LlmError::JsonError(_) => true,
            LlmError::ToolsUnsupported(_) => false,
            LlmError::MissingApiKey { .. } => false,
        }
    }
}
