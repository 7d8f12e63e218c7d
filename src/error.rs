//! Error types for agentprobe
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::llm::LlmError;

/// All error types that can surface from an experiment run
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Backend rejected the tool-calling protocol, even after falling back
    #[error("Tool calling unsupported: {0}")]
    ToolsUnsupported(String),

    /// LLM backend error that could not be absorbed
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Fatal configuration error (missing run dir, unknown experiment, bad topic index)
    #[error("Config error: {0}")]
    Config(String),

    /// Scenario file could not be interpreted
    #[error("Scenario error: {0}")]
    Scenario(String),

    /// Prompt template failed to render
    #[error("Template error: {0}")]
    Template(String),

    /// Artifact persistence error
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for agentprobe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tools_unsupported_error() {
        let err = ProbeError::ToolsUnsupported("model rejects tools".to_string());
        assert_eq!(err.to_string(), "Tool calling unsupported: model rejects tools");
    }

    #[test]
    fn test_config_error() {
        let err = ProbeError::Config("topic index 9 out of range".to_string());
        assert_eq!(err.to_string(), "Config error: topic index 9 out of range");
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: ProbeError = LlmError::InvalidResponse("no choices".to_string()).into();
        assert!(matches!(err, ProbeError::Llm(_)));
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProbeError = io_err.into();
        assert!(matches!(err, ProbeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: ProbeError = json_err.into();
        assert!(matches!(err, ProbeError::Json(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("a: [1, 2").unwrap_err();
        let err: ProbeError = yaml_err.into();
        assert!(matches!(err, ProbeError::Yaml(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(ProbeError::Config("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
