//! Backend-neutral types for model communication
//!
//! Every backend translates to and from these shapes; nothing above the
//! backend layer sees a wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Default persona when a client is built without one
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A message in the conversation
///
/// Order matters: a message list is sent verbatim as history on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_content(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_content(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_content(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_content(Role::Assistant, content)
    }

    /// Create an assistant message that requests tool calls
    pub fn assistant_tool_calls(text: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.filter(|t| !t.is_empty()),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Create a tool-role message answering the call with `call_id`
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Text content, or the empty string
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Backend-neutral tool declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema", alias = "parameter_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDeclaration {
    /// Create a new tool declaration
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Read a declaration from either the generic shape or the
    /// `{type: "function", function: {...}}` wrapped shape
    pub fn from_value(value: &Value) -> Option<Self> {
        let inner = match value.get("function") {
            Some(f) if f.is_object() => f,
            _ => value,
        };
        let name = inner.get("name").and_then(|n| n.as_str())?.to_string();
        let description = inner
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("")
            .to_string();
        let parameters = inner
            .get("parameters")
            .or_else(|| inner.get("parameter_schema"))
            .filter(|p| !p.is_null())
            .cloned()
            .unwrap_or_else(empty_object_schema);
        Some(Self {
            name,
            description,
            parameters,
        })
    }

    /// Field names listed under the schema's `required` key
    pub fn required_fields(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|fields| fields.iter().filter_map(|f| f.as_str()).collect())
            .unwrap_or_default()
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments serialized the way backends carry them on the wire
    pub fn arguments_json(&self) -> String {
        match &self.arguments {
            Value::String(raw) => raw.clone(),
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

/// One segment of a normalized tool-augmented response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        text: String,
    },
    FunctionCall {
        name: String,
        arguments: String,
        call_id: String,
    },
}

/// Normalized response of a tool-augmented call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: Option<String>,
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub raw: Value,
}

impl ToolResponse {
    /// All message segments joined by newlines and trimmed
    pub fn text(&self) -> String {
        let parts: Vec<&str> = self
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n").trim().to_string()
    }

    /// Function-call segments in response order
    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.output.iter().filter_map(|item| match item {
            OutputItem::FunctionCall {
                name,
                arguments,
                call_id,
            } => Some((name.as_str(), arguments.as_str(), call_id.as_str())),
            _ => None,
        })
    }

    pub fn has_function_calls(&self) -> bool {
        self.function_calls().next().is_some()
    }
}

/// Text answer of a plain call together with the raw backend body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub raw: Value,
}

/// Result of `ModelClient::generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOutput {
    pub input_text: String,
    pub output_text: String,
}

/// One entry of the client's append-only call history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub input_text: String,
    pub output_text: String,
    pub raw_response: Value,
}

/// Vector embedding of one text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub embedding: Vec<f64>,
    pub model: String,
    pub dim: usize,
}

impl Embedding {
    /// Zero-length embedding, used when no vector was obtained
    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            embedding: Vec::new(),
            model: model.into(),
            dim: 0,
        }
    }

    pub fn new(embedding: Vec<f64>, model: impl Into<String>) -> Self {
        let dim = embedding.len();
        Self {
            embedding,
            model: model.into(),
            dim,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.embedding.is_empty()
    }
}

/// Rescale to unit Euclidean norm; a zero vector stays zero
pub fn normalize_l2(vector: &mut [f64]) {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Identity of a client, recorded for provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub system_prompt: String,
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>, system_prompt: Option<String>) -> Self {
        Self {
            model_name: model_name.into(),
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}
