//! JSON-instructed tool protocol for backends without native tool calling
//!
//! The tool set is embedded in the system prompt as JSON schema and the
//! model answers with one object `{"name": .., "args": {..}}` per turn.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::llm::ToolDeclaration;
use crate::llm::normalize::decode_arguments;

/// System message prepended in native tool-calling mode
pub const NATIVE_GUIDANCE: &str = "Use at most one tool call per turn. Prefer tool calls over natural language. \
If a tool was already used, choose a different one.";

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^```[a-zA-Z0-9_-]*\s*|\s*```$").expect("valid fence regex"));
static OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("valid object regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid trailing comma regex"));

/// JSON schema listing of the tool set
pub fn tools_schema_json(tools: &[ToolDeclaration]) -> String {
    let listing: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect();
    serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_string())
}

/// System message prepended in fallback mode
pub fn system_prompt(tools: &[ToolDeclaration]) -> String {
    format!(
        "You are an agent. At each turn, output exactly one JSON object: \
{{\"name\":\"<tool_name>\",\"args\":{{...}}}}. Do not output extra text. \
Use each tool at most once. Available tools:\n{}",
        tools_schema_json(tools)
    )
}

/// Pull one JSON object out of free-form model text.
///
/// Code fences are stripped, the outermost `{...}` span is taken, and
/// trailing commas are dropped. Single quotes are swapped for double quotes
/// only when the text does not parse as is.
pub fn coerce_json_block(raw: &str) -> Option<Value> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let text = FENCE.replace_all(text, "");
    let candidate = OBJECT.find(&text)?.as_str();
    let candidate = TRAILING_COMMA.replace_all(candidate, "$1");

    serde_json::from_str::<Value>(&candidate)
        .or_else(|_| serde_json::from_str::<Value>(&candidate.replace('\'', "\"")))
        .ok()
        .filter(|v| v.is_object())
}

/// A tool call decoded from a fallback-mode reply
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackCall {
    pub name: String,
    pub args: Value,
    /// The object the model produced, echoed back into the conversation
    pub raw: Value,
}

/// Decode a fallback-mode reply.
///
/// `None` means the reply holds no JSON object; `Some(Err(raw))` means an
/// object without a usable `name`.
pub fn parse_call(text: &str) -> Option<Result<FallbackCall, Value>> {
    let raw = coerce_json_block(text)?;
    let name = match raw.get("name").and_then(|n| n.as_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Some(Err(raw)),
    };
    let args = decode_arguments(raw.get("args").or_else(|| raw.get("arguments")));
    Some(Ok(FallbackCall { name, args, raw }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_tools() {
        let tools = vec![ToolDeclaration::new(
            "lookup",
            "Look up a key",
            json!({"type": "object", "properties": {"key": {"type": "string"}}}),
        )];
        let prompt = system_prompt(&tools);
        assert!(prompt.starts_with("You are an agent."));
        assert!(prompt.contains("\"name\":\"<tool_name>\""));
        assert!(prompt.contains("\"lookup\""));
        assert!(prompt.contains("Look up a key"));
    }

    #[test]
    fn test_coerce_plain_object() {
        let value = coerce_json_block(r#"{"name": "lookup", "args": {"key": "x"}}"#).unwrap();
        assert_eq!(value["name"], "lookup");
    }

    #[test]
    fn test_coerce_fenced_with_prose() {
        let text = "Sure, here you go:\n```json\n{\"name\": \"lookup\", \"args\": {\"key\": \"x\",},}\n```";
        let value = coerce_json_block(text).unwrap();
        assert_eq!(value["args"]["key"], "x");
    }

    #[test]
    fn test_coerce_single_quotes() {
        let value = coerce_json_block("{'name': 'submit', 'args': {}}").unwrap();
        assert_eq!(value["name"], "submit");
    }

    #[test]
    fn test_coerce_keeps_apostrophes_in_valid_json() {
        let value = coerce_json_block(r#"{"name": "note", "args": {"text": "it's fine"}}"#).unwrap();
        assert_eq!(value["args"]["text"], "it's fine");
    }

    #[test]
    fn test_coerce_rejects_non_json() {
        assert!(coerce_json_block("").is_none());
        assert!(coerce_json_block("I am done, thanks.").is_none());
        assert!(coerce_json_block("{not json at all").is_none());
    }

    #[test]
    fn test_parse_call_variants() {
        let call = parse_call(r#"{"name": "lookup", "args": {"key": "x"}}"#).unwrap().unwrap();
        assert_eq!(call.name, "lookup");
        assert_eq!(call.args, json!({"key": "x"}));

        let call = parse_call(r#"{"name": "lookup", "arguments": "{\"key\": \"y\"}"}"#).unwrap().unwrap();
        assert_eq!(call.args, json!({"key": "y"}));

        let call = parse_call(r#"{"name": "submit"}"#).unwrap().unwrap();
        assert_eq!(call.args, json!({}));

        assert!(parse_call(r#"{"tool": "lookup"}"#).unwrap().is_err());
        assert!(parse_call("no json here").is_none());
    }
}
