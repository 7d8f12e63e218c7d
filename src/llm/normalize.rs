//! Tool-invocation normalizer
//!
//! Translates backend-neutral tool declarations into each backend's native
//! declaration format, and each backend's tool-call output back into
//! generic [`ToolCall`]s / [`OutputItem`]s.

use log::debug;
use serde_json::{Value, json};

use crate::llm::types::{OutputItem, ToolCall, ToolDeclaration};

/// A response body could not be decoded into text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("response has no `{0}` field")]
    MissingField(&'static str),

    #[error("response contains no text")]
    NoText,
}

/// Flat declaration for the native tool-calling backend:
/// `{type: "function", name, description, parameters}`
pub fn to_responses_tool(decl: &ToolDeclaration) -> Value {
    json!({
        "type": "function",
        "name": decl.name,
        "description": decl.description,
        "parameters": decl.parameters,
    })
}

/// Nested declaration for the chat-completion backend:
/// `{type: "function", function: {name, description, parameters}}`
pub fn to_chat_tool(decl: &ToolDeclaration) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": decl.name,
            "description": decl.description,
            "parameters": decl.parameters,
        }
    })
}

/// Chat-completion declaration from an arbitrary declaration value.
///
/// A value already in chat shape passes through unchanged.
pub fn chat_tool_from_value(value: &Value) -> Option<Value> {
    if is_chat_shaped(value) {
        return Some(value.clone());
    }
    ToolDeclaration::from_value(value).map(|decl| to_chat_tool(&decl))
}

fn is_chat_shaped(value: &Value) -> bool {
    value.get("type").and_then(|t| t.as_str()) == Some("function")
        && value.get("function").is_some_and(|f| f.is_object())
}

/// Decode a backend's argument payload.
///
/// Backends carry arguments as a serialized string. Absent or empty
/// arguments become `{}`; an undecodable string is kept verbatim as a JSON
/// string so the caller can reject it as a recoverable error.
pub fn decode_arguments(raw: Option<&Value>) -> Value {
    match raw {
        None | Some(Value::Null) => json!({}),
        Some(Value::String(s)) if s.trim().is_empty() => json!({}),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Null) => json!({}),
            Ok(v) => v,
            Err(e) => {
                debug!("Undecodable tool arguments {:?}: {}", s, e);
                Value::String(s.clone())
            }
        },
        Some(other) => other.clone(),
    }
}

/// Read text and tool calls from the first choice of a chat-completion body.
///
/// Tool-call entries whose `type` is not `"function"` are dropped.
pub fn parse_chat_completion(body: &Value) -> (String, Vec<ToolCall>) {
    let Some(message) = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
    else {
        return (String::new(), Vec::new());
    };

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let mut calls = Vec::new();
    if let Some(entries) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for (index, entry) in entries.iter().enumerate() {
            if entry.get("type").and_then(|t| t.as_str()) != Some("function") {
                continue;
            }
            let Some(function) = entry.get("function") else {
                continue;
            };
            let name = function.get("name").and_then(|n| n.as_str()).unwrap_or("");
            let id = entry
                .get("id")
                .and_then(|i| i.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", index));
            calls.push(ToolCall::new(id, name, decode_arguments(function.get("arguments"))));
        }
    }

    (text, calls)
}

/// Normalized output sequence from a chat-completion body
pub fn chat_output_items(body: &Value) -> Vec<OutputItem> {
    let (text, calls) = parse_chat_completion(body);
    let mut items = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        items.push(OutputItem::Message { text });
    }
    items.extend(calls.into_iter().map(|call| OutputItem::FunctionCall {
        arguments: call.arguments_json(),
        name: call.name,
        call_id: call.id,
    }));
    items
}

/// Normalized output sequence from a responses-style body
pub fn parse_responses_output(body: &Value) -> Vec<OutputItem> {
    let Some(items) = body.get("output").and_then(|o| o.as_array()) else {
        return Vec::new();
    };

    let mut output = Vec::new();
    for item in items {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("message") => {
                let text = message_item_text(item);
                if !text.is_empty() {
                    output.push(OutputItem::Message { text });
                }
            }
            Some("function_call") => {
                let name = item.get("name").and_then(|n| n.as_str()).unwrap_or("");
                let call_id = item
                    .get("call_id")
                    .or_else(|| item.get("id"))
                    .and_then(|c| c.as_str())
                    .unwrap_or("");
                let arguments = match item.get("arguments") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => "{}".to_string(),
                    Some(other) => other.to_string(),
                };
                output.push(OutputItem::FunctionCall {
                    name: name.to_string(),
                    arguments,
                    call_id: call_id.to_string(),
                });
            }
            _ => {}
        }
    }
    output
}

fn message_item_text(item: &Value) -> String {
    let Some(parts) = item.get("content").and_then(|c| c.as_array()) else {
        return String::new();
    };
    parts
        .iter()
        .filter_map(|part| {
            part.get("text")
                .or_else(|| part.get("output_text"))
                .and_then(|t| t.as_str())
        })
        .collect::<Vec<_>>()
        .concat()
}

/// Decode the text answer of a responses-style body.
///
/// Prefers the aggregated `output_text` field, then concatenates the text
/// parts of every message item.
pub fn decode_responses_text(body: &Value) -> Result<String, DecodeError> {
    if let Some(text) = body.get("output_text").and_then(|t| t.as_str())
        && !text.is_empty()
    {
        return Ok(text.to_string());
    }
    let items = body
        .get("output")
        .and_then(|o| o.as_array())
        .ok_or(DecodeError::MissingField("output"))?;
    let text: String = items.iter().map(message_item_text).collect();
    if text.is_empty() { Err(DecodeError::NoText) } else { Ok(text) }
}

/// Decode the text answer of a chat-completion body
pub fn decode_chat_text(body: &Value) -> Result<String, DecodeError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or(DecodeError::MissingField("choices"))?;
    let message = choice.get("message").ok_or(DecodeError::MissingField("message"))?;
    match message.get("content").and_then(|c| c.as_str()) {
        Some(text) => Ok(text.to_string()),
        None => Err(DecodeError::NoText),
    }
}

/// Decode the first embedding vector of an embeddings body
pub fn decode_embedding(body: &Value) -> Result<Vec<f64>, DecodeError> {
    let values = body
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or(DecodeError::MissingField("data[0].embedding"))?;
    Ok(values.iter().filter_map(|v| v.as_f64()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_decl() -> ToolDeclaration {
        ToolDeclaration::new(
            "lookup",
            "Look up a fact",
            json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]}),
        )
    }

    #[test]
    fn test_to_responses_tool_is_flat() {
        let tool = to_responses_tool(&lookup_decl());
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["name"], "lookup");
        assert!(tool.get("function").is_none());
        assert_eq!(tool["parameters"]["required"][0], "q");
    }

    #[test]
    fn test_to_chat_tool_is_nested() {
        let tool = to_chat_tool(&lookup_decl());
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "lookup");
        assert_eq!(tool["function"]["description"], "Look up a fact");
    }

    #[test]
    fn test_chat_tool_from_value_is_idempotent() {
        let wrapped = to_chat_tool(&lookup_decl());
        assert_eq!(chat_tool_from_value(&wrapped).unwrap(), wrapped);

        let generic = json!({"name": "lookup", "description": "Look up a fact",
            "parameters": lookup_decl().parameters});
        assert_eq!(chat_tool_from_value(&generic).unwrap(), wrapped);
    }

    #[test]
    fn test_chat_tool_from_value_fills_defaults() {
        let tool = chat_tool_from_value(&json!({"name": "submit"})).unwrap();
        assert_eq!(tool["function"]["description"], "");
        assert_eq!(tool["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_decode_arguments() {
        assert_eq!(decode_arguments(None), json!({}));
        assert_eq!(decode_arguments(Some(&json!(""))), json!({}));
        assert_eq!(decode_arguments(Some(&json!("{\"q\": \"x\"}"))), json!({"q": "x"}));
        assert_eq!(decode_arguments(Some(&json!({"q": "y"}))), json!({"q": "y"}));
        assert_eq!(decode_arguments(Some(&json!("{not json"))), json!("{not json"));
    }

    #[test]
    fn test_parse_chat_completion_with_tool_calls() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Checking.",
                    "tool_calls": [
                        {"id": "call_a", "type": "function",
                         "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}},
                        {"id": "call_b", "type": "retrieval", "retrieval": {}},
                        {"id": "call_c", "type": "function", "function": {"name": "submit"}}
                    ]
                }
            }]
        });

        let (text, calls) = parse_chat_completion(&body);
        assert_eq!(text, "Checking.");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, json!({"q": "x"}));
        assert_eq!(calls[1].name, "submit");
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn test_parse_chat_completion_malformed() {
        let (text, calls) = parse_chat_completion(&json!({"unexpected": true}));
        assert!(text.is_empty());
        assert!(calls.is_empty());

        let (text, calls) = parse_chat_completion(&json!({"choices": []}));
        assert!(text.is_empty());
        assert!(calls.is_empty());
    }

    #[test]
    fn test_chat_output_items_order() {
        let body = json!({"choices": [{"message": {"content": "hi", "tool_calls": [
            {"id": "c1", "type": "function", "function": {"name": "lookup", "arguments": "{}"}}
        ]}}]});
        let items = chat_output_items(&body);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], OutputItem::Message { text } if text == "hi"));
        assert!(matches!(&items[1], OutputItem::FunctionCall { call_id, .. } if call_id == "c1"));
    }

    #[test]
    fn test_parse_responses_output() {
        let body = json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [{"type": "output_text", "text": "Let me look."}]},
                {"type": "function_call", "name": "lookup", "arguments": "{\"q\":\"x\"}", "call_id": "fc_1"}
            ]
        });
        let items = parse_responses_output(&body);
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1],
            OutputItem::FunctionCall {
                name: "lookup".into(),
                arguments: "{\"q\":\"x\"}".into(),
                call_id: "fc_1".into()
            }
        );
    }

    #[test]
    fn test_decode_responses_text() {
        assert_eq!(
            decode_responses_text(&json!({"output_text": "direct"})).unwrap(),
            "direct"
        );
        let body = json!({"output": [
            {"type": "message", "content": [{"type": "output_text", "text": "a"}, {"type": "output_text", "text": "b"}]}
        ]});
        assert_eq!(decode_responses_text(&body).unwrap(), "ab");
        assert_eq!(
            decode_responses_text(&json!({})),
            Err(DecodeError::MissingField("output"))
        );
        assert_eq!(decode_responses_text(&json!({"output": []})), Err(DecodeError::NoText));
    }

    #[test]
    fn test_decode_chat_text() {
        let body = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(decode_chat_text(&body).unwrap(), "hello");
        let null_content = json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(decode_chat_text(&null_content), Err(DecodeError::NoText));
        assert!(decode_chat_text(&json!({})).is_err());
    }

    #[test]
    fn test_decode_embedding() {
        let body = json!({"data": [{"embedding": [0.5, -0.5, 1.0]}]});
        assert_eq!(decode_embedding(&body).unwrap(), vec![0.5, -0.5, 1.0]);
        assert!(decode_embedding(&json!({"data": []})).is_err());
    }
}
