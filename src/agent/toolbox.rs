//! Tool implementation contract and a registry of named tools

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::ToolDeclaration;

/// Failure of a single tool invocation. Never fatal to the loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    Unknown(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// Something the agent loop can dispatch tool calls to
#[async_trait]
pub trait Toolbox: Send + Sync {
    fn has_tool(&self, name: &str) -> bool;

    async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError>;
}

/// One named tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Tool backed by a plain closure
pub struct FnTool<F> {
    declaration: ToolDeclaration,
    handler: F,
}

impl<F> FnTool<F>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    pub fn new(declaration: ToolDeclaration, handler: F) -> Self {
        Self { declaration, handler }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    fn declaration(&self) -> ToolDeclaration {
        self.declaration.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.handler)(args)
    }
}

/// Named tools, dispatched by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool of the same name
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.declaration().name, tool);
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.add_tool(Box::new(tool));
        self
    }

    /// Declarations of every registered tool, sorted by name
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self.tools.values().map(|t| t.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl Toolbox for ToolRegistry {
    fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        match self.tools.get(name) {
            Some(tool) => tool.call(args).await,
            None => Err(ToolError::Unknown(name.to_string())),
        }
    }
}

/// Fit decoded arguments to a declaration's parameter schema.
///
/// A lone argument under the wrong key is renamed onto a lone declared
/// parameter; keys the schema does not declare are dropped. Missing
/// required fields are an error. Schemas without declared properties
/// accept anything.
pub fn fit_arguments(declaration: &ToolDeclaration, args: Value) -> Result<Value, ToolError> {
    let mut args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "expected an object, got {}",
                other
            )));
        }
    };

    let declared: Vec<&str> = declaration
        .parameters
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| props.keys().map(|k| k.as_str()).collect())
        .unwrap_or_default();

    if !declared.is_empty() {
        if declared.len() == 1 && args.len() == 1 && !args.contains_key(declared[0]) {
            let value = args.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
            args = Map::new();
            args.insert(declared[0].to_string(), value);
        } else {
            args.retain(|key, _| declared.contains(&key.as_str()));
        }
    }

    let missing: Vec<&str> = declaration
        .required_fields()
        .into_iter()
        .filter(|field| !args.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(ToolError::InvalidArguments(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )));
    }

    Ok(Value::Object(args))
}
