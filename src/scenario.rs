//! Data-driven scenarios
//!
//! A scenario file lists topics. Each topic carries its three stance
//! statements, the agentic prompt, and the tools the agent may call, with
//! scripted results so a run needs no live tool backend.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::agent::{ToolError, Toolbox};
use crate::error::{ProbeError, Result};
use crate::llm::ToolDeclaration;

/// All topics of a scenario file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub topics: Vec<Topic>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("Failed to read scenario {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let scenario: Scenario =
            serde_yaml::from_str(content).map_err(|e| ProbeError::Scenario(format!("Invalid scenario: {}", e)))?;
        for topic in &scenario.topics {
            topic.validate()?;
        }
        Ok(scenario)
    }

    /// Topic at `index`; out of range is a configuration error
    pub fn topic(&self, index: usize) -> Result<&Topic> {
        self.topics.get(index).ok_or_else(|| {
            ProbeError::Config(format!(
                "Topic index {} out of range ({} topics)",
                index,
                self.topics.len()
            ))
        })
    }
}

/// One topic: stance statements, agentic prompt and tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub topic_name: String,
    pub support_statement: String,
    #[serde(default)]
    pub neutral_statement: String,
    pub oppose_statement: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<ScriptedTool>,
}

impl Topic {
    fn validate(&self) -> Result<()> {
        if !self.tools.is_empty() && !self.tools.iter().any(|t| t.terminal) {
            return Err(ProbeError::Scenario(format!(
                "Topic '{}' declares tools but no terminal tool",
                self.topic_name
            )));
        }
        Ok(())
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(ScriptedTool::declaration).collect()
    }

    pub fn terminal_names(&self) -> Vec<String> {
        self.tools.iter().filter(|t| t.terminal).map(|t| t.name.clone()).collect()
    }

    /// Fresh tool implementation for one run
    pub fn toolbox(&self) -> ScriptedToolbox {
        ScriptedToolbox::new(self.tools.clone())
    }
}

/// Results keyed by the value of one argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedResults {
    /// Argument whose value selects the result
    pub argument: String,
    pub results: Map<String, Value>,
}

/// A tool whose behavior is read from the scenario file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema")]
    pub parameters: Value,
    /// Ends the run when it succeeds
    #[serde(default)]
    pub terminal: bool,
    /// Fixed result
    #[serde(default)]
    pub result: Option<Value>,
    /// Result chosen by an argument value; other values are rejected
    #[serde(default)]
    pub keyed: Option<KeyedResults>,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ScriptedTool {
    pub fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(&self.name, &self.description, self.parameters.clone())
    }

    /// Look up the keyed result for `args`, or the rejection message
    fn keyed_result(&self, keyed: &KeyedResults, args: &Value) -> std::result::Result<Value, String> {
        let value = args.get(&keyed.argument).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        match value.as_deref().and_then(|v| keyed.results.get(v)) {
            Some(result) => Ok(result.clone()),
            None => Err(format!(
                "invalid {} {}",
                keyed.argument,
                value.unwrap_or_else(|| "(missing)".to_string())
            )),
        }
    }
}

/// Tool implementation backed by scripted results.
///
/// A terminal tool accepts one submission per run; later submissions
/// return the existing receipt with an error.
#[derive(Debug)]
pub struct ScriptedToolbox {
    tools: Vec<ScriptedTool>,
    receipt: Mutex<Option<Value>>,
}

impl ScriptedToolbox {
    pub fn new(tools: Vec<ScriptedTool>) -> Self {
        Self {
            tools,
            receipt: Mutex::new(None),
        }
    }

    fn find(&self, name: &str) -> Option<&ScriptedTool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Receipt of the accepted submission, if any
    pub fn receipt(&self) -> Option<Value> {
        self.receipt.lock().ok().and_then(|r| r.clone())
    }

    fn submit(&self, tool: &ScriptedTool, args: Value) -> Value {
        if let Some(keyed) = &tool.keyed
            && let Err(error) = tool.keyed_result(keyed, &args)
        {
            return json!({"ok": false, "error": error});
        }

        let mut slot = match self.receipt.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = slot.as_ref() {
            return json!({"ok": false, "error": "already submitted", "existing_receipt": existing});
        }

        let receipt = json!({
            "action": tool.name,
            "arguments": args,
            "status": "SUBMITTED",
            "timestamp": chrono::Utc::now().timestamp(),
        });
        *slot = Some(receipt.clone());
        json!({"ok": true, "receipt": receipt})
    }
}

#[async_trait]
impl Toolbox for ScriptedToolbox {
    fn has_tool(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    async fn invoke(&self, name: &str, args: Value) -> std::result::Result<Value, ToolError> {
        let tool = self.find(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        debug!("Scripted tool {} called with {}", name, args);

        if tool.terminal {
            return Ok(self.submit(tool, args));
        }
        if let Some(keyed) = &tool.keyed {
            return Ok(match tool.keyed_result(keyed, &args) {
                Ok(result) => result,
                Err(error) => json!({"ok": false, "error": error}),
            });
        }
        Ok(tool.result.clone().unwrap_or_else(|| json!({"ok": true})))
    }
}
