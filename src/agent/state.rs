//! Agent loop state and outcome

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::Message;

/// Where a loop run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Running,
    /// A terminal action succeeded
    Submitted,
    /// Step budget spent or the model stopped calling tools
    Exhausted,
    /// Native tool calling was rejected; running on the JSON protocol
    Fallback,
}

impl LoopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::Submitted | LoopPhase::Exhausted)
    }
}

/// Outcome of one tool call within a loop run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Step the call was made in (0-based)
    pub step: usize,
    pub call_id: String,
    pub name: String,
    /// Arguments as decoded from the model
    pub arguments: Value,
    /// Arguments actually passed to the tool
    pub used_arguments: Value,
    pub output: Value,
    pub is_terminal: bool,
}

impl ToolResult {
    /// Whether the tool reported success
    pub fn ok(&self) -> bool {
        self.output.get("ok").and_then(|v| v.as_bool()).unwrap_or(true) && self.output.get("error").is_none()
    }
}

/// Mutable state of one loop run
#[derive(Debug, Clone)]
pub struct LoopState {
    pub messages: Vec<Message>,
    pub results: Vec<ToolResult>,
    pub phase: LoopPhase,
    pub steps_taken: usize,
    pub did_submit: bool,
    pub final_text: String,
    pub previous_response_id: Option<String>,
    /// Entered through the fallback transition
    pub used_fallback: bool,
    seen: HashSet<(String, String)>,
}

impl LoopState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            results: Vec::new(),
            phase: LoopPhase::Running,
            steps_taken: 0,
            did_submit: false,
            final_text: String::new(),
            previous_response_id: None,
            used_fallback: false,
            seen: HashSet::new(),
        }
    }

    /// Fresh state for the restart after native tool calling was rejected
    pub fn fallback(messages: Vec<Message>) -> Self {
        Self {
            phase: LoopPhase::Fallback,
            used_fallback: true,
            ..Self::new(messages)
        }
    }

    /// Record a call signature; returns true if it was seen before.
    ///
    /// Arguments are compared in canonical (key-sorted) JSON form.
    pub fn check_repeat(&mut self, name: &str, arguments: &Value) -> bool {
        !self.seen.insert((name.to_string(), arguments.to_string()))
    }

    pub fn record(&mut self, result: ToolResult) {
        self.results.push(result);
    }

    pub fn submit(&mut self, final_text: String) {
        self.did_submit = true;
        self.final_text = final_text;
        self.phase = LoopPhase::Submitted;
    }

    pub fn exhaust(&mut self, final_text: Option<String>) {
        if let Some(text) = final_text {
            self.final_text = text;
        }
        self.phase = LoopPhase::Exhausted;
    }

    pub fn into_outcome(self) -> AgentOutcome {
        AgentOutcome {
            results: self.results,
            did_submit: self.did_submit,
            final_text: self.final_text,
            messages: self.messages,
            steps_taken: self.steps_taken,
            phase: self.phase,
            used_fallback: self.used_fallback,
        }
    }
}

/// What a loop run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub results: Vec<ToolResult>,
    pub did_submit: bool,
    pub final_text: String,
    pub messages: Vec<Message>,
    pub steps_taken: usize,
    pub phase: LoopPhase,
    pub used_fallback: bool,
}

impl AgentOutcome {
    /// Names of the tools called, in order
    pub fn tool_names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.name.as_str()).collect()
    }
}
