//! Experiment drivers
//!
//! Each driver takes ready-made clients, data and prompts, runs one
//! experiment and persists its records through [`RunArtifacts`].

pub mod agreement;
pub mod behavior;
pub mod dialogue;
pub mod multiturn;
pub mod study;

use std::path::Path;

use serde_json::Value;

use crate::artifacts::{RunArtifacts, read_json};
use crate::error::Result;
use crate::llm::Message;

pub use agreement::{AgreementRecord, run_agreement};
pub use behavior::{BehaviorRecord, BehaviorSettings, run_behavior};
pub use dialogue::{
    DatasetKind, DialogueEvalSettings, load_dialogue_history, run_dialogue_agreement, run_dialogue_behavior,
};
pub use multiturn::{DialogueDatapoint, MultiturnMode, MultiturnSettings, MultiturnSummary, run_multiturn};
pub use study::{StudySettings, StudyTopics, read_study_content, run_study};

/// File a run leaves its final conversation in, for chaining runs
pub const MESSAGE_HISTORY_FILE: &str = "message_history.json";

/// Conversation saved by an earlier run, or nothing
pub fn load_prior_messages(prior_run_dir: Option<&Path>) -> Result<Vec<Message>> {
    match prior_run_dir {
        Some(dir) => read_json(&dir.join(MESSAGE_HISTORY_FILE)),
        None => Ok(Vec::new()),
    }
}

/// Dump a conversation into the run log
pub(crate) fn log_transcript(artifacts: &mut RunArtifacts, messages: &[Message]) -> Result<()> {
    artifacts.write_log("### messages ###")?;
    for message in messages {
        artifacts.write_log(&format!("role: {}", message.role.as_str()))?;
        artifacts.write_log("content:")?;
        if let Some(content) = &message.content {
            artifacts.write_log(content)?;
        } else if !message.tool_calls.is_empty() {
            artifacts.write_log_value(&message.tool_calls)?;
        } else {
            artifacts.write_log_value(message)?;
        }
        artifacts.write_log("---")?;
    }
    Ok(())
}

/// Log a titled section followed by a separator
pub(crate) fn log_section(artifacts: &mut RunArtifacts, title: &str, body: &Value) -> Result<()> {
    let body = match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    artifacts.write_log(&format!("### {} ###\n{}", title, body))?;
    artifacts.write_log("---")
}
