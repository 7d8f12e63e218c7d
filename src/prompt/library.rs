//! Prompt Library - named prompt templates loaded from YAML

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

const BUILTIN_PROMPTS: &str = include_str!("../../prompts/agentprobe.yml");

/// Key of the responder prompt in the one-sided set
pub const ONE_SIDED_RESPONSE: &str = "response";

/// Prompt templates used by the experiments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptLibrary {
    /// Likert agreement question over a topic's statements
    pub agreement: String,
    /// Judge prompt classifying an agent's behavior
    pub behavior_judgement: String,
    /// Persuader system prompts by technique, plus the responder prompt
    #[serde(default)]
    pub one_sided: HashMap<String, String>,
    /// Discussion system prompts by technique
    #[serde(default)]
    pub two_sided: HashMap<String, String>,
    /// Likert question over a dialogue datapoint, moral dilemmas
    #[serde(default)]
    pub moral_agreement: Option<String>,
    /// Likert question over a dialogue datapoint, safety queries
    #[serde(default)]
    pub safety_agreement: Option<String>,
    /// Judge prompt for a reply to a moral dilemma
    #[serde(default)]
    pub moral_behavior: Option<String>,
    /// Judge prompt for a reply to a safety query
    #[serde(default)]
    pub safety_behavior: Option<String>,
    /// Wraps one study document; sees `title_text` and `text`
    #[serde(default)]
    pub study_content_template: Option<String>,
    /// Instruction appended after the study material
    #[serde(default)]
    pub init_study_prompt: Option<String>,
}

impl PromptLibrary {
    /// Prompts shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_PROMPTS)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from a file, or the built-in set when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                debug!("Loading prompts from {}", path.display());
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ProbeError::Config(format!("Failed to read prompts {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&content)
            }
            None => Self::builtin(),
        }
    }

    pub fn one_sided(&self, technique: &str) -> Result<&str> {
        lookup(&self.one_sided, "one_sided", technique)
    }

    pub fn one_sided_response(&self) -> Result<&str> {
        lookup(&self.one_sided, "one_sided", ONE_SIDED_RESPONSE)
    }

    pub fn two_sided(&self, technique: &str) -> Result<&str> {
        lookup(&self.two_sided, "two_sided", technique)
    }

    pub fn moral_agreement(&self) -> Result<&str> {
        required(&self.moral_agreement, "moral_agreement")
    }

    pub fn safety_agreement(&self) -> Result<&str> {
        required(&self.safety_agreement, "safety_agreement")
    }

    pub fn moral_behavior(&self) -> Result<&str> {
        required(&self.moral_behavior, "moral_behavior")
    }

    pub fn safety_behavior(&self) -> Result<&str> {
        required(&self.safety_behavior, "safety_behavior")
    }

    pub fn study_content_template(&self) -> Result<&str> {
        required(&self.study_content_template, "study_content_template")
    }

    pub fn init_study_prompt(&self) -> Result<&str> {
        required(&self.init_study_prompt, "init_study_prompt")
    }
}

fn required<'a>(prompt: &'a Option<String>, key: &str) -> Result<&'a str> {
    prompt
        .as_deref()
        .ok_or_else(|| ProbeError::Config(format!("No '{}' prompt in the library", key)))
}

fn lookup<'a>(set: &'a HashMap<String, String>, set_name: &str, key: &str) -> Result<&'a str> {
    set.get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| ProbeError::Config(format!("No '{}' prompt in the {} set", key, set_name)))
}
