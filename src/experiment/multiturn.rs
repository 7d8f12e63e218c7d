//! Multi-turn run: two models argue over a batch of dialogue datapoints
//!
//! `alpha` opens each exchange and `beta` answers. In one-sided mode alpha
//! persuades and beta responds; in two-sided mode both hold a view and
//! discuss it. Every round is one batched call per side.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::artifacts::RunArtifacts;
use crate::error::{ProbeError, Result};
use crate::llm::{DEFAULT_PARALLELISM, Message, ModelBackend, ModelClient};
use crate::prompt::PromptLibrary;

pub const ALPHA_FILE: &str = "multiturn_alpha.jsonl";
pub const BETA_FILE: &str = "multiturn_beta.jsonl";

pub const DEFAULT_NUM_ROUNDS: usize = 3;
pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MultiturnMode {
    /// Alpha persuades, beta responds
    OneSided,
    /// Both sides argue with the same technique
    #[default]
    TwoSided,
}

impl MultiturnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultiturnMode::OneSided => "one-sided",
            MultiturnMode::TwoSided => "two-sided",
        }
    }

    /// System prompts for alpha and beta
    pub fn system_prompts(&self, prompts: &PromptLibrary, technique: &str) -> Result<(String, String)> {
        match self {
            MultiturnMode::OneSided => Ok((
                prompts.one_sided(technique)?.to_string(),
                prompts.one_sided_response()?.to_string(),
            )),
            MultiturnMode::TwoSided => {
                let prompt = prompts.two_sided(technique)?.to_string();
                Ok((prompt.clone(), prompt))
            }
        }
    }
}

impl fmt::Display for MultiturnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MultiturnMode {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one-sided" => Ok(MultiturnMode::OneSided),
            "two-sided" => Ok(MultiturnMode::TwoSided),
            other => Err(ProbeError::Config(format!("Invalid multiturn mode: {}", other))),
        }
    }
}

/// One line of a dialogue dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueDatapoint {
    /// Question under discussion, in `moral_dilemma` or `query`
    pub datapoint: Value,
    /// Initial stance per model family, keyed `belief_text_<family>`
    pub init_belief: HashMap<String, String>,
}

impl DialogueDatapoint {
    pub fn query(&self) -> Result<&str> {
        ["moral_dilemma", "query"]
            .iter()
            .find_map(|key| self.datapoint.get(*key).and_then(Value::as_str))
            .ok_or_else(|| ProbeError::Config("Datapoint has neither moral_dilemma nor query".to_string()))
    }

    /// A top-level string field of the datapoint
    pub fn field(&self, key: &str) -> Result<&str> {
        self.datapoint
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ProbeError::Config(format!("Datapoint has no {}", key)))
    }

    /// One of the datapoint's `statements`, e.g. `support_statement`
    pub fn statement(&self, key: &str) -> Result<&str> {
        self.datapoint
            .get("statements")
            .and_then(|statements| statements.get(key))
            .and_then(Value::as_str)
            .ok_or_else(|| ProbeError::Config(format!("Datapoint has no statements.{}", key)))
    }

    pub fn belief_for(&self, family: &str) -> Result<&str> {
        let key = format!("belief_text_{}", family);
        self.init_belief
            .get(&key)
            .map(String::as_str)
            .ok_or_else(|| ProbeError::Config(format!("Datapoint has no initial belief {}", key)))
    }
}

/// Family a model name belongs to, used to pick its initial belief
pub fn model_family(model_name: &str) -> Result<&'static str> {
    let name = model_name.to_lowercase();
    if name.contains("claude") || name.contains("sonnet") {
        Ok("claude")
    } else if name.contains("deepseek") {
        Ok("deepseek")
    } else if name.contains("oss") {
        Ok("oss")
    } else if name.contains("gpt") {
        Ok("gpt")
    } else {
        Err(ProbeError::Config(format!("Unknown model family for: {}", model_name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiturnSettings {
    pub mode: MultiturnMode,
    pub num_rounds: usize,
    pub batch_size: usize,
    /// Calls in flight per side within a batch
    pub parallelism: usize,
    pub persuasion_tech: String,
}

impl Default for MultiturnSettings {
    fn default() -> Self {
        Self {
            mode: MultiturnMode::default(),
            num_rounds: DEFAULT_NUM_ROUNDS,
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            persuasion_tech: "information".to_string(),
        }
    }
}

/// One side of one finished dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueRecord {
    pub system_prompt: String,
    pub conversations: Vec<Message>,
    pub datapoint: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiturnSummary {
    pub dialogues: usize,
    pub batches: usize,
}

/// Opening messages of both sides for one datapoint
fn opening(
    mode: MultiturnMode,
    query: &str,
    belief_alpha: &str,
    belief_beta: &str,
) -> (Vec<Message>, Vec<Message>) {
    match mode {
        MultiturnMode::TwoSided => (
            vec![
                Message::user(query),
                Message::assistant(belief_alpha),
                Message::user(belief_beta),
            ],
            vec![
                Message::user(format!("{}\n\nAnother agent's initial viewpoint: {}", query, belief_alpha)),
                Message::assistant(belief_beta),
            ],
        ),
        MultiturnMode::OneSided => (
            vec![Message::user(format!(
                "{}\n\nAnother agent's initial viewpoint: {}",
                query, belief_beta
            ))],
            vec![Message::user(query), Message::assistant(belief_beta)],
        ),
    }
}

/// Conversations as sent: the client's system prompt leads each one
fn with_system_prompt(system_prompt: &str, conversations: &[Vec<Message>]) -> Vec<Vec<Message>> {
    conversations
        .iter()
        .map(|conversation| {
            let mut messages = Vec::with_capacity(conversation.len() + 1);
            messages.push(Message::system(system_prompt));
            messages.extend(conversation.iter().cloned());
            messages
        })
        .collect()
}

pub async fn run_multiturn<A, B>(
    alpha: &ModelClient<A>,
    beta: &ModelClient<B>,
    dataset: &[DialogueDatapoint],
    settings: &MultiturnSettings,
    artifacts: &mut RunArtifacts,
) -> Result<MultiturnSummary>
where
    A: ModelBackend,
    B: ModelBackend,
{
    let batch_size = settings.batch_size.max(1);
    let family_alpha = model_family(&alpha.config().model_name)?;
    let family_beta = model_family(&beta.config().model_name)?;
    let prompt_alpha = alpha.config().system_prompt.clone();
    let prompt_beta = beta.config().system_prompt.clone();

    let batches: Vec<&[DialogueDatapoint]> = dataset.chunks(batch_size).collect();
    let mut written = 0;

    for (batch_index, batch) in batches.iter().enumerate() {
        info!("Running batch {} of {}", batch_index + 1, batches.len());

        let mut alpha_side = Vec::with_capacity(batch.len());
        let mut beta_side = Vec::with_capacity(batch.len());
        for datapoint in batch.iter() {
            let (a, b) = opening(
                settings.mode,
                datapoint.query()?,
                datapoint.belief_for(family_alpha)?,
                datapoint.belief_for(family_beta)?,
            );
            alpha_side.push(a);
            beta_side.push(b);
        }

        for round in 0..settings.num_rounds {
            info!("Batch {} round {}", batch_index + 1, round + 1);

            let outputs = alpha
                .generate_batch(&with_system_prompt(&prompt_alpha, &alpha_side), settings.parallelism)
                .await;
            for (index, output) in outputs.into_iter().enumerate() {
                alpha_side[index].push(Message::assistant(output.clone()));
                beta_side[index].push(Message::user(output));
            }

            let outputs = beta
                .generate_batch(&with_system_prompt(&prompt_beta, &beta_side), settings.parallelism)
                .await;
            for (index, output) in outputs.into_iter().enumerate() {
                beta_side[index].push(Message::assistant(output.clone()));
                alpha_side[index].push(Message::user(output));
            }
        }

        for ((datapoint, alpha_messages), beta_messages) in batch.iter().zip(alpha_side).zip(beta_side) {
            let append = written > 0;
            artifacts.save_jsonl(
                &DialogueRecord {
                    system_prompt: prompt_alpha.clone(),
                    conversations: alpha_messages,
                    datapoint: datapoint.datapoint.clone(),
                },
                ALPHA_FILE,
                append,
            )?;
            artifacts.save_jsonl(
                &DialogueRecord {
                    system_prompt: prompt_beta.clone(),
                    conversations: beta_messages,
                    datapoint: datapoint.datapoint.clone(),
                },
                BETA_FILE,
                append,
            )?;
            written += 1;
        }
    }

    artifacts.save_generation_config(&json!({
        "exp_config": {
            "mode": settings.mode,
            "num_rounds": settings.num_rounds,
            "parallelism": settings.parallelism,
            "persuasion_tech": settings.persuasion_tech,
        },
        "data_config": {
            "dataset": dataset,
            "batch_size": batch_size,
            "system_prompt_a": prompt_alpha,
            "system_prompt_b": prompt_beta,
        },
        "model_config": {
            "model_name_a": alpha.config().model_name,
            "model_name_b": beta.config().model_name,
        },
    }))?;
    artifacts.write_log(&format!("Run finished: {}", artifacts.run_dir().display()))?;

    Ok(MultiturnSummary {
        dialogues: written,
        batches: batches.len(),
    })
}
