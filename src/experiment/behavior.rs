//! Behavior run: an agent acts in a scenario, a judge classifies the action

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{MESSAGE_HISTORY_FILE, log_section, log_transcript};
use crate::agent::{AgentOptions, AgentRuntime, ToolResult};
use crate::artifacts::RunArtifacts;
use crate::error::Result;
use crate::eval::{EvalMode, Judge, Verdict};
use crate::llm::{Message, ModelBackend, ModelClient};
use crate::prompt::{PromptLibrary, PromptRenderer};
use crate::scenario::Topic;

/// File holding the judge verdict of a behavior run
pub const BEHAVIOR_RESULTS_FILE: &str = "behavior_results.json";

#[derive(Debug, Clone, Default)]
pub struct BehaviorSettings {
    pub topic_index: usize,
    pub agent: AgentOptions,
    /// Conversation preceding the scenario prompt
    pub prior_messages: Vec<Message>,
}

/// Prediction record of a behavior run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorRecord {
    pub messages: Vec<Message>,
    pub output_text: String,
    pub behavior_results: Verdict,
    pub judge_text: String,
    pub did_submit: bool,
    pub used_fallback: bool,
    pub steps_taken: usize,
    pub tool_results: Vec<ToolResult>,
}

pub async fn run_behavior<A, J>(
    agent: &ModelClient<A>,
    judge: &Judge<J>,
    topic: &Topic,
    prompts: &PromptLibrary,
    settings: &BehaviorSettings,
    artifacts: &mut RunArtifacts,
) -> Result<BehaviorRecord>
where
    A: ModelBackend,
    J: ModelBackend,
{
    info!("Behavior run on topic {} ({})", settings.topic_index, topic.topic_name);

    let mut messages = settings.prior_messages.clone();
    messages.push(Message::user(topic.prompt.clone()));

    let runtime = AgentRuntime::new(topic.toolbox(), topic.terminal_names()).with_options(settings.agent);
    let outcome = runtime.run(agent, &messages, &topic.declarations()).await?;

    let judge_prompt = PromptRenderer::new().render(
        &prompts.behavior_judgement,
        &json!({
            "scenario": topic.prompt,
            "response": outcome.final_text,
            "support_statement": topic.support_statement,
            "oppose_statement": topic.oppose_statement,
        }),
    )?;
    let judged = judge.judge_prompt(judge_prompt, EvalMode::Label).await;

    let record = BehaviorRecord {
        messages: outcome.messages,
        output_text: outcome.final_text,
        behavior_results: judged.verdict,
        judge_text: judged.judge_text,
        did_submit: outcome.did_submit,
        used_fallback: outcome.used_fallback,
        steps_taken: outcome.steps_taken,
        tool_results: outcome.results,
    };

    let generation_config = json!({
        "model_config": agent.config(),
        "judge_config": judge.client().config(),
        "exp_config": {
            "exp_name": "behavior",
            "agent": settings.agent,
            "prior_messages": settings.prior_messages.len(),
        },
        "data_config": {
            "topic_index": settings.topic_index,
            "topic_name": topic.topic_name,
            "prompt_text": topic.prompt,
            "tools": topic.declarations(),
        },
    });
    persist_behavior(&record, &generation_config, artifacts)?;
    Ok(record)
}

/// Write a behavior record with its log, verdict and message history
pub(crate) fn persist_behavior(
    record: &BehaviorRecord,
    generation_config: &Value,
    artifacts: &mut RunArtifacts,
) -> Result<()> {
    artifacts.save_generation_config(generation_config)?;
    artifacts.write_record(record)?;
    log_transcript(artifacts, &record.messages)?;
    log_section(artifacts, "Final text", &Value::String(record.output_text.clone()))?;
    log_section(artifacts, "behavior_results", &serde_json::to_value(&record.behavior_results)?)?;
    artifacts.save_json(&record.behavior_results, BEHAVIOR_RESULTS_FILE)?;
    artifacts.save_json(&record.messages, MESSAGE_HISTORY_FILE)?;

    info!(
        "Behavior run finished: submitted={} verdict={:?}",
        record.did_submit, record.behavior_results.pred_label
    );
    Ok(())
}
