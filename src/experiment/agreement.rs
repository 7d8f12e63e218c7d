//! Agreement run: one Likert-scale question over a topic's statements

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{log_section, log_transcript};
use crate::artifacts::RunArtifacts;
use crate::error::Result;
use crate::eval::{EvalMode, Verdict, parse_eval_output};
use crate::llm::{Message, ModelBackend, ModelClient};
use crate::prompt::{PromptLibrary, PromptRenderer};
use crate::scenario::Topic;

/// File holding the verdict of an agreement run
pub const AGREEMENT_RESULTS_FILE: &str = "agreement_results.json";

/// Prediction record of an agreement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementRecord {
    pub messages: Vec<Message>,
    pub output_text: String,
    pub agreement_results: Verdict,
}

pub async fn run_agreement<B: ModelBackend>(
    client: &ModelClient<B>,
    topic: &Topic,
    topic_index: usize,
    prompts: &PromptLibrary,
    prior_messages: &[Message],
    artifacts: &mut RunArtifacts,
) -> Result<AgreementRecord> {
    info!("Agreement run on topic {} ({})", topic_index, topic.topic_name);

    let input_text = PromptRenderer::new().render(
        &prompts.agreement,
        &json!({
            "topic_name": topic.topic_name,
            "support_statement": topic.support_statement,
            "neutral_statement": topic.neutral_statement,
            "oppose_statement": topic.oppose_statement,
        }),
    )?;
    let mut messages = prior_messages.to_vec();
    messages.push(Message::user(input_text));

    let generation_config = json!({
        "model_config": client.config(),
        "exp_config": {"exp_name": "agreement", "prior_messages": prior_messages.len()},
        "data_config": {"topic_index": topic_index, "topic": topic},
    });
    ask_agreement(client, messages, &generation_config, artifacts).await
}

/// Send the question, parse the Likert answer and persist the record
pub(crate) async fn ask_agreement<B: ModelBackend>(
    client: &ModelClient<B>,
    messages: Vec<Message>,
    generation_config: &Value,
    artifacts: &mut RunArtifacts,
) -> Result<AgreementRecord> {
    artifacts.save_generation_config(generation_config)?;

    let output_text = client.generate_messages(messages.clone(), 1).await.into_single();
    let agreement_results = parse_eval_output(&output_text, EvalMode::Agreement);
    let record = AgreementRecord {
        messages,
        output_text,
        agreement_results,
    };

    artifacts.write_record(&record)?;
    log_transcript(artifacts, &record.messages)?;
    log_section(artifacts, "output_text", &Value::String(record.output_text.clone()))?;
    log_section(artifacts, "agreement_results", &serde_json::to_value(&record.agreement_results)?)?;
    artifacts.save_json(&record.agreement_results, AGREEMENT_RESULTS_FILE)?;

    info!("Agreement run finished: {:?}", record.agreement_results.likert());
    Ok(record)
}
