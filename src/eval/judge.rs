//! Judge calls - a second model reads a transcript and emits a verdict

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::parser::{EvalMode, Verdict, judge_rationale, parse_eval_output};
use crate::llm::{Backend, Message, ModelBackend, ModelClient};

/// Model used for judging when none is configured
pub const DEFAULT_JUDGE_MODEL: &str = "azure/gpt-5-mini";

/// Result of one judge call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOutcome {
    pub verdict: Verdict,
    /// Rationale preceding the verdict
    pub judge_text: String,
    /// Full judge output
    pub raw: String,
}

/// Judge over its own model client
pub struct Judge<B: ModelBackend = Backend> {
    client: ModelClient<B>,
}

impl<B: ModelBackend> Judge<B> {
    pub fn new(client: ModelClient<B>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ModelClient<B> {
        &self.client
    }

    /// Judge a prompt given as a single user message
    pub async fn judge_prompt(&self, prompt: impl Into<String>, mode: EvalMode) -> JudgeOutcome {
        self.judge(&[Message::user(prompt)], mode).await
    }

    /// One single-shape call; an empty or unmatched answer gives an unparsed verdict
    pub async fn judge(&self, messages: &[Message], mode: EvalMode) -> JudgeOutcome {
        let raw = self.client.generate_messages(messages.to_vec(), 1).await.into_single();
        let verdict = parse_eval_output(&raw, mode);
        if verdict.is_parsed() {
            debug!("Judge verdict ({:?}): {:?}", mode, verdict.pred_label);
        } else {
            warn!("Judge output carried no {:?} verdict", mode);
        }
        JudgeOutcome {
            verdict,
            judge_text: judge_rationale(&raw),
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockBackend;

    fn judge(reply: &str) -> Judge<MockBackend> {
        Judge::new(ModelClient::new(MockBackend::new().with_fixed_reply(reply), None))
    }

    #[tokio::test]
    async fn test_judge_label() {
        let outcome = judge("The agent adopted the pause.\nThe answer is: A")
            .judge_prompt("Judge this", EvalMode::Label)
            .await;
        assert_eq!(outcome.verdict.pred_label.as_deref(), Some("A"));
        assert_eq!(outcome.judge_text, "The agent adopted the pause.");
        assert!(outcome.raw.ends_with("A"));
    }

    #[tokio::test]
    async fn test_judge_agreement() {
        let outcome = judge("Mostly agrees. The answer is: 6").judge_prompt("Rate", EvalMode::Agreement).await;
        assert_eq!(outcome.verdict.likert(), Some(6));
    }

    #[tokio::test]
    async fn test_judge_unparsed() {
        let outcome = judge("I cannot decide.").judge_prompt("Judge", EvalMode::Label).await;
        assert!(!outcome.verdict.is_parsed());
        assert_eq!(outcome.judge_text, "I cannot decide.");
    }

    #[tokio::test]
    async fn test_judge_sends_messages_verbatim() {
        let backend = MockBackend::new().with_text_reply(|messages| Ok(format!("The answer is: {}", messages.len())));
        let judge = Judge::new(ModelClient::new(backend, None));
        let outcome = judge
            .judge(&[Message::user("a"), Message::assistant("b"), Message::user("c")], EvalMode::Agreement)
            .await;
        assert_eq!(outcome.verdict.likert(), Some(3));
        assert_eq!(judge.client().backend().send_count(), 1);
    }
}
