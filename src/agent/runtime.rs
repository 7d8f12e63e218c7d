//! Agentic loop driver
//!
//! Drives a model through tool calls until it submits a terminal action,
//! stops calling tools, or spends its step budget. When the backend
//! rejects native tool calling, the run restarts once on the JSON
//! protocol in [`super::fallback`].

use std::collections::HashSet;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::fallback;
use super::state::{AgentOutcome, LoopState, ToolResult};
use super::toolbox::{Toolbox, fit_arguments};
use crate::error::{ProbeError, Result};
use crate::llm::normalize::decode_arguments;
use crate::llm::{LlmError, Message, ModelBackend, ModelClient, ToolCall, ToolDeclaration};

/// Default step budget
pub const DEFAULT_MAX_STEPS: usize = 8;

/// Loop options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOptions {
    pub max_steps: usize,
    /// Re-invoke calls whose name and arguments were already seen
    pub allow_repeat: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            allow_repeat: false,
        }
    }
}

/// How tool calls are exchanged with the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Native,
    Json,
}

/// Runs the agentic loop against one tool implementation
pub struct AgentRuntime<T: Toolbox> {
    toolbox: T,
    terminal_names: HashSet<String>,
    options: AgentOptions,
}

impl<T: Toolbox> AgentRuntime<T> {
    pub fn new<I, S>(toolbox: T, terminal_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            toolbox,
            terminal_names: terminal_names.into_iter().map(Into::into).collect(),
            options: AgentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn toolbox(&self) -> &T {
        &self.toolbox
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.terminal_names.contains(name)
    }

    /// Run the loop over `base_messages` with the declared `tools`.
    ///
    /// The only error is a tool-calling rejection that survives the
    /// fallback transition.
    pub async fn run<B: ModelBackend>(
        &self,
        client: &ModelClient<B>,
        base_messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<AgentOutcome> {
        info!(
            "Agent loop starting: {} tools, max_steps={}, allow_repeat={}",
            tools.len(),
            self.options.max_steps,
            self.options.allow_repeat
        );

        let native = self.drive(client, base_messages, tools, Protocol::Native).await;
        let reason = match native {
            Ok(outcome) => return Ok(self.finish(outcome)),
            Err(LlmError::ToolsUnsupported(reason)) => reason,
            Err(e) => return Err(e.into()),
        };

        warn!("Native tool calling rejected ({}), restarting on JSON protocol", reason);
        match self.drive(client, base_messages, tools, Protocol::Json).await {
            Ok(outcome) => Ok(self.finish(outcome)),
            Err(LlmError::ToolsUnsupported(reason)) => Err(ProbeError::ToolsUnsupported(reason)),
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&self, outcome: AgentOutcome) -> AgentOutcome {
        info!(
            "Agent loop finished: phase={:?} steps={} submitted={} fallback={}",
            outcome.phase, outcome.steps_taken, outcome.did_submit, outcome.used_fallback
        );
        outcome
    }

    async fn drive<B: ModelBackend>(
        &self,
        client: &ModelClient<B>,
        base_messages: &[Message],
        tools: &[ToolDeclaration],
        protocol: Protocol,
    ) -> std::result::Result<AgentOutcome, LlmError> {
        let preamble = match protocol {
            Protocol::Native => Message::system(fallback::NATIVE_GUIDANCE),
            Protocol::Json => Message::system(fallback::system_prompt(tools)),
        };
        let mut messages = Vec::with_capacity(base_messages.len() + 1);
        messages.push(preamble);
        messages.extend_from_slice(base_messages);
        let mut state = match protocol {
            Protocol::Native => LoopState::new(messages),
            Protocol::Json => LoopState::fallback(messages),
        };

        while state.steps_taken < self.options.max_steps {
            let step = state.steps_taken;
            match protocol {
                Protocol::Native => self.native_step(client, &mut state, tools, step).await?,
                Protocol::Json => self.json_step(client, &mut state, tools, step).await?,
            }
            if state.phase.is_terminal() {
                break;
            }
        }

        if !state.phase.is_terminal() {
            debug!("Step budget of {} spent", self.options.max_steps);
            state.exhaust(None);
        }
        Ok(state.into_outcome())
    }

    async fn native_step<B: ModelBackend>(
        &self,
        client: &ModelClient<B>,
        state: &mut LoopState,
        tools: &[ToolDeclaration],
        step: usize,
    ) -> std::result::Result<(), LlmError> {
        let response = client
            .generate_with_tools(&state.messages, tools, state.previous_response_id.as_deref())
            .await?;
        state.steps_taken += 1;
        state.previous_response_id = response.id.clone();

        let text = response.text();
        let calls: Vec<ToolCall> = response
            .function_calls()
            .enumerate()
            .map(|(i, (name, arguments, call_id))| {
                let id = if call_id.is_empty() {
                    format!("call_{}_{}", step, i)
                } else {
                    call_id.to_string()
                };
                ToolCall::new(id, name, decode_arguments(Some(&Value::String(arguments.to_string()))))
            })
            .collect();

        if calls.is_empty() {
            debug!("Step {}: no tool calls, taking text as final answer", step);
            state.exhaust(Some(text));
            return Ok(());
        }

        let mut executed = Vec::with_capacity(calls.len());
        let mut replies = Vec::with_capacity(calls.len());
        let mut submission = None;
        for call in calls {
            let result = self
                .execute_call(state, tools, step, call.id.clone(), call.name.clone(), call.arguments.clone())
                .await;
            replies.push(Message::tool(call.id.clone(), result.output.to_string()));
            executed.push(call);
            if let Some(final_text) = self.submission_text(&result) {
                submission = Some(final_text);
            }
            state.record(result);
            if submission.is_some() {
                break;
            }
        }

        state.messages.push(Message::assistant_tool_calls(Some(text), executed));
        state.messages.extend(replies);
        if let Some(final_text) = submission {
            state.submit(final_text);
        }
        Ok(())
    }

    async fn json_step<B: ModelBackend>(
        &self,
        client: &ModelClient<B>,
        state: &mut LoopState,
        tools: &[ToolDeclaration],
        step: usize,
    ) -> std::result::Result<(), LlmError> {
        let response = client
            .generate_with_tools(&state.messages, &[], state.previous_response_id.as_deref())
            .await?;
        state.steps_taken += 1;
        state.previous_response_id = response.id.clone();

        let text = response.text();
        let call = match fallback::parse_call(&text) {
            None => {
                debug!("Step {}: reply holds no JSON call, taking text as final answer", step);
                state.exhaust(Some(text));
                return Ok(());
            }
            Some(Err(raw)) => {
                state.messages.push(Message::assistant(raw.to_string()));
                state
                    .messages
                    .push(Message::user(json!({"ok": false, "error": "reply must name a tool"}).to_string()));
                return Ok(());
            }
            Some(Ok(call)) => call,
        };

        let result = self
            .execute_call(state, tools, step, format!("json_{}", step), call.name, call.args)
            .await;
        state.messages.push(Message::assistant(call.raw.to_string()));
        state.messages.push(Message::user(result.output.to_string()));
        let submission = self.submission_text(&result);
        state.record(result);
        if let Some(final_text) = submission {
            state.submit(final_text);
        }
        Ok(())
    }

    /// Resolve and run one call. Every failure becomes an error output.
    async fn execute_call(
        &self,
        state: &mut LoopState,
        tools: &[ToolDeclaration],
        step: usize,
        call_id: String,
        name: String,
        arguments: Value,
    ) -> ToolResult {
        let is_terminal = self.is_terminal(&name);
        let mut used_arguments = json!({});

        let output = if !self.options.allow_repeat && !is_terminal && state.check_repeat(&name, &arguments) {
            debug!("Step {}: skipping repeated call {}", step, name);
            failure(format!(
                "tool '{}' already called with these arguments; pick a different tool",
                name
            ))
        } else if !self.toolbox.has_tool(&name) {
            debug!("Step {}: unknown tool {}", step, name);
            failure(format!("unknown tool {}", name))
        } else {
            let fitted = match tools.iter().find(|d| d.name == name) {
                Some(declaration) => fit_arguments(declaration, arguments.clone()),
                None => Ok(arguments.clone()),
            };
            match fitted {
                Err(e) => failure(e.to_string()),
                Ok(args) => {
                    used_arguments = args.clone();
                    debug!("Step {}: calling {} with {}", step, name, args);
                    match self.toolbox.invoke(&name, args).await {
                        Ok(value) => value,
                        Err(e) => {
                            warn!("Tool {} failed: {}", name, e);
                            failure(e.to_string())
                        }
                    }
                }
            }
        };

        ToolResult {
            step,
            call_id,
            name,
            arguments,
            used_arguments,
            output,
            is_terminal,
        }
    }

    /// Final text if `result` is a successful terminal action
    fn submission_text(&self, result: &ToolResult) -> Option<String> {
        if !result.is_terminal || !result.ok() {
            return None;
        }
        let receipt = ["receipt", "adoption_receipt", "message", "text"]
            .iter()
            .find_map(|key| result.output.get(*key).filter(|v| !v.is_null()));
        Some(match receipt {
            Some(Value::String(s)) => s.clone(),
            Some(v @ Value::Object(_)) => v.to_string(),
            _ => result.output.to_string(),
        })
    }
}

fn failure(error: String) -> Value {
    json!({"ok": false, "error": error})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LoopPhase;
    use crate::agent::toolbox::{FnTool, ToolError, ToolRegistry};
    use crate::llm::mock::{MockBackend, function_call_response, text_response};
    use crate::llm::{BackendKind, Role, ToolResponse};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        lookups: Arc<AtomicUsize>,
        submits: Arc<AtomicUsize>,
    }

    fn declarations() -> Vec<ToolDeclaration> {
        vec![
            ToolDeclaration::new(
                "lookup",
                "Look up a key",
                json!({"type": "object", "properties": {"key": {"type": "string"}}, "required": ["key"]}),
            ),
            ToolDeclaration::new(
                "submit",
                "Submit the answer",
                json!({"type": "object", "properties": {"answer": {"type": "string"}}, "required": ["answer"]}),
            ),
        ]
    }

    /// `submit` fails for the first `submit_failures` calls
    fn runtime(submit_failures: usize, options: AgentOptions) -> (AgentRuntime<ToolRegistry>, Fixture) {
        let lookups = Arc::new(AtomicUsize::new(0));
        let submits = Arc::new(AtomicUsize::new(0));
        let decls = declarations();

        let counter = lookups.clone();
        let lookup = FnTool::new(decls[0].clone(), move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true, "value": format!("value of {}", args["key"].as_str().unwrap_or(""))}))
        });
        let counter = submits.clone();
        let submit = FnTool::new(decls[1].clone(), move |args| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < submit_failures {
                return Err(ToolError::Failed("ledger locked".into()));
            }
            Ok(json!({"ok": true, "receipt": format!("submitted {}", args["answer"].as_str().unwrap_or(""))}))
        });

        let registry = ToolRegistry::new().with_tool(lookup).with_tool(submit);
        let runtime = AgentRuntime::new(registry, ["submit"]).with_options(options);
        (runtime, Fixture { lookups, submits })
    }

    fn call(id: &str, name: &str, args: Value) -> ToolResponse {
        function_call_response(&format!("resp_{}", id), &[(id, name, args)])
    }

    fn client(backend: MockBackend) -> ModelClient<MockBackend> {
        ModelClient::new(backend, None)
    }

    #[tokio::test]
    async fn test_lookup_then_submit() {
        let backend = MockBackend::new();
        backend.push_tool_response(call("c1", "lookup", json!({"key": "x"})));
        backend.push_tool_response(call("c2", "submit", json!({"answer": "42"})));
        let client = client(backend);
        let (runtime, fixture) = runtime(0, AgentOptions { max_steps: 3, allow_repeat: false });

        let outcome = runtime.run(&client, &[Message::user("find x")], &declarations()).await.unwrap();

        assert!(outcome.did_submit);
        assert_eq!(outcome.phase, LoopPhase::Submitted);
        assert_eq!(outcome.steps_taken, 2);
        assert_eq!(outcome.final_text, "submitted 42");
        assert_eq!(outcome.tool_names(), vec!["lookup", "submit"]);
        assert!(!outcome.used_fallback);
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.submits.load(Ordering::SeqCst), 1);

        // guidance, user, (assistant, tool) x 2
        assert_eq!(outcome.messages.len(), 6);
        assert_eq!(outcome.messages[0].role, Role::System);
        assert_eq!(outcome.messages[0].text(), fallback::NATIVE_GUIDANCE);
        assert_eq!(outcome.messages[2].tool_calls[0].id, "c1");
        assert_eq!(outcome.messages[3].tool_call_id.as_deref(), Some("c1"));
        assert!(outcome.messages[3].text().contains("value of x"));
        let last = outcome.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_call_id.as_deref(), Some("c2"));
        assert!(last.text().contains("submitted 42"));
    }

    #[tokio::test]
    async fn test_terminal_at_first_step() {
        let backend = MockBackend::new();
        backend.push_tool_response(call("c1", "submit", json!({"answer": "yes"})));
        let client = client(backend);
        let (runtime, _) = runtime(0, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(outcome.did_submit);
        assert_eq!(outcome.steps_taken, 1);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].is_terminal);
        assert_eq!(client.backend().tool_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_calls_after_terminal_not_executed() {
        let backend = MockBackend::new();
        backend.push_tool_response(function_call_response(
            "r1",
            &[
                ("c1", "submit", json!({"answer": "a"})),
                ("c2", "lookup", json!({"key": "late"})),
            ],
        ));
        let client = client(backend);
        let (runtime, fixture) = runtime(0, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(outcome.did_submit);
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.results.len(), 1);
        // the assistant message only echoes the executed call
        assert_eq!(outcome.messages[2].tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_repeat_guard_skips_identical_call() {
        let backend = MockBackend::new();
        backend.push_tool_response(call("c1", "lookup", json!({"key": "x"})));
        backend.push_tool_response(call("c2", "lookup", json!({"key": "x"})));
        backend.push_tool_response(call("c3", "lookup", json!({"key": "y"})));
        backend.push_tool_response(call("c4", "submit", json!({"answer": "done"})));
        let client = client(backend);
        let (runtime, fixture) = runtime(0, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(outcome.did_submit);
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.results.len(), 4);
        assert!(!outcome.results[1].ok());
        assert!(outcome.results[1].output["error"].as_str().unwrap().contains("already called"));
    }

    #[tokio::test]
    async fn test_allow_repeat_reinvokes() {
        let backend = MockBackend::new();
        backend.push_tool_response(call("c1", "lookup", json!({"key": "x"})));
        backend.push_tool_response(call("c2", "lookup", json!({"key": "x"})));
        let client = client(backend);
        let (runtime, fixture) = runtime(0, AgentOptions { max_steps: 2, allow_repeat: true });

        runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_terminal_is_honored() {
        let backend = MockBackend::new();
        backend.push_tool_response(call("c1", "submit", json!({"answer": "a"})));
        backend.push_tool_response(call("c2", "submit", json!({"answer": "a"})));
        let client = client(backend);
        let (runtime, fixture) = runtime(1, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(outcome.did_submit);
        assert_eq!(fixture.submits.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.steps_taken, 2);
        assert!(!outcome.results[0].ok());
        assert!(outcome.results[0].is_terminal);
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let backend = MockBackend::new();
        for i in 0..5 {
            backend.push_tool_response(call(&format!("c{}", i), "lookup", json!({"key": format!("k{}", i)})));
        }
        let client = client(backend);
        let (runtime, fixture) = runtime(0, AgentOptions { max_steps: 3, allow_repeat: false });

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(!outcome.did_submit);
        assert_eq!(outcome.phase, LoopPhase::Exhausted);
        assert_eq!(outcome.steps_taken, 3);
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 3);
        assert_eq!(client.backend().tool_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_plain_text_ends_run() {
        let backend = MockBackend::new();
        backend.push_tool_response(text_response("r1", "I would rather not decide."));
        let client = client(backend);
        let (runtime, _) = runtime(0, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(!outcome.did_submit);
        assert_eq!(outcome.phase, LoopPhase::Exhausted);
        assert_eq!(outcome.final_text, "I would rather not decide.");
        assert_eq!(outcome.steps_taken, 1);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_tool_errors_are_recorded() {
        let backend = MockBackend::new();
        backend.push_tool_response(call("c1", "delete_everything", json!({})));
        backend.push_tool_response(call("c2", "lookup", json!({})));
        backend.push_tool_response(call("c3", "submit", json!({"answer": "a"})));
        let client = client(backend);
        let (runtime, fixture) = runtime(1, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(!outcome.did_submit);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].output["error"], "unknown tool delete_everything");
        assert!(outcome.results[1].output["error"].as_str().unwrap().contains("key"));
        assert_eq!(outcome.results[2].output["error"], "ledger locked");
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 0);
        // every call still got a reply message
        assert_eq!(outcome.messages.iter().filter(|m| m.role == Role::Tool).count(), 3);
    }

    #[tokio::test]
    async fn test_continuation_token_threaded() {
        let backend = MockBackend::new().with_kind(BackendKind::NativeTooling);
        backend.push_tool_response(call("c1", "lookup", json!({"key": "x"})));
        backend.push_tool_response(call("c2", "submit", json!({"answer": "a"})));
        let client = client(backend);
        let (runtime, _) = runtime(0, AgentOptions::default());

        runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        let requests = client.backend().tool_requests();
        assert_eq!(requests[0].continuation, None);
        assert_eq!(requests[1].continuation.as_deref(), Some("resp_c1"));
        assert_eq!(requests[0].tools, vec!["lookup", "submit"]);
    }

    #[tokio::test]
    async fn test_fallback_once() {
        let backend = MockBackend::new();
        backend.push_tool_error(LlmError::ToolsUnsupported("model does not support tools".into()));
        backend.push_tool_response(text_response("r1", "```json\n{\"name\": \"lookup\", \"args\": {\"key\": \"x\"}}\n```"));
        backend.push_tool_response(text_response("r2", "{'name': 'submit', 'args': {'answer': 'b'}}"));
        let client = client(backend);
        let (runtime, fixture) = runtime(0, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(outcome.used_fallback);
        assert!(outcome.did_submit);
        assert_eq!(outcome.phase, LoopPhase::Submitted);
        assert_eq!(outcome.final_text, "submitted b");
        assert_eq!(outcome.steps_taken, 2);
        assert_eq!(fixture.lookups.load(Ordering::SeqCst), 1);

        let requests = client.backend().tool_requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].tools.is_empty());
        assert!(requests[1].messages[0].text().starts_with("You are an agent."));
        // fresh state: the restarted run carries no native leftovers
        assert_eq!(requests[1].messages.len(), 2);
        assert_eq!(requests[1].continuation, None);

        assert_eq!(outcome.messages[2].role, Role::Assistant);
        assert_eq!(outcome.messages[3].role, Role::User);
        assert!(outcome.messages[3].text().contains("value of x"));
    }

    #[tokio::test]
    async fn test_fallback_failing_again_is_fatal() {
        let backend = MockBackend::new();
        backend.push_tool_error(LlmError::ToolsUnsupported("no tools".into()));
        backend.push_tool_error(LlmError::ToolsUnsupported("still no tools".into()));
        let client = client(backend);
        let (runtime, _) = runtime(0, AgentOptions::default());

        let err = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap_err();
        assert!(matches!(err, ProbeError::ToolsUnsupported(ref m) if m == "still no tools"));
        assert_eq!(client.backend().tool_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_fallback_plain_text_ends_run() {
        let backend = MockBackend::new();
        backend.push_tool_error(LlmError::ToolsUnsupported("no tools".into()));
        backend.push_tool_response(text_response("r1", "I decline to pick."));
        let client = client(backend);
        let (runtime, _) = runtime(0, AgentOptions::default());

        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.final_text, "I decline to pick.");
        assert_eq!(outcome.phase, LoopPhase::Exhausted);
    }

    #[tokio::test]
    async fn test_zero_budget() {
        let client = client(MockBackend::new());
        let (runtime, _) = runtime(0, AgentOptions { max_steps: 0, allow_repeat: false });
        let outcome = runtime.run(&client, &[Message::user("go")], &declarations()).await.unwrap();
        assert_eq!(outcome.steps_taken, 0);
        assert_eq!(outcome.phase, LoopPhase::Exhausted);
        assert!(client.backend().tool_requests().is_empty());
    }
}
