//! Agentic loop - drives a model through tool calls to a terminal action

pub mod fallback;
pub mod runtime;
pub mod state;
pub mod toolbox;

pub use runtime::{AgentOptions, AgentRuntime, DEFAULT_MAX_STEPS};
pub use state::{AgentOutcome, LoopPhase, LoopState, ToolResult};
pub use toolbox::{FnTool, Tool, ToolError, ToolRegistry, Toolbox, fit_arguments};
