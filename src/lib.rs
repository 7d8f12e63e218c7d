//! agentprobe - probe language-model stances through agentic tool use
//!
//! A model client over two hosted protocols, a tool-calling agent loop with
//! a JSON-protocol fallback, an evaluation parser and judge, and the
//! experiment drivers that tie them to scenario files and run artifacts.

pub mod agent;
pub mod artifacts;
pub mod error;
pub mod eval;
pub mod experiment;
pub mod llm;
pub mod prompt;
pub mod scenario;

pub use error::{ProbeError, Result};
