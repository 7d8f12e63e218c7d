//! Evaluation - judge calls and verdict parsing

pub mod judge;
pub mod parser;

pub use judge::{DEFAULT_JUDGE_MODEL, Judge, JudgeOutcome};
pub use parser::{ANSWER_MARKER, EvalMode, Verdict, judge_rationale, parse_eval_output};
