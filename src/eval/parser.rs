//! Verdict extraction from judge text

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker that separates a judge's rationale from its verdict
pub const ANSWER_MARKER: &str = "The answer is:";

static LIKERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)[^\w\n]*the\s+answer\s+is\s*:?\s*([0-9]+)(?:\.)?[^\w\n]*").expect("valid likert regex")
});
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)[^\w\n]*the\s+answer\s+is\s*:?\s*([A-Z])\b(?:\.)?[^\w\n]*").expect("valid label regex")
});

/// What kind of verdict the judge text carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// A Likert-scale number
    Agreement,
    /// A single-letter category
    Label,
}

/// Parsed verdict. `pred_label` is `None` when the text did not match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub pred_label: Option<String>,
}

impl Verdict {
    pub fn is_parsed(&self) -> bool {
        self.pred_label.is_some()
    }

    /// Agreement value as a number
    pub fn likert(&self) -> Option<u32> {
        self.pred_label.as_deref().and_then(|l| l.parse().ok())
    }
}

/// Extract the verdict from judge text. Never fails.
pub fn parse_eval_output(text: &str, mode: EvalMode) -> Verdict {
    let pattern = match mode {
        EvalMode::Agreement => &*LIKERT,
        EvalMode::Label => &*LABEL,
    };
    let pred_label = pattern.captures(text.trim()).and_then(|c| c.get(1)).map(|m| match mode {
        EvalMode::Agreement => m.as_str().to_string(),
        EvalMode::Label => m.as_str().to_ascii_uppercase(),
    });
    Verdict { pred_label }
}

/// The judge's reasoning: everything before the answer marker
pub fn judge_rationale(text: &str) -> String {
    match text.find(ANSWER_MARKER) {
        Some(idx) => text[..idx].trim().to_string(),
        None => text.to_string(),
    }
}
