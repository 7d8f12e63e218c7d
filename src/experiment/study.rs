//! Study run: a model reads collected material on a topic in one turn
//!
//! Documents live under `<content_dir>/**/<normalized topic name>/*.txt`.
//! Short documents are skipped, the rest are wrapped in the study template,
//! joined, cut to a word budget and followed by the study instruction. The
//! conversation is saved so later runs can continue from it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use unicode_normalization::UnicodeNormalization;

use super::{MESSAGE_HISTORY_FILE, log_section};
use crate::artifacts::RunArtifacts;
use crate::error::{ProbeError, Result};
use crate::llm::{GenerateOutput, ModelBackend, ModelClient};
use crate::prompt::{PromptLibrary, PromptRenderer};

/// File holding the client's call history after a study run
pub const HISTORY_FILE: &str = "history.json";

pub const DEFAULT_MAX_CONTENT_TOKENS: usize = 80_000;

/// Documents shorter than this many words are skipped
pub const MIN_DOCUMENT_WORDS: usize = 3000;

const MAX_TITLE_LEN: usize = 200;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_]+").expect("valid separator regex"));

/// One entry of the study topic list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyTopic {
    pub id: usize,
    pub name: String,
}

/// Study topics grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyTopics {
    #[serde(default)]
    pub study: HashMap<String, Vec<StudyTopic>>,
}

impl StudyTopics {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("Failed to read study topics {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Topic `id` of the given kind
    pub fn find(&self, kind: &str, id: usize) -> Result<&StudyTopic> {
        let topics = self
            .study
            .get(kind)
            .ok_or_else(|| ProbeError::Config(format!("No study topics of kind '{}'", kind)))?;
        topics
            .iter()
            .find(|topic| topic.id == id)
            .ok_or_else(|| ProbeError::Config(format!("No study topic {} of kind '{}'", id, kind)))
    }
}

/// One document of study material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyDocument {
    /// File name the document was read from
    pub title_text: String,
    pub text: String,
}

/// Directory-safe form of a topic title
pub fn normalize_title(title: &str) -> String {
    let mut normalized = String::with_capacity(title.len());
    for c in title.trim().chars() {
        match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | ',' | ';' | '~' | '^' => normalized.push('_'),
            '"' | '\'' | '(' | ')' | '[' | ']' | '{' | '}' | '!' | '`' => {}
            '&' => normalized.push_str("and"),
            '%' => normalized.push_str("percent"),
            '#' => normalized.push_str("number"),
            '@' => normalized.push_str("at"),
            '+' => normalized.push_str("plus"),
            '=' => normalized.push_str("equals"),
            other => normalized.push(other),
        }
    }

    let collapsed = SEPARATORS.replace_all(&normalized, "_");
    let trimmed = collapsed.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        return "untitled".to_string();
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        let cut: String = trimmed.chars().take(MAX_TITLE_LEN).collect();
        return cut.trim_end_matches(|c| c == '_' || c == '.').to_string();
    }
    trimmed.to_string()
}

/// Every directory under `root`, `root` included
fn collect_dirs(root: &Path, dirs: &mut Vec<PathBuf>) -> Result<()> {
    dirs.push(root.to_path_buf());
    let mut children: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    children.sort();
    for child in children {
        collect_dirs(&child, dirs)?;
    }
    Ok(())
}

/// Documents of at least `min_words` words in the directories named
/// `topic_dir`, compared in NFC form
pub fn read_study_content(content_dir: &Path, topic_dir: &str, min_words: usize) -> Result<Vec<StudyDocument>> {
    if !content_dir.is_dir() {
        return Err(ProbeError::Config(format!(
            "Study content directory {} not found",
            content_dir.display()
        )));
    }
    let wanted: String = topic_dir.nfc().collect();

    let mut dirs = Vec::new();
    collect_dirs(content_dir, &mut dirs)?;

    let mut documents = Vec::new();
    for dir in dirs {
        let matches = dir
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.nfc().collect::<String>() == wanted);
        if !matches {
            continue;
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        files.sort();

        for path in files {
            let text = fs::read_to_string(&path)?;
            let words = text.split_whitespace().count();
            if words < min_words {
                debug!("Skipping {} ({} words)", path.display(), words);
                continue;
            }
            info!("Study document {} ({} words)", path.display(), words);
            documents.push(StudyDocument {
                title_text: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                text,
            });
        }
    }

    if documents.is_empty() {
        return Err(ProbeError::Config(format!("No study content found for {}", topic_dir)));
    }
    Ok(documents)
}

/// First `max_words` space-separated words of `text`
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split(' ').take(max_words).collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudySettings {
    pub topic_kind: String,
    pub topic_index: usize,
    /// Word budget of the joined material
    pub max_content_tokens: usize,
}

impl Default for StudySettings {
    fn default() -> Self {
        Self {
            topic_kind: "none".to_string(),
            topic_index: 0,
            max_content_tokens: DEFAULT_MAX_CONTENT_TOKENS,
        }
    }
}

/// Study material as sent: wrapped documents cut to the budget, then the instruction
pub fn study_input(documents: &[StudyDocument], prompts: &PromptLibrary, max_content_tokens: usize) -> Result<String> {
    let renderer = PromptRenderer::new();
    let template = prompts.study_content_template()?;

    let mut content = String::new();
    for document in documents {
        content.push_str(&renderer.render(template, document)?);
        content.push_str("\n\n");
    }
    let mut input_text = truncate_words(&content, max_content_tokens);
    input_text.push_str("\n\n");
    input_text.push_str(prompts.init_study_prompt()?);
    Ok(input_text)
}

pub async fn run_study<B: ModelBackend>(
    client: &mut ModelClient<B>,
    topic: &StudyTopic,
    documents: &[StudyDocument],
    prompts: &PromptLibrary,
    settings: &StudySettings,
    artifacts: &mut RunArtifacts,
) -> Result<GenerateOutput> {
    info!(
        "Study run on topic {} ({}) over {} documents",
        topic.id,
        topic.name,
        documents.len()
    );

    let input_text = study_input(documents, prompts, settings.max_content_tokens)?;
    let response = client.generate(input_text).await;

    artifacts.write_record(&response)?;
    log_section(artifacts, "input_text", &Value::String(response.input_text.clone()))?;
    log_section(artifacts, "output_text", &Value::String(response.output_text.clone()))?;

    let titles: Vec<&str> = documents.iter().map(|d| d.title_text.as_str()).collect();
    artifacts.save_generation_config(&json!({
        "model_config": client.config(),
        "exp_config": {"exp_name": "study", "run_dir": artifacts.run_dir()},
        "data_config": {
            "study_topic_type": settings.topic_kind,
            "study_topic_index": settings.topic_index,
            "study_topic_name": topic.name,
            "max_content_tokens": settings.max_content_tokens,
            "documents": titles,
        },
    }))?;
    artifacts.save_json(&client.history(), HISTORY_FILE)?;
    artifacts.save_json(&client.message_history(), MESSAGE_HISTORY_FILE)?;

    info!("Study run finished: {} chars of output", response.output_text.len());
    Ok(response)
}
