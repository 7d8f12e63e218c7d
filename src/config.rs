use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentprobe::agent::AgentOptions;
use agentprobe::eval::DEFAULT_JUDGE_MODEL;
use agentprobe::experiment::multiturn::{DEFAULT_BATCH_SIZE, DEFAULT_NUM_ROUNDS};
use agentprobe::experiment::study::{DEFAULT_MAX_CONTENT_TOKENS, MIN_DOCUMENT_WORDS};
use agentprobe::llm::{
    BackendKind, BackendSettings, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_TOKENS, DEFAULT_PARALLELISM, RetryPolicy,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub agent: AgentOptions,
    pub judge: JudgeConfig,
    pub batch: BatchConfig,
    pub study: StudyConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    /// Protocol override; chosen from the model name when unset
    pub kind: Option<BackendKind>,
    /// Base URL override; otherwise read from `base_url_env`
    pub base_url: Option<String>,
    pub native_api_key_env: String,
    pub chat_api_key_env: String,
    pub base_url_env: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub embedding_model: String,
    pub reasoning_effort: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5".to_string(),
            kind: None,
            base_url: None,
            native_api_key_env: "OPENAI_API_KEY".to_string(),
            chat_api_key_env: "LLM_API_KEY".to_string(),
            base_url_env: "LLM_BASE_URL".to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_ms: 300000,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            reasoning_effort: None,
        }
    }
}

impl LlmConfig {
    /// Backend settings for `model`, with credentials from the environment
    pub fn settings_for(&self, model: &str) -> Result<BackendSettings> {
        let kind = self.kind.unwrap_or_else(|| BackendKind::for_model(model));
        let (key_env, default_url) = match kind {
            BackendKind::NativeTooling => (&self.native_api_key_env, Some(OPENAI_BASE_URL)),
            BackendKind::ChatCompletion => (&self.chat_api_key_env, None),
        };

        let base_url = self
            .base_url
            .clone()
            .or_else(|| std::env::var(&self.base_url_env).ok().filter(|v| !v.is_empty()))
            .or_else(|| default_url.map(str::to_string))
            .ok_or_else(|| eyre!("No base URL for {}: set llm.base_url or {}", model, self.base_url_env))?;
        let api_key = std::env::var(key_env).unwrap_or_default();

        let mut settings = BackendSettings::new(model, kind, base_url, api_key)
            .with_embedding_model(&self.embedding_model)
            .with_timeout(Duration::from_millis(self.timeout_ms));
        if let Some(effort) = &self.reasoning_effort {
            settings = settings.with_reasoning_effort(effort);
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub model: String,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_JUDGE_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub parallelism: usize,
    pub batch_size: usize,
    pub num_rounds: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            batch_size: DEFAULT_BATCH_SIZE,
            num_rounds: DEFAULT_NUM_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Word budget of the joined material
    pub max_content_tokens: usize,
    /// Shorter documents are skipped
    pub min_document_words: usize,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            max_content_tokens: DEFAULT_MAX_CONTENT_TOKENS,
            min_document_words: MIN_DOCUMENT_WORDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub scenario: PathBuf,
    /// Prompt library; the built-in one when unset
    pub prompts: Option<PathBuf>,
    pub experiments_dir: PathBuf,
    pub study_topics: PathBuf,
    pub study_content: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scenario: PathBuf::from("scenarios/policy.yml"),
            prompts: None,
            experiments_dir: PathBuf::from("experiments"),
            study_topics: PathBuf::from("data/study/topics.yaml"),
            study_content: PathBuf::from("data/study/content"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            llm: LlmConfig::default(),
            retry: RetryPolicy::default(),
            agent: AgentOptions::default(),
            judge: JudgeConfig::default(),
            batch: BatchConfig::default(),
            study: StudyConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-5");
        assert_eq!(config.judge.model, DEFAULT_JUDGE_MODEL);
        assert_eq!(config.agent.max_steps, 8);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.batch.parallelism, DEFAULT_PARALLELISM);
        assert_eq!(config.study.max_content_tokens, DEFAULT_MAX_CONTENT_TOKENS);
        assert_eq!(config.paths.study_content, PathBuf::from("data/study/content"));
    }

    #[test]
    fn test_batch_and_study_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agentprobe.yml");
        fs::write(&path, "batch:\n  parallelism: 2\nstudy:\n  max_content_tokens: 500\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.batch.parallelism, 2);
        assert_eq!(config.batch.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.study.max_content_tokens, 500);
        assert_eq!(config.study.min_document_words, MIN_DOCUMENT_WORDS);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agentprobe.yml");
        fs::write(
            &path,
            "llm:\n  model: claude-sonnet-4-20250514\n  base_url: http://localhost:4000\nagent:\n  max_steps: 3\nretry:\n  max_retries: 5\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.llm.model, "claude-sonnet-4-20250514");
        assert_eq!(config.llm.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.agent.max_steps, 3);
        assert!(!config.agent.allow_repeat);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff, 1.5);
        assert_eq!(config.judge.model, DEFAULT_JUDGE_MODEL);
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let path = PathBuf::from("/nonexistent/agentprobe.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_settings_for_chat_model() {
        let llm = LlmConfig {
            base_url: Some("http://localhost:4000".to_string()),
            chat_api_key_env: "AGENTPROBE_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let settings = llm.settings_for("claude-sonnet-4-20250514").unwrap();
        assert_eq!(settings.kind, BackendKind::ChatCompletion);
        assert_eq!(settings.base_url, "http://localhost:4000");
        assert!(settings.api_key.is_empty());
        assert_eq!(settings.timeout, Duration::from_millis(300000));
    }

    #[test]
    fn test_settings_for_native_model() {
        let llm = LlmConfig {
            reasoning_effort: Some("low".to_string()),
            ..Default::default()
        };
        let settings = llm.settings_for("gpt-5").unwrap();
        assert_eq!(settings.kind, BackendKind::NativeTooling);
        assert_eq!(settings.reasoning_effort.as_deref(), Some("low"));
    }

    #[test]
    fn test_chat_model_without_base_url_fails() {
        let llm = LlmConfig {
            base_url_env: "AGENTPROBE_TEST_UNSET_URL".to_string(),
            ..Default::default()
        };
        assert!(llm.settings_for("azure/gpt-5-mini").is_err());
    }
}
