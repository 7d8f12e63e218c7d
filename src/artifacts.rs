//! Per-run artifact files
//!
//! A run directory holds `log.txt`, `predictions.jsonl`,
//! `generation_config.yaml`, `eval_metrics.json` and any named JSON or JSONL
//! files an experiment saves. In dry-run mode nothing touches the disk and
//! log lines only go to stdout.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::error::{ProbeError, Result};

pub const LOG_FILE: &str = "log.txt";
pub const PREDICTIONS_FILE: &str = "predictions.jsonl";
pub const GENERATION_CONFIG_FILE: &str = "generation_config.yaml";
pub const METRICS_FILE: &str = "eval_metrics.json";

/// Write-once sink for final run records
pub trait ArtifactSink {
    fn write_prediction(&mut self, record: &Value) -> Result<()>;
}

/// What to do with predictions already in the run directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Truncate existing files
    #[default]
    Overwrite,
    /// Append, remembering which datapoints were already predicted
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactOptions {
    /// Echo log lines to stdout
    pub echo: bool,
    pub mode: WriteMode,
    pub dry_run: bool,
}

impl Default for ArtifactOptions {
    fn default() -> Self {
        Self {
            echo: true,
            mode: WriteMode::Overwrite,
            dry_run: false,
        }
    }
}

/// Files of one run
#[derive(Debug)]
pub struct RunArtifacts {
    run_dir: PathBuf,
    echo: bool,
    dry_run: bool,
    log: Option<File>,
    predictions: Option<File>,
    seen_datapoints: HashSet<u64>,
}

impl RunArtifacts {
    pub fn open(run_dir: impl AsRef<Path>, options: ArtifactOptions) -> Result<Self> {
        let run_dir = run_dir.as_ref().to_path_buf();

        if options.dry_run {
            info!("Dry run: nothing is written to {}", run_dir.display());
            return Ok(Self {
                run_dir,
                echo: true,
                dry_run: true,
                log: None,
                predictions: None,
                seen_datapoints: HashSet::new(),
            });
        }

        fs::create_dir_all(&run_dir)
            .map_err(|e| ProbeError::Artifact(format!("Failed to create run dir {}: {}", run_dir.display(), e)))?;

        let predictions_path = run_dir.join(PREDICTIONS_FILE);
        let resume = options.mode == WriteMode::Resume && predictions_path.exists();
        let seen_datapoints = if resume {
            read_seen_datapoints(&predictions_path)?
        } else {
            HashSet::new()
        };

        let mut log = open_file(&run_dir.join(LOG_FILE), resume)?;
        let predictions = open_file(&predictions_path, resume)?;
        writeln!(log, "# run opened {}", chrono::Local::now().to_rfc3339())?;

        debug!(
            "Opened artifacts in {} (resume={}, seen={})",
            run_dir.display(),
            resume,
            seen_datapoints.len()
        );
        Ok(Self {
            run_dir,
            echo: options.echo,
            dry_run: false,
            log: Some(log),
            predictions: Some(predictions),
            seen_datapoints,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Datapoint indices found in predictions when resuming
    pub fn seen_datapoints(&self) -> &HashSet<u64> {
        &self.seen_datapoints
    }

    pub fn is_seen(&self, datapoint_idx: u64) -> bool {
        self.seen_datapoints.contains(&datapoint_idx)
    }

    /// Append one ASCII-safe line to `log.txt`
    pub fn write_log(&mut self, text: &str) -> Result<()> {
        let text = ascii_safe(text);
        if let Some(log) = self.log.as_mut() {
            writeln!(log, "{}", text)?;
            log.flush()?;
        }
        if self.echo {
            println!("{}", text);
        }
        Ok(())
    }

    /// Log any serializable value as JSON
    pub fn write_log_value<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.write_log(&text)
    }

    /// Append one record to `predictions.jsonl`
    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        if let Some(predictions) = self.predictions.as_mut() {
            writeln!(predictions, "{}", serde_json::to_string(record)?)?;
            predictions.flush()?;
        }
        Ok(())
    }

    pub fn save_generation_config<T: Serialize>(&self, config: &T) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let yaml = serde_yaml::to_string(config)?;
        fs::write(self.run_dir.join(GENERATION_CONFIG_FILE), yaml)?;
        Ok(())
    }

    pub fn save_metrics<T: Serialize>(&self, metrics: &T) -> Result<()> {
        self.save_json(metrics, METRICS_FILE)
    }

    /// Write a pretty-printed JSON file into the run directory
    pub fn save_json<T: Serialize>(&self, data: &T, filename: &str) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(data)?;
        fs::write(self.run_dir.join(filename), json)?;
        Ok(())
    }

    /// Write one JSONL line, truncating the file unless `append` is set
    pub fn save_jsonl<T: Serialize>(&self, item: &T, filename: &str, append: bool) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let mut file = open_file(&self.run_dir.join(filename), append)?;
        writeln!(file, "{}", serde_json::to_string(item)?)?;
        Ok(())
    }
}

impl ArtifactSink for RunArtifacts {
    fn write_prediction(&mut self, record: &Value) -> Result<()> {
        self.write_record(record)
    }
}

fn open_file(path: &Path, append: bool) -> Result<File> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)
    } else {
        File::create(path)
    };
    file.map_err(|e| ProbeError::Artifact(format!("Failed to open {}: {}", path.display(), e)))
}

fn read_seen_datapoints(path: &Path) -> Result<HashSet<u64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut seen = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(&line)?;
        if let Some(idx) = record.get("datapoint_idx").and_then(|v| v.as_u64()) {
            seen.insert(idx);
        }
    }
    Ok(seen)
}

/// Decompose to NFKD, then replace every non-ASCII character with `?`
pub fn ascii_safe(text: &str) -> String {
    text.nfkd().map(|c| if c.is_ascii() { c } else { '?' }).collect()
}

/// Read every record of a JSONL file
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .map_err(|e| ProbeError::Config(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            records.push(serde_json::from_str(&line)?);
        }
    }
    Ok(records)
}

/// Read one JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| ProbeError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&content)?)
}
