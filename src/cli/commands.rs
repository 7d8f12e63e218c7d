//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - behavior: agentic scenario run judged for its action
//! - agreement: Likert agreement question on a topic
//! - multiturn: two models in a batched dialogue
//! - study: one long read of collected material on a topic

use agentprobe::experiment::dialogue::DEFAULT_HISTORY_ROUNDS;
use agentprobe::experiment::{DatasetKind, MultiturnMode};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// agentprobe - probe model stances through agentic tool use and dialogue
#[derive(Parser, Debug)]
#[command(name = "agentprobe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output; echoes the run log to stdout
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run without writing artifacts
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Evaluate one entry of a dialogue dataset instead of a scenario topic
#[derive(Args, Debug, Clone, Default)]
pub struct DialogueArgs {
    /// Dialogue dataset (JSONL)
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Entry of the dialogue dataset
    #[arg(short, long, default_value_t = 0)]
    pub query_index: usize,

    /// moral or safety; detected from the entry when unset
    #[arg(long)]
    pub dataset_kind: Option<DatasetKind>,

    /// Multi-turn run whose dialogue for the entry precedes the question
    #[arg(long, conflicts_with = "prior_run_dir")]
    pub dialogue_run_dir: Option<PathBuf>,

    /// Dialogue rounds kept from that run
    #[arg(long, default_value_t = DEFAULT_HISTORY_ROUNDS)]
    pub rounds: usize,
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent on a scenario topic and judge its action
    Behavior {
        /// Topic index in the scenario file
        #[arg(short, long, default_value_t = 0)]
        topic_index: usize,

        /// Agent model (overrides llm.model)
        #[arg(short, long)]
        model: Option<String>,

        /// Judge model (overrides judge.model)
        #[arg(short, long)]
        judge_model: Option<String>,

        /// Scenario file (overrides paths.scenario)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Earlier run whose message history precedes the scenario prompt
        #[arg(short, long)]
        prior_run_dir: Option<PathBuf>,

        /// Step budget (overrides agent.max_steps)
        #[arg(long)]
        max_steps: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        run_dir: Option<PathBuf>,

        #[command(flatten)]
        dialogue: DialogueArgs,
    },

    /// Ask a model how much it agrees with a topic's statements
    Agreement {
        /// Topic index in the scenario file
        #[arg(short, long, default_value_t = 0)]
        topic_index: usize,

        /// Model (overrides llm.model)
        #[arg(short, long)]
        model: Option<String>,

        /// Scenario file (overrides paths.scenario)
        #[arg(short, long)]
        scenario: Option<PathBuf>,

        /// Earlier run whose message history precedes the question
        #[arg(short, long)]
        prior_run_dir: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        run_dir: Option<PathBuf>,

        #[command(flatten)]
        dialogue: DialogueArgs,
    },

    /// Run batched dialogues between two models
    Multiturn {
        /// Dialogue dataset (JSONL)
        dataset: PathBuf,

        /// one-sided or two-sided
        #[arg(short, long, default_value = "two-sided")]
        mode: MultiturnMode,

        /// Models joined by '+': alpha+beta
        #[arg(long, default_value = "gpt-5+claude-sonnet-4-20250514")]
        models: String,

        /// Persuasion technique prompt
        #[arg(short, long, default_value = "information")]
        persuasion_tech: String,

        /// Rounds per dialogue (overrides batch.num_rounds)
        #[arg(short, long)]
        num_rounds: Option<usize>,

        /// Datapoints per batch (overrides batch.batch_size)
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        run_dir: Option<PathBuf>,
    },

    /// Have a model read the collected material on a study topic
    Study {
        /// Topic id within its kind
        #[arg(short, long, default_value_t = 0)]
        topic_index: usize,

        /// Topic kind in the topic list
        #[arg(short = 'k', long, default_value = "none")]
        topic_kind: String,

        /// Model (overrides llm.model)
        #[arg(short, long)]
        model: Option<String>,

        /// Study topic list (overrides paths.study_topics)
        #[arg(long)]
        topics: Option<PathBuf>,

        /// Directory of collected documents (overrides paths.study_content)
        #[arg(long)]
        content_dir: Option<PathBuf>,

        /// Word budget of the material (overrides study.max_content_tokens)
        #[arg(long)]
        max_content_tokens: Option<usize>,

        /// Output directory
        #[arg(short, long)]
        run_dir: Option<PathBuf>,
    },
}

/// Split `alpha+beta` into its two model names
pub fn split_models(models: &str) -> Option<(&str, &str)> {
    let (alpha, beta) = models.split_once('+')?;
    if alpha.is_empty() || beta.is_empty() || beta.contains('+') {
        return None;
    }
    Some((alpha, beta))
}
