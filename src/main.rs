use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;
mod config;

use agentprobe::agent::AgentOptions;
use agentprobe::artifacts::{ArtifactOptions, RunArtifacts, WriteMode, read_jsonl};
use agentprobe::eval::Judge;
use agentprobe::experiment::study::normalize_title;
use agentprobe::experiment::{
    AgreementRecord, BehaviorRecord, BehaviorSettings, DialogueDatapoint, DialogueEvalSettings, MultiturnMode,
    MultiturnSettings, StudySettings, StudyTopics, load_dialogue_history, load_prior_messages, read_study_content,
    run_agreement, run_behavior, run_dialogue_agreement, run_dialogue_behavior, run_multiturn, run_study,
};
use agentprobe::llm::{Message, ModelClient};
use agentprobe::prompt::PromptLibrary;
use agentprobe::scenario::Scenario;
use cli::Cli;
use cli::commands::{Commands, DialogueArgs, split_models};
use config::Config;

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentprobe")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("agentprobe.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Last path segment of a model name, for directory names
fn short_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

fn connect(config: &Config, model: &str, system_prompt: Option<String>) -> Result<ModelClient> {
    let settings = config.llm.settings_for(model)?;
    let client = ModelClient::connect(settings, system_prompt, config.retry)
        .context(format!("Failed to connect to {}", model))?;
    Ok(client.with_max_tokens(config.llm.max_tokens))
}

fn open_artifacts(cli: &Cli, run_dir: &Path) -> Result<RunArtifacts> {
    let artifacts = RunArtifacts::open(
        run_dir,
        ArtifactOptions {
            echo: cli.is_verbose(),
            mode: WriteMode::Overwrite,
            dry_run: cli.dry_run,
        },
    )
    .context(format!("Failed to open run directory {}", run_dir.display()))?;
    Ok(artifacts)
}

fn load_scenario(config: &Config, scenario: Option<&PathBuf>) -> Result<Scenario> {
    let path = scenario.unwrap_or(&config.paths.scenario);
    Scenario::load(path).context(format!("Failed to load scenario {}", path.display()))
}

fn load_dataset(path: &Path) -> Result<Vec<DialogueDatapoint>> {
    read_jsonl(path).context(format!("Failed to read dataset {}", path.display()))
}

/// Conversation preceding the question: an earlier dialogue or an earlier run
fn prior_history(dialogue: &DialogueArgs, prior_run_dir: Option<&Path>) -> Result<Vec<Message>> {
    match &dialogue.dialogue_run_dir {
        Some(dir) => load_dialogue_history(dir, dialogue.query_index, dialogue.rounds)
            .context(format!("Failed to load dialogue history from {}", dir.display())),
        None => Ok(load_prior_messages(prior_run_dir)?),
    }
}

fn dialogue_settings(dialogue: &DialogueArgs) -> DialogueEvalSettings {
    DialogueEvalSettings {
        query_index: dialogue.query_index,
        kind: dialogue.dataset_kind,
    }
}

fn report_behavior(record: &BehaviorRecord, run_dir: &Path) {
    let verdict = record.behavior_results.pred_label.as_deref().unwrap_or("unparsed");
    println!(
        "  submitted: {}  steps: {}  fallback: {}  verdict: {}",
        record.did_submit,
        record.steps_taken,
        record.used_fallback,
        verdict.bold()
    );
    println!("{} {}", "Run finished:".green(), run_dir.display());
}

fn report_agreement(record: &AgreementRecord, run_dir: &Path) {
    match record.agreement_results.likert() {
        Some(score) => println!("  answer: {}", score.to_string().bold()),
        None => println!("  answer: {}", "unparsed".red()),
    }
    println!("{} {}", "Run finished:".green(), run_dir.display());
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }
    if cli.dry_run {
        println!("{}", "Dry run: no artifacts will be written".yellow());
    }

    let prompts = PromptLibrary::load(config.paths.prompts.as_deref()).context("Failed to load prompts")?;

    match &cli.command {
        Commands::Behavior {
            topic_index,
            model,
            judge_model,
            scenario,
            prior_run_dir,
            max_steps,
            run_dir,
            dialogue,
        } => {
            let model = model.as_deref().unwrap_or(&config.llm.model);
            let judge_model = judge_model.as_deref().unwrap_or(&config.judge.model);
            let prior = prior_history(dialogue, prior_run_dir.as_deref())?;

            if let Some(dataset) = &dialogue.dataset {
                let data = load_dataset(dataset)?;
                let run_dir = run_dir.clone().unwrap_or_else(|| {
                    config
                        .paths
                        .experiments_dir
                        .join("behavior")
                        .join(format!("query={}_m={}", dialogue.query_index, short_name(model)))
                });
                let client = connect(config, model, None)?;
                let judge = Judge::new(connect(config, judge_model, None)?);
                let mut artifacts = open_artifacts(cli, &run_dir)?;

                println!(
                    "{} {} on dialogue entry {}",
                    "Behavior:".green(),
                    model,
                    dialogue.query_index.to_string().cyan()
                );
                let record = run_dialogue_behavior(
                    &client,
                    &judge,
                    &data,
                    &dialogue_settings(dialogue),
                    &prompts,
                    &prior,
                    &mut artifacts,
                )
                .await?;
                report_behavior(&record, &run_dir);
                return Ok(());
            }

            let scenario = load_scenario(config, scenario.as_ref())?;
            let topic = scenario.topic(*topic_index)?;

            let run_dir = run_dir.clone().unwrap_or_else(|| {
                config
                    .paths
                    .experiments_dir
                    .join("behavior")
                    .join(format!("topic={}_m={}", topic_index, short_name(model)))
            });
            let settings = BehaviorSettings {
                topic_index: *topic_index,
                agent: AgentOptions {
                    max_steps: max_steps.unwrap_or(config.agent.max_steps),
                    ..config.agent
                },
                prior_messages: prior,
            };

            let agent = connect(config, model, None)?;
            let judge = Judge::new(connect(config, judge_model, None)?);
            let mut artifacts = open_artifacts(cli, &run_dir)?;

            println!("{} {} on topic {}", "Behavior:".green(), model, topic.topic_name.cyan());
            let record = run_behavior(&agent, &judge, topic, &prompts, &settings, &mut artifacts).await?;
            report_behavior(&record, &run_dir);
        }
        Commands::Agreement {
            topic_index,
            model,
            scenario,
            prior_run_dir,
            run_dir,
            dialogue,
        } => {
            let model = model.as_deref().unwrap_or(&config.llm.model);
            let prior = prior_history(dialogue, prior_run_dir.as_deref())?;

            if let Some(dataset) = &dialogue.dataset {
                let data = load_dataset(dataset)?;
                let run_dir = run_dir.clone().unwrap_or_else(|| {
                    config
                        .paths
                        .experiments_dir
                        .join("agreement")
                        .join(format!("query={}_m={}", dialogue.query_index, short_name(model)))
                });
                let client = connect(config, model, None)?;
                let mut artifacts = open_artifacts(cli, &run_dir)?;

                println!(
                    "{} {} on dialogue entry {}",
                    "Agreement:".green(),
                    model,
                    dialogue.query_index.to_string().cyan()
                );
                let record = run_dialogue_agreement(
                    &client,
                    &data,
                    &dialogue_settings(dialogue),
                    &prompts,
                    &prior,
                    &mut artifacts,
                )
                .await?;
                report_agreement(&record, &run_dir);
                return Ok(());
            }

            let scenario = load_scenario(config, scenario.as_ref())?;
            let topic = scenario.topic(*topic_index)?;

            let run_dir = run_dir.clone().unwrap_or_else(|| {
                config
                    .paths
                    .experiments_dir
                    .join("agreement")
                    .join(format!("topic={}_m={}", topic_index, short_name(model)))
            });
            let client = connect(config, model, None)?;
            let mut artifacts = open_artifacts(cli, &run_dir)?;

            println!("{} {} on topic {}", "Agreement:".green(), model, topic.topic_name.cyan());
            let record = run_agreement(&client, topic, *topic_index, &prompts, &prior, &mut artifacts).await?;
            report_agreement(&record, &run_dir);
        }
        Commands::Multiturn {
            dataset,
            mode,
            models,
            persuasion_tech,
            num_rounds,
            batch_size,
            run_dir,
        } => {
            let (model_alpha, model_beta) =
                split_models(models).ok_or_else(|| eyre!("Expected two models joined by '+', got {}", models))?;
            let data = load_dataset(dataset)?;
            let (prompt_alpha, prompt_beta) = mode.system_prompts(&prompts, persuasion_tech)?;

            let settings = MultiturnSettings {
                mode: *mode,
                num_rounds: num_rounds.unwrap_or(config.batch.num_rounds),
                batch_size: batch_size.unwrap_or(config.batch.batch_size),
                parallelism: config.batch.parallelism,
                persuasion_tech: persuasion_tech.clone(),
            };
            let technique = match mode {
                MultiturnMode::OneSided => persuasion_tech.as_str(),
                MultiturnMode::TwoSided => "discussion",
            };
            let run_dir = run_dir.clone().unwrap_or_else(|| {
                config.paths.experiments_dir.join("multiturn").join(format!(
                    "mode={}_nrounds={}_ma={}_mb={}_pa={}",
                    mode,
                    settings.num_rounds,
                    short_name(model_alpha),
                    short_name(model_beta),
                    technique
                ))
            });

            let alpha = connect(config, model_alpha, Some(prompt_alpha))?;
            let beta = connect(config, model_beta, Some(prompt_beta))?;
            let mut artifacts = open_artifacts(cli, &run_dir)?;

            println!(
                "{} {} vs {} ({}, {} datapoints)",
                "Multiturn:".green(),
                model_alpha,
                model_beta,
                mode,
                data.len()
            );
            let summary = run_multiturn(&alpha, &beta, &data, &settings, &mut artifacts).await?;
            println!("  dialogues: {}  batches: {}", summary.dialogues, summary.batches);
            println!("{} {}", "Run finished:".green(), run_dir.display());
        }
        Commands::Study {
            topic_index,
            topic_kind,
            model,
            topics,
            content_dir,
            max_content_tokens,
            run_dir,
        } => {
            let model = model.as_deref().unwrap_or(&config.llm.model);
            let topics_path = topics.as_ref().unwrap_or(&config.paths.study_topics);
            let content_dir = content_dir.as_ref().unwrap_or(&config.paths.study_content);

            let topic_list = StudyTopics::load(topics_path)
                .context(format!("Failed to load study topics {}", topics_path.display()))?;
            let topic = topic_list.find(topic_kind, *topic_index)?;
            let documents = read_study_content(
                content_dir,
                &normalize_title(&topic.name),
                config.study.min_document_words,
            )?;

            let settings = StudySettings {
                topic_kind: topic_kind.clone(),
                topic_index: *topic_index,
                max_content_tokens: max_content_tokens.unwrap_or(config.study.max_content_tokens),
            };
            let run_dir = run_dir.clone().unwrap_or_else(|| {
                config.paths.experiments_dir.join("study").join(format!(
                    "type={}_topic={}_m={}",
                    topic_kind,
                    topic_index,
                    short_name(model)
                ))
            });

            let mut client = connect(config, model, None)?;
            let mut artifacts = open_artifacts(cli, &run_dir)?;

            println!(
                "{} {} reads {} documents on {}",
                "Study:".green(),
                model,
                documents.len(),
                topic.name.cyan()
            );
            let response = run_study(&mut client, topic, &documents, &prompts, &settings, &mut artifacts).await?;
            println!("  output: {} chars", response.output_text.len());
            println!("{} {}", "Run finished:".green(), run_dir.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
