//! CLI module for agentprobe - command-line interface and subcommands.
//!
//! Provides the main entry point with one subcommand per experiment.

pub mod commands;

pub use commands::Cli;
