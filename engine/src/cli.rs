//! CLI interface for Ember
//!
//! Command-line interface using clap's derive API. Every command builds a
//! short-lived `InferenceService` around the configured backend.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ember inference service
///
/// Batches prompts onto a single local generation backend and keeps
/// bounded conversation history per context.
#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a single reply
    Ask {
        /// Prompt text
        prompt: String,

        /// Model to load (overrides backend.model)
        #[arg(short, long, value_name = "PATH")]
        model: Option<String>,

        /// System prompt for the conversation
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Interactive conversation on stdin
    Chat {
        /// Model to load (overrides backend.model)
        #[arg(short, long, value_name = "PATH")]
        model: Option<String>,

        /// System prompt for the conversation
        #[arg(short, long)]
        system: Option<String>,
    },

    /// Run a scripted warm-up and print service statistics
    Stats {
        /// Number of warm-up requests
        #[arg(short, long, default_value = "5")]
        requests: usize,

        /// Model to load (overrides backend.model)
        #[arg(short, long, value_name = "PATH")]
        model: Option<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}
