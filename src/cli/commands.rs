//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: schedule the configured actions until interrupted
//! - exec: run one configured action now
//! - records: list persisted call records

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cadence - run shell commands on a jittered, persistent schedule
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Schedule the configured actions until Ctrl-C (default)
    Run,

    /// Execute one configured action now
    Exec {
        /// Action ID to execute
        id: String,
    },

    /// List persisted call records
    Records {
        /// Show only this action
        #[arg(short, long)]
        id: Option<String>,
    },
}
