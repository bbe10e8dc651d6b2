//! CLI command definitions for the `dflow` binary.

pub mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Plan and validate data/ML pipeline graphs.
#[derive(Parser)]
#[command(name = "dflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the order a pipeline's nodes would run in.
    Plan {
        /// Pipeline file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// Check a pipeline file for structural problems.
    #[command(alias = "check")]
    Validate {
        /// Pipeline file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
