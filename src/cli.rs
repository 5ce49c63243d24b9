// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(about = "Git-based application deployment to SSH-reachable servers")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results (for CI)
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to the configuration file (default: discover deckhand.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new deckhand.yml configuration file
    Init {
        /// Name of the first project
        #[arg(long)]
        project: Option<String>,

        /// SSH address of the first host ([user@]host[:port])
        #[arg(long)]
        host: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Deploy a project from its tracked branch
    Deploy {
        project: String,
    },

    /// Redeploy a project at an explicit commit
    Rollback {
        project: String,
        commit: String,
    },

    /// Stop a project's process
    Stop {
        project: String,
    },

    /// Stop and redeploy a project
    Restart {
        project: String,
    },

    /// Run a command on a host, streaming its output
    Exec {
        host: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Check connectivity to one or all hosts
    Check {
        host: Option<String>,
    },

    /// Sample CPU, memory, disk, and load of online hosts
    Metrics {
        /// Keep sampling until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Show recent output of a project's process
    Logs {
        project: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
}
