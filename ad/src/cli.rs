//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AgentD - local coding assistant control plane
#[derive(Parser)]
#[command(
    name = "ad",
    about = "Control plane for a local coding assistant",
    version,
    after_help = "Logs are written to: ~/.local/share/agentd/logs/agentd.log"
)]
pub struct Cli {
    /// Repository root (defaults to the current directory)
    #[arg(short, long, global = true, help = "Repository root")]
    pub repo: Option<PathBuf>,

    /// Session id (overrides the config file)
    #[arg(short, long, global = true, help = "Session id")]
    pub session: Option<String>,

    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Initialize agent state for a repository
    Init,

    /// Classify a request without planning it
    Classify {
        /// Request text
        text: String,
    },

    /// Run one planner step and print the decision as JSON
    Plan {
        /// Request text
        text: String,
    },

    /// Manage agent state branches
    Branch {
        #[command(subcommand)]
        command: BranchCommand,
    },

    /// Manage working-tree snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },

    /// Manage background tasks
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Run the task worker in the foreground
    Worker,
}

/// Branch subcommands
#[derive(Subcommand)]
pub enum BranchCommand {
    /// List branches, marking the active one
    List,

    /// Switch the active branch, creating it if missing
    Switch {
        /// Branch name
        name: String,
    },
}

/// Snapshot subcommands
#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Capture a snapshot of the working tree
    Take {
        /// Snapshot message
        #[arg(short, long, default_value = "manual snapshot")]
        message: String,
    },

    /// List retained snapshots
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Restore the working tree from a snapshot
    Restore {
        /// Snapshot id
        id: String,
    },

    /// Show the current head marker
    Head,
}

/// Task subcommands
#[derive(Subcommand)]
pub enum TaskCommand {
    /// Submit a task to the durable queue
    Submit {
        /// Task type (e.g. plan, classify)
        #[arg(value_name = "TYPE")]
        task_type: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },

    /// Show a task's current status
    Status {
        /// Task id
        id: String,
    },

    /// List recent tasks
    List {
        /// Number of tasks to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Cancel a task that has not started
    Cancel {
        /// Task id
        id: String,
    },

    /// Show a task's log
    Logs {
        /// Task id
        id: String,

        /// Only entries after this Unix-millisecond timestamp
        #[arg(long)]
        after: Option<i64>,
    },
}

/// Output format for list commands
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
