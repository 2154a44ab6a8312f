//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{Capability, EventType};

/// IntelHub - event-driven intelligence orchestration
#[derive(Parser)]
#[command(
    name = "ih",
    about = "Route events through intelligence modules and aggregate their answers",
    version,
    after_help = "Logs are written to: ~/.local/share/intelhub/logs/intelhub.log"
)]
pub struct Cli {
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
    /// Publish one event to the demo modules and print the aggregated response
    Simulate {
        /// Event type to publish (task_created, message_received, user_activity, ...)
        #[arg(short, long, default_value = "task_created")]
        event: EventType,

        /// Task title or message content carried in the payload
        #[arg(short, long, default_value = "Prepare quarterly report")]
        title: String,

        /// Only modules declaring this capability receive the event
        #[arg(long)]
        capability: Option<Capability>,

        /// User the event is attributed to
        #[arg(short, long, default_value = "demo-user")]
        user: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the demo modules and registry statistics
    Modules {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// Output format for command results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" | "table" => Ok(Self::Text),
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

/// Location of the log file written by the binary
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intelhub")
        .join("logs")
        .join("intelhub.log")
}
