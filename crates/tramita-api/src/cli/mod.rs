//! CLI command definitions and dispatch for the `tramita` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a verb-noun
//! pattern (e.g., `tramita definition load`, `tramita stats`).

pub mod definition;
pub mod stats;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Manage municipal case workflows.
#[derive(Parser)]
#[command(name = "tramita", version, about, long_about = None)]
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
    /// Manage workflow definitions (load, list, show, activate, deactivate).
    #[command(alias = "def")]
    Definition {
        #[command(subcommand)]
        action: DefinitionCommand,
    },

    /// Show case statistics for a workflow definition.
    Stats {
        /// Definition ID.
        id: uuid::Uuid,

        /// Only count instances created at or after this RFC 3339 timestamp.
        #[arg(long)]
        from: Option<String>,

        /// Only count instances created at or before this RFC 3339 timestamp.
        #[arg(long)]
        to: Option<String>,
    },

    /// List stale instances of a workflow definition.
    Stale {
        /// Definition ID.
        id: uuid::Uuid,

        /// Inactivity threshold in minutes (defaults to the configured value).
        #[arg(long)]
        threshold: Option<i64>,
    },

    /// Start the REST API server.
    Serve {
        /// Address to bind to (overrides `bind_addr` from config.toml).
        #[arg(long)]
        bind: Option<String>,

        /// Export spans to stdout via OpenTelemetry.
        #[arg(long)]
        otel: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DefinitionCommand {
    /// Load a workflow definition from a JSON file.
    Load {
        /// Path to the definition JSON file.
        file: std::path::PathBuf,

        /// Mark the definition active immediately.
        #[arg(long)]
        activate: bool,
    },

    /// List all workflow definitions.
    #[command(alias = "ls")]
    List,

    /// Show a single definition with its stage graph.
    Show {
        /// Definition ID.
        id: uuid::Uuid,
    },

    /// Mark a definition active.
    Activate {
        /// Definition ID.
        id: uuid::Uuid,
    },

    /// Mark a definition inactive.
    Deactivate {
        /// Definition ID.
        id: uuid::Uuid,
    },
}
