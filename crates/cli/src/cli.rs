//! Command-line arguments

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

/// Metrics collector control CLI
#[derive(Debug, Parser)]
#[command(name = "collectorctl")]
#[command(author, version, about = "CLI for the metrics collector control API", long_about = None)]
pub struct Cli {
    /// Control API URL (can also be set via COLLECTOR_URL env var)
    #[arg(long, global = true, env = "COLLECTOR_URL", default_value = "http://localhost:8125")]
    pub url: String,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show collector health
    Health,

    /// Manage sidecar container registrations
    #[command(subcommand)]
    Containers(ContainerCommands),
}

#[derive(Debug, Subcommand)]
pub enum ContainerCommands {
    /// List registered containers
    List,

    /// Show one registered container
    Get {
        /// Container ID
        id: String,
    },

    /// Register a container and start its statsd listener
    Add {
        /// Container ID
        id: String,

        /// Listener host (collector default if not specified)
        #[arg(long)]
        host: Option<String>,

        /// Listener port (ephemeral if not specified)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Remove a container registration
    Remove {
        /// Container ID
        id: String,
    },
}
