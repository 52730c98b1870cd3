//! Metrics collector control CLI
//!
//! Talks to the collector's HTTP control API to inspect health and to
//! manage sidecar container registrations.

pub mod cli;
pub mod client;
pub mod commands;
pub mod output;

use anyhow::Result;

use cli::{Cli, Commands, ContainerCommands};
use commands::{containers, health};

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let client = client::ApiClient::new(&cli.url)?;

    match cli.command {
        Commands::Health => health::show_health(&client, cli.output).await?,
        Commands::Containers(cmd) => match cmd {
            ContainerCommands::List => containers::list_containers(&client, cli.output).await?,
            ContainerCommands::Get { id } => containers::get_container(&client, &id, cli.output).await?,
            ContainerCommands::Add { id, host, port } => {
                containers::add_container(&client, &id, host, port, cli.output).await?
            }
            ContainerCommands::Remove { id } => containers::remove_container(&client, &id, cli.output).await?,
        },
    }

    Ok(())
}
