//! Sidecar container registration commands

use anyhow::{bail, Result};
use tabled::Tabled;

use crate::client::{AddContainerRequest, ApiClient, Container};
use crate::output::{print_json, print_success, print_table, print_warning, OutputFormat};

/// Row for containers table
#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    container_id: String,
    #[tabled(rename = "Statsd Host")]
    statsd_host: String,
    #[tabled(rename = "Statsd Port")]
    statsd_port: u16,
}

impl From<Container> for ContainerRow {
    fn from(c: Container) -> Self {
        Self {
            container_id: c.container_id,
            statsd_host: c.statsd_host,
            statsd_port: c.statsd_port,
        }
    }
}

pub async fn list_containers(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let containers = client.list_containers().await?;

    match format {
        OutputFormat::Json => print_json(&containers)?,
        OutputFormat::Table => {
            let total = containers.len();
            let rows: Vec<ContainerRow> = containers.into_iter().map(ContainerRow::from).collect();
            print_table(rows, "No containers registered");
            if total > 0 {
                println!("\nTotal: {} containers", total);
            }
        }
    }

    Ok(())
}

pub async fn get_container(client: &ApiClient, container_id: &str, format: OutputFormat) -> Result<()> {
    let Some(container) = client.get_container(container_id).await? else {
        bail!("container {} is not registered", container_id);
    };

    match format {
        OutputFormat::Json => print_json(&container)?,
        OutputFormat::Table => print_table(vec![ContainerRow::from(container)], ""),
    }

    Ok(())
}

/// Register a container; without a port the collector picks a free one
pub async fn add_container(
    client: &ApiClient,
    container_id: &str,
    host: Option<String>,
    port: Option<u16>,
    format: OutputFormat,
) -> Result<()> {
    let request = AddContainerRequest {
        container_id: container_id.to_string(),
        statsd_host: host,
        statsd_port: port,
    };
    let container = client.add_container(&request).await?;

    match format {
        OutputFormat::Json => print_json(&container)?,
        OutputFormat::Table => {
            if port.is_some_and(|p| p != 0 && p != container.statsd_port) {
                print_warning("Container was already registered with a different port");
            }
            print_success(&format!(
                "Container {} listening on {}:{}",
                container.container_id, container.statsd_host, container.statsd_port
            ));
        }
    }

    Ok(())
}

pub async fn remove_container(client: &ApiClient, container_id: &str, format: OutputFormat) -> Result<()> {
    client.remove_container(container_id).await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "removed": container_id }))?,
        OutputFormat::Table => print_success(&format!("Container {} removed", container_id)),
    }

    Ok(())
}
