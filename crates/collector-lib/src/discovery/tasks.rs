//! Endpoint derivation from scheduler tasks
//!
//! A task exposes metrics either through labelled ports (every port carrying
//! the format label) or through task labels that select one port by index
//! or by name.

use crate::error::{CollectorError, Result};
use crate::models::{ScrapeTarget, TaskPort, CONTAINER_ID_TAG};
use crate::scheduler::types::{GetTasks, Task};
use tracing::warn;
use url::Url;

pub const FORMAT_LABEL: &str = "DCOS_METRICS_FORMAT";
pub const ENDPOINT_LABEL: &str = "DCOS_METRICS_ENDPOINT";
pub const PORT_INDEX_LABEL: &str = "DCOS_METRICS_PORT_INDEX";
pub const PORT_NAME_LABEL: &str = "DCOS_METRICS_PORT_NAME";
pub const NETWORK_SCOPE_LABEL: &str = "network-scope";

pub const DEFAULT_ROUTE: &str = "/metrics";

/// Derives scrape targets from launched tasks
#[derive(Debug, Clone)]
pub struct TaskEndpoints {
    node_hostname: String,
    target_format: String,
}

impl TaskEndpoints {
    pub fn new(node_hostname: impl Into<String>, target_format: impl Into<String>) -> Self {
        Self {
            node_hostname: node_hostname.into(),
            target_format: target_format.into(),
        }
    }

    /// Targets for every launched task; per-endpoint failures are logged
    pub fn targets(&self, tasks: &GetTasks) -> Vec<ScrapeTarget> {
        let mut targets = Vec::new();

        for task in &tasks.launched_tasks {
            let container_id = task.container_id();
            let mut urls = self.port_label_endpoints(task);

            match self.task_label_endpoint(task) {
                Ok(Some(url)) => urls.push(url),
                Ok(None) => {}
                Err(e) => warn!(task_id = %task.id(), error = %e, "Skipping task label endpoint"),
            }

            for url in urls {
                let mut target = ScrapeTarget::direct(url);
                if let Some(cid) = &container_id {
                    target = target.with_tag(CONTAINER_ID_TAG, cid.clone());
                }
                targets.push(target);
            }
        }

        targets
    }

    /// One endpoint per port labelled with the target format
    pub fn port_label_endpoints(&self, task: &Task) -> Vec<Url> {
        task.ports()
            .iter()
            .filter(|port| port.labels.get(FORMAT_LABEL) == Some(&self.target_format))
            .filter_map(|port| {
                let route = port.labels.get(ENDPOINT_LABEL).map(String::as_str);
                match self.endpoint(task, port, route) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(task_id = %task.id(), port = port.number, error = %e, "Skipping port endpoint");
                        None
                    }
                }
            })
            .collect()
    }

    /// Endpoint selected by the task's port index or port name label
    ///
    /// The index label takes priority. A malformed or out of range index is
    /// an error and the name label is not consulted.
    pub fn task_label_endpoint(&self, task: &Task) -> Result<Option<Url>> {
        let labels = task.label_map();
        if labels.get(FORMAT_LABEL) != Some(&self.target_format) {
            return Ok(None);
        }

        let port_index = labels.get(PORT_INDEX_LABEL).filter(|v| !v.is_empty());
        let port_name = labels.get(PORT_NAME_LABEL).filter(|v| !v.is_empty());
        let ports = task.ports();

        let port = match (port_index, port_name) {
            (None, None) => return Ok(None),
            (Some(index), _) => {
                let index: usize = index.parse().map_err(|e| {
                    CollectorError::Discovery(format!(
                        "could not parse port index {:?} for task {}: {}",
                        index,
                        task.id(),
                        e
                    ))
                })?;
                ports.get(index).ok_or_else(|| {
                    CollectorError::Discovery(format!(
                        "port index {} out of range for task {} ({} ports)",
                        index,
                        task.id(),
                        ports.len()
                    ))
                })?
            }
            (None, Some(name)) => ports
                .iter()
                .find(|p| p.name.as_ref() == Some(name))
                .ok_or_else(|| {
                    CollectorError::Discovery(format!(
                        "could not match port name {} for task {}",
                        name,
                        task.id()
                    ))
                })?,
        };

        let route = labels.get(ENDPOINT_LABEL).map(String::as_str);
        self.endpoint(task, port, route).map(Some)
    }

    fn endpoint(&self, task: &Task, port: &TaskPort, route: Option<&str>) -> Result<Url> {
        let host = self.hostname_for_port(task, port)?;
        let route = match route.filter(|r| !r.is_empty()) {
            Some(r) if r.starts_with('/') => r.to_string(),
            Some(r) => format!("/{}", r),
            None => DEFAULT_ROUTE.to_string(),
        };

        let raw = format!("http://{}:{}{}", host, port.number, route);
        Url::parse(&raw)
            .map_err(|e| CollectorError::Discovery(format!("invalid endpoint {}: {}", raw, e)))
    }

    /// Node hostname for host-scoped ports, the task's own IP otherwise
    fn hostname_for_port(&self, task: &Task, port: &TaskPort) -> Result<String> {
        if is_host_port(port, task) {
            return Ok(self.node_hostname.clone());
        }

        match task.ip_address() {
            Some(ip) if ip.contains(':') && !ip.starts_with('[') => Ok(format!("[{}]", ip)),
            Some(ip) if !ip.is_empty() => Ok(ip),
            _ => Err(CollectorError::Discovery(format!(
                "could not retrieve IP address for task {}",
                task.id()
            ))),
        }
    }
}

/// Whether a port is reachable through the node's network namespace
///
/// An explicit network scope label decides on its own. Without one the port
/// is host-scoped when it falls in the task's port resources or appears as
/// a host port in any status, container or docker port mapping.
pub fn is_host_port(port: &TaskPort, task: &Task) -> bool {
    if let Some(scope) = port.labels.get(NETWORK_SCOPE_LABEL) {
        return scope == "host";
    }

    let number = u64::from(port.number);
    let in_resources = task
        .resources
        .iter()
        .filter(|r| r.name == "ports")
        .any(|r| {
            let in_range = r
                .ranges
                .as_ref()
                .map(|ranges| ranges.range.iter().any(|rg| rg.begin <= number && number <= rg.end))
                .unwrap_or(false);
            let scalar = r
                .scalar
                .as_ref()
                .map(|s| s.value == f64::from(port.number))
                .unwrap_or(false);
            in_range || scalar
        });
    if in_resources {
        return true;
    }

    let in_status_mappings = task
        .statuses
        .iter()
        .filter_map(|s| s.container_status.as_ref())
        .flat_map(|cs| cs.network_infos.iter())
        .flat_map(|ni| ni.port_mappings.iter())
        .any(|pm| pm.host_port == port.number);
    if in_status_mappings {
        return true;
    }

    task.container
        .as_ref()
        .map(|c| {
            let network = c
                .network_infos
                .iter()
                .flat_map(|ni| ni.port_mappings.iter())
                .any(|pm| pm.host_port == port.number);
            let docker = c
                .docker
                .as_ref()
                .map(|d| d.port_mappings.iter().any(|pm| pm.host_port == port.number))
                .unwrap_or(false);
            network || docker
        })
        .unwrap_or(false)
}
