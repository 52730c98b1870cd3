//! Wire types of the scheduler agent's operator API (JSON encoding)
//!
//! Only the fields consumed by discovery and the metadata cache are modelled;
//! everything else in the payload is ignored.

use crate::models::TaskPort;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calls issued against the operator API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    GetTasks,
    GetState,
}

impl CallType {
    /// Response type the agent is expected to answer with
    pub fn response_type(&self) -> &'static str {
        match self {
            CallType::GetTasks => "GET_TASKS",
            CallType::GetState => "GET_STATE",
        }
    }
}

/// Non-streaming call body
#[derive(Debug, Clone, Serialize)]
pub struct AgentCall {
    #[serde(rename = "type")]
    pub call_type: CallType,
}

/// Decoded operator API response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub get_tasks: Option<GetTasks>,
    pub get_state: Option<GetState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Id {
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    pub labels: Vec<Label>,
}

impl Labels {
    /// Flatten into a map; later duplicates win
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .map(|l| (l.key.clone(), l.value.clone().unwrap_or_default()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ranges {
    pub range: Vec<Range>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scalar {
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    pub name: String,
    pub ranges: Option<Ranges>,
    pub scalar: Option<Scalar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortMapping {
    pub host_port: u32,
    pub container_port: u32,
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpAddress {
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    pub ip_addresses: Vec<IpAddress>,
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerId {
    pub value: String,
    pub parent: Option<Box<ContainerId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerStatus {
    pub container_id: Option<ContainerId>,
    pub network_infos: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStatus {
    pub state: Option<String>,
    pub container_status: Option<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    pub number: u32,
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub labels: Option<Labels>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ports {
    pub ports: Vec<Port>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryInfo {
    pub name: Option<String>,
    pub ports: Option<Ports>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerInfo {
    pub port_mappings: Vec<PortMapping>,
}

/// Container specification a task was launched with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContainer {
    pub network_infos: Vec<NetworkInfo>,
    pub docker: Option<DockerInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub name: String,
    pub task_id: Id,
    pub framework_id: Id,
    pub executor_id: Option<Id>,
    pub state: Option<String>,
    pub resources: Vec<Resource>,
    /// Chronological; the last status is the latest
    pub statuses: Vec<TaskStatus>,
    pub labels: Option<Labels>,
    pub discovery: Option<DiscoveryInfo>,
    pub container: Option<TaskContainer>,
}

impl Task {
    pub fn id(&self) -> &str {
        &self.task_id.value
    }

    pub fn label_map(&self) -> BTreeMap<String, String> {
        self.labels.as_ref().map(Labels::to_map).unwrap_or_default()
    }

    /// Ports declared in the task's discovery info, in declaration order
    pub fn ports(&self) -> Vec<TaskPort> {
        self.discovery
            .as_ref()
            .and_then(|d| d.ports.as_ref())
            .map(|p| {
                p.ports
                    .iter()
                    .map(|port| TaskPort {
                        number: port.number,
                        name: port.name.clone(),
                        labels: port.labels.as_ref().map(Labels::to_map).unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Container identity of the task
    ///
    /// The first status carrying a container id is used. For nested
    /// containers the parent id is returned, otherwise the direct id.
    pub fn container_id(&self) -> Option<String> {
        self.statuses
            .iter()
            .filter_map(|s| s.container_status.as_ref())
            .find_map(|cs| cs.container_id.as_ref())
            .map(|cid| match &cid.parent {
                Some(parent) => parent.value.clone(),
                None => cid.value.clone(),
            })
            .filter(|cid| !cid.is_empty())
    }

    /// First IP address of the latest status
    pub fn ip_address(&self) -> Option<String> {
        self.statuses
            .last()?
            .container_status
            .as_ref()?
            .network_infos
            .first()?
            .ip_addresses
            .first()?
            .ip_address
            .clone()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTasks {
    pub launched_tasks: Vec<Task>,
    pub queued_tasks: Vec<Task>,
    pub terminated_tasks: Vec<Task>,
    pub completed_tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkInfo {
    pub id: Option<Id>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Framework {
    pub framework_info: FrameworkInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFrameworks {
    pub frameworks: Vec<Framework>,
    pub completed_frameworks: Vec<Framework>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorInfo {
    pub executor_id: Id,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Executor {
    pub executor_info: ExecutorInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetExecutors {
    pub executors: Vec<Executor>,
    pub completed_executors: Vec<Executor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetState {
    pub get_tasks: Option<GetTasks>,
    pub get_executors: Option<GetExecutors>,
    pub get_frameworks: Option<GetFrameworks>,
}
