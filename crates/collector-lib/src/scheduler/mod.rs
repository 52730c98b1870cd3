//! Scheduler agent query client
//!
//! Wraps the agent's operator API (`GET_TASKS`, `GET_STATE`) and its metrics
//! snapshot endpoint. Discovery and the metadata cache depend only on the
//! [`SchedulerApi`] trait.

mod client;
pub mod recordio;
pub mod snapshot;
pub mod types;

pub use client::{node_hostname, SchedulerApi, SchedulerClient};
pub use snapshot::{decode_framework_name, snapshot_records};
pub use types::{GetState, GetTasks, Task};

#[cfg(test)]
pub(crate) mod mock;
