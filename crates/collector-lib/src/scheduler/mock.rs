//! In-process scheduler used by unit tests

use super::client::SchedulerApi;
use super::types::{GetState, GetTasks};
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Serves a fixed state; `None` makes every call fail
#[derive(Default)]
pub(crate) struct MockScheduler {
    state: Mutex<Option<GetState>>,
    snapshot: Mutex<BTreeMap<String, f64>>,
    delay: Option<Duration>,
    pub(crate) state_calls: AtomicUsize,
    pub(crate) task_calls: AtomicUsize,
}

impl MockScheduler {
    pub(crate) fn with_state(state: GetState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Default::default()
        }
    }

    pub(crate) fn with_tasks(tasks: GetTasks) -> Self {
        Self::with_state(GetState {
            get_tasks: Some(tasks),
            ..Default::default()
        })
    }

    pub(crate) fn failing() -> Self {
        Self::default()
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn set_state(&self, state: Option<GetState>) {
        *self.state.lock().unwrap() = state;
    }

    pub(crate) fn set_snapshot(&self, snapshot: BTreeMap<String, f64>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn current(&self) -> Result<GetState> {
        self.state.lock().unwrap().clone().ok_or(CollectorError::Protocol {
            expected: "GET_STATE".to_string(),
            actual: "UNKNOWN".to_string(),
        })
    }
}

#[async_trait]
impl SchedulerApi for MockScheduler {
    async fn get_tasks(&self, _timeout: Duration) -> Result<GetTasks> {
        self.task_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.current()?
            .get_tasks
            .ok_or(CollectorError::EmptyResult("GET_TASKS"))
    }

    async fn get_state(&self, _timeout: Duration) -> Result<GetState> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.current()
    }

    async fn metrics_snapshot(&self, _timeout: Duration) -> Result<BTreeMap<String, f64>> {
        Ok(self.snapshot.lock().unwrap().clone())
    }
}
