//! Workload metadata cache
//!
//! Maps container ids to task, executor and framework names plus a filtered
//! set of task labels, and uses it to enrich records after scraping. The
//! map is rebuilt from the scheduler's full state and swapped in whole.
//!
//! Records whose container is not cached are left untouched and schedule a
//! background refresh. Refreshes go through a [`RefreshGate`] so at most one
//! runs at a time, followed by a cooldown during which triggers are dropped.

mod gate;

pub use gate::{GatePermit, RefreshGate};

use crate::error::{CollectorError, Result};
use crate::models::{ContainerInfo, MetricRecord};
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::scheduler::{GetState, SchedulerApi};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const SERVICE_NAME_TAG: &str = "service_name";
pub const EXECUTOR_NAME_TAG: &str = "executor_name";
pub const TASK_NAME_TAG: &str = "task_name";

#[derive(Debug, Clone)]
pub struct MetadataConfig {
    /// Deadline of one state query
    pub timeout: Duration,
    /// Minimum period between two state queries
    pub rate_limit: Duration,
    /// Task label prefixes that carry metadata; stripped from the tag key
    pub label_prefixes: Vec<String>,
    /// Exact task label names kept as tags
    pub label_allowlist: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            rate_limit: Duration::from_secs(5),
            label_prefixes: vec!["DCOS_METRICS_".to_string()],
            label_allowlist: vec!["DCOS_SERVICE_NAME".to_string()],
        }
    }
}

/// Completion signal of a background refresh
#[derive(Debug)]
pub struct RefreshHandle {
    handle: JoinHandle<Result<usize>>,
}

impl RefreshHandle {
    /// Wait for the refresh; yields the number of cached containers
    pub async fn wait(self) -> Result<usize> {
        self.handle.await.map_err(|e| {
            CollectorError::Discovery(format!("metadata refresh task failed: {}", e))
        })?
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[derive(Clone)]
pub struct MetadataCache {
    containers: Arc<RwLock<HashMap<String, ContainerInfo>>>,
    api: Arc<dyn SchedulerApi>,
    gate: RefreshGate,
    config: Arc<MetadataConfig>,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
}

impl MetadataCache {
    pub fn new(api: Arc<dyn SchedulerApi>, config: MetadataConfig) -> Self {
        Self {
            containers: Arc::new(RwLock::new(HashMap::new())),
            api,
            gate: RefreshGate::new(config.rate_limit),
            config: Arc::new(config),
            metrics: CollectorMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn get(&self, container_id: &str) -> Option<ContainerInfo> {
        self.containers.read().await.get(container_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.containers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.containers.read().await.is_empty()
    }

    /// Add cached metadata to every record with a known container id
    ///
    /// Returns the container ids that were not found in the cache.
    pub async fn enrich(&self, records: &mut [MetricRecord]) -> BTreeSet<String> {
        let containers = self.containers.read().await;
        let mut unknown = BTreeSet::new();

        for record in records.iter_mut() {
            let Some(cid) = record.container_id().map(str::to_owned) else {
                continue;
            };
            match containers.get(&cid) {
                Some(info) => enrich_record(record, info),
                None => {
                    unknown.insert(cid);
                }
            }
        }

        unknown
    }

    /// Enrich records and schedule a refresh when unknown containers showed up
    ///
    /// Never waits for the refresh; the returned handle, if any, can be
    /// awaited to observe its completion.
    pub async fn apply(&self, records: &mut [MetricRecord]) -> Option<RefreshHandle> {
        let unknown = self.enrich(records).await;
        if unknown.is_empty() {
            return None;
        }
        self.trigger_refresh(unknown)
    }

    /// Start a background refresh unless one is running or cooling down
    pub fn trigger_refresh(&self, unknown: BTreeSet<String>) -> Option<RefreshHandle> {
        let Some(permit) = self.gate.try_acquire() else {
            debug!(unknown = unknown.len(), "Metadata refresh rate limited");
            return None;
        };

        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            for cid in &unknown {
                info!(container_id = %cid, "Metadata for container was not found in cache");
            }
            cache.refresh().await
        });

        Some(RefreshHandle { handle })
    }

    /// Fetch the scheduler state and replace the cache
    ///
    /// On failure the previous cache is kept.
    pub async fn refresh(&self) -> Result<usize> {
        let state = match self.api.get_state(self.config.timeout).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Failed to fetch scheduler state for metadata");
                self.metrics.inc_metadata_refreshes(false);
                let cached = self.len().await;
                self.logger.log_metadata_refreshed(cached, false);
                return Err(e);
            }
        };

        let fresh = build_container_map(&state, &self.config);
        let count = fresh.len();

        *self.containers.write().await = fresh;

        self.metrics.inc_metadata_refreshes(true);
        self.metrics.set_cached_containers(count as i64);
        self.logger.log_metadata_refreshed(count, true);
        Ok(count)
    }
}

/// Add the container's metadata tags to a record
pub fn enrich_record(record: &mut MetricRecord, info: &ContainerInfo) {
    for (key, value) in &info.task_labels {
        record.tags.insert(key.clone(), value.clone());
    }
    record
        .tags
        .insert(SERVICE_NAME_TAG.to_string(), info.framework_name.clone());
    if !info.executor_name.is_empty() {
        record
            .tags
            .insert(EXECUTOR_NAME_TAG.to_string(), info.executor_name.clone());
    }
    record
        .tags
        .insert(TASK_NAME_TAG.to_string(), info.task_name.clone());
}

/// Build the container map from a full state response
pub fn build_container_map(state: &GetState, config: &MetadataConfig) -> HashMap<String, ContainerInfo> {
    let mut containers = HashMap::new();

    let Some(tasks) = &state.get_tasks else {
        return containers;
    };

    let framework_names: HashMap<&str, &str> = state
        .get_frameworks
        .iter()
        .flat_map(|gf| gf.frameworks.iter())
        .filter_map(|f| {
            let info = &f.framework_info;
            info.id
                .as_ref()
                .map(|id| (id.value.as_str(), info.name.as_str()))
        })
        .collect();

    let executor_names: HashMap<&str, &str> = state
        .get_executors
        .iter()
        .flat_map(|ge| ge.executors.iter())
        .map(|e| {
            let info = &e.executor_info;
            (
                info.executor_id.value.as_str(),
                info.name.as_deref().unwrap_or_default(),
            )
        })
        .collect();

    for task in &tasks.launched_tasks {
        let Some(container_id) = task.container_id() else {
            continue;
        };

        let executor_name = task
            .executor_id
            .as_ref()
            .and_then(|id| executor_names.get(id.value.as_str()))
            .map(|name| name.to_string())
            .unwrap_or_default();
        let framework_name = framework_names
            .get(task.framework_id.value.as_str())
            .map(|name| name.to_string())
            .unwrap_or_default();

        containers.insert(
            container_id.clone(),
            ContainerInfo {
                container_id,
                task_name: task.name.clone(),
                executor_name,
                framework_name,
                task_labels: filter_task_labels(&task.label_map(), config),
            },
        );
    }

    containers
}

/// Keep only metadata-carrying labels, keyed by their lowercased tag name
pub fn filter_task_labels(
    labels: &BTreeMap<String, String>,
    config: &MetadataConfig,
) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter_map(|(key, value)| {
            let tag = config
                .label_prefixes
                .iter()
                .find_map(|prefix| key.strip_prefix(prefix.as_str()).filter(|k| !k.is_empty()))
                .or_else(|| {
                    config
                        .label_allowlist
                        .iter()
                        .find(|name| *name == key)
                        .map(String::as_str)
                })?;
            Some((tag.to_lowercase(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricKind, CONTAINER_ID_TAG};
    use crate::scheduler::mock::MockScheduler;
    use crate::scheduler::types::*;
    use std::sync::atomic::Ordering;

    fn state_with_task(container_id: &str, parent: Option<&str>) -> GetState {
        let task = Task {
            name: "my-task".to_string(),
            task_id: Id {
                value: "my-task.1".to_string(),
            },
            framework_id: Id {
                value: "fw-1".to_string(),
            },
            executor_id: Some(Id {
                value: "exec-1".to_string(),
            }),
            statuses: vec![TaskStatus {
                state: Some("TASK_RUNNING".to_string()),
                container_status: Some(ContainerStatus {
                    container_id: Some(ContainerId {
                        value: container_id.to_string(),
                        parent: parent.map(|p| {
                            Box::new(ContainerId {
                                value: p.to_string(),
                                parent: None,
                            })
                        }),
                    }),
                    network_infos: vec![],
                }),
            }],
            labels: Some(Labels {
                labels: vec![
                    Label {
                        key: "DCOS_METRICS_FOO".to_string(),
                        value: Some("bar".to_string()),
                    },
                    Label {
                        key: "DCOS_SERVICE_NAME".to_string(),
                        value: Some("svc".to_string()),
                    },
                    Label {
                        key: "HAPROXY_GROUP".to_string(),
                        value: Some("external".to_string()),
                    },
                    Label {
                        key: "DCOS_METRICS_".to_string(),
                        value: Some("empty".to_string()),
                    },
                ],
            }),
            ..Default::default()
        };

        GetState {
            get_tasks: Some(GetTasks {
                launched_tasks: vec![task],
                ..Default::default()
            }),
            get_executors: Some(GetExecutors {
                executors: vec![Executor {
                    executor_info: ExecutorInfo {
                        executor_id: Id {
                            value: "exec-1".to_string(),
                        },
                        name: Some("E".to_string()),
                    },
                }],
                ..Default::default()
            }),
            get_frameworks: Some(GetFrameworks {
                frameworks: vec![Framework {
                    framework_info: FrameworkInfo {
                        id: Some(Id {
                            value: "fw-1".to_string(),
                        }),
                        name: "F".to_string(),
                    },
                }],
                ..Default::default()
            }),
        }
    }

    fn record(cid: &str) -> MetricRecord {
        MetricRecord::new("requests", MetricKind::Counter)
            .with_field("counter", 1.0)
            .with_tag(CONTAINER_ID_TAG, cid)
            .with_tag("url", "http://10.0.0.1:9100/metrics")
    }

    fn cache(api: Arc<MockScheduler>, rate_limit: Duration) -> MetadataCache {
        MetadataCache::new(
            api,
            MetadataConfig {
                rate_limit,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_build_container_map() {
        let state = state_with_task("abc123", None);
        let map = build_container_map(&state, &MetadataConfig::default());

        let info = &map["abc123"];
        assert_eq!(info.task_name, "my-task");
        assert_eq!(info.executor_name, "E");
        assert_eq!(info.framework_name, "F");
        assert_eq!(info.task_labels.len(), 2);
        assert_eq!(info.task_labels["foo"], "bar");
        assert_eq!(info.task_labels["dcos_service_name"], "svc");
    }

    #[test]
    fn test_build_uses_parent_container_id() {
        let state = state_with_task("child", Some("parent"));
        let map = build_container_map(&state, &MetadataConfig::default());
        assert!(map.contains_key("parent"));
        assert!(!map.contains_key("child"));
    }

    #[test]
    fn test_missing_executor_gives_empty_name() {
        let mut state = state_with_task("abc123", None);
        if let Some(tasks) = state.get_tasks.as_mut() {
            tasks.launched_tasks[0].executor_id = None;
        }
        let map = build_container_map(&state, &MetadataConfig::default());
        assert_eq!(map["abc123"].executor_name, "");

        let mut rec = record("abc123");
        enrich_record(&mut rec, &map["abc123"]);
        assert!(rec.tag(EXECUTOR_NAME_TAG).is_none());
    }

    #[test]
    fn test_state_without_tasks_is_empty() {
        let map = build_container_map(&GetState::default(), &MetadataConfig::default());
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_then_enrich() {
        let api = Arc::new(MockScheduler::with_state(state_with_task("abc123", None)));
        let cache = cache(api, Duration::from_secs(5));
        assert_eq!(cache.refresh().await.unwrap(), 1);

        let mut records = vec![record("abc123")];
        let unknown = cache.enrich(&mut records).await;

        assert!(unknown.is_empty());
        let tags = &records[0].tags;
        assert_eq!(tags[SERVICE_NAME_TAG], "F");
        assert_eq!(tags[EXECUTOR_NAME_TAG], "E");
        assert_eq!(tags[TASK_NAME_TAG], "my-task");
        assert_eq!(tags["foo"], "bar");
        // Existing tags survive
        assert_eq!(tags[CONTAINER_ID_TAG], "abc123");
        assert_eq!(tags["url"], "http://10.0.0.1:9100/metrics");
    }

    #[tokio::test]
    async fn test_unknown_container_triggers_refresh() {
        let api = Arc::new(MockScheduler::with_state(state_with_task("abc123", None)));
        let cache = cache(api.clone(), Duration::from_secs(60));

        let mut records = vec![record("abc123"), MetricRecord::new("untagged", MetricKind::Gauge)];
        let handle = cache.apply(&mut records).await.expect("refresh scheduled");

        // This cycle is not enriched
        assert!(records[0].tag(SERVICE_NAME_TAG).is_none());
        assert!(records[1].tags.is_empty());

        assert_eq!(handle.wait().await.unwrap(), 1);
        assert_eq!(api.state_calls.load(Ordering::SeqCst), 1);

        // Next cycle is
        let mut next = vec![record("abc123")];
        assert!(cache.apply(&mut next).await.is_none());
        assert_eq!(next[0].tag(SERVICE_NAME_TAG), Some("F"));
    }

    #[tokio::test]
    async fn test_triggers_within_rate_limit_collapse() {
        let api = Arc::new(
            MockScheduler::with_state(state_with_task("abc123", None))
                .delayed(Duration::from_millis(50)),
        );
        let cache = cache(api.clone(), Duration::from_secs(60));

        let unknown: BTreeSet<String> = ["zzz".to_string()].into();
        let first = cache.trigger_refresh(unknown.clone());
        let second = cache.trigger_refresh(unknown.clone());
        assert!(first.is_some());
        assert!(second.is_none());

        first.unwrap().wait().await.unwrap();

        // Completed, but still within the cooldown
        assert!(cache.trigger_refresh(unknown).is_none());
        assert_eq!(api.state_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_cache() {
        let api = Arc::new(MockScheduler::with_state(state_with_task("abc123", None)));
        let cache = cache(api.clone(), Duration::ZERO);
        cache.refresh().await.unwrap();

        api.set_state(None);
        assert!(cache.refresh().await.is_err());
        assert!(cache.get("abc123").await.is_some());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_map() {
        let api = Arc::new(MockScheduler::with_state(state_with_task("abc123", None)));
        let cache = cache(api.clone(), Duration::ZERO);
        cache.refresh().await.unwrap();

        api.set_state(Some(state_with_task("def456", None)));
        cache.refresh().await.unwrap();

        assert!(cache.get("abc123").await.is_none());
        assert!(cache.get("def456").await.is_some());
    }
}
