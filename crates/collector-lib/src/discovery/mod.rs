//! Scrape target resolution
//!
//! Each collection cycle merges four sources into one de-duplicated target
//! set: static URLs, DNS-resolved service templates, containers registered
//! locally, and endpoints discovered from scheduler tasks. Sources are
//! merged in that order and a later source replaces an earlier one on the
//! same resolved URL. The result is ordered by URL.
//!
//! Failures of a single source are logged and never abort resolution. When
//! the scheduler cannot be queried the targets of its last successful answer
//! are reused.

pub mod dns;
pub mod tasks;

pub use dns::{HostResolver, SystemResolver};
pub use tasks::TaskEndpoints;

use crate::error::CollectorError;
use crate::models::{ScrapeTarget, CONTAINER_ID_TAG};
use crate::observability::CollectorMetrics;
use crate::registry::ContainerRegistry;
use crate::scheduler::SchedulerApi;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use url::Url;

/// Scheme of targets served from a registered container's statsd buffer
pub const STATSD_SCHEME: &str = "statsd";

/// Path used when an http(s) URL does not name one
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Apply the default metrics path to http(s) URLs with an empty path
pub fn with_default_path(mut url: Url) -> Url {
    let is_http = matches!(url.scheme(), "http" | "https");
    if is_http && (url.path().is_empty() || url.path() == "/") {
        url.set_path(DEFAULT_METRICS_PATH);
    }
    url
}

/// Outcome of one resolution pass
#[derive(Debug, Default)]
pub struct Resolution {
    pub targets: Vec<ScrapeTarget>,
    /// Service lookups that failed; those services were skipped
    pub failures: Vec<CollectorError>,
    /// Task discovery result, `None` without a scheduler source
    pub scheduler: Option<std::result::Result<(), CollectorError>>,
}

struct SchedulerSource {
    api: Arc<dyn SchedulerApi>,
    endpoints: TaskEndpoints,
    timeout: Duration,
}

pub struct TargetResolver {
    static_urls: Vec<Url>,
    services: Vec<Url>,
    dns: Arc<dyn HostResolver>,
    scheduler: Option<SchedulerSource>,
    registry: Option<Arc<ContainerRegistry>>,
    last_scheduler_targets: RwLock<Vec<ScrapeTarget>>,
    metrics: CollectorMetrics,
}

impl TargetResolver {
    pub fn builder() -> TargetResolverBuilder {
        TargetResolverBuilder::default()
    }

    /// Resolve the full target set for one cycle
    pub async fn resolve(&self) -> Resolution {
        let mut merged: BTreeMap<String, ScrapeTarget> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut scheduler = None;

        for url in &self.static_urls {
            let target = ScrapeTarget::direct(url.clone());
            merged.insert(target.key().to_string(), target);
        }

        let lookups = self
            .services
            .iter()
            .map(|template| dns::resolve_service(self.dns.as_ref(), template));
        let resolved = join_all(lookups).await;
        for (template, result) in self.services.iter().zip(resolved) {
            match result {
                Ok(targets) => {
                    for target in targets {
                        merged.insert(target.key().to_string(), target);
                    }
                }
                Err(e) => {
                    warn!(service = %template, error = %e, "Could not resolve service, skipping it");
                    failures.push(e);
                }
            }
        }

        if let Some(registry) = &self.registry {
            for target in registry_targets(registry) {
                merged.insert(target.key().to_string(), target);
            }
        }

        if let Some(source) = &self.scheduler {
            let targets = match source.api.get_tasks(source.timeout).await {
                Ok(tasks) => {
                    let targets = source.endpoints.targets(&tasks);
                    *self.last_scheduler_targets.write().await = targets.clone();
                    scheduler = Some(Ok(()));
                    targets
                }
                Err(e) => {
                    error!(error = %e, "Scheduler task discovery failed, reusing previous targets");
                    scheduler = Some(Err(e));
                    self.last_scheduler_targets.read().await.clone()
                }
            };
            for target in targets {
                merged.insert(target.key().to_string(), target);
            }
        }

        let targets: Vec<ScrapeTarget> = merged.into_values().collect();
        self.metrics.set_targets_discovered(targets.len() as i64);
        debug!(targets = targets.len(), failures = failures.len(), "Resolved scrape targets");

        Resolution {
            targets,
            failures,
            scheduler,
        }
    }
}

/// One statsd target per registered container
fn registry_targets(registry: &ContainerRegistry) -> Vec<ScrapeTarget> {
    registry
        .list()
        .into_iter()
        .filter_map(|ctr| {
            let raw = format!("{}://{}:{}", STATSD_SCHEME, ctr.statsd_host, ctr.statsd_port);
            match Url::parse(&raw) {
                Ok(url) => Some(ScrapeTarget::direct(url).with_tag(CONTAINER_ID_TAG, ctr.container_id)),
                Err(e) => {
                    warn!(container_id = %ctr.container_id, error = %e, "Invalid registered container address");
                    None
                }
            }
        })
        .collect()
}

/// Builder for [`TargetResolver`]
pub struct TargetResolverBuilder {
    static_urls: Vec<Url>,
    services: Vec<Url>,
    dns: Arc<dyn HostResolver>,
    scheduler: Option<SchedulerSource>,
    registry: Option<Arc<ContainerRegistry>>,
}

impl Default for TargetResolverBuilder {
    fn default() -> Self {
        Self {
            static_urls: Vec::new(),
            services: Vec::new(),
            dns: Arc::new(SystemResolver),
            scheduler: None,
            registry: None,
        }
    }
}

impl TargetResolverBuilder {
    /// Static endpoints; malformed entries are logged and skipped
    pub fn static_urls<S: AsRef<str>>(mut self, urls: &[S]) -> Self {
        self.static_urls = parse_urls(urls, "url");
        self
    }

    /// DNS service templates; malformed entries are logged and skipped
    pub fn services<S: AsRef<str>>(mut self, services: &[S]) -> Self {
        self.services = parse_urls(services, "service");
        self
    }

    pub fn dns_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.dns = resolver;
        self
    }

    pub fn scheduler(mut self, api: Arc<dyn SchedulerApi>, endpoints: TaskEndpoints, timeout: Duration) -> Self {
        self.scheduler = Some(SchedulerSource {
            api,
            endpoints,
            timeout,
        });
        self
    }

    pub fn registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> TargetResolver {
        TargetResolver {
            static_urls: self.static_urls,
            services: self.services,
            dns: self.dns,
            scheduler: self.scheduler,
            registry: self.registry,
            last_scheduler_targets: RwLock::new(Vec::new()),
            metrics: CollectorMetrics::new(),
        }
    }
}

fn parse_urls<S: AsRef<str>>(raw: &[S], kind: &str) -> Vec<Url> {
    raw.iter()
        .filter_map(|s| match Url::parse(s.as_ref()) {
            Ok(url) => Some(with_default_path(url)),
            Err(e) => {
                warn!(kind = kind, url = %s.as_ref(), error = %e, "Could not parse URL, skipping it");
                None
            }
        })
        .collect()
}
