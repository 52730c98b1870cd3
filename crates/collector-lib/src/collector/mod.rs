//! Collection cycle orchestration
//!
//! [`CollectorContext`] owns every collaborator of a cycle and is built once
//! at startup. One cycle resolves targets, scrapes them, optionally adds the
//! scheduler's own metrics snapshot, enriches records with cached metadata,
//! runs the processors and hands the result to an [`Accumulator`].

mod r#loop;

pub use r#loop::{CollectionConfig, CollectionLoop, CollectionLoopBuilder};

use crate::accumulator::{emit, Accumulator};
use crate::discovery::TargetResolver;
use crate::health::CollectorHealth;
use crate::metadata::{MetadataCache, RefreshHandle};
use crate::models::MetricRecord;
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::processors::ProcessorChain;
use crate::registry::ContainerRegistry;
use crate::scheduler::{snapshot_records, SchedulerApi};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Scheduler metrics snapshot settings
struct SnapshotSource {
    api: Arc<dyn SchedulerApi>,
    timeout: Duration,
    tags: BTreeMap<String, String>,
}

/// Summary of one collection cycle
#[derive(Debug)]
pub struct CycleReport {
    pub targets: usize,
    pub records: usize,
    pub errors: usize,
    pub duration: Duration,
    /// Background metadata refresh started by this cycle
    pub refresh: Option<RefreshHandle>,
}

pub struct CollectorContext {
    resolver: TargetResolver,
    scraper: crate::scrape::Scraper,
    metadata: Option<MetadataCache>,
    snapshot: Option<SnapshotSource>,
    registry: Option<Arc<ContainerRegistry>>,
    processors: ProcessorChain,
    health: CollectorHealth,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
}

impl CollectorContext {
    pub fn new(resolver: TargetResolver, scraper: crate::scrape::Scraper) -> Self {
        Self {
            resolver,
            scraper,
            metadata: None,
            snapshot: None,
            registry: None,
            processors: ProcessorChain::new(),
            health: CollectorHealth::new(),
            metrics: CollectorMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_metadata(mut self, cache: MetadataCache) -> Self {
        self.metadata = Some(cache);
        self
    }

    /// Emit the scheduler's metrics snapshot every cycle, tagged with `tags`
    pub fn with_snapshot(
        mut self,
        api: Arc<dyn SchedulerApi>,
        timeout: Duration,
        tags: BTreeMap<String, String>,
    ) -> Self {
        self.snapshot = Some(SnapshotSource { api, timeout, tags });
        self
    }

    pub fn with_registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_processors(mut self, processors: ProcessorChain) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_health(mut self, health: CollectorHealth) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> Option<&Arc<ContainerRegistry>> {
        self.registry.as_ref()
    }

    pub fn metadata(&self) -> Option<&MetadataCache> {
        self.metadata.as_ref()
    }

    pub fn health(&self) -> &CollectorHealth {
        &self.health
    }

    /// Run one full cycle and hand every record and error to `acc`
    pub async fn collect(&self, acc: &dyn Accumulator) -> CycleReport {
        let start = Instant::now();

        let resolution = self.resolver.resolve().await;
        let failed_lookups = resolution.failures.len();
        let mut scheduler_called = false;
        let mut scheduler_failure = None;
        if let Some(result) = resolution.scheduler {
            scheduler_called = true;
            if let Err(e) = result {
                scheduler_failure = Some(format!("task discovery failed: {}", e));
            }
        }

        let outcome = self.scraper.scrape_all(resolution.targets).await;
        self.health
            .cycle_finished(outcome.targets, outcome.errors.len(), failed_lookups)
            .await;

        let mut records = outcome.records;
        let mut errors = outcome.errors;

        if let Some(source) = &self.snapshot {
            scheduler_called = true;
            match source.api.metrics_snapshot(source.timeout).await {
                Ok(snapshot) => records.extend(snapshot_records(&snapshot, &source.tags, Utc::now())),
                Err(e) => {
                    warn!(error = %e, "Could not fetch scheduler metrics snapshot");
                    scheduler_failure.get_or_insert_with(|| format!("metrics snapshot failed: {}", e));
                    errors.push(e);
                }
            }
        }
        if scheduler_called {
            self.health.scheduler_calls(scheduler_failure).await;
        }

        let refresh = match &self.metadata {
            Some(cache) => cache.apply(&mut records).await,
            None => None,
        };

        let records: Vec<MetricRecord> = self.processors.apply(records);

        let record_count = records.len();
        let error_count = errors.len();
        for record in records {
            emit(acc, record).await;
        }
        for error in errors {
            acc.add_error(error).await;
        }

        let duration = start.elapsed();
        self.metrics.add_records_emitted(record_count as u64);
        self.metrics.observe_cycle_duration(duration.as_secs_f64());
        self.logger
            .log_cycle_complete(outcome.targets, record_count, error_count, duration.as_millis() as u64);

        CycleReport {
            targets: outcome.targets,
            records: record_count,
            errors: error_count,
            duration,
            refresh,
        }
    }
}
