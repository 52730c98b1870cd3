//! Concurrent scraping of resolved targets
//!
//! Every target of a cycle is fetched on its own task; the cycle waits for
//! all of them. A failing target contributes an error and never blocks or
//! aborts the others. Dropping the cycle aborts every outstanding fetch.
//! Records carry `url`, `address` and the target's extra tags as
//! provenance. Statsd records name their listener as `statsd://host:port`.

pub mod fetch;
pub mod parser;

pub use fetch::{http_client, strip_user_info, FetchConfig, Fetcher, TlsConfig};
pub use parser::{ExpositionParser, ParseError, TextParser, TEXT_FORMAT};

use crate::discovery::STATSD_SCHEME;
use crate::error::{CollectorError, Result};
use crate::models::{MetricRecord, ScrapeTarget, CONTAINER_ID_TAG};
use crate::observability::CollectorMetrics;
use crate::registry::ContainerRegistry;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const URL_TAG: &str = "url";
pub const ADDRESS_TAG: &str = "address";

/// Records and per-target errors of one cycle
#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub records: Vec<MetricRecord>,
    pub errors: Vec<CollectorError>,
    pub targets: usize,
}

#[derive(Clone)]
pub struct Scraper {
    fetcher: Arc<Fetcher>,
    parser: Arc<dyn ExpositionParser>,
    registry: Option<Arc<ContainerRegistry>>,
    metrics: CollectorMetrics,
}

impl Scraper {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            parser: Arc::new(TextParser),
            registry: None,
            metrics: CollectorMetrics::new(),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ExpositionParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Serve `statsd` targets from this registry's buffers
    pub fn with_registry(mut self, registry: Arc<ContainerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Scrape every target concurrently and wait for all of them
    pub async fn scrape_all(&self, targets: Vec<ScrapeTarget>) -> ScrapeOutcome {
        let mut outcome = ScrapeOutcome {
            targets: targets.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for target in targets {
            let scraper = self.clone();
            tasks.spawn(async move {
                let result = scraper.scrape(&target).await;
                (target, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(records))) => outcome.records.extend(records),
                Ok((target, Err(e))) => {
                    warn!(url = %strip_user_info(&target.url), error = %e, "Scrape failed");
                    self.metrics.inc_scrape_errors();
                    outcome.errors.push(e);
                }
                Err(e) => {
                    warn!(error = %e, "Scrape task did not complete");
                    self.metrics.inc_scrape_errors();
                    outcome
                        .errors
                        .push(CollectorError::transport("scrape task", e));
                }
            }
        }

        debug!(
            targets = outcome.targets,
            records = outcome.records.len(),
            errors = outcome.errors.len(),
            "Scraped all targets"
        );
        outcome
    }

    /// Scrape one target into tagged records
    pub async fn scrape(&self, target: &ScrapeTarget) -> Result<Vec<MetricRecord>> {
        let start = Instant::now();
        let mut records = if target.url.scheme() == STATSD_SCHEME {
            self.drain_statsd(target)?
        } else {
            let body = self.fetcher.fetch(&target.url).await?;
            self.parser
                .parse(&body, Utc::now())
                .map_err(|e| CollectorError::parse(strip_user_info(&target.url), e))?
        };
        self.metrics.observe_scrape_latency(start.elapsed().as_secs_f64());

        let url = strip_user_info(&target.original_url);
        for record in &mut records {
            record.tags.insert(URL_TAG.to_string(), url.clone());
            if let Some(address) = &target.address {
                record.tags.insert(ADDRESS_TAG.to_string(), address.clone());
            }
            for (k, v) in &target.tags {
                record.tags.insert(k.clone(), v.clone());
            }
        }

        Ok(records)
    }

    fn drain_statsd(&self, target: &ScrapeTarget) -> Result<Vec<MetricRecord>> {
        let registry = self.registry.as_ref().ok_or_else(|| {
            CollectorError::transport(&target.url, "no container registry configured")
        })?;
        let container_id = target.tags.get(CONTAINER_ID_TAG).ok_or_else(|| {
            CollectorError::transport(&target.url, "statsd target has no container id")
        })?;
        Ok(registry.drain(container_id))
    }
}
