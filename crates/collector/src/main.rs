//! Metrics collector - scrape target discovery and metric normalization
//!
//! Runs on each cluster agent node, scraping exposition endpoints found
//! through static configuration, DNS, the sidecar registry and the
//! scheduler, and writing the enriched records to stdout as JSON lines.

use anyhow::{Context, Result};
use collector_lib::{
    discovery::{TargetResolver, TaskEndpoints},
    metadata::MetadataCache,
    processors::ProcessorChain,
    registry::ContainerRegistry,
    scheduler::{node_hostname, SchedulerApi, SchedulerClient},
    scrape::{http_client, Fetcher, Scraper},
    Collected, CollectionLoopBuilder, CollectorContext, CollectorHealth, StructuredLogger,
};
use metrics_collector::{api, config::CollectorConfig};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the records
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting metrics-collector");

    let config = CollectorConfig::load()?;
    config.validate().context("invalid configuration")?;
    info!(node_name = %config.node_name, "Collector configured");

    let logger = StructuredLogger::new(&config.node_name);
    let health = CollectorHealth::new();

    let registry = if config.registry.enabled {
        let registry = Arc::new(ContainerRegistry::new(config.registry_config()).with_logger(logger.clone()));
        let restored = registry.load().await;
        match &restored {
            Ok(count) => info!(containers = *count, "Restored registered containers"),
            Err(e) => warn!(error = %e, "Could not restore registered containers"),
        }
        health.registry_restored(restored.map_err(|e| e.to_string())).await;
        Some(registry)
    } else {
        None
    };

    let fetch_config = config.fetch_config();
    let scheduler = match &config.scheduler.agent_url {
        Some(agent_url) => {
            let http = http_client(&fetch_config).context("failed to build scheduler client")?;
            let client: Arc<dyn SchedulerApi> = Arc::new(SchedulerClient::with_http_client(agent_url, http)?);
            let hostname = node_hostname(agent_url)?;
            Some((client, hostname))
        }
        None => None,
    };

    let mut resolver = TargetResolver::builder()
        .static_urls(&config.scrape.urls)
        .services(&config.scrape.services);
    if let Some((client, hostname)) = &scheduler {
        let endpoints = TaskEndpoints::new(hostname.clone(), config.scheduler.target_format.clone());
        resolver = resolver.scheduler(client.clone(), endpoints, config.scheduler_timeout());
    }
    if let Some(registry) = &registry {
        resolver = resolver.registry(registry.clone());
    }

    let fetcher = Fetcher::new(fetch_config).context("failed to build scrape client")?;
    let mut scraper = Scraper::new(fetcher);
    if let Some(registry) = &registry {
        scraper = scraper.with_registry(registry.clone());
    }

    let mut context = CollectorContext::new(resolver.build(), scraper)
        .with_processors(ProcessorChain::from_config(&config.processors))
        .with_health(health.clone())
        .with_logger(logger.clone());
    if let Some((client, hostname)) = &scheduler {
        if config.metadata.enabled {
            let cache = MetadataCache::new(client.clone(), config.metadata_config()).with_logger(logger.clone());
            context = context.with_metadata(cache);
        }
        if config.scheduler.collect_snapshot {
            let tags = BTreeMap::from([("hostname".to_string(), hostname.clone())]);
            context = context.with_snapshot(client.clone(), config.scheduler_timeout(), tags);
        }
    }
    if let Some(registry) = &registry {
        context = context.with_registry(registry.clone());
    }

    let collection = config.collection_config();
    let (collection_loop, receiver) = CollectionLoopBuilder::new()
        .context(Arc::new(context))
        .interval(collection.interval)
        .jitter(collection.jitter)
        .buffer_size(collection.buffer_size)
        .build()?;

    let output_handle = tokio::spawn(write_records(receiver));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(collection_loop.run(shutdown_rx));

    let app_state = Arc::new(api::AppState::new(health.clone(), registry.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    health.set_running(true).await;
    logger.log_startup(COLLECTOR_VERSION, config.collection.interval_secs);

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health.set_running(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Collection loop ended abnormally");
    }
    // The loop owned the last sender, so the writer drains and exits
    if let Err(e) = output_handle.await {
        warn!(error = %e, "Record writer ended abnormally");
    }

    if let Some(registry) = &registry {
        registry.shutdown().await;
    }
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}

/// Print every record as one JSON line on stdout
async fn write_records(mut receiver: mpsc::Receiver<Collected>) {
    let stdout = std::io::stdout();
    while let Some(collected) = receiver.recv().await {
        match collected {
            Collected::Record(record) => match serde_json::to_string(&record) {
                Ok(line) => {
                    let mut out = stdout.lock();
                    if let Err(e) = writeln!(out, "{}", line) {
                        warn!(error = %e, "Could not write record");
                    }
                }
                Err(e) => warn!(metric = %record.name, error = %e, "Could not serialize record"),
            },
            Collected::Error(e) => warn!(error = %e, "Collection error"),
        }
    }
}
