//! Periodic collection loop
//!
//! Runs one collection cycle per interval, with jitter, until shutdown is
//! signalled. Records are delivered to an accumulator; by default a
//! channel-backed one whose receiver is handed to the caller.

use super::{CollectorContext, CycleReport};
use crate::accumulator::{Accumulator, ChannelAccumulator, Collected};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Configuration for the collection loop
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// Base collection interval (default: 10 seconds)
    pub interval: Duration,
    /// Maximum jitter added to each interval (default: 1 second)
    pub jitter: Duration,
    /// Channel buffer size for collected records
    pub buffer_size: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
            buffer_size: 10_000,
        }
    }
}

pub struct CollectionLoop {
    context: Arc<CollectorContext>,
    accumulator: Arc<dyn Accumulator>,
    config: CollectionConfig,
}

impl CollectionLoop {
    /// Loop delivering into a new channel accumulator
    pub fn new(context: Arc<CollectorContext>, config: CollectionConfig) -> (Self, mpsc::Receiver<Collected>) {
        let (accumulator, rx) = ChannelAccumulator::new(config.buffer_size);
        (Self::with_accumulator(context, Arc::new(accumulator), config), rx)
    }

    pub fn with_accumulator(
        context: Arc<CollectorContext>,
        accumulator: Arc<dyn Accumulator>,
        config: CollectionConfig,
    ) -> Self {
        Self {
            context,
            accumulator,
            config,
        }
    }

    /// Run cycles until `shutdown` fires; the first cycle starts immediately
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting metrics collection loop"
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let report = self.run_once().await;
                    if report.duration > self.config.interval {
                        warn!(
                            elapsed_ms = report.duration.as_millis() as u64,
                            interval_ms = self.config.interval.as_millis() as u64,
                            "Collection cycle took longer than the interval"
                        );
                    }
                    delay = self.next_delay();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics collection loop");
                    break;
                }
            }
        }
    }

    /// One cycle; a metadata refresh it starts is watched in the background
    /// and a failure marks the scheduler check degraded
    pub async fn run_once(&self) -> CycleReport {
        let mut report = self.context.collect(self.accumulator.as_ref()).await;

        if let Some(refresh) = report.refresh.take() {
            let health = self.context.health().clone();
            tokio::spawn(async move {
                match refresh.wait().await {
                    Ok(containers) => debug!(containers = containers, "Metadata refresh finished"),
                    Err(e) => {
                        health
                            .scheduler_calls(Some(format!("metadata refresh failed: {}", e)))
                            .await
                    }
                }
            });
        }

        report
    }

    /// Interval plus jitter to avoid synchronized scrapes across nodes
    fn next_delay(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Pseudo-random value in `0..max_ms`
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for creating the collection loop
pub struct CollectionLoopBuilder {
    context: Option<Arc<CollectorContext>>,
    config: CollectionConfig,
}

impl CollectionLoopBuilder {
    pub fn new() -> Self {
        Self {
            context: None,
            config: CollectionConfig::default(),
        }
    }

    pub fn context(mut self, context: Arc<CollectorContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn build(self) -> Result<(CollectionLoop, mpsc::Receiver<Collected>)> {
        let context = self
            .context
            .ok_or_else(|| anyhow::anyhow!("Collector context is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collection interval must be non-zero");
        }

        Ok(CollectionLoop::new(context, self.config))
    }
}

impl Default for CollectionLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
