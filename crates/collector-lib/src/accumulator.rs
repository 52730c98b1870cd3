//! Output interface for collected records
//!
//! The host that consumes records categorizes them by metric kind. Records
//! are routed to the matching method by [`emit`].

use crate::error::CollectorError;
use crate::models::{MetricKind, MetricRecord};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Sink for normalized records and per-target errors
#[async_trait]
pub trait Accumulator: Send + Sync {
    async fn add_counter(&self, record: MetricRecord);
    async fn add_gauge(&self, record: MetricRecord);
    async fn add_summary(&self, record: MetricRecord);
    async fn add_histogram(&self, record: MetricRecord);
    /// Records without a declared kind
    async fn add_fields(&self, record: MetricRecord);
    async fn add_error(&self, error: CollectorError);
}

/// Route a record to the accumulator method for its kind
pub async fn emit(acc: &dyn Accumulator, record: MetricRecord) {
    match record.kind {
        MetricKind::Counter => acc.add_counter(record).await,
        MetricKind::Gauge => acc.add_gauge(record).await,
        MetricKind::Summary => acc.add_summary(record).await,
        MetricKind::Histogram => acc.add_histogram(record).await,
        MetricKind::Untyped => acc.add_fields(record).await,
    }
}

/// Event sent through a [`ChannelAccumulator`]
#[derive(Debug)]
pub enum Collected {
    Record(MetricRecord),
    Error(CollectorError),
}

/// Accumulator that forwards everything into a bounded channel
///
/// Sends wait for capacity, so a slow consumer holds the cycle back
/// instead of losing records.
#[derive(Clone)]
pub struct ChannelAccumulator {
    tx: mpsc::Sender<Collected>,
}

impl ChannelAccumulator {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Collected>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (Self { tx }, rx)
    }

    async fn send(&self, event: Collected) {
        if self.tx.send(event).await.is_err() {
            warn!("Record consumer is gone, dropping collected record");
        }
    }
}

#[async_trait]
impl Accumulator for ChannelAccumulator {
    async fn add_counter(&self, record: MetricRecord) {
        self.send(Collected::Record(record)).await;
    }

    async fn add_gauge(&self, record: MetricRecord) {
        self.send(Collected::Record(record)).await;
    }

    async fn add_summary(&self, record: MetricRecord) {
        self.send(Collected::Record(record)).await;
    }

    async fn add_histogram(&self, record: MetricRecord) {
        self.send(Collected::Record(record)).await;
    }

    async fn add_fields(&self, record: MetricRecord) {
        self.send(Collected::Record(record)).await;
    }

    async fn add_error(&self, error: CollectorError) {
        self.send(Collected::Error(error)).await;
    }
}

/// In-memory accumulator, grouped by the method that received each record
#[derive(Default)]
pub struct MemoryAccumulator {
    records: Mutex<Vec<(MetricKind, MetricRecord)>>,
    errors: Mutex<Vec<String>>,
}

impl MemoryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, kind: MetricKind, record: MetricRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push((kind, record));
        }
    }

    /// All records received so far
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records
            .lock()
            .map(|r| r.iter().map(|(_, rec)| rec.clone()).collect())
            .unwrap_or_default()
    }

    /// Records received through the method for `kind`
    pub fn records_of(&self, kind: MetricKind) -> Vec<MetricRecord> {
        self.records
            .lock()
            .map(|r| {
                r.iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, rec)| rec.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First record with the given name
    pub fn find(&self, name: &str) -> Option<MetricRecord> {
        self.records().into_iter().find(|r| r.name == name)
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Accumulator for MemoryAccumulator {
    async fn add_counter(&self, record: MetricRecord) {
        self.push(MetricKind::Counter, record);
    }

    async fn add_gauge(&self, record: MetricRecord) {
        self.push(MetricKind::Gauge, record);
    }

    async fn add_summary(&self, record: MetricRecord) {
        self.push(MetricKind::Summary, record);
    }

    async fn add_histogram(&self, record: MetricRecord) {
        self.push(MetricKind::Histogram, record);
    }

    async fn add_fields(&self, record: MetricRecord) {
        self.push(MetricKind::Untyped, record);
    }

    async fn add_error(&self, error: CollectorError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_routes_by_kind() {
        let acc = MemoryAccumulator::new();
        emit(&acc, MetricRecord::new("a", MetricKind::Counter)).await;
        emit(&acc, MetricRecord::new("b", MetricKind::Gauge)).await;
        emit(&acc, MetricRecord::new("c", MetricKind::Untyped)).await;
        emit(&acc, MetricRecord::new("d", MetricKind::Histogram)).await;

        assert_eq!(acc.records_of(MetricKind::Counter)[0].name, "a");
        assert_eq!(acc.records_of(MetricKind::Gauge)[0].name, "b");
        assert_eq!(acc.records_of(MetricKind::Untyped)[0].name, "c");
        assert_eq!(acc.records_of(MetricKind::Histogram)[0].name, "d");
        assert!(acc.records_of(MetricKind::Summary).is_empty());
    }

    #[tokio::test]
    async fn test_channel_accumulator_forwards() {
        let (acc, mut rx) = ChannelAccumulator::new(4);
        emit(&acc, MetricRecord::new("a", MetricKind::Gauge)).await;
        acc.add_error(CollectorError::Discovery("boom".into())).await;

        match rx.recv().await {
            Some(Collected::Record(r)) => assert_eq!(r.name, "a"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await, Some(Collected::Error(_))));
    }

    #[tokio::test]
    async fn test_full_channel_waits_for_consumer() {
        let (acc, mut rx) = ChannelAccumulator::new(10_000);

        let consumer = tokio::spawn(async move {
            let mut received = 0usize;
            while let Some(event) = rx.recv().await {
                if matches!(event, Collected::Record(_)) {
                    received += 1;
                }
            }
            received
        });

        for i in 0..15_000 {
            emit(&acc, MetricRecord::new(format!("m{}", i), MetricKind::Gauge)).await;
        }
        drop(acc);

        assert_eq!(consumer.await.unwrap(), 15_000);
    }

    #[tokio::test]
    async fn test_send_blocks_until_capacity_frees() {
        let (acc, mut rx) = ChannelAccumulator::new(1);
        emit(&acc, MetricRecord::new("first", MetricKind::Gauge)).await;

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            emit(&acc, MetricRecord::new("second", MetricKind::Gauge)),
        )
        .await;
        assert!(pending.is_err());

        assert!(matches!(rx.recv().await, Some(Collected::Record(r)) if r.name == "first"));
        emit(&acc, MetricRecord::new("third", MetricKind::Gauge)).await;
        assert!(matches!(rx.recv().await, Some(Collected::Record(r)) if r.name == "third"));
    }
}
