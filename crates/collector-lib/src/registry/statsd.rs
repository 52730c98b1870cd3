//! Statsd listeners for registered containers
//!
//! Each registered container owns a UDP socket. Received lines are
//! aggregated per container until the next collection cycle drains them.

use crate::models::{MetricKind, MetricRecord, CONTAINER_ID_TAG};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

const MAX_DATAGRAM: usize = 65_535;
const INITIAL_RECV_BACKOFF: Duration = Duration::from_millis(10);
const MAX_RECV_BACKOFF: Duration = Duration::from_secs(1);

/// Statsd metric type suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsdType {
    Counter,
    Gauge,
    Timing,
    Histogram,
    Set,
}

impl StatsdType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "c" => Some(StatsdType::Counter),
            "g" => Some(StatsdType::Gauge),
            "ms" => Some(StatsdType::Timing),
            "h" => Some(StatsdType::Histogram),
            "s" => Some(StatsdType::Set),
            _ => None,
        }
    }
}

/// One parsed statsd line
#[derive(Debug, Clone, PartialEq)]
pub struct StatsdSample {
    pub name: String,
    pub kind: StatsdType,
    /// Raw value text; sets keep it verbatim, other types parse it
    pub value: String,
    pub sample_rate: f64,
}

impl StatsdSample {
    fn numeric(&self) -> Option<f64> {
        self.value.trim_start_matches('+').parse().ok()
    }
}

/// Parse `name:value|type[|@rate]`
pub fn parse_line(line: &str) -> Option<StatsdSample> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (name, rest) = line.split_once(':')?;
    let mut parts = rest.split('|');
    let value = parts.next()?.trim();
    let kind = StatsdType::parse(parts.next()?.trim())?;

    let mut sample_rate = 1.0;
    for extra in parts {
        if let Some(rate) = extra.strip_prefix('@') {
            sample_rate = rate.parse().ok().filter(|r: &f64| *r > 0.0 && *r <= 1.0)?;
        }
    }

    if name.is_empty() || value.is_empty() {
        return None;
    }

    let sample = StatsdSample {
        name: name.to_string(),
        kind,
        value: value.to_string(),
        sample_rate,
    };
    if kind != StatsdType::Set && sample.numeric().is_none() {
        return None;
    }
    Some(sample)
}

/// Aggregated values for one container between two drains
#[derive(Debug, Default)]
struct Aggregate {
    counters: HashMap<String, f64>,
    gauges: HashMap<String, f64>,
    timings: HashMap<String, Vec<f64>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Aggregate {
    fn add(&mut self, sample: StatsdSample) {
        match sample.kind {
            StatsdType::Counter => {
                let value = sample.numeric().unwrap_or_default() / sample.sample_rate;
                *self.counters.entry(sample.name).or_default() += value;
            }
            StatsdType::Gauge => {
                let value = sample.numeric().unwrap_or_default();
                let relative = sample.value.starts_with('+') || sample.value.starts_with('-');
                let gauge = self.gauges.entry(sample.name).or_default();
                if relative {
                    *gauge += value;
                } else {
                    *gauge = value;
                }
            }
            StatsdType::Timing | StatsdType::Histogram => {
                if let Some(value) = sample.numeric() {
                    self.timings.entry(sample.name).or_default().push(value);
                }
            }
            StatsdType::Set => {
                self.sets.entry(sample.name).or_default().insert(sample.value);
            }
        }
    }

    fn into_records(self, container_id: &str) -> Vec<MetricRecord> {
        let now = Utc::now();
        let record = |name: String, kind: MetricKind| {
            MetricRecord::new(name, kind)
                .with_tag(CONTAINER_ID_TAG, container_id)
                .with_timestamp(now)
        };

        let mut records = Vec::new();
        for (name, value) in self.counters {
            records.push(record(name, MetricKind::Counter).with_field("value", value));
        }
        for (name, value) in self.gauges {
            records.push(record(name, MetricKind::Gauge).with_field("value", value));
        }
        for (name, values) in self.timings {
            if values.is_empty() {
                continue;
            }
            let count = values.len() as f64;
            let sum: f64 = values.iter().sum();
            let lower = values.iter().copied().fold(f64::INFINITY, f64::min);
            let upper = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            records.push(
                record(name, MetricKind::Summary)
                    .with_field("count", count)
                    .with_field("sum", sum)
                    .with_field("mean", sum / count)
                    .with_field("lower", lower)
                    .with_field("upper", upper),
            );
        }
        for (name, members) in self.sets {
            records.push(record(name, MetricKind::Gauge).with_field("value", members.len() as f64));
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

/// Per-container statsd aggregates shared between listeners and the
/// collection loop
#[derive(Debug, Default)]
pub struct StatsdBuffers {
    aggregates: DashMap<String, Aggregate>,
}

impl StatsdBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, container_id: &str, sample: StatsdSample) {
        self.aggregates
            .entry(container_id.to_string())
            .or_default()
            .add(sample);
    }

    /// Take everything aggregated for the container since the last drain
    pub fn drain(&self, container_id: &str) -> Vec<MetricRecord> {
        self.aggregates
            .remove(container_id)
            .map(|(cid, agg)| agg.into_records(&cid))
            .unwrap_or_default()
    }

    pub fn discard(&self, container_id: &str) {
        self.aggregates.remove(container_id);
    }
}

/// Receive datagrams until the task is aborted
pub async fn run_listener(socket: UdpSocket, container_id: String, buffers: Arc<StatsdBuffers>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut backoff = INITIAL_RECV_BACKOFF;

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, _peer)) => {
                backoff = INITIAL_RECV_BACKOFF;
                let text = String::from_utf8_lossy(&buf[..n]);
                for line in text.lines() {
                    match parse_line(line) {
                        Some(sample) => buffers.record(&container_id, sample),
                        None => debug!(container_id = %container_id, line = %line, "Ignoring malformed statsd line"),
                    }
                }
            }
            Err(e) => {
                warn!(
                    container_id = %container_id,
                    error = %e,
                    retry_ms = backoff.as_millis() as u64,
                    "Statsd receive failed"
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
            }
        }
    }
}

/// Doubling delay between failed receives, capped
fn next_backoff(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_RECV_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let sample = parse_line("foo:123|c").unwrap();
        assert_eq!(sample.name, "foo");
        assert_eq!(sample.kind, StatsdType::Counter);
        assert_eq!(sample.value, "123");
        assert_eq!(sample.sample_rate, 1.0);

        let sampled = parse_line("req.latency:20|ms|@0.5").unwrap();
        assert_eq!(sampled.kind, StatsdType::Timing);
        assert_eq!(sampled.sample_rate, 0.5);

        assert!(parse_line("no-value|c").is_none());
        assert!(parse_line("foo:abc|c").is_none());
        assert!(parse_line("foo:1|x").is_none());
        assert!(parse_line("users:alice|s").is_some());
    }

    #[test]
    fn test_aggregate_and_drain() {
        let buffers = StatsdBuffers::new();
        for line in [
            "hits:1|c",
            "hits:2|c|@0.5",
            "temp:20|g",
            "temp:+5|g",
            "latency:10|ms",
            "latency:30|ms",
            "users:alice|s",
            "users:bob|s",
            "users:alice|s",
        ] {
            buffers.record("abc123", parse_line(line).unwrap());
        }

        let records = buffers.drain("abc123");
        let find = |name: &str| records.iter().find(|r| r.name == name).unwrap();

        let hits = find("hits");
        assert_eq!(hits.kind, MetricKind::Counter);
        assert_eq!(hits.fields["value"], 5.0);
        assert_eq!(hits.container_id(), Some("abc123"));

        assert_eq!(find("temp").fields["value"], 25.0);

        let latency = find("latency");
        assert_eq!(latency.fields["count"], 2.0);
        assert_eq!(latency.fields["mean"], 20.0);
        assert_eq!(latency.fields["upper"], 30.0);

        assert_eq!(find("users").fields["value"], 2.0);

        assert!(buffers.drain("abc123").is_empty());
    }

    #[tokio::test]
    async fn test_listener_receives_datagrams() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let buffers = Arc::new(StatsdBuffers::new());
        let handle = tokio::spawn(run_listener(socket, "abc123".to_string(), buffers.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"foo:123|c", addr).await.unwrap();

        let mut records = Vec::new();
        for _ in 0..50 {
            records = buffers.drain("abc123");
            if !records.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "foo");
        assert_eq!(records[0].fields["value"], 123.0);
        assert_eq!(records[0].container_id(), Some("abc123"));
    }

    #[test]
    fn test_recv_backoff_doubles_up_to_cap() {
        let mut backoff = INITIAL_RECV_BACKOFF;
        let mut delays = Vec::new();
        for _ in 0..10 {
            delays.push(backoff);
            backoff = next_backoff(backoff);
        }

        assert_eq!(delays[0], Duration::from_millis(10));
        assert_eq!(delays[1], Duration::from_millis(20));
        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*delays.last().unwrap(), MAX_RECV_BACKOFF);
    }
}
