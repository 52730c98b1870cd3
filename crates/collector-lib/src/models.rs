//! Core data models for the metrics collector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Tag carrying the identity of the container a record came from
pub const CONTAINER_ID_TAG: &str = "container_id";

/// Kind of a metric family, as declared by the exposition payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Summary,
    Histogram,
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Summary => "summary",
            MetricKind::Histogram => "histogram",
            MetricKind::Untyped => "untyped",
        }
    }
}

/// A single normalized metric record
///
/// Records are immutable once parsed, except for the tag enrichment and
/// processor stages which may add or remove tags and rename the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub name: String,
    pub kind: MetricKind,
    pub fields: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn container_id(&self) -> Option<&str> {
        self.tag(CONTAINER_ID_TAG)
    }
}

/// A resolved scrape endpoint for one collection cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeTarget {
    /// URL that will actually be fetched
    pub url: Url,
    /// URL before address substitution
    pub original_url: Url,
    /// Resolved network address, for DNS-discovered targets
    pub address: Option<String>,
    /// Extra provenance tags (e.g. container_id)
    pub tags: BTreeMap<String, String>,
}

impl ScrapeTarget {
    /// Target whose resolved and original URL are the same
    pub fn direct(url: Url) -> Self {
        Self {
            original_url: url.clone(),
            url,
            address: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// De-duplication key within a cycle
    pub fn key(&self) -> &str {
        self.url.as_str()
    }
}

/// A port declared by a scheduler task's discovery info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPort {
    pub number: u32,
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Workload metadata for one container, as cached by the metadata cache
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerInfo {
    pub container_id: String,
    pub task_name: String,
    pub executor_name: String,
    pub framework_name: String,
    pub task_labels: BTreeMap<String, String>,
}

/// A container registered through the sidecar control API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredContainer {
    pub container_id: String,
    pub statsd_host: String,
    pub statsd_port: u16,
}

/// Body of a registration request; host and port are optional
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub container_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statsd_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statsd_port: Option<u16>,
}

impl RegisterRequest {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            statsd_host: None,
            statsd_port: None,
        }
    }
}
