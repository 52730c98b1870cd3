//! Metrics collector library
//!
//! This crate provides the core functionality for:
//! - Scrape target discovery (static, DNS, scheduler tasks, local registry)
//! - Concurrent scraping and parsing of text exposition endpoints
//! - Metadata enrichment from the scheduler's state
//! - The sidecar container registry with statsd listeners
//! - Health checks and observability

pub mod accumulator;
pub mod collector;
pub mod discovery;
pub mod error;
pub mod health;
pub mod metadata;
pub mod models;
pub mod observability;
pub mod processors;
pub mod registry;
pub mod scheduler;
pub mod scrape;

pub use accumulator::{Accumulator, ChannelAccumulator, Collected, MemoryAccumulator};
pub use collector::{CollectionConfig, CollectionLoop, CollectionLoopBuilder, CollectorContext, CycleReport};
pub use error::{CollectorError, Result};
pub use health::{Check, CollectorHealth, HealthReport, Readiness, Status};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
