//! Collector configuration
//!
//! Read from an optional file named by `COLLECTOR_CONFIG` and from
//! `COLLECTOR__<SECTION>__<KEY>` environment variables, which take
//! precedence. Every setting has a default.

use anyhow::{bail, Context, Result};
use collector_lib::collector::CollectionConfig;
use collector_lib::metadata::MetadataConfig;
use collector_lib::processors::ProcessorsConfig;
use collector_lib::registry::RegistryConfig;
use collector_lib::scheduler::node_hostname;
use collector_lib::scrape::{FetchConfig, TlsConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "COLLECTOR_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Name reported in lifecycle logs
    pub node_name: String,
    /// Port of the control API, health and self metrics server
    pub api_port: u16,
    pub collection: CollectionSection,
    pub scrape: ScrapeSection,
    pub scheduler: SchedulerSection,
    pub metadata: MetadataSection,
    pub registry: RegistrySection,
    pub processors: ProcessorsConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            node_name: std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string()),
            api_port: 8125,
            collection: CollectionSection::default(),
            scrape: ScrapeSection::default(),
            scheduler: SchedulerSection::default(),
            metadata: MetadataSection::default(),
            registry: RegistrySection::default(),
            processors: ProcessorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSection {
    pub interval_secs: u64,
    pub jitter_ms: u64,
    pub buffer_size: usize,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            jitter_ms: 1000,
            buffer_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSection {
    /// Static endpoints
    pub urls: Vec<String>,
    /// URL templates whose host is resolved through DNS every cycle
    pub services: Vec<String>,
    pub response_timeout_ms: u64,
    pub bearer_token_path: Option<PathBuf>,
    pub tls: TlsConfig,
    pub user_agent: Option<String>,
}

impl Default for ScrapeSection {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            services: Vec::new(),
            response_timeout_ms: 3000,
            bearer_token_path: None,
            tls: TlsConfig::default(),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Agent operator API; enables task discovery and metadata
    pub agent_url: Option<String>,
    pub timeout_ms: u64,
    /// Value of the format label that marks scrapeable ports
    pub target_format: String,
    /// Emit the agent's own metrics snapshot every cycle
    pub collect_snapshot: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            agent_url: None,
            timeout_ms: 10_000,
            target_format: "prometheus".to_string(),
            collect_snapshot: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSection {
    pub enabled: bool,
    pub rate_limit_ms: u64,
    pub label_prefixes: Vec<String>,
    pub label_allowlist: Vec<String>,
}

impl Default for MetadataSection {
    fn default() -> Self {
        let defaults = MetadataConfig::default();
        Self {
            enabled: true,
            rate_limit_ms: defaults.rate_limit.as_millis() as u64,
            label_prefixes: defaults.label_prefixes,
            label_allowlist: defaults.label_allowlist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub enabled: bool,
    pub statsd_host: String,
    pub containers_dir: Option<PathBuf>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            statsd_host: "127.0.0.1".to_string(),
            containers_dir: None,
        }
    }
}

impl CollectorConfig {
    /// Load from `COLLECTOR_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scrape.urls")
                    .with_list_parse_key("scrape.services"),
            )
            .build()
            .context("failed to read configuration sources")?;

        config
            .try_deserialize()
            .context("failed to parse configuration")
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> Result<()> {
        if self.collection.interval_secs == 0 {
            bail!("collection.interval_secs must be non-zero");
        }
        if self.scrape.response_timeout_ms == 0 {
            bail!("scrape.response_timeout_ms must be non-zero");
        }
        for url in &self.scrape.urls {
            Url::parse(url).with_context(|| format!("invalid scrape url {:?}", url))?;
        }
        for service in &self.scrape.services {
            let parsed = Url::parse(service).with_context(|| format!("invalid service template {:?}", service))?;
            if parsed.host_str().is_none() {
                bail!("service template {:?} has no host", service);
            }
        }
        if let Some(agent_url) = &self.scheduler.agent_url {
            node_hostname(agent_url).with_context(|| format!("invalid scheduler agent url {:?}", agent_url))?;
            if self.scheduler.timeout_ms == 0 {
                bail!("scheduler.timeout_ms must be non-zero");
            }
        }
        Ok(())
    }

    pub fn collection_config(&self) -> CollectionConfig {
        CollectionConfig {
            interval: Duration::from_secs(self.collection.interval_secs),
            jitter: Duration::from_millis(self.collection.jitter_ms),
            buffer_size: self.collection.buffer_size,
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let defaults = FetchConfig::default();
        FetchConfig {
            response_timeout: Duration::from_millis(self.scrape.response_timeout_ms),
            bearer_token_path: self.scrape.bearer_token_path.clone(),
            tls: self.scrape.tls.clone(),
            user_agent: self.scrape.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }

    pub fn scheduler_timeout(&self) -> Duration {
        Duration::from_millis(self.scheduler.timeout_ms)
    }

    pub fn metadata_config(&self) -> MetadataConfig {
        MetadataConfig {
            timeout: self.scheduler_timeout(),
            rate_limit: Duration::from_millis(self.metadata.rate_limit_ms),
            label_prefixes: self.metadata.label_prefixes.clone(),
            label_allowlist: self.metadata.label_allowlist.clone(),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            statsd_host: self.registry.statsd_host.clone(),
            containers_dir: self.registry.containers_dir.clone(),
        }
    }
}
