//! Registry of locally registered containers
//!
//! Containers register through the control API and get a statsd listener.
//! Registration is idempotent by container id and listener ports are unique
//! within the registry. Entries are optionally persisted, one file per
//! container, and reloaded on startup.

pub mod statsd;
mod store;

pub use statsd::{parse_line, StatsdBuffers, StatsdSample, StatsdType};
pub use store::StateStore;

use crate::error::{CollectorError, Result};
use crate::models::{MetricRecord, RegisterRequest, RegisteredContainer};
use crate::observability::{CollectorMetrics, StructuredLogger};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Registry settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Listener host used when a registration does not name one
    pub statsd_host: String,
    /// Directory holding per-container state files
    pub containers_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            statsd_host: "127.0.0.1".to_string(),
            containers_dir: None,
        }
    }
}

struct Entry {
    container: RegisteredContainer,
    listener: JoinHandle<()>,
}

/// Concurrent container registry
pub struct ContainerRegistry {
    containers: DashMap<String, Entry>,
    /// Serializes mutations so the port conflict check and insert are atomic
    write_lock: Mutex<()>,
    default_host: String,
    store: Option<StateStore>,
    buffers: Arc<StatsdBuffers>,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
}

impl ContainerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            containers: DashMap::new(),
            write_lock: Mutex::new(()),
            default_host: config.statsd_host,
            store: config.containers_dir.map(StateStore::new),
            buffers: Arc::new(StatsdBuffers::new()),
            metrics: CollectorMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Register a container, or return its existing registration
    ///
    /// An existing id is returned unchanged even if the request names a
    /// different host or port. A port owned by another container is a
    /// conflict. Without a port an ephemeral one is assigned.
    pub async fn add(&self, request: RegisterRequest) -> Result<RegisteredContainer> {
        validate_container_id(&request.container_id)?;
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.get(&request.container_id) {
            debug!(container_id = %existing.container_id, "Container already registered");
            return Ok(existing);
        }

        let host = request
            .statsd_host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| self.default_host.clone());
        let port = request.statsd_port.unwrap_or(0);

        if let Some(owner) = self.port_owner(port) {
            return Err(CollectorError::Conflict { port, owner });
        }

        let entry = self.start(request.container_id, host, port).await?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&entry.container).await {
                stop(entry).await;
                return Err(e);
            }
        }

        let container = entry.container.clone();
        self.containers.insert(container.container_id.clone(), entry);
        self.metrics.set_registered_containers(self.containers.len() as i64);
        self.logger.log_container_registered(
            &container.container_id,
            &container.statsd_host,
            container.statsd_port,
        );

        Ok(container)
    }

    /// Remove a container and release its listener
    ///
    /// Returns whether the container was registered; removing an unknown id
    /// is not an error. The listener is released even when its state file
    /// cannot be deleted; that error is returned afterwards.
    pub async fn remove(&self, container_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let Some((_, entry)) = self.containers.remove(container_id) else {
            return Ok(false);
        };
        stop(entry).await;
        self.buffers.discard(container_id);
        self.metrics.set_registered_containers(self.containers.len() as i64);

        if let Some(store) = &self.store {
            if let Err(e) = store.delete(container_id).await {
                warn!(container_id = %container_id, error = %e, "Could not delete container state");
                return Err(e);
            }
        }

        self.logger.log_container_removed(container_id);
        Ok(true)
    }

    /// All registrations, ordered by container id
    pub fn list(&self) -> Vec<RegisteredContainer> {
        let mut containers: Vec<RegisteredContainer> = self
            .containers
            .iter()
            .map(|e| e.value().container.clone())
            .collect();
        containers.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        containers
    }

    pub fn get(&self, container_id: &str) -> Option<RegisteredContainer> {
        self.containers
            .get(container_id)
            .map(|e| e.value().container.clone())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Statsd records received for the container since the last drain
    pub fn drain(&self, container_id: &str) -> Vec<MetricRecord> {
        self.buffers.drain(container_id)
    }

    /// Restore registrations from the state directory
    ///
    /// Entries whose listener cannot be started are skipped with a warning.
    pub async fn load(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let saved = store.load_all().await?;
        let _guard = self.write_lock.lock().await;

        let mut loaded = 0;
        for container in saved {
            if self.containers.contains_key(&container.container_id) {
                continue;
            }
            if let Some(owner) = self.port_owner(container.statsd_port) {
                warn!(
                    container_id = %container.container_id,
                    port = container.statsd_port,
                    owner = %owner,
                    "Saved container port already taken, skipping"
                );
                continue;
            }

            match self
                .start(container.container_id.clone(), container.statsd_host, container.statsd_port)
                .await
            {
                Ok(entry) => {
                    self.containers.insert(container.container_id, entry);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(container_id = %container.container_id, error = %e, "Could not restore container, skipping");
                }
            }
        }

        self.metrics.set_registered_containers(self.containers.len() as i64);
        debug!(loaded = loaded, dir = %store.dir().display(), "Restored registered containers");
        Ok(loaded)
    }

    /// Stop every listener; state files are kept for the next start
    pub async fn shutdown(&self) {
        let _guard = self.write_lock.lock().await;
        let ids: Vec<String> = self.containers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.containers.remove(&id) {
                stop(entry).await;
            }
        }
        self.metrics.set_registered_containers(0);
    }

    fn port_owner(&self, port: u16) -> Option<String> {
        if port == 0 {
            return None;
        }
        self.containers
            .iter()
            .find(|e| e.value().container.statsd_port == port)
            .map(|e| e.key().clone())
    }

    async fn start(&self, container_id: String, host: String, port: u16) -> Result<Entry> {
        let socket = UdpSocket::bind((host.as_str(), port)).await?;
        let bound_port = socket.local_addr()?.port();

        let listener = tokio::spawn(statsd::run_listener(
            socket,
            container_id.clone(),
            self.buffers.clone(),
        ));

        Ok(Entry {
            container: RegisteredContainer {
                container_id,
                statsd_host: host,
                statsd_port: bound_port,
            },
            listener,
        })
    }
}

async fn stop(entry: Entry) {
    entry.listener.abort();
    // Awaiting the aborted task guarantees the socket is closed
    let _ = entry.listener.await;
}

/// Container ids name state files and must stay inside the state directory
fn validate_container_id(container_id: &str) -> Result<()> {
    let invalid = container_id.is_empty()
        || container_id == "."
        || container_id == ".."
        || container_id.contains(['/', '\\']);
    if invalid {
        return Err(CollectorError::InvalidRequest(format!(
            "invalid container id {:?}",
            container_id
        )));
    }
    Ok(())
}
