//! Per-container state files
//!
//! One JSON file per container, named after the container id, holding the
//! serialized registration.

use crate::error::Result;
use crate::models::RegisteredContainer;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, container_id: &str) -> PathBuf {
        self.dir.join(container_id)
    }

    pub async fn save(&self, container: &RegisteredContainer) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec(container)?;
        tokio::fs::write(self.path_for(&container.container_id), body).await?;
        debug!(container_id = %container.container_id, dir = %self.dir.display(), "Persisted container state");
        Ok(())
    }

    /// Delete the state file; a missing file is not an error
    pub async fn delete(&self, container_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(container_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every valid entry in the directory, sorted by container id
    ///
    /// A missing directory yields nothing. Unreadable or malformed files are
    /// skipped with a warning.
    pub async fn load_all(&self) -> Result<Vec<RegisteredContainer>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut containers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read container state, skipping");
                    continue;
                }
            };

            match serde_json::from_slice::<RegisteredContainer>(&bytes) {
                Ok(container) if !container.container_id.is_empty() => containers.push(container),
                Ok(_) => warn!(path = %path.display(), "Container state has no id, skipping"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid container state, skipping")
                }
            }
        }

        containers.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        Ok(containers)
    }
}
