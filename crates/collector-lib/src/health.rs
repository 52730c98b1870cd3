//! Collector health as seen from its own work
//!
//! Three checks back `/healthz`: whether the scheduler answered during the
//! last cycle, how the last cycle's scrapes went, and whether the sidecar
//! registry came back from its state directory. A check shows up once it has
//! been reported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const SCHEDULER: &str = "scheduler";
pub const LAST_CYCLE: &str = "last_cycle";
pub const REGISTRY: &str = "registry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Latest result of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds
    #[serde(rename = "last_check_timestamp")]
    pub checked_at: i64,
}

impl Check {
    fn new(status: Status, message: Option<String>) -> Self {
        Self {
            status,
            message,
            checked_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`; the overall status is the worst check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: Status,
    pub components: BTreeMap<String, Check>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    checks: BTreeMap<&'static str, Check>,
    running: bool,
}

/// Shared handle the collector reports into and the API reads from
#[derive(Debug, Clone, Default)]
pub struct CollectorHealth {
    state: Arc<RwLock<State>>,
}

impl CollectorHealth {
    pub fn new() -> Self {
        Self::default()
    }

    async fn set(&self, name: &'static str, check: Check) {
        self.state.write().await.checks.insert(name, check);
    }

    /// Scheduler calls of one cycle; the first failure, if any, degrades it
    pub async fn scheduler_calls(&self, failure: Option<String>) {
        let check = match failure {
            None => Check::new(Status::Healthy, None),
            Some(message) => Check::new(Status::Degraded, Some(message)),
        };
        self.set(SCHEDULER, check).await;
    }

    /// Scrape outcome of the cycle that just ended
    ///
    /// Losing every target is unhealthy. Some failed scrapes or service
    /// lookups are degraded. A cycle with no targets is healthy.
    pub async fn cycle_finished(&self, targets: usize, failed_scrapes: usize, failed_lookups: usize) {
        let check = if targets > 0 && failed_scrapes >= targets {
            Check::new(Status::Unhealthy, Some(format!("all {} targets failed", targets)))
        } else if failed_scrapes > 0 || failed_lookups > 0 {
            let mut parts = Vec::new();
            if failed_scrapes > 0 {
                parts.push(format!("{} of {} targets failed", failed_scrapes, targets));
            }
            if failed_lookups > 0 {
                parts.push(format!("{} service lookups failed", failed_lookups));
            }
            Check::new(Status::Degraded, Some(parts.join(", ")))
        } else {
            Check::new(Status::Healthy, Some(format!("{} targets scraped", targets)))
        };
        self.set(LAST_CYCLE, check).await;
    }

    /// Outcome of restoring sidecar registrations at startup
    pub async fn registry_restored(&self, outcome: Result<usize, String>) {
        let check = match outcome {
            Ok(count) => Check::new(Status::Healthy, Some(format!("{} containers restored", count))),
            Err(e) => Check::new(Status::Degraded, Some(format!("restore failed: {}", e))),
        };
        self.set(REGISTRY, check).await;
    }

    /// Whether the collector has started serving; cleared on shutdown
    pub async fn set_running(&self, running: bool) {
        self.state.write().await.running = running;
    }

    pub async fn report(&self) -> HealthReport {
        let state = self.state.read().await;
        let status = state
            .checks
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(Status::Healthy);
        let components = state
            .checks
            .iter()
            .map(|(name, check)| (name.to_string(), check.clone()))
            .collect();
        HealthReport { status, components }
    }

    pub async fn readiness(&self) -> Readiness {
        let running = self.state.read().await.running;
        let reason = if !running {
            Some("collector is not running".to_string())
        } else if self.report().await.status == Status::Unhealthy {
            Some("last cycle failed every target".to_string())
        } else {
            None
        };
        Readiness {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nothing_reported_is_healthy() {
        let health = CollectorHealth::new();
        let report = health.report().await;

        assert_eq!(report.status, Status::Healthy);
        assert!(report.components.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_outcome() {
        let health = CollectorHealth::new();

        health.cycle_finished(0, 0, 0).await;
        assert_eq!(health.report().await.status, Status::Healthy);

        health.cycle_finished(4, 1, 0).await;
        let report = health.report().await;
        assert_eq!(report.status, Status::Degraded);
        assert_eq!(
            report.components[LAST_CYCLE].message.as_deref(),
            Some("1 of 4 targets failed")
        );

        health.cycle_finished(2, 0, 1).await;
        assert_eq!(
            health.report().await.components[LAST_CYCLE].message.as_deref(),
            Some("1 service lookups failed")
        );

        health.cycle_finished(4, 4, 0).await;
        assert_eq!(health.report().await.status, Status::Unhealthy);
    }

    #[tokio::test]
    async fn test_worst_check_wins() {
        let health = CollectorHealth::new();
        health.scheduler_calls(Some("connection refused".into())).await;
        health.cycle_finished(3, 0, 0).await;
        health.registry_restored(Ok(2)).await;

        let report = health.report().await;
        assert_eq!(report.status, Status::Degraded);
        assert_eq!(report.components.len(), 3);

        health.scheduler_calls(None).await;
        assert_eq!(health.report().await.status, Status::Healthy);
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let health = CollectorHealth::new();
        health.registry_restored(Err("permission denied".into())).await;

        let json = serde_json::to_value(health.report().await).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["components"]["registry"]["message"], "restore failed: permission denied");
        assert!(json["components"]["registry"]["last_check_timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_readiness() {
        let health = CollectorHealth::new();
        assert!(!health.readiness().await.ready);

        health.set_running(true).await;
        assert!(health.readiness().await.ready);

        health.cycle_finished(2, 2, 0).await;
        let readiness = health.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("last cycle failed every target"));
    }
}
