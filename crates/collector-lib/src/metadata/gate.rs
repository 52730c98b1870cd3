//! Single-flight gate with a cooldown
//!
//! At most one permit is outstanding. Once a permit is released the gate
//! stays closed for the cooldown period; acquisition attempts in the
//! meantime fail immediately and are not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RefreshGate {
    closed: Arc<AtomicBool>,
    cooldown: Duration,
}

impl RefreshGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether an acquisition would currently fail
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take the permit if no refresh is running or cooling down
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                closed: self.closed.clone(),
                cooldown: self.cooldown,
            })
    }
}

/// Held for the duration of one refresh; dropping it starts the cooldown
#[derive(Debug)]
pub struct GatePermit {
    closed: Arc<AtomicBool>,
    cooldown: Duration,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let closed = self.closed.clone();
        let cooldown = self.cooldown;

        if cooldown.is_zero() {
            closed.store(false, Ordering::Release);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    closed.store(false, Ordering::Release);
                    debug!("Refresh gate re-armed");
                });
            }
            // No runtime to time the cooldown on
            Err(_) => closed.store(false, Ordering::Release),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_and_cooldown() {
        let gate = RefreshGate::new(Duration::from_secs(5));

        let permit = gate.try_acquire().expect("first acquire");
        assert!(gate.try_acquire().is_none());

        drop(permit);
        // Still cooling down
        assert!(gate.try_acquire().is_none());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!gate.is_closed());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_zero_cooldown_reopens_immediately() {
        let gate = RefreshGate::new(Duration::ZERO);
        drop(gate.try_acquire().unwrap());
        assert!(gate.try_acquire().is_some());
    }
}
