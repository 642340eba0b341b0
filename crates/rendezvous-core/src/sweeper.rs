//! Liveness sweeping.
//!
//! The sweeper wakes on a fixed interval and evicts memberships that have
//! been idle longer than the inactivity threshold.

use crate::registry::{RoomRegistry, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Inactivity threshold after which a membership is evicted.
    pub idle_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(180),
        }
    }
}

/// Periodic idle-membership evictor.
pub struct Sweeper {
    registry: Arc<RoomRegistry>,
    config: SweeperConfig,
}

impl Sweeper {
    /// Create a sweeper over `registry`.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>, config: SweeperConfig) -> Self {
        Self { registry, config }
    }

    /// Run a single sweep now.
    pub fn sweep(&self) -> SweepReport {
        let report = self.registry.evict_idle(self.config.idle_timeout);

        for eviction in &report.evicted {
            debug!(
                room = %eviction.room,
                token = %eviction.token,
                identity = %eviction.identity,
                "Evicted idle member"
            );
        }
        if !report.is_empty() {
            info!(
                evicted = report.evicted.len(),
                closed_rooms = report.closed_rooms.len(),
                "Sweep complete"
            );
        }

        report
    }

    /// Sweep forever, handing each report to `on_report`.
    ///
    /// The first sweep happens one interval after the call.
    pub async fn run<F>(self, mut on_report: F)
    where
        F: FnMut(&SweepReport),
    {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = self.sweep();
            on_report(&report);
        }
    }

    /// Spawn [`Sweeper::run`] on the current runtime.
    pub fn spawn<F>(self, on_report: F) -> JoinHandle<()>
    where
        F: FnMut(&SweepReport) + Send + 'static,
    {
        info!(
            interval = ?self.config.interval,
            idle_timeout = ?self.config.idle_timeout,
            "Starting liveness sweeper"
        );
        tokio::spawn(self.run(on_report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn sweeper(registry: &Arc<RoomRegistry>) -> Sweeper {
        Sweeper::new(Arc::clone(registry), SweeperConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_touched_member_survives_sweep() {
        let registry = Arc::new(RoomRegistry::new());
        let owner = registry.create_or_join("lobby", "alice").unwrap();
        let joiner = registry.create_or_join("lobby", "bob").unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], 4000));

        tokio::time::advance(Duration::from_secs(120)).await;
        registry.touch("lobby", owner.token.as_str(), addr);
        tokio::time::advance(Duration::from_secs(61)).await;

        let report = sweeper(&registry).sweep();
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].token, joiner.token);
        assert!(report.closed_rooms.is_empty());
        assert!(registry.validate_token("lobby", owner.token.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_within_threshold_is_kept() {
        let registry = Arc::new(RoomRegistry::new());
        registry.create_or_join("lobby", "alice").unwrap();

        tokio::time::advance(Duration::from_secs(180)).await;

        assert!(sweeper(&registry).sweep().is_empty());
        assert!(registry.is_valid_room("lobby"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_evicts_idle_owner() {
        let registry = Arc::new(RoomRegistry::new());
        let owner = registry.create_or_join("lobby", "alice").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = sweeper(&registry).spawn(move |report| {
            if !report.is_empty() {
                let _ = tx.send(report.clone());
            }
        });

        let report = rx.recv().await.unwrap();
        assert_eq!(report.evicted[0].token, owner.token);
        assert_eq!(report.closed_rooms, vec!["lobby".to_string()]);
        assert!(!registry.is_valid_room("lobby"));

        handle.abort();
    }
}
