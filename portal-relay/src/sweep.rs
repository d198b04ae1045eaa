//! Background eviction sweep.
//!
//! Runs periodically to evict sites whose heartbeats stopped.

use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::SweepConfig;
use crate::server::PortalRelay;

/// Spawn the background eviction sweep.
///
/// Returns a handle that can be used to abort the task. A disabled sweep
/// returns immediately.
pub fn spawn_eviction_sweep(
    relay: Arc<PortalRelay>,
    config: SweepConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Eviction sweep disabled");
            return;
        }

        tracing::info!("Eviction sweep started (interval: {}ms)", config.interval_ms);

        let mut timer = interval(config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            let evicted = relay.evict_dead_sites().await;
            if evicted.is_empty() {
                tracing::trace!("Sweep: no silent sites");
            } else {
                tracing::info!("Sweep: evicted {} sites", evicted.len());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, HeartbeatConfig};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_silent_sites() {
        let relay = PortalRelay::new(Config {
            heartbeat: HeartbeatConfig {
                eviction_period_ms: 100,
            },
            ..Config::default()
        })
        .shared();
        let host = relay.create_portal().await.unwrap();

        let handle = spawn_eviction_sweep(
            Arc::clone(&relay),
            SweepConfig {
                interval_ms: 50,
                enabled: true,
            },
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(relay.metrics().snapshot().sites_evicted, 1);
        assert!(relay.roster(host.portal_id).await.is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn sweep_disabled() {
        let relay = PortalRelay::new(Config::default()).shared();
        let config = SweepConfig {
            interval_ms: 1,
            enabled: false,
        };

        let handle = spawn_eviction_sweep(relay, config);

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }
}
