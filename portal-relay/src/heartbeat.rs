//! Relay-side heartbeat bookkeeping.
//!
//! Wraps the pure [`LivenessTracker`] with a lock and the relay clock.
//! Detection and the Alive → Dead transition happen under the same lock, so
//! two sweeps racing over the same silent site evict it once.

use portal_core::{LivenessError, LivenessTracker, SiteKey};
use portal_types::{PortalId, SiteId};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{RelayError, Result};

/// Current time on the relay clock.
///
/// Follows tokio's clock so paused-time tests can advance it.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Liveness of every site known to the relay.
#[derive(Debug)]
pub struct HeartbeatService {
    eviction_period: Duration,
    tracker: Mutex<LivenessTracker>,
}

impl HeartbeatService {
    /// Create a service declaring sites dead after `eviction_period` of silence.
    pub fn new(eviction_period: Duration) -> Self {
        Self {
            eviction_period,
            tracker: Mutex::new(LivenessTracker::new()),
        }
    }

    /// The configured eviction period.
    pub fn eviction_period(&self) -> Duration {
        self.eviction_period
    }

    /// Start tracking a freshly admitted site.
    pub async fn register(&self, portal_id: PortalId, site_id: SiteId) {
        self.tracker
            .lock()
            .await
            .register(SiteKey::new(portal_id, site_id), now());
    }

    /// Record a ping.
    pub async fn ping(&self, portal_id: PortalId, site_id: SiteId) -> Result<()> {
        self.tracker
            .lock()
            .await
            .record_ping(SiteKey::new(portal_id, site_id), now())
            .map_err(|e| match e {
                LivenessError::UnknownSite { portal_id, site_id }
                | LivenessError::Dead { portal_id, site_id } => {
                    RelayError::SiteNotFound { portal_id, site_id }
                }
            })
    }

    /// Sites silent for longer than the eviction period. Pure read.
    pub async fn find_dead(&self) -> Vec<SiteKey> {
        self.tracker
            .lock()
            .await
            .find_dead(now(), self.eviction_period)
    }

    /// Mark every silent site dead; returns only the sites this call transitioned.
    pub async fn claim_dead(&self) -> Vec<SiteKey> {
        let mut tracker = self.tracker.lock().await;
        let dead = tracker.find_dead(now(), self.eviction_period);
        dead.into_iter().filter(|key| tracker.mark_dead(key)).collect()
    }

    /// Stop tracking a site.
    pub async fn forget(&self, portal_id: PortalId, site_id: SiteId) {
        self.tracker
            .lock()
            .await
            .remove(&SiteKey::new(portal_id, site_id));
    }

    /// Number of tracked sites.
    pub async fn tracked(&self) -> usize {
        self.tracker.lock().await.len()
    }
}
