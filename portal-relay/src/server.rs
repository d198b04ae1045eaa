//! Main PortalRelay coordination.
//!
//! PortalRelay ties membership, liveness and the per-portal channels together
//! and keeps operational counters.

use portal_core::SiteKey;
use portal_types::{PortalId, SiteId};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channel::Subscription;
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::heartbeat::HeartbeatService;
use crate::membership::{Departure, JoinGrant, PortalGrant, PortalRegistry, RosterEntry};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Portals created.
    pub portals_created: AtomicU64,
    /// Guests admitted.
    pub sites_joined: AtomicU64,
    /// Sites that left voluntarily.
    pub sites_left: AtomicU64,
    /// Sites evicted for heartbeat silence.
    pub sites_evicted: AtomicU64,
    /// Site-originated messages delivered.
    pub messages_published: AtomicU64,
    /// Heartbeats accepted.
    pub heartbeats_total: AtomicU64,
    /// Create/join requests refused for capacity.
    pub allocation_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Portals created.
    pub portals_created: u64,
    /// Guests admitted.
    pub sites_joined: u64,
    /// Sites that left voluntarily.
    pub sites_left: u64,
    /// Sites evicted for heartbeat silence.
    pub sites_evicted: u64,
    /// Site-originated messages delivered.
    pub messages_published: u64,
    /// Heartbeats accepted.
    pub heartbeats_total: u64,
    /// Create/join requests refused for capacity.
    pub allocation_failures: u64,
}

impl RelayMetrics {
    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            portals_created: self.portals_created.load(Ordering::Relaxed),
            sites_joined: self.sites_joined.load(Ordering::Relaxed),
            sites_left: self.sites_left.load(Ordering::Relaxed),
            sites_evicted: self.sites_evicted.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            heartbeats_total: self.heartbeats_total.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// The relay: portal registry, heartbeat service and metrics.
#[derive(Debug)]
pub struct PortalRelay {
    config: Config,
    registry: PortalRegistry,
    heartbeats: HeartbeatService,
    metrics: RelayMetrics,
}

impl PortalRelay {
    /// Create a relay with the given config.
    pub fn new(config: Config) -> Self {
        let registry = PortalRegistry::new(config.limits.clone());
        let heartbeats = HeartbeatService::new(config.heartbeat.eviction_period());
        Self {
            config,
            registry,
            heartbeats,
            metrics: RelayMetrics::default(),
        }
    }

    /// Create a relay from a TOML configuration file.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::new(Config::from_file(path)?))
    }

    /// Wrap in an `Arc` for sharing with transports and the sweep task.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Open a new portal; the caller becomes its host.
    pub async fn create_portal(&self) -> Result<PortalGrant> {
        let grant = self
            .registry
            .create()
            .await
            .inspect_err(|e| self.count_failure(e))?;
        self.heartbeats.register(grant.portal_id, grant.site_id).await;
        bump(&self.metrics.portals_created);
        Ok(grant)
    }

    /// Join an open portal as a guest.
    pub async fn join_portal(&self, portal_id: PortalId) -> Result<JoinGrant> {
        let grant = self
            .registry
            .join(portal_id)
            .await
            .inspect_err(|e| self.count_failure(e))?;
        self.heartbeats.register(portal_id, grant.site_id).await;
        bump(&self.metrics.sites_joined);
        Ok(grant)
    }

    /// Leave a portal. Idempotent: returns false if the site was already gone.
    pub async fn leave_portal(&self, portal_id: PortalId, site_id: SiteId) -> Result<bool> {
        let removed = self
            .registry
            .remove(portal_id, site_id, Departure::Left)
            .await?;
        self.heartbeats.forget(portal_id, site_id).await;
        if removed {
            bump(&self.metrics.sites_left);
            tracing::info!("Site {} left {:?}", site_id, portal_id);
        }
        Ok(removed)
    }

    /// Record a heartbeat from a member site.
    pub async fn heartbeat(&self, portal_id: PortalId, site_id: SiteId) -> Result<()> {
        self.heartbeats.ping(portal_id, site_id).await?;
        bump(&self.metrics.heartbeats_total);
        Ok(())
    }

    /// Deliver an opaque payload to every subscriber of the portal.
    pub async fn publish(
        &self,
        portal_id: PortalId,
        sender: SiteId,
        payload: Vec<u8>,
    ) -> Result<u64> {
        let sequence = self.registry.publish(portal_id, sender, payload).await?;
        bump(&self.metrics.messages_published);
        tracing::debug!(
            "Published #{} from site {} in {:?}",
            sequence,
            sender,
            portal_id
        );
        Ok(sequence)
    }

    /// Take a site's channel subscription.
    pub async fn subscribe(&self, portal_id: PortalId, site_id: SiteId) -> Result<Subscription> {
        self.registry.subscribe(portal_id, site_id).await
    }

    /// Current members of a portal.
    pub async fn roster(&self, portal_id: PortalId) -> Result<Vec<RosterEntry>> {
        self.registry.roster(portal_id).await
    }

    /// Sites silent for longer than the eviction period. Does not evict.
    pub async fn find_dead_sites(&self) -> Vec<SiteKey> {
        self.heartbeats.find_dead().await
    }

    /// Evict every silent site and announce it on its portal.
    ///
    /// Returns the sites evicted by this call. A site is evicted (and its
    /// `SiteEvicted` broadcast) at most once, even under concurrent sweeps.
    pub async fn evict_dead_sites(&self) -> Vec<SiteKey> {
        let claimed = self.heartbeats.claim_dead().await;
        let mut evicted = Vec::with_capacity(claimed.len());

        for key in claimed {
            match self
                .registry
                .remove(key.portal_id, key.site_id, Departure::Evicted)
                .await
            {
                Ok(true) => {
                    bump(&self.metrics.sites_evicted);
                    tracing::info!("Evicted site {} from {:?}", key.site_id, key.portal_id);
                    evicted.push(key);
                }
                // Left on its own between detection and eviction.
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        "Eviction of site {} in {:?} failed: {}",
                        key.site_id,
                        key.portal_id,
                        e
                    );
                }
            }
            self.heartbeats.forget(key.portal_id, key.site_id).await;
        }

        evicted
    }

    /// Number of portals still holding sites.
    pub fn total_portals(&self) -> usize {
        self.registry.portal_count()
    }

    /// Number of sites with heartbeat records.
    pub async fn total_sites(&self) -> usize {
        self.heartbeats.tracked().await
    }

    fn count_failure(&self, error: &RelayError) {
        if matches!(error, RelayError::Allocation { .. }) {
            bump(&self.metrics.allocation_failures);
        }
    }
}
