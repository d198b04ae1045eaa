//! Heartbeat loop of one site.

use portal_types::{PortalId, SiteId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::transport::{Transport, TransportError};

/// Spawn a task pinging the relay every `period`.
///
/// The first ping goes out immediately. The loop ends by itself once the relay
/// no longer knows the site (it left or was evicted); other failures are
/// logged and retried on the next tick.
pub(crate) fn spawn_heartbeat(
    transport: Arc<dyn Transport>,
    portal_id: PortalId,
    site_id: SiteId,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match transport.heartbeat(portal_id, site_id).await {
                Ok(()) => tracing::trace!("Heartbeat sent for site {} in {:?}", site_id, portal_id),
                Err(TransportError::SiteNotFound { .. }) => {
                    tracing::warn!(
                        "Relay no longer knows site {} in {:?}; heartbeat stopped",
                        site_id,
                        portal_id
                    );
                    return;
                }
                Err(e) => tracing::warn!("Heartbeat for site {} failed: {}", site_id, e),
            }
        }
    })
}
