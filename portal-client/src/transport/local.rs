//! In-process transport over a shared [`PortalRelay`].
//!
//! Every site of a test (or of the CLI demo) gets its own `LocalTransport`
//! pointing at the same relay. Failures can be injected per transport.

use super::{Gateway, JoinGrant, PortalGrant, PubSub, Subscription, TransportError};
use async_trait::async_trait;
use portal_relay::{PortalRelay, RelayError};
use portal_types::{PortalId, SiteId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Transport calling straight into a [`PortalRelay`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    relay: Arc<PortalRelay>,
    inner: Arc<Mutex<LocalTransportInner>>,
}

#[derive(Debug, Default)]
struct LocalTransportInner {
    fail_allocations: u32,
    drop_publishes: u32,
    heartbeats_paused: bool,
    published: u64,
}

impl LocalTransport {
    /// Create a transport for one site.
    pub fn new(relay: Arc<PortalRelay>) -> Self {
        Self {
            relay,
            inner: Arc::new(Mutex::new(LocalTransportInner::default())),
        }
    }

    /// The relay behind this transport.
    pub fn relay(&self) -> &Arc<PortalRelay> {
        &self.relay
    }

    fn lock(&self) -> MutexGuard<'_, LocalTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cause the next `count` create/join calls to fail with an allocation error.
    pub fn fail_next_allocation(&self, count: u32) {
        self.lock().fail_allocations = count;
    }

    /// Silently drop the next `count` publishes (they report success).
    pub fn drop_next_publishes(&self, count: u32) {
        self.lock().drop_publishes = count;
    }

    /// Stop (or resume) delivering heartbeats, as if the network went quiet.
    pub fn pause_heartbeats(&self, paused: bool) {
        self.lock().heartbeats_paused = paused;
    }

    /// Number of payloads actually handed to the relay.
    pub fn published_count(&self) -> u64 {
        self.lock().published
    }

    fn take_allocation_failure(&self) -> bool {
        let mut inner = self.lock();
        if inner.fail_allocations > 0 {
            inner.fail_allocations -= 1;
            true
        } else {
            false
        }
    }
}

impl From<RelayError> for TransportError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::PortalNotFound { portal_id } => {
                TransportError::PortalNotFound { portal_id }
            }
            RelayError::Allocation { reason } => TransportError::Allocation(reason),
            RelayError::SiteNotFound { portal_id, site_id } => {
                TransportError::SiteNotFound { portal_id, site_id }
            }
            RelayError::AlreadySubscribed { site_id, .. } => {
                TransportError::AlreadySubscribed { site_id }
            }
            other => TransportError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl Gateway for LocalTransport {
    async fn create_portal(&self) -> Result<PortalGrant, TransportError> {
        if self.take_allocation_failure() {
            return Err(TransportError::Allocation("injected failure".into()));
        }
        Ok(self.relay.create_portal().await?)
    }

    async fn join_portal(&self, portal_id: PortalId) -> Result<JoinGrant, TransportError> {
        if self.take_allocation_failure() {
            return Err(TransportError::Allocation("injected failure".into()));
        }
        Ok(self.relay.join_portal(portal_id).await?)
    }

    async fn leave_portal(
        &self,
        portal_id: PortalId,
        site_id: SiteId,
    ) -> Result<(), TransportError> {
        self.relay.leave_portal(portal_id, site_id).await?;
        Ok(())
    }

    async fn heartbeat(&self, portal_id: PortalId, site_id: SiteId) -> Result<(), TransportError> {
        if self.lock().heartbeats_paused {
            return Ok(());
        }
        Ok(self.relay.heartbeat(portal_id, site_id).await?)
    }
}

#[async_trait]
impl PubSub for LocalTransport {
    async fn publish(
        &self,
        portal_id: PortalId,
        sender: SiteId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        {
            let mut inner = self.lock();
            if inner.drop_publishes > 0 {
                inner.drop_publishes -= 1;
                tracing::debug!("Dropping publish from site {} (injected)", sender);
                return Ok(());
            }
        }
        self.relay.publish(portal_id, sender, payload).await?;
        self.lock().published += 1;
        Ok(())
    }

    async fn subscribe(
        &self,
        portal_id: PortalId,
        site_id: SiteId,
    ) -> Result<Subscription, TransportError> {
        Ok(self.relay.subscribe(portal_id, site_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_relay::Config;

    fn transport() -> LocalTransport {
        LocalTransport::new(PortalRelay::new(Config::default()).shared())
    }

    #[tokio::test]
    async fn create_subscribe_publish() {
        let transport = transport();
        let grant = transport.create_portal().await.unwrap();
        let mut rx = transport.subscribe(grant.portal_id, grant.site_id).await.unwrap();

        transport
            .publish(grant.portal_id, grant.site_id, vec![42])
            .await
            .unwrap();

        // SiteJoined for the host, then our payload.
        assert_eq!(rx.recv().await.unwrap().sender, SiteId::RELAY);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.sender, grant.site_id);
        assert_eq!(envelope.payload, vec![42]);
        assert_eq!(transport.published_count(), 1);
    }

    #[tokio::test]
    async fn injected_allocation_failures_run_out() {
        let transport = transport();
        transport.fail_next_allocation(2);

        assert!(matches!(
            transport.create_portal().await,
            Err(TransportError::Allocation(_))
        ));
        assert!(matches!(
            transport.create_portal().await,
            Err(TransportError::Allocation(_))
        ));
        assert!(transport.create_portal().await.is_ok());
    }

    #[tokio::test]
    async fn join_missing_portal_maps_error() {
        let transport = transport();
        let portal_id = PortalId::new();
        assert_eq!(
            transport.join_portal(portal_id).await.unwrap_err(),
            TransportError::PortalNotFound { portal_id }
        );
    }

    #[tokio::test]
    async fn dropped_publishes_never_reach_the_relay() {
        let transport = transport();
        let grant = transport.create_portal().await.unwrap();
        transport.drop_next_publishes(1);

        transport
            .publish(grant.portal_id, grant.site_id, vec![1])
            .await
            .unwrap();

        assert_eq!(transport.published_count(), 0);
        assert_eq!(transport.relay().metrics().snapshot().messages_published, 0);
    }

    #[tokio::test]
    async fn leave_twice_is_fine() {
        let transport = transport();
        let grant = transport.create_portal().await.unwrap();
        transport.leave_portal(grant.portal_id, grant.site_id).await.unwrap();
        transport.leave_portal(grant.portal_id, grant.site_id).await.unwrap();
    }
}
