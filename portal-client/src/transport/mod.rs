//! Transport abstraction for portals.
//!
//! A site talks to the relay over two logical channels:
//! - the [`Gateway`], request/response: create, join, leave, heartbeat
//! - the [`PubSub`] channel of a portal: publish opaque payloads and receive
//!   every envelope of the portal in relay order
//!
//! # Example
//!
//! ```ignore
//! let relay = PortalRelay::new(Config::default()).shared();
//! let transport = LocalTransport::new(relay);
//! let grant = transport.create_portal().await?;
//! let mut subscription = transport.subscribe(grant.portal_id, grant.site_id).await?;
//! transport.publish(grant.portal_id, grant.site_id, payload).await?;
//! let envelope = subscription.recv().await;
//! ```

mod local;

pub use local::LocalTransport;
pub use portal_relay::{JoinGrant, PortalGrant, RosterEntry, Subscription};

use async_trait::async_trait;
use portal_types::{PortalId, SiteId};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No live host is registered for the portal.
    #[error("portal not found: {portal_id}")]
    PortalNotFound {
        /// The requested portal.
        portal_id: PortalId,
    },

    /// The relay could not allocate a portal or site.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The site is not a member of the portal (left or evicted).
    #[error("site {site_id} not found in portal {portal_id}")]
    SiteNotFound {
        /// The portal.
        portal_id: PortalId,
        /// The site.
        site_id: SiteId,
    },

    /// The subscription was already taken.
    #[error("site {site_id} already subscribed")]
    AlreadySubscribed {
        /// The site.
        site_id: SiteId,
    },

    /// The relay could not be reached or failed internally.
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

/// Request/response channel to the relay.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Open a new portal; the caller becomes its host.
    async fn create_portal(&self) -> Result<PortalGrant, TransportError>;

    /// Join an open portal as a guest.
    async fn join_portal(&self, portal_id: PortalId) -> Result<JoinGrant, TransportError>;

    /// Leave a portal. Leaving twice is not an error.
    async fn leave_portal(
        &self,
        portal_id: PortalId,
        site_id: SiteId,
    ) -> Result<(), TransportError>;

    /// Tell the relay the site is alive.
    async fn heartbeat(&self, portal_id: PortalId, site_id: SiteId) -> Result<(), TransportError>;
}

/// Publish/subscribe channel scoped to a portal.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Deliver `payload` to every subscriber of the portal, the sender included.
    async fn publish(
        &self,
        portal_id: PortalId,
        sender: SiteId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Take the site's subscription. Envelopes published since the site was
    /// admitted are already queued.
    async fn subscribe(
        &self,
        portal_id: PortalId,
        site_id: SiteId,
    ) -> Result<Subscription, TransportError>;
}

/// Both halves of a transport.
pub trait Transport: Gateway + PubSub {}

impl<T: Gateway + PubSub> Transport for T {}
