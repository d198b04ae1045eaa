//! Error types for portal-relay.

use portal_types::{PortalId, SiteId, WireError};

/// Main error type for portal-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No live host is registered for this portal.
    #[error("portal not found: {portal_id}")]
    PortalNotFound {
        /// The requested portal.
        portal_id: PortalId,
    },

    /// The relay cannot allocate a portal or site.
    #[error("allocation failed: {reason}")]
    Allocation {
        /// Which limit was hit.
        reason: String,
    },

    /// The site is not (or no longer) a member of the portal.
    #[error("site {site_id} not found in portal {portal_id}")]
    SiteNotFound {
        /// The portal.
        portal_id: PortalId,
        /// The site.
        site_id: SiteId,
    },

    /// The site's subscription was already handed out.
    #[error("site {site_id} already subscribed to portal {portal_id}")]
    AlreadySubscribed {
        /// The portal.
        portal_id: PortalId,
        /// The site.
        site_id: SiteId,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A relay-originated message could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
