//! Notifications emitted by portal sessions.

use portal_types::{BufferId, PortalId, Revision, SiteId, SiteRole};
use tokio::sync::broadcast;

/// Something observable happened in a portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalEvent {
    /// A site was admitted.
    SiteJoined {
        /// The portal.
        portal_id: PortalId,
        /// The new site.
        site_id: SiteId,
        /// Its role.
        role: SiteRole,
    },
    /// A site left.
    SiteLeft {
        /// The portal.
        portal_id: PortalId,
        /// The departed site.
        site_id: SiteId,
    },
    /// A site was evicted for heartbeat silence.
    SiteEvicted {
        /// The portal.
        portal_id: PortalId,
        /// The evicted site.
        site_id: SiteId,
    },
    /// A replica of a host buffer was created.
    ReplicaOpened {
        /// The buffer.
        buffer_id: BufferId,
    },
    /// A replica caught up to a new revision.
    ReplicaUpdated {
        /// The buffer.
        buffer_id: BufferId,
        /// Its revision now.
        revision: Revision,
    },
    /// The host stopped sharing a buffer and the replica was dropped.
    ReplicaClosed {
        /// The buffer.
        buffer_id: BufferId,
    },
    /// A replica became an independent local buffer.
    ReplicaDetached {
        /// The buffer.
        buffer_id: BufferId,
    },
    /// The title shown for a buffer changed.
    TitleChanged {
        /// The buffer.
        buffer_id: BufferId,
        /// The new title.
        title: String,
    },
    /// The host focused another buffer.
    ActiveBufferChanged {
        /// The newly focused buffer.
        buffer_id: Option<BufferId>,
    },
    /// A site's selections in a buffer changed.
    SelectionsChanged {
        /// The buffer.
        buffer_id: BufferId,
        /// Whose selections.
        site_id: SiteId,
    },
    /// A replica asked the host for a fresh snapshot.
    ResyncRequested {
        /// The buffer.
        buffer_id: BufferId,
        /// Last revision it applied.
        last_applied: Revision,
    },
    /// The host of a joined portal is gone.
    HostLost {
        /// The portal.
        portal_id: PortalId,
        /// True if the host was evicted rather than leaving.
        evicted: bool,
    },
    /// Follow mode was switched.
    FollowChanged {
        /// Whether the guest now follows the host.
        following: bool,
    },
    /// The relay dropped this site; the session is over.
    SessionEnded {
        /// The portal.
        portal_id: PortalId,
    },
}

/// Sending half of the event channel shared by a client's sessions.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<PortalEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event; having no listener is fine.
    pub(crate) fn emit(&self, event: PortalEvent) {
        tracing::trace!(?event, "portal event");
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PortalEvent> {
        self.tx.subscribe()
    }
}
