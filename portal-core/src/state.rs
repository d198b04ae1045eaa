//! Portal session state machine.
//!
//! Pure and side-effect free: it takes events and produces a new state plus
//! the actions to perform. `portal-client` drives one machine per session
//! (shared or joined portal) and executes the actions against the transport.
//!
//! Disposal is terminal and idempotent. A grant that arrives after disposal
//! (the site was allocated while the caller gave up) only yields a
//! [`SessionAction::Leave`] so the relay does not keep a ghost site.

use portal_types::{PortalId, SiteId};

/// Lifecycle of one portal session - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing requested yet.
    Idle,
    /// Waiting for the relay to allocate a site.
    Connecting,
    /// Member of a portal.
    Active {
        /// The portal.
        portal_id: PortalId,
        /// Our site in it.
        site_id: SiteId,
    },
    /// Disposed, or removed by the relay. Terminal.
    Closed,
}

impl SessionState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: SessionEvent) -> (Self, Vec<SessionAction>) {
        match (self, event) {
            // From Idle
            (Self::Idle, SessionEvent::Requested) => {
                (Self::Connecting, vec![SessionAction::Connect])
            }

            // From Connecting
            (Self::Connecting, SessionEvent::Granted { portal_id, site_id }) => (
                Self::Active { portal_id, site_id },
                vec![SessionAction::StartSession { portal_id, site_id }],
            ),
            (Self::Connecting, SessionEvent::Failed { error }) => {
                (Self::Idle, vec![SessionAction::Reject { error }])
            }

            // From Active
            (Self::Active { portal_id, site_id }, SessionEvent::DisposeRequested) => (
                Self::Closed,
                vec![
                    SessionAction::StopSession,
                    SessionAction::Leave { portal_id, site_id },
                ],
            ),
            (Self::Active { .. }, SessionEvent::Removed) => {
                (Self::Closed, vec![SessionAction::StopSession])
            }

            // Grant racing a disposal: give the site back
            (Self::Closed, SessionEvent::Granted { portal_id, site_id }) => {
                (Self::Closed, vec![SessionAction::Leave { portal_id, site_id }])
            }

            (Self::Idle | Self::Connecting, SessionEvent::DisposeRequested) => {
                (Self::Closed, vec![])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Portal and site while active.
    pub fn membership(&self) -> Option<(PortalId, SiteId)> {
        match self {
            Self::Active { portal_id, site_id } => Some((*portal_id, *site_id)),
            _ => None,
        }
    }

    /// Check if the session is active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Check if the session is over.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events in a session's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Share or join was requested.
    Requested,
    /// The relay allocated a site.
    Granted {
        /// The portal.
        portal_id: PortalId,
        /// The allocated site.
        site_id: SiteId,
    },
    /// Allocation failed.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// The relay dropped our site (evicted, or the portal was torn down).
    Removed,
    /// The application disposed the session.
    DisposeRequested,
}

/// Actions to be executed by `portal-client`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Ask the relay for a site.
    Connect,
    /// Subscribe and start the heartbeat and ingestion tasks.
    StartSession {
        /// The portal.
        portal_id: PortalId,
        /// Our site.
        site_id: SiteId,
    },
    /// Stop heartbeat and ingestion tasks.
    StopSession,
    /// Tell the relay we are gone.
    Leave {
        /// The portal.
        portal_id: PortalId,
        /// Our site.
        site_id: SiteId,
    },
    /// Report the failed request to the caller.
    Reject {
        /// Error message describing the failure.
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn granted() -> (PortalId, SiteId, SessionEvent) {
        let portal_id = PortalId::new();
        let site_id = SiteId::new(2);
        (portal_id, site_id, SessionEvent::Granted { portal_id, site_id })
    }

    fn active() -> (SessionState, PortalId, SiteId) {
        let (portal_id, site_id, event) = granted();
        let (state, _) = SessionState::new().on_event(SessionEvent::Requested);
        let (state, _) = state.on_event(event);
        (state, portal_id, site_id)
    }

    #[test]
    fn starts_idle() {
        assert_eq!(SessionState::new(), SessionState::Idle);
    }

    #[test]
    fn request_transitions_to_connecting() {
        let (state, actions) = SessionState::new().on_event(SessionEvent::Requested);
        assert_eq!(state, SessionState::Connecting);
        assert_eq!(actions, vec![SessionAction::Connect]);
    }

    #[test]
    fn grant_starts_session() {
        let (portal_id, site_id, event) = granted();
        let (state, actions) = SessionState::Connecting.on_event(event);

        assert!(state.is_active());
        assert_eq!(state.membership(), Some((portal_id, site_id)));
        assert_eq!(actions, vec![SessionAction::StartSession { portal_id, site_id }]);
    }

    #[test]
    fn failure_rejects_and_returns_to_idle() {
        let (state, actions) = SessionState::Connecting.on_event(SessionEvent::Failed {
            error: "portal not found".into(),
        });
        assert_eq!(state, SessionState::Idle);
        assert_eq!(
            actions,
            vec![SessionAction::Reject {
                error: "portal not found".into()
            }]
        );
    }

    #[test]
    fn dispose_from_active_stops_and_leaves() {
        let (state, portal_id, site_id) = active();
        let (state, actions) = state.on_event(SessionEvent::DisposeRequested);

        assert!(state.is_closed());
        assert_eq!(
            actions,
            vec![
                SessionAction::StopSession,
                SessionAction::Leave { portal_id, site_id }
            ]
        );
    }

    #[test]
    fn dispose_twice_is_a_noop() {
        let (state, _, _) = active();
        let (state, _) = state.on_event(SessionEvent::DisposeRequested);
        let (state, actions) = state.on_event(SessionEvent::DisposeRequested);

        assert!(state.is_closed());
        assert!(actions.is_empty());
    }

    #[test]
    fn dispose_while_connecting_closes() {
        let (state, actions) = SessionState::Connecting.on_event(SessionEvent::DisposeRequested);
        assert!(state.is_closed());
        assert!(actions.is_empty());
    }

    #[test]
    fn grant_after_dispose_gives_site_back() {
        let (portal_id, site_id, event) = granted();
        let (state, actions) = SessionState::Closed.on_event(event);

        assert!(state.is_closed());
        assert_eq!(actions, vec![SessionAction::Leave { portal_id, site_id }]);
    }

    #[test]
    fn removal_stops_without_leaving() {
        let (state, _, _) = active();
        let (state, actions) = state.on_event(SessionEvent::Removed);

        assert!(state.is_closed());
        assert_eq!(actions, vec![SessionAction::StopSession]);
    }

    #[test]
    fn closed_is_terminal() {
        let (state, actions) = SessionState::Closed.on_event(SessionEvent::Requested);
        assert!(state.is_closed());
        assert!(actions.is_empty());
    }
}
