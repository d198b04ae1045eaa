//! Follow mode: a guest mirroring the host's focus and cursor.

use portal_types::SiteId;

/// Whose focus a guest is following, if anyone's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FollowState {
    leader: Option<SiteId>,
}

impl FollowState {
    /// Not following anyone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Already following `host`.
    pub fn following(host: SiteId) -> Self {
        Self { leader: Some(host) }
    }

    /// Flip follow mode for `host`. Returns whether the guest now follows.
    pub fn toggle(&mut self, host: SiteId) -> bool {
        self.leader = match self.leader {
            Some(current) if current == host => None,
            _ => Some(host),
        };
        self.leader.is_some()
    }

    /// True if following `site_id`.
    pub fn is_following(&self, site_id: SiteId) -> bool {
        self.leader == Some(site_id)
    }

    /// The followed site.
    pub fn leader(&self) -> Option<SiteId> {
        self.leader
    }

    /// Stop following (e.g. the leader left).
    pub fn stop(&mut self) {
        self.leader = None;
    }
}
