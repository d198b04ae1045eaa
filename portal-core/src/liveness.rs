//! Heartbeat liveness tracking.
//!
//! One [`LivenessTracker`] owns a [`HeartbeatRecord`] per (portal, site).
//! Detection ([`LivenessTracker::find_dead`]) is a pure read; the transition
//! to [`Liveness::Dead`] ([`LivenessTracker::mark_dead`]) is separate so the
//! caller decides when eviction happens. Time is always passed in.
//!
//! A dead site never comes back: it has to rejoin and receives a new site id.

use portal_types::{PortalId, SiteId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Address of one site in one portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteKey {
    /// The portal.
    pub portal_id: PortalId,
    /// The site within it.
    pub site_id: SiteId,
}

impl SiteKey {
    /// Create a key.
    pub fn new(portal_id: PortalId, site_id: SiteId) -> Self {
        Self { portal_id, site_id }
    }
}

/// Liveness of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Pinging within the eviction period.
    Alive,
    /// Silent for longer than the eviction period. Terminal.
    Dead,
}

/// Liveness bookkeeping for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    /// Which site.
    pub key: SiteKey,
    /// When the last ping (or registration) was seen.
    pub last_seen: Instant,
    /// Current state.
    pub state: Liveness,
}

/// Errors from recording a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LivenessError {
    /// The site was never registered or has been removed.
    #[error("unknown site {site_id} in portal {portal_id}")]
    UnknownSite {
        /// The portal.
        portal_id: PortalId,
        /// The site.
        site_id: SiteId,
    },
    /// The site was already declared dead and must rejoin.
    #[error("site {site_id} in portal {portal_id} is dead")]
    Dead {
        /// The portal.
        portal_id: PortalId,
        /// The site.
        site_id: SiteId,
    },
}

/// Tracks the last heartbeat of every site.
#[derive(Debug, Clone, Default)]
pub struct LivenessTracker {
    records: HashMap<SiteKey, HeartbeatRecord>,
}

impl LivenessTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a site; it counts as seen at `now`.
    pub fn register(&mut self, key: SiteKey, now: Instant) {
        self.records.insert(
            key,
            HeartbeatRecord {
                key,
                last_seen: now,
                state: Liveness::Alive,
            },
        );
    }

    /// Record a ping from `key` at `now`.
    pub fn record_ping(&mut self, key: SiteKey, now: Instant) -> Result<(), LivenessError> {
        let record = self
            .records
            .get_mut(&key)
            .ok_or(LivenessError::UnknownSite {
                portal_id: key.portal_id,
                site_id: key.site_id,
            })?;

        if record.state == Liveness::Dead {
            return Err(LivenessError::Dead {
                portal_id: key.portal_id,
                site_id: key.site_id,
            });
        }

        // Pings can arrive out of order; never move last_seen backwards.
        if now > record.last_seen {
            record.last_seen = now;
        }
        Ok(())
    }

    /// Alive sites silent for longer than `eviction_period` as of `now`.
    ///
    /// Pure read. Results are sorted so callers evict deterministically.
    pub fn find_dead(&self, now: Instant, eviction_period: Duration) -> Vec<SiteKey> {
        let mut dead: Vec<SiteKey> = self
            .records
            .values()
            .filter(|r| r.state == Liveness::Alive)
            .filter(|r| now.saturating_duration_since(r.last_seen) > eviction_period)
            .map(|r| r.key)
            .collect();
        dead.sort();
        dead
    }

    /// Transition `key` to dead.
    ///
    /// Returns true only for the call that performed the transition, so a
    /// second sweep over the same site is a no-op.
    pub fn mark_dead(&mut self, key: &SiteKey) -> bool {
        match self.records.get_mut(key) {
            Some(record) if record.state == Liveness::Alive => {
                record.state = Liveness::Dead;
                true
            }
            _ => false,
        }
    }

    /// Stop tracking a site (explicit leave, or after eviction completed).
    pub fn remove(&mut self, key: &SiteKey) -> Option<HeartbeatRecord> {
        self.records.remove(key)
    }

    /// Drop every record of a portal.
    pub fn remove_portal(&mut self, portal_id: &PortalId) {
        self.records.retain(|key, _| key.portal_id != *portal_id);
    }

    /// Look up a record.
    pub fn record(&self, key: &SiteKey) -> Option<&HeartbeatRecord> {
        self.records.get(key)
    }

    /// Number of tracked sites.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(500);

    fn key(portal_id: PortalId, site: u32) -> SiteKey {
        SiteKey::new(portal_id, SiteId::new(site))
    }

    #[test]
    fn fresh_sites_are_alive() {
        let mut tracker = LivenessTracker::new();
        let t0 = Instant::now();
        let host = key(PortalId::new(), 1);

        tracker.register(host, t0);

        assert!(tracker.find_dead(t0 + PERIOD, PERIOD).is_empty());
        assert_eq!(tracker.record(&host).unwrap().state, Liveness::Alive);
    }

    #[test]
    fn silence_beyond_period_is_dead() {
        let mut tracker = LivenessTracker::new();
        let t0 = Instant::now();
        let portal = PortalId::new();
        let host = key(portal, 1);
        let guest = key(portal, 2);

        tracker.register(host, t0);
        tracker.register(guest, t0);
        tracker
            .record_ping(guest, t0 + Duration::from_millis(400))
            .unwrap();

        let dead = tracker.find_dead(t0 + Duration::from_millis(600), PERIOD);
        assert_eq!(dead, vec![host]);
    }

    #[test]
    fn find_dead_does_not_transition() {
        let mut tracker = LivenessTracker::new();
        let t0 = Instant::now();
        let host = key(PortalId::new(), 1);
        tracker.register(host, t0);

        let later = t0 + Duration::from_secs(5);
        assert_eq!(tracker.find_dead(later, PERIOD).len(), 1);
        assert_eq!(tracker.find_dead(later, PERIOD).len(), 1);
        assert_eq!(tracker.record(&host).unwrap().state, Liveness::Alive);
    }

    #[test]
    fn mark_dead_happens_once() {
        let mut tracker = LivenessTracker::new();
        let host = key(PortalId::new(), 1);
        tracker.register(host, Instant::now());

        assert!(tracker.mark_dead(&host));
        assert!(!tracker.mark_dead(&host));
        assert!(tracker
            .find_dead(Instant::now() + Duration::from_secs(60), PERIOD)
            .is_empty());
    }

    #[test]
    fn dead_sites_cannot_ping_back_to_life() {
        let mut tracker = LivenessTracker::new();
        let portal = PortalId::new();
        let host = key(portal, 1);
        tracker.register(host, Instant::now());
        tracker.mark_dead(&host);

        let err = tracker.record_ping(host, Instant::now()).unwrap_err();
        assert_eq!(
            err,
            LivenessError::Dead {
                portal_id: portal,
                site_id: SiteId::FIRST
            }
        );
    }

    #[test]
    fn unknown_site_ping_fails() {
        let mut tracker = LivenessTracker::new();
        let result = tracker.record_ping(key(PortalId::new(), 9), Instant::now());
        assert!(matches!(result, Err(LivenessError::UnknownSite { .. })));
    }

    #[test]
    fn late_ping_never_rewinds_last_seen() {
        let mut tracker = LivenessTracker::new();
        let t0 = Instant::now();
        let host = key(PortalId::new(), 1);
        tracker.register(host, t0 + Duration::from_millis(100));

        tracker.record_ping(host, t0).unwrap();

        assert_eq!(
            tracker.record(&host).unwrap().last_seen,
            t0 + Duration::from_millis(100)
        );
    }

    #[test]
    fn remove_portal_drops_all_its_sites() {
        let mut tracker = LivenessTracker::new();
        let now = Instant::now();
        let a = PortalId::new();
        let b = PortalId::new();
        tracker.register(key(a, 1), now);
        tracker.register(key(a, 2), now);
        tracker.register(key(b, 1), now);

        tracker.remove_portal(&a);

        assert_eq!(tracker.len(), 1);
        assert!(tracker.record(&key(b, 1)).is_some());
    }
}
