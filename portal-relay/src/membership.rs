//! Portal membership: creation, admission, departure and rosters.
//!
//! Each portal lives behind its own async mutex. Site allocation, roster
//! changes and channel fan-out all happen while holding it, so concurrent
//! joins receive distinct site ids and membership events are ordered with
//! every other broadcast of the portal.
//!
//! A portal whose host left (or was evicted) is closed: it admits nobody and
//! disappears once its last guest is gone.

use dashmap::DashMap;
use portal_types::{
    Envelope, PortalId, PortalMessage, SiteEvicted, SiteId, SiteJoined, SiteLeft, SiteRole,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::channel::{PortalChannel, SubscribeError, Subscription};
use crate::config::LimitsConfig;
use crate::error::{RelayError, Result};

/// One entry of a portal's roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    /// The site.
    pub site_id: SiteId,
    /// Its role.
    pub role: SiteRole,
}

/// Result of creating a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalGrant {
    /// The new portal.
    pub portal_id: PortalId,
    /// The host's site.
    pub site_id: SiteId,
}

/// Result of joining a portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGrant {
    /// The joined portal.
    pub portal_id: PortalId,
    /// The guest's new site.
    pub site_id: SiteId,
    /// The host's site.
    pub host_site_id: SiteId,
    /// Everyone in the portal, the new site included.
    pub roster: Vec<RosterEntry>,
}

/// How a site stopped being a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// It left on its own.
    Left,
    /// It stopped sending heartbeats.
    Evicted,
}

#[derive(Debug)]
struct PortalRecord {
    portal_id: PortalId,
    host: Option<SiteId>,
    sites: BTreeMap<SiteId, SiteRole>,
    next_site: SiteId,
    channel: PortalChannel,
}

impl PortalRecord {
    fn new(portal_id: PortalId) -> Self {
        Self {
            portal_id,
            host: None,
            sites: BTreeMap::new(),
            next_site: SiteId::FIRST,
            channel: PortalChannel::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.host.is_none()
    }

    fn admit(&mut self, role: SiteRole) -> SiteId {
        let site_id = self.next_site;
        self.next_site = site_id.next();
        self.sites.insert(site_id, role);
        self.channel.open(site_id);
        if role == SiteRole::Host {
            self.host = Some(site_id);
        }
        site_id
    }

    fn roster(&self) -> Vec<RosterEntry> {
        self.sites
            .iter()
            .map(|(site_id, role)| RosterEntry {
                site_id: *site_id,
                role: *role,
            })
            .collect()
    }

    fn broadcast(&mut self, sender: SiteId, message: &PortalMessage) -> Result<u64> {
        let envelope = Envelope::seal(self.portal_id, sender, message)?;
        Ok(self.channel.publish(envelope))
    }
}

/// All portals known to the relay.
#[derive(Debug)]
pub struct PortalRegistry {
    limits: LimitsConfig,
    portals: DashMap<PortalId, Arc<Mutex<PortalRecord>>>,
    /// Serializes creation so the portal limit check and insert are atomic.
    admission: Mutex<()>,
}

impl PortalRegistry {
    /// Create an empty registry enforcing `limits`.
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            portals: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    fn record(&self, portal_id: &PortalId) -> Option<Arc<Mutex<PortalRecord>>> {
        self.portals.get(portal_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Open a portal with a fresh host site.
    pub async fn create(&self) -> Result<PortalGrant> {
        let _admission = self.admission.lock().await;
        if self.portals.len() >= self.limits.max_portals {
            return Err(RelayError::Allocation {
                reason: format!("portal limit of {} reached", self.limits.max_portals),
            });
        }

        let portal_id = PortalId::new();
        let mut record = PortalRecord::new(portal_id);
        let site_id = record.admit(SiteRole::Host);
        record.broadcast(
            SiteId::RELAY,
            &PortalMessage::SiteJoined(SiteJoined {
                site_id,
                role: SiteRole::Host,
            }),
        )?;
        self.portals.insert(portal_id, Arc::new(Mutex::new(record)));

        tracing::info!("Portal created: {:?} (host site {})", portal_id, site_id);
        Ok(PortalGrant { portal_id, site_id })
    }

    /// Admit a guest.
    pub async fn join(&self, portal_id: PortalId) -> Result<JoinGrant> {
        let record = self
            .record(&portal_id)
            .ok_or(RelayError::PortalNotFound { portal_id })?;
        let mut guard = record.lock().await;

        let host_site_id = match guard.host {
            Some(host) => host,
            None => return Err(RelayError::PortalNotFound { portal_id }),
        };
        if guard.sites.len() >= self.limits.max_sites_per_portal {
            return Err(RelayError::Allocation {
                reason: format!(
                    "portal {} is full ({} sites)",
                    portal_id, self.limits.max_sites_per_portal
                ),
            });
        }

        let site_id = guard.admit(SiteRole::Guest);
        guard.broadcast(
            SiteId::RELAY,
            &PortalMessage::SiteJoined(SiteJoined {
                site_id,
                role: SiteRole::Guest,
            }),
        )?;

        tracing::info!(
            "Site {} joined {:?} ({} sites)",
            site_id,
            portal_id,
            guard.sites.len()
        );
        Ok(JoinGrant {
            portal_id,
            site_id,
            host_site_id,
            roster: guard.roster(),
        })
    }

    /// Remove a site. Returns false if it was not a member (already gone).
    ///
    /// The departure is broadcast to the remaining sites. Removing the host
    /// closes the portal.
    pub async fn remove(
        &self,
        portal_id: PortalId,
        site_id: SiteId,
        departure: Departure,
    ) -> Result<bool> {
        let Some(record) = self.record(&portal_id) else {
            return Ok(false);
        };
        let mut guard = record.lock().await;

        if guard.sites.remove(&site_id).is_none() {
            return Ok(false);
        }
        guard.channel.close(site_id);
        if guard.host == Some(site_id) {
            guard.host = None;
            tracing::info!("Host of {:?} gone, portal closed", portal_id);
        }

        let message = match departure {
            Departure::Left => PortalMessage::SiteLeft(SiteLeft { site_id }),
            Departure::Evicted => PortalMessage::SiteEvicted(SiteEvicted { site_id }),
        };
        let broadcast = guard.broadcast(SiteId::RELAY, &message);

        let empty = guard.sites.is_empty();
        drop(guard);
        if empty {
            self.portals.remove(&portal_id);
            tracing::debug!("Portal {:?} dropped (no sites left)", portal_id);
        }

        broadcast?;
        Ok(true)
    }

    /// Deliver an opaque payload from a member site.
    pub async fn publish(
        &self,
        portal_id: PortalId,
        sender: SiteId,
        payload: Vec<u8>,
    ) -> Result<u64> {
        let record = self
            .record(&portal_id)
            .ok_or(RelayError::PortalNotFound { portal_id })?;
        let mut guard = record.lock().await;

        if !guard.sites.contains_key(&sender) {
            return Err(RelayError::SiteNotFound {
                portal_id,
                site_id: sender,
            });
        }
        Ok(guard.channel.publish(Envelope::new(portal_id, sender, payload)))
    }

    /// Take the subscription of a member site.
    pub async fn subscribe(&self, portal_id: PortalId, site_id: SiteId) -> Result<Subscription> {
        let record = self
            .record(&portal_id)
            .ok_or(RelayError::PortalNotFound { portal_id })?;
        let mut guard = record.lock().await;

        guard.channel.subscribe(site_id).map_err(|e| match e {
            SubscribeError::NotMember => RelayError::SiteNotFound { portal_id, site_id },
            SubscribeError::AlreadyTaken => RelayError::AlreadySubscribed { portal_id, site_id },
        })
    }

    /// Current members of a portal.
    pub async fn roster(&self, portal_id: PortalId) -> Result<Vec<RosterEntry>> {
        let record = self
            .record(&portal_id)
            .ok_or(RelayError::PortalNotFound { portal_id })?;
        let guard = record.lock().await;
        Ok(guard.roster())
    }

    /// True if the portal admits new guests.
    pub async fn is_open(&self, portal_id: PortalId) -> bool {
        match self.record(&portal_id) {
            Some(record) => !record.lock().await.is_closed(),
            None => false,
        }
    }

    /// Number of portals (open or closed but not yet empty).
    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PortalRegistry {
        PortalRegistry::new(LimitsConfig::default())
    }

    fn drain(rx: &mut Subscription) -> Vec<PortalMessage> {
        let mut messages = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            messages.push(envelope.open().unwrap());
        }
        messages
    }

    #[tokio::test]
    async fn host_gets_first_site() {
        let registry = registry();
        let grant = registry.create().await.unwrap();

        assert_eq!(grant.site_id, SiteId::FIRST);
        assert_eq!(
            registry.roster(grant.portal_id).await.unwrap(),
            vec![RosterEntry {
                site_id: SiteId::FIRST,
                role: SiteRole::Host
            }]
        );
    }

    #[tokio::test]
    async fn guests_get_sequential_ids() {
        let registry = registry();
        let portal = registry.create().await.unwrap().portal_id;

        let a = registry.join(portal).await.unwrap();
        let b = registry.join(portal).await.unwrap();

        assert_eq!(a.site_id, SiteId::new(2));
        assert_eq!(b.site_id, SiteId::new(3));
        assert_eq!(b.host_site_id, SiteId::FIRST);
        assert_eq!(b.roster.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_joins_get_distinct_ids() {
        let registry = Arc::new(registry());
        let portal = registry.create().await.unwrap().portal_id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.join(portal).await }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().site_id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
    }

    #[tokio::test]
    async fn joining_unknown_portal_fails() {
        let registry = registry();
        let err = registry.join(PortalId::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::PortalNotFound { .. }));
    }

    #[tokio::test]
    async fn site_limit_is_enforced() {
        let registry = PortalRegistry::new(LimitsConfig {
            max_portals: 4,
            max_sites_per_portal: 2,
        });
        let portal = registry.create().await.unwrap().portal_id;
        registry.join(portal).await.unwrap();

        let err = registry.join(portal).await.unwrap_err();
        assert!(matches!(err, RelayError::Allocation { .. }));
    }

    #[tokio::test]
    async fn portal_limit_is_enforced() {
        let registry = PortalRegistry::new(LimitsConfig {
            max_portals: 1,
            max_sites_per_portal: 2,
        });
        registry.create().await.unwrap();
        assert!(matches!(
            registry.create().await,
            Err(RelayError::Allocation { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_respect_portal_limit() {
        let registry = Arc::new(PortalRegistry::new(LimitsConfig {
            max_portals: 3,
            max_sites_per_portal: 2,
        }));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.create().await }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(err) => assert!(matches!(err, RelayError::Allocation { .. })),
            }
        }
        assert_eq!(created, 3);
        assert_eq!(registry.portal_count(), 3);
    }

    #[tokio::test]
    async fn membership_changes_are_broadcast_in_order() {
        let registry = registry();
        let grant = registry.create().await.unwrap();
        let mut host_rx = registry.subscribe(grant.portal_id, grant.site_id).await.unwrap();

        let guest = registry.join(grant.portal_id).await.unwrap();
        registry
            .remove(grant.portal_id, guest.site_id, Departure::Left)
            .await
            .unwrap();

        assert_eq!(
            drain(&mut host_rx),
            vec![
                PortalMessage::SiteJoined(SiteJoined {
                    site_id: SiteId::FIRST,
                    role: SiteRole::Host
                }),
                PortalMessage::SiteJoined(SiteJoined {
                    site_id: guest.site_id,
                    role: SiteRole::Guest
                }),
                PortalMessage::SiteLeft(SiteLeft {
                    site_id: guest.site_id
                }),
            ]
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = registry();
        let grant = registry.create().await.unwrap();
        let guest = registry.join(grant.portal_id).await.unwrap();

        assert!(registry
            .remove(grant.portal_id, guest.site_id, Departure::Evicted)
            .await
            .unwrap());
        assert!(!registry
            .remove(grant.portal_id, guest.site_id, Departure::Evicted)
            .await
            .unwrap());
        assert!(!registry
            .remove(PortalId::new(), guest.site_id, Departure::Left)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn host_departure_closes_portal() {
        let registry = registry();
        let grant = registry.create().await.unwrap();
        let guest = registry.join(grant.portal_id).await.unwrap();
        let mut guest_rx = registry.subscribe(grant.portal_id, guest.site_id).await.unwrap();

        registry
            .remove(grant.portal_id, grant.site_id, Departure::Evicted)
            .await
            .unwrap();

        assert!(!registry.is_open(grant.portal_id).await);
        assert!(matches!(
            registry.join(grant.portal_id).await,
            Err(RelayError::PortalNotFound { .. })
        ));
        assert!(drain(&mut guest_rx).contains(&PortalMessage::SiteEvicted(SiteEvicted {
            site_id: grant.site_id
        })));

        registry
            .remove(grant.portal_id, guest.site_id, Departure::Left)
            .await
            .unwrap();
        assert_eq!(registry.portal_count(), 0);
    }

    #[tokio::test]
    async fn non_members_cannot_publish() {
        let registry = registry();
        let grant = registry.create().await.unwrap();

        let err = registry
            .publish(grant.portal_id, SiteId::new(7), vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::SiteNotFound { .. }));
    }

    #[tokio::test]
    async fn subscription_is_handed_out_once() {
        let registry = registry();
        let grant = registry.create().await.unwrap();

        registry.subscribe(grant.portal_id, grant.site_id).await.unwrap();
        let err = registry
            .subscribe(grant.portal_id, grant.site_id)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AlreadySubscribed { .. }));
    }
}
