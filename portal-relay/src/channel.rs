//! Per-portal ordered broadcast channel.
//!
//! A site gets its outbox the moment it is admitted, and the receiving end is
//! parked until the site subscribes. Nothing published between admission and
//! subscription is lost.
//!
//! The channel is only ever touched under its portal's lock, so every
//! subscriber observes the same total order, numbered by `sequence`.

use portal_types::{Envelope, SiteId};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// Receiving end of a site's subscription.
pub type Subscription = mpsc::UnboundedReceiver<Envelope>;

/// Why a subscription could not be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeError {
    /// The site has no outbox here.
    NotMember,
    /// The receiver was already taken.
    AlreadyTaken,
}

/// Fan-out state of one portal.
#[derive(Debug, Default)]
pub struct PortalChannel {
    outboxes: BTreeMap<SiteId, mpsc::UnboundedSender<Envelope>>,
    parked: HashMap<SiteId, Subscription>,
    next_sequence: u64,
}

impl PortalChannel {
    /// A channel with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the outbox of a newly admitted site.
    pub fn open(&mut self, site_id: SiteId) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(site_id, tx);
        self.parked.insert(site_id, rx);
    }

    /// Hand out the receiver of `site_id`.
    pub fn subscribe(&mut self, site_id: SiteId) -> Result<Subscription, SubscribeError> {
        if !self.outboxes.contains_key(&site_id) {
            return Err(SubscribeError::NotMember);
        }
        self.parked
            .remove(&site_id)
            .ok_or(SubscribeError::AlreadyTaken)
    }

    /// Drop the outbox of `site_id`; its receiver ends after draining.
    pub fn close(&mut self, site_id: SiteId) -> bool {
        self.parked.remove(&site_id);
        self.outboxes.remove(&site_id).is_some()
    }

    /// Sequence the envelope and deliver it to every outbox.
    ///
    /// Returns the assigned sequence number.
    pub fn publish(&mut self, mut envelope: Envelope) -> u64 {
        self.next_sequence += 1;
        envelope.sequence = self.next_sequence;

        let mut gone = Vec::new();
        for (site_id, outbox) in &self.outboxes {
            if outbox.send(envelope.clone()).is_err() {
                gone.push(*site_id);
            }
        }
        for site_id in gone {
            // Receiver dropped without leaving; stop delivering to it.
            tracing::debug!(
                "Dropping outbox of site {} in {:?}",
                site_id,
                envelope.portal_id
            );
            self.outboxes.remove(&site_id);
        }

        envelope.sequence
    }

    /// Number of open outboxes.
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// True if there are no outboxes.
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}
