//! Identity and ordering types for portals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// A unique identifier for a portal (one shared editing session).
///
/// UUID v4, displayed in hyphenated form so it can be handed to guests.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortalId(uuid::Uuid);

impl PortalId {
    /// Create a new random PortalId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create a PortalId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Get the raw bytes of this PortalId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Default for PortalId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for PortalId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| WireError::InvalidData(format!("invalid portal id {s:?}: {e}")))
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortalId({})", &self.to_string()[..8])
    }
}

/// Identifier of one participant's connection within a portal.
///
/// Allocated by the relay, sequentially per portal. The portal creator
/// always receives [`SiteId::FIRST`]. [`SiteId::RELAY`] is reserved for
/// events the relay itself publishes (membership changes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(u32);

impl SiteId {
    /// Sender id used for relay-originated messages.
    pub const RELAY: SiteId = SiteId(0);

    /// The first site allocated in a portal (its creator).
    pub const FIRST: SiteId = SiteId(1);

    /// Create a SiteId with the given value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value of this SiteId.
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The id allocated after this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.0)
    }
}

/// Role of a site within its portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteRole {
    /// The sharing participant; sole writer of every shared buffer.
    Host,
    /// A joined participant holding read replicas.
    Guest,
}

/// Identity of a shared buffer, stable across edits.
///
/// A host re-opening the same file after a disconnect gets a fresh id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BufferId(uuid::Uuid);

impl BufferId {
    /// Create a new random BufferId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({})", &self.to_string()[..8])
    }
}

/// A monotonically increasing sequence number scoped to one buffer.
///
/// Assigned by the host, the only writer of a buffer. Revision 0 means
/// "nothing applied yet"; the first snapshot of a buffer carries
/// [`Revision::initial`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(u64);

impl Revision {
    /// Create a Revision with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value of this Revision.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Revision representing "no data yet".
    pub fn zero() -> Self {
        Self(0)
    }

    /// Revision of a freshly shared buffer.
    pub fn initial() -> Self {
        Self(1)
    }

    /// Increment the revision by one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}
