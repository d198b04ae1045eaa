//! Envelope - the channel wrapper for all portal messages.

use serde::{Deserialize, Serialize};

use crate::{PortalId, PortalMessage, SiteId, WireError};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// The envelope wraps every channel message with routing metadata.
///
/// This is the layer the relay sees. The payload is a MessagePack-encoded
/// [`PortalMessage`] and is opaque to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version (currently 1)
    pub version: u8,
    /// Portal whose channel carried the message
    pub portal_id: PortalId,
    /// Publishing site ([`SiteId::RELAY`] for membership events)
    pub sender: SiteId,
    /// Relay-assigned position in the channel (0 until published)
    pub sequence: u64,
    /// Encoded inner message
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Create an unsequenced envelope around an already encoded payload.
    pub fn new(portal_id: PortalId, sender: SiteId, payload: Vec<u8>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            portal_id,
            sender,
            sequence: 0,
            payload,
        }
    }

    /// Encode `message` and wrap it.
    pub fn seal(
        portal_id: PortalId,
        sender: SiteId,
        message: &PortalMessage,
    ) -> Result<Self, WireError> {
        Ok(Self::new(portal_id, sender, message.to_bytes()?))
    }

    /// Decode the inner message.
    pub fn open(&self) -> Result<PortalMessage, WireError> {
        if self.version != ENVELOPE_VERSION {
            return Err(WireError::InvalidData(format!(
                "unsupported envelope version: {}",
                self.version
            )));
        }
        PortalMessage::from_bytes(&self.payload)
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}
