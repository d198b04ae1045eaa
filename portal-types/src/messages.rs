//! Messages multiplexed on a portal channel.
//!
//! These are the payloads that get wrapped in an [`Envelope`](crate::Envelope).
//! The relay only ever produces the membership variants; everything else is
//! published by sites and is opaque to the relay.

use serde::{Deserialize, Serialize};

use crate::{BufferId, Revision, SelectionRange, SiteId, SiteRole, TextEdit, WireError};

/// All possible portal channel messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PortalMessage {
    /// A site was admitted to the portal
    SiteJoined(SiteJoined),
    /// A site left voluntarily
    SiteLeft(SiteLeft),
    /// A site was removed after heartbeat silence
    SiteEvicted(SiteEvicted),
    /// A new guest asks the host for the current portal state
    ReplayRequest(ReplayRequest),
    /// Host answer to a replay request
    PortalState(PortalState),
    /// Full content of one buffer
    BufferSnapshot(BufferSnapshot),
    /// Incremental edits to one buffer
    BufferDelta(BufferDelta),
    /// Title or modified flag changed
    BufferMetadata(BufferMetadata),
    /// Host stopped sharing a buffer
    BufferClosed(BufferClosed),
    /// A guest detected a revision gap
    ResyncRequest(ResyncRequest),
    /// Host focus moved to another buffer
    ActiveBufferChanged(ActiveBufferChanged),
    /// A site's selections changed
    CursorUpdate(CursorUpdate),
}

impl PortalMessage {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Short variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SiteJoined(_) => "SiteJoined",
            Self::SiteLeft(_) => "SiteLeft",
            Self::SiteEvicted(_) => "SiteEvicted",
            Self::ReplayRequest(_) => "ReplayRequest",
            Self::PortalState(_) => "PortalState",
            Self::BufferSnapshot(_) => "BufferSnapshot",
            Self::BufferDelta(_) => "BufferDelta",
            Self::BufferMetadata(_) => "BufferMetadata",
            Self::BufferClosed(_) => "BufferClosed",
            Self::ResyncRequest(_) => "ResyncRequest",
            Self::ActiveBufferChanged(_) => "ActiveBufferChanged",
            Self::CursorUpdate(_) => "CursorUpdate",
        }
    }
}

/// A site was admitted to the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteJoined {
    /// The new site
    pub site_id: SiteId,
    /// Its role
    pub role: SiteRole,
}

/// A site left the portal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteLeft {
    /// The departed site
    pub site_id: SiteId,
}

/// A site was evicted for heartbeat silence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteEvicted {
    /// The evicted site
    pub site_id: SiteId,
}

/// Sent by a joining guest once subscribed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// The guest waiting for state
    pub requester: SiteId,
}

/// Everything a new guest needs to catch up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalState {
    /// Only this site applies the state
    pub recipient: SiteId,
    /// Every buffer the host is sharing
    pub buffers: Vec<BufferSnapshot>,
    /// The host's focused buffer
    pub active_buffer: Option<BufferId>,
    /// Latest known selections of every site
    pub cursors: Vec<CursorUpdate>,
}

/// Full content of a shared buffer at `revision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    /// Buffer identity
    pub buffer_id: BufferId,
    /// Revision the content corresponds to
    pub revision: Revision,
    /// Host-side title (without any remote prefix)
    pub title: String,
    /// Complete text
    pub text: String,
    /// Host-side modified flag
    pub modified: bool,
    /// Host selections at this revision
    pub selections: Vec<SelectionRange>,
}

/// Edits taking a buffer from `revision - 1` to `revision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDelta {
    /// Buffer identity
    pub buffer_id: BufferId,
    /// Revision after applying `edits`
    pub revision: Revision,
    /// Edits in application order
    pub edits: Vec<TextEdit>,
    /// Host-side modified flag after the edits
    pub modified: bool,
}

/// Title or modified flag of a buffer changed without a text change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMetadata {
    /// Buffer identity
    pub buffer_id: BufferId,
    /// Host-side title
    pub title: String,
    /// Host-side modified flag
    pub modified: bool,
}

/// The host closed a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferClosed {
    /// Buffer identity
    pub buffer_id: BufferId,
}

/// A guest cannot apply the next delta and wants a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncRequest {
    /// Buffer identity
    pub buffer_id: BufferId,
    /// Guest asking
    pub requester: SiteId,
    /// Last revision the guest applied
    pub last_applied: Revision,
}

/// The host focused another buffer (or none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveBufferChanged {
    /// The newly focused buffer
    pub buffer_id: Option<BufferId>,
}

/// Full selection set of one site in one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorUpdate {
    /// Whose selections these are
    pub site_id: SiteId,
    /// Buffer the selections belong to
    pub buffer_id: BufferId,
    /// Buffer revision the positions refer to
    pub revision: Revision,
    /// The selections
    pub selections: Vec<SelectionRange>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;

    fn snapshot() -> BufferSnapshot {
        BufferSnapshot {
            buffer_id: BufferId::new(),
            revision: Revision::initial(),
            title: "hello.js".into(),
            text: "const hello = \"world\"".into(),
            modified: false,
            selections: vec![SelectionRange::cursor(Point::new(0, 4))],
        }
    }

    #[test]
    fn snapshot_survives_the_wire() {
        let msg = PortalMessage::BufferSnapshot(snapshot());

        let bytes = msg.to_bytes().unwrap();
        let restored = PortalMessage::from_bytes(&bytes).unwrap();

        assert_eq!(msg, restored);
    }

    #[test]
    fn delta_keeps_edit_order() {
        let msg = PortalMessage::BufferDelta(BufferDelta {
            buffer_id: BufferId::new(),
            revision: Revision::new(7),
            edits: vec![
                TextEdit::insert(Point::new(0, 0), "a"),
                TextEdit::delete(Point::new(0, 1), "b"),
            ],
            modified: true,
        });

        let restored = PortalMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        match restored {
            PortalMessage::BufferDelta(delta) => {
                assert_eq!(delta.revision, Revision::new(7));
                assert_eq!(delta.edits[0].inserted_text, "a");
                assert_eq!(delta.edits[1].deleted_text, "b");
            }
            other => panic!("expected delta, got {}", other.kind()),
        }
    }

    #[test]
    fn portal_state_with_nested_messages() {
        let snap = snapshot();
        let msg = PortalMessage::PortalState(PortalState {
            recipient: SiteId::new(3),
            active_buffer: Some(snap.buffer_id),
            cursors: vec![CursorUpdate {
                site_id: SiteId::FIRST,
                buffer_id: snap.buffer_id,
                revision: Revision::initial(),
                selections: vec![SelectionRange::from_coords(0, 0, 0, 2)],
            }],
            buffers: vec![snap],
        });

        let restored = PortalMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn membership_event_roundtrip() {
        let msg = PortalMessage::SiteJoined(SiteJoined {
            site_id: SiteId::new(2),
            role: SiteRole::Guest,
        });

        let restored = PortalMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert!(matches!(
            restored,
            PortalMessage::SiteJoined(SiteJoined { role: SiteRole::Guest, .. })
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result = PortalMessage::from_bytes(&[0xc1, 0x00, 0xff]);
        assert!(matches!(result, Err(WireError::Deserialization(_))));
    }

    #[test]
    fn kind_names_variant() {
        let msg = PortalMessage::ActiveBufferChanged(ActiveBufferChanged { buffer_id: None });
        assert_eq!(msg.kind(), "ActiveBufferChanged");
    }
}
