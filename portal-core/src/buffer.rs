//! Shared buffers: the host's authoritative copy and the guests' replicas.
//!
//! The host is the only writer of a buffer. Every host edit produces a
//! [`BufferDelta`] tagged with the next [`Revision`]; replicas apply deltas
//! strictly in revision order and fall back to a full snapshot whenever the
//! stream has a gap or no longer matches their text.
//!
//! When the host disappears a replica is *detached*: it stops following the
//! stream, keeps its text, becomes modified and writable, and is retitled
//! [`DETACHED_TITLE`].

use portal_types::{
    BufferDelta, BufferId, BufferMetadata, BufferSnapshot, Revision, SelectionRange, TextEdit,
};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::selection::SelectionSet;
use crate::text::{apply_edits, EditError};

/// Prefix of a replica's title while attached.
pub const REMOTE_TITLE_PREFIX: &str = "Remote Buffer: ";

/// Title of a replica once the host is gone.
pub const DETACHED_TITLE: &str = "untitled";

/// Title shown on a guest for a host buffer titled `host_title`.
pub fn remote_title(host_title: &str) -> String {
    format!("{REMOTE_TITLE_PREFIX}{host_title}")
}

/// Errors from buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Guests cannot edit an attached replica.
    #[error("buffer {buffer_id} is a read-only replica")]
    ReadOnlyReplica {
        /// The replica.
        buffer_id: BufferId,
    },
    /// No such buffer.
    #[error("unknown buffer {buffer_id}")]
    UnknownBuffer {
        /// The requested id.
        buffer_id: BufferId,
    },
    /// The edit does not apply to the buffer's text.
    #[error("invalid edit in buffer {buffer_id}: {source}")]
    InvalidEdit {
        /// The buffer.
        buffer_id: BufferId,
        /// What went wrong.
        #[source]
        source: EditError,
    },
}

/// Why a replica needs a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncReason {
    /// A delta arrived out of order (or one was lost).
    StaleRevision {
        /// Revision the replica can apply next.
        expected: Revision,
        /// Revision that arrived.
        received: Revision,
    },
    /// The delta's deleted text does not match the replica.
    Mismatch(EditError),
}

/// Result of feeding a message to a replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaOutcome {
    /// The replica changed.
    Applied,
    /// Duplicate, outdated, or the replica is not listening.
    Ignored,
    /// The replica cannot continue from the stream; ask the host for a snapshot.
    ResyncNeeded(ResyncReason),
}

/// The authoritative copy of a buffer, owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBuffer {
    id: BufferId,
    title: String,
    text: String,
    modified: bool,
    revision: Revision,
    selections: SelectionSet,
}

impl HostBuffer {
    /// Start sharing a buffer. It is assigned a fresh id and revision 1.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: BufferId::new(),
            title: title.into(),
            text: text.into(),
            modified: false,
            revision: Revision::initial(),
            selections: SelectionSet::default(),
        }
    }

    /// Buffer id.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Title as the host sees it.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Current text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Modified flag.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Current revision.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Host selections.
    pub fn selections(&self) -> &SelectionSet {
        &self.selections
    }

    /// Apply `edits` atomically and produce the delta for replicas.
    pub fn edit(&mut self, edits: Vec<TextEdit>) -> Result<BufferDelta, EditError> {
        apply_edits(&mut self.text, &edits)?;
        self.revision = self.revision.next();
        self.modified = true;
        self.selections = self.selections.clamped(&self.text);
        Ok(BufferDelta {
            buffer_id: self.id,
            revision: self.revision,
            edits,
            modified: self.modified,
        })
    }

    /// Change the title.
    pub fn rename(&mut self, title: impl Into<String>) -> BufferMetadata {
        self.title = title.into();
        self.metadata()
    }

    /// Change the modified flag (e.g. after saving).
    pub fn set_modified(&mut self, modified: bool) -> BufferMetadata {
        self.modified = modified;
        self.metadata()
    }

    /// Replace the host selections; they are normalized and clamped to the text.
    pub fn set_selections(&mut self, ranges: &[SelectionRange]) -> &SelectionSet {
        self.selections = SelectionSet::new(ranges.iter().copied()).clamped(&self.text);
        &self.selections
    }

    /// Full state at the current revision.
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            buffer_id: self.id,
            revision: self.revision,
            title: self.title.clone(),
            text: self.text.clone(),
            modified: self.modified,
            selections: self.selections.to_vec(),
        }
    }

    fn metadata(&self) -> BufferMetadata {
        BufferMetadata {
            buffer_id: self.id,
            title: self.title.clone(),
            modified: self.modified,
        }
    }
}

/// A guest's mirror of a host buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaBuffer {
    id: BufferId,
    host_title: String,
    text: String,
    modified: bool,
    revision: Revision,
    detached: bool,
    resync_pending: bool,
}

impl ReplicaBuffer {
    /// Create a replica from the host's snapshot.
    pub fn from_snapshot(snapshot: &BufferSnapshot) -> Self {
        Self {
            id: snapshot.buffer_id,
            host_title: snapshot.title.clone(),
            text: snapshot.text.clone(),
            modified: snapshot.modified,
            revision: snapshot.revision,
            detached: false,
            resync_pending: false,
        }
    }

    /// Buffer id (same as the host's).
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Title as shown on the guest.
    pub fn title(&self) -> String {
        if self.detached {
            DETACHED_TITLE.to_string()
        } else {
            remote_title(&self.host_title)
        }
    }

    /// Title as the host last reported it.
    pub fn host_title(&self) -> &str {
        &self.host_title
    }

    /// Current text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Modified flag.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Last applied revision.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// True once the host is gone.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// True while waiting for a snapshot after a gap.
    pub fn is_resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// Replace the content with a snapshot.
    ///
    /// Applied when it is newer than the replica, or when a resync is pending
    /// (a snapshot at the same revision then repairs a mismatch).
    pub fn apply_snapshot(&mut self, snapshot: &BufferSnapshot) -> ReplicaOutcome {
        if self.detached || snapshot.buffer_id != self.id {
            return ReplicaOutcome::Ignored;
        }
        if !self.resync_pending && snapshot.revision <= self.revision {
            return ReplicaOutcome::Ignored;
        }
        self.host_title = snapshot.title.clone();
        self.text = snapshot.text.clone();
        self.modified = snapshot.modified;
        self.revision = snapshot.revision;
        self.resync_pending = false;
        ReplicaOutcome::Applied
    }

    /// Apply a delta if it is exactly the next revision.
    pub fn apply_delta(&mut self, delta: &BufferDelta) -> ReplicaOutcome {
        if self.detached || self.resync_pending || delta.buffer_id != self.id {
            return ReplicaOutcome::Ignored;
        }
        if delta.revision <= self.revision {
            return ReplicaOutcome::Ignored;
        }

        let expected = self.revision.next();
        if delta.revision != expected {
            self.resync_pending = true;
            return ReplicaOutcome::ResyncNeeded(ResyncReason::StaleRevision {
                expected,
                received: delta.revision,
            });
        }

        if let Err(err) = apply_edits(&mut self.text, &delta.edits) {
            self.resync_pending = true;
            return ReplicaOutcome::ResyncNeeded(ResyncReason::Mismatch(err));
        }
        self.revision = delta.revision;
        self.modified = delta.modified;
        ReplicaOutcome::Applied
    }

    /// Apply a title/modified change.
    pub fn apply_metadata(&mut self, metadata: &BufferMetadata) -> ReplicaOutcome {
        if self.detached || metadata.buffer_id != self.id {
            return ReplicaOutcome::Ignored;
        }
        if self.host_title == metadata.title && self.modified == metadata.modified {
            return ReplicaOutcome::Ignored;
        }
        self.host_title = metadata.title.clone();
        self.modified = metadata.modified;
        ReplicaOutcome::Applied
    }

    /// Detach from the host. Returns true only the first time.
    pub fn detach(&mut self) -> bool {
        if self.detached {
            return false;
        }
        self.detached = true;
        self.modified = true;
        self.resync_pending = false;
        true
    }

    /// Edit the replica locally; only allowed once detached.
    pub fn edit_local(&mut self, edits: &[TextEdit]) -> Result<(), BufferError> {
        if !self.detached {
            return Err(BufferError::ReadOnlyReplica { buffer_id: self.id });
        }
        apply_edits(&mut self.text, edits).map_err(|source| BufferError::InvalidEdit {
            buffer_id: self.id,
            source,
        })?;
        self.modified = true;
        Ok(())
    }
}

/// A buffer as one site holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedBuffer {
    /// The site is the host of this buffer.
    HostOwned(HostBuffer),
    /// The site mirrors someone else's buffer.
    GuestReplica(ReplicaBuffer),
}

impl SharedBuffer {
    /// Buffer id.
    pub fn id(&self) -> BufferId {
        match self {
            Self::HostOwned(b) => b.id(),
            Self::GuestReplica(r) => r.id(),
        }
    }

    /// Title as shown locally.
    pub fn title(&self) -> String {
        match self {
            Self::HostOwned(b) => b.title().to_string(),
            Self::GuestReplica(r) => r.title(),
        }
    }

    /// Current text.
    pub fn text(&self) -> &str {
        match self {
            Self::HostOwned(b) => b.text(),
            Self::GuestReplica(r) => r.text(),
        }
    }

    /// Modified flag.
    pub fn is_modified(&self) -> bool {
        match self {
            Self::HostOwned(b) => b.is_modified(),
            Self::GuestReplica(r) => r.is_modified(),
        }
    }

    /// Current (or last applied) revision.
    pub fn revision(&self) -> Revision {
        match self {
            Self::HostOwned(b) => b.revision(),
            Self::GuestReplica(r) => r.revision(),
        }
    }

    /// Apply a local edit.
    ///
    /// On the host this yields the delta to publish; on a detached replica the
    /// edit stays local and `None` is returned.
    pub fn edit(&mut self, edits: Vec<TextEdit>) -> Result<Option<BufferDelta>, BufferError> {
        match self {
            Self::HostOwned(b) => {
                let buffer_id = b.id();
                b.edit(edits)
                    .map(Some)
                    .map_err(|source| BufferError::InvalidEdit { buffer_id, source })
            }
            Self::GuestReplica(r) => r.edit_local(&edits).map(|()| None),
        }
    }

    /// The local view handed out to callers.
    pub fn binding(&self) -> BufferBinding {
        match self {
            Self::HostOwned(b) => BufferBinding {
                buffer_id: b.id(),
                title: b.title().to_string(),
                text: b.text().to_string(),
                modified: b.is_modified(),
                revision: b.revision(),
                is_host: true,
                detached: false,
            },
            Self::GuestReplica(r) => BufferBinding {
                buffer_id: r.id(),
                title: r.title(),
                text: r.text().to_string(),
                modified: r.is_modified(),
                revision: r.revision(),
                is_host: false,
                detached: r.is_detached(),
            },
        }
    }
}

/// Read-only view of a shared buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferBinding {
    /// Buffer id.
    pub buffer_id: BufferId,
    /// Title as shown locally.
    pub title: String,
    /// Text.
    pub text: String,
    /// Modified flag.
    pub modified: bool,
    /// Revision.
    pub revision: Revision,
    /// True if the local site owns the buffer.
    pub is_host: bool,
    /// True if the replica has been detached.
    pub detached: bool,
}

/// All buffers of one site, in the order they were shared.
#[derive(Debug, Clone, Default)]
pub struct BufferTable {
    buffers: HashMap<BufferId, SharedBuffer>,
    order: Vec<BufferId>,
}

impl BufferTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a buffer.
    pub fn insert(&mut self, buffer: SharedBuffer) {
        let id = buffer.id();
        if self.buffers.insert(id, buffer).is_none() {
            self.order.push(id);
        }
    }

    /// Remove a buffer.
    pub fn remove(&mut self, buffer_id: BufferId) -> Option<SharedBuffer> {
        let removed = self.buffers.remove(&buffer_id);
        if removed.is_some() {
            self.order.retain(|id| *id != buffer_id);
        }
        removed
    }

    /// Look up a buffer.
    pub fn get(&self, buffer_id: BufferId) -> Option<&SharedBuffer> {
        self.buffers.get(&buffer_id)
    }

    /// Look up a buffer mutably.
    pub fn get_mut(&mut self, buffer_id: BufferId) -> Option<&mut SharedBuffer> {
        self.buffers.get_mut(&buffer_id)
    }

    /// The host buffer with this id.
    pub fn host_buffer_mut(&mut self, buffer_id: BufferId) -> Result<&mut HostBuffer, BufferError> {
        match self.buffers.get_mut(&buffer_id) {
            Some(SharedBuffer::HostOwned(b)) => Ok(b),
            _ => Err(BufferError::UnknownBuffer { buffer_id }),
        }
    }

    /// The replica with this id.
    pub fn replica_mut(&mut self, buffer_id: BufferId) -> Option<&mut ReplicaBuffer> {
        match self.buffers.get_mut(&buffer_id) {
            Some(SharedBuffer::GuestReplica(r)) => Some(r),
            _ => None,
        }
    }

    /// Every replica.
    pub fn replicas_mut(&mut self) -> impl Iterator<Item = &mut ReplicaBuffer> {
        self.buffers.values_mut().filter_map(|b| match b {
            SharedBuffer::GuestReplica(r) => Some(r),
            SharedBuffer::HostOwned(_) => None,
        })
    }

    /// Ids in sharing order.
    pub fn ids(&self) -> &[BufferId] {
        &self.order
    }

    /// Buffers in sharing order.
    pub fn iter(&self) -> impl Iterator<Item = &SharedBuffer> {
        self.order.iter().filter_map(|id| self.buffers.get(id))
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True if there are no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
