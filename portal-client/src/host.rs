//! The sharing side of a portal.
//!
//! The host owns every shared buffer. Local changes go through
//! [`HostPortal`], which updates the workspace and publishes the matching
//! message while holding the session lock, so messages leave in the same order
//! the revisions were assigned. A background task answers replay and resync
//! requests and shows guests' cursors.

use portal_core::{
    BufferBinding, BufferTable, CursorOutcome, CursorStore, HostBuffer, Placement, SelectionSet,
    SharedBuffer,
};
use portal_relay::{RosterEntry, Subscription};
use portal_types::{
    ActiveBufferChanged, BufferClosed, BufferId, CursorUpdate, Envelope, Point, PortalId,
    PortalMessage, PortalState, ResyncRequest, Revision, SelectionRange, SiteId, SiteRole,
    TextEdit,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{PortalError, Result};
use crate::events::PortalEvent;
use crate::session::SessionCore;

#[derive(Debug, Default)]
struct HostState {
    buffers: BufferTable,
    active: Option<BufferId>,
    cursors: CursorStore,
    roster: BTreeMap<SiteId, SiteRole>,
}

#[derive(Debug)]
struct HostInner {
    core: SessionCore,
    state: Mutex<HostState>,
}

/// A portal shared by this site.
#[derive(Debug, Clone)]
pub struct HostPortal {
    inner: Arc<HostInner>,
}

impl HostPortal {
    /// Wrap an active session and start ingesting its subscription.
    pub(crate) fn start(core: SessionCore, subscription: Subscription) -> Self {
        let mut state = HostState::default();
        state.roster.insert(core.site_id, SiteRole::Host);

        let inner = Arc::new(HostInner {
            core,
            state: Mutex::new(state),
        });
        let handle = tokio::spawn(ingest(Arc::clone(&inner), subscription));
        inner.core.set_ingest(handle);
        Self { inner }
    }

    /// The shared portal's id (hand this to guests).
    pub fn portal_id(&self) -> PortalId {
        self.inner.core.portal_id
    }

    /// This site's id.
    pub fn site_id(&self) -> SiteId {
        self.inner.core.site_id
    }

    /// Start sharing a buffer. Guests receive a snapshot at revision 1.
    pub async fn open_buffer(&self, title: &str, text: &str) -> Result<BufferId> {
        let core = &self.inner.core;
        core.ensure_active().await?;

        let buffer = HostBuffer::new(title, text);
        let buffer_id = buffer.id();
        let snapshot = buffer.snapshot();

        let mut state = self.inner.state.lock().await;
        core.workspace
            .open_buffer(buffer_id, title, text, Placement::End);
        state.buffers.insert(SharedBuffer::HostOwned(buffer));
        core.publish(&PortalMessage::BufferSnapshot(snapshot)).await?;

        tracing::info!("Sharing buffer {} ({})", buffer_id, title);
        Ok(buffer_id)
    }

    /// Focus a shared buffer; following guests move with it.
    pub async fn activate_buffer(&self, buffer_id: BufferId) -> Result<()> {
        let core = &self.inner.core;
        core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        let buffer = state.buffers.host_buffer_mut(buffer_id)?;
        let cursor = CursorUpdate {
            site_id: core.site_id,
            buffer_id,
            revision: buffer.revision(),
            selections: buffer.selections().to_vec(),
        };

        state.active = Some(buffer_id);
        core.workspace.activate_buffer(buffer_id);
        core.publish(&PortalMessage::ActiveBufferChanged(ActiveBufferChanged {
            buffer_id: Some(buffer_id),
        }))
        .await?;
        core.publish(&PortalMessage::CursorUpdate(cursor)).await
    }

    /// The focused shared buffer.
    pub async fn active_buffer(&self) -> Option<BufferId> {
        self.inner.state.lock().await.active
    }

    /// Apply edits to a shared buffer and stream them to guests.
    pub async fn edit(&self, buffer_id: BufferId, edits: Vec<TextEdit>) -> Result<Revision> {
        self.inner.core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        self.inner.apply_edits(&mut state, buffer_id, edits).await
    }

    /// Replace the whole text of a shared buffer.
    pub async fn set_text(&self, buffer_id: BufferId, text: &str) -> Result<Revision> {
        self.inner.core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        let old = match state.buffers.get(buffer_id) {
            Some(SharedBuffer::HostOwned(b)) => b.text().to_string(),
            _ => return Err(PortalError::UnknownBuffer { buffer_id }),
        };
        let edits = vec![TextEdit::replace(Point::zero(), old, text)];
        self.inner.apply_edits(&mut state, buffer_id, edits).await
    }

    /// Move the host's selections in a shared buffer.
    pub async fn set_selections(
        &self,
        buffer_id: BufferId,
        ranges: &[SelectionRange],
    ) -> Result<SelectionSet> {
        let core = &self.inner.core;
        core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        let buffer = state.buffers.host_buffer_mut(buffer_id)?;
        let selections = buffer.set_selections(ranges).clone();
        let update = CursorUpdate {
            site_id: core.site_id,
            buffer_id,
            revision: buffer.revision(),
            selections: selections.to_vec(),
        };

        core.workspace.set_local_selections(buffer_id, &selections);
        core.publish(&PortalMessage::CursorUpdate(update)).await?;
        Ok(selections)
    }

    /// Rename a shared buffer.
    pub async fn rename(&self, buffer_id: BufferId, title: &str) -> Result<()> {
        let core = &self.inner.core;
        core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        let metadata = state.buffers.host_buffer_mut(buffer_id)?.rename(title);
        core.workspace.set_title(buffer_id, title);
        core.publish(&PortalMessage::BufferMetadata(metadata)).await
    }

    /// Clear the modified flag (the host saved the buffer).
    pub async fn mark_saved(&self, buffer_id: BufferId) -> Result<()> {
        let core = &self.inner.core;
        core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        let metadata = state.buffers.host_buffer_mut(buffer_id)?.set_modified(false);
        core.workspace.set_modified(buffer_id, false);
        core.publish(&PortalMessage::BufferMetadata(metadata)).await
    }

    /// Stop sharing a buffer.
    pub async fn close_buffer(&self, buffer_id: BufferId) -> Result<()> {
        let core = &self.inner.core;
        core.ensure_active().await?;

        let mut state = self.inner.state.lock().await;
        state.buffers.host_buffer_mut(buffer_id)?;
        state.buffers.remove(buffer_id);
        state.cursors.remove_buffer(buffer_id);
        core.workspace.close_buffer(buffer_id);
        core.publish(&PortalMessage::BufferClosed(BufferClosed { buffer_id }))
            .await?;

        if state.active == Some(buffer_id) {
            let next = core
                .workspace
                .active_buffer()
                .filter(|id| state.buffers.get(*id).is_some());
            state.active = next;
            core.publish(&PortalMessage::ActiveBufferChanged(ActiveBufferChanged {
                buffer_id: next,
            }))
            .await?;
        }
        Ok(())
    }

    /// Local view of a shared buffer.
    pub async fn binding_for_buffer(&self, buffer_id: BufferId) -> Option<BufferBinding> {
        self.inner
            .state
            .lock()
            .await
            .buffers
            .get(buffer_id)
            .map(SharedBuffer::binding)
    }

    /// Shared buffers in the order they were opened.
    pub async fn buffers(&self) -> Vec<BufferId> {
        self.inner.state.lock().await.buffers.ids().to_vec()
    }

    /// A guest's selections in a shared buffer, as last received.
    pub async fn guest_selections(
        &self,
        buffer_id: BufferId,
        site_id: SiteId,
    ) -> Option<SelectionSet> {
        self.inner
            .state
            .lock()
            .await
            .cursors
            .get(site_id, buffer_id)
            .cloned()
    }

    /// Sites currently in the portal, as seen by this host.
    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.inner
            .state
            .lock()
            .await
            .roster
            .iter()
            .map(|(site_id, role)| RosterEntry {
                site_id: *site_id,
                role: *role,
            })
            .collect()
    }

    /// True until disposed or removed by the relay.
    pub async fn is_active(&self) -> bool {
        self.inner.core.is_active().await
    }

    /// Stop sharing: leave the portal, which closes it for every guest.
    /// Idempotent.
    pub async fn dispose(&self) {
        self.inner.core.dispose().await;
    }
}

async fn ingest(inner: Arc<HostInner>, mut subscription: Subscription) {
    while let Some(envelope) = subscription.recv().await {
        inner.handle(envelope).await;
    }
    inner.core.removed().await;
}

impl HostInner {
    /// Edit under the caller's state lock and publish the delta before
    /// releasing it.
    async fn apply_edits(
        &self,
        state: &mut HostState,
        buffer_id: BufferId,
        edits: Vec<TextEdit>,
    ) -> Result<Revision> {
        let core = &self.core;
        let buffer = state.buffers.host_buffer_mut(buffer_id)?;
        let delta = buffer
            .edit(edits)
            .map_err(|source| PortalError::InvalidEdit { buffer_id, source })?;

        if core.workspace.apply_edits(buffer_id, &delta.edits).is_err() {
            core.workspace.set_text(buffer_id, buffer.text());
        }
        core.workspace.set_modified(buffer_id, buffer.is_modified());

        let revision = delta.revision;
        core.publish(&PortalMessage::BufferDelta(delta)).await?;
        Ok(revision)
    }

    async fn handle(&self, envelope: Envelope) {
        let core = &self.core;
        if envelope.sender == core.site_id {
            return;
        }
        let message = match envelope.open() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "Host dropping undecodable envelope #{}: {}",
                    envelope.sequence,
                    e
                );
                return;
            }
        };
        let from_relay = envelope.sender == SiteId::RELAY;
        let kind = message.kind();

        match message {
            PortalMessage::SiteJoined(joined) if from_relay => {
                self.state
                    .lock()
                    .await
                    .roster
                    .insert(joined.site_id, joined.role);
                core.events.emit(PortalEvent::SiteJoined {
                    portal_id: core.portal_id,
                    site_id: joined.site_id,
                    role: joined.role,
                });
            }
            PortalMessage::SiteLeft(left) if from_relay => {
                self.forget_site(left.site_id).await;
                core.events.emit(PortalEvent::SiteLeft {
                    portal_id: core.portal_id,
                    site_id: left.site_id,
                });
            }
            PortalMessage::SiteEvicted(evicted) if from_relay => {
                self.forget_site(evicted.site_id).await;
                core.events.emit(PortalEvent::SiteEvicted {
                    portal_id: core.portal_id,
                    site_id: evicted.site_id,
                });
            }
            PortalMessage::ReplayRequest(request) => {
                let state = self.state.lock().await;
                let portal_state = state.portal_state(core.site_id, request.requester);
                tracing::debug!(
                    "Replaying {} buffers to site {}",
                    portal_state.buffers.len(),
                    request.requester
                );
                core.publish_or_warn(&PortalMessage::PortalState(portal_state))
                    .await;
            }
            PortalMessage::ResyncRequest(request) => self.resync(request).await,
            PortalMessage::CursorUpdate(update) if update.site_id == envelope.sender => {
                self.guest_cursor(update).await;
            }
            PortalMessage::SiteJoined(_)
            | PortalMessage::SiteLeft(_)
            | PortalMessage::SiteEvicted(_)
            | PortalMessage::PortalState(_)
            | PortalMessage::BufferSnapshot(_)
            | PortalMessage::BufferDelta(_)
            | PortalMessage::BufferMetadata(_)
            | PortalMessage::BufferClosed(_)
            | PortalMessage::ActiveBufferChanged(_)
            | PortalMessage::CursorUpdate(_) => {
                tracing::debug!("Host ignoring {} from site {}", kind, envelope.sender);
            }
        }
    }

    async fn resync(&self, request: ResyncRequest) {
        let state = self.state.lock().await;
        match state.buffers.get(request.buffer_id) {
            Some(SharedBuffer::HostOwned(buffer)) => {
                tracing::info!(
                    "Site {} lost buffer {:?} after revision {}; resending snapshot at {}",
                    request.requester,
                    request.buffer_id,
                    request.last_applied,
                    buffer.revision()
                );
                self.core
                    .publish_or_warn(&PortalMessage::BufferSnapshot(buffer.snapshot()))
                    .await;
            }
            _ => tracing::debug!("Resync for unshared buffer {:?}", request.buffer_id),
        }
    }

    async fn guest_cursor(&self, update: CursorUpdate) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(buffer) = state.buffers.get(update.buffer_id) else {
            return;
        };

        let outcome = state.cursors.accept(&update, buffer.revision(), buffer.text());
        if outcome != CursorOutcome::Stored {
            tracing::debug!("Cursor of site {} {:?}", update.site_id, outcome);
            return;
        }
        if let Some(selections) = state.cursors.get(update.site_id, update.buffer_id) {
            self.core
                .workspace
                .set_decorations(update.buffer_id, update.site_id, selections);
        }
        self.core.events.emit(PortalEvent::SelectionsChanged {
            buffer_id: update.buffer_id,
            site_id: update.site_id,
        });
    }

    async fn forget_site(&self, site_id: SiteId) {
        let mut state = self.state.lock().await;
        state.roster.remove(&site_id);
        for buffer_id in state.cursors.remove_site(site_id) {
            self.core
                .workspace
                .set_decorations(buffer_id, site_id, &SelectionSet::default());
        }
    }
}

impl HostState {
    fn portal_state(&self, host: SiteId, recipient: SiteId) -> PortalState {
        let mut cursors = Vec::new();
        let mut buffers = Vec::new();
        for buffer in self.buffers.iter() {
            if let SharedBuffer::HostOwned(b) = buffer {
                buffers.push(b.snapshot());
                cursors.push(CursorUpdate {
                    site_id: host,
                    buffer_id: b.id(),
                    revision: b.revision(),
                    selections: b.selections().to_vec(),
                });
            }
        }
        cursors.extend(
            self.cursors
                .updates()
                .into_iter()
                .filter(|u| u.site_id != recipient),
        );

        PortalState {
            recipient,
            buffers,
            active_buffer: self.active,
            cursors,
        }
    }
}
