//! The joining side of a portal.
//!
//! A guest mirrors the host's buffers as read-only replicas. Replicas are
//! tracked as soon as their snapshot arrives but only appear in the workspace
//! when the guest follows the host into them or opens them explicitly. When
//! the host disappears every replica is detached into an ordinary local
//! buffer.

use portal_core::{
    BufferBinding, BufferTable, CursorOutcome, CursorStore, FollowState, Placement,
    ReplicaBuffer, ReplicaOutcome, SelectionSet, SharedBuffer,
};
use portal_relay::{RosterEntry, Subscription};
use portal_types::{
    BufferDelta, BufferId, BufferMetadata, BufferSnapshot, CursorUpdate, Envelope, PortalId,
    PortalMessage, PortalState, ReplayRequest, ResyncRequest, Revision, SelectionRange, SiteId,
    SiteRole, TextEdit,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use crate::error::{PortalError, Result};
use crate::events::PortalEvent;
use crate::session::SessionCore;

#[derive(Debug)]
struct GuestState {
    buffers: BufferTable,
    host_active: Option<BufferId>,
    follow: FollowState,
    cursors: CursorStore,
    roster: BTreeMap<SiteId, SiteRole>,
    host_present: bool,
    ready: Option<oneshot::Sender<()>>,
    /// Buffers the host referenced before this guest saw their snapshot.
    missing: BTreeSet<BufferId>,
}

#[derive(Debug)]
struct GuestInner {
    core: SessionCore,
    host_site_id: SiteId,
    state: Mutex<GuestState>,
}

/// A portal joined by this site.
#[derive(Debug, Clone)]
pub struct GuestPortal {
    inner: Arc<GuestInner>,
}

impl GuestPortal {
    /// Wrap an active session and start ingesting its subscription.
    ///
    /// The returned receiver fires once the host's replay has been applied; it
    /// is dropped unanswered if the host goes away first.
    pub(crate) fn start(
        core: SessionCore,
        host_site_id: SiteId,
        roster: Vec<RosterEntry>,
        follow_host: bool,
        subscription: Subscription,
    ) -> (Self, oneshot::Receiver<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let follow = if follow_host {
            FollowState::following(host_site_id)
        } else {
            FollowState::new()
        };

        let state = GuestState {
            buffers: BufferTable::new(),
            host_active: None,
            follow,
            cursors: CursorStore::new(),
            roster: roster.into_iter().map(|e| (e.site_id, e.role)).collect(),
            host_present: true,
            ready: Some(ready_tx),
            missing: BTreeSet::new(),
        };
        let inner = Arc::new(GuestInner {
            core,
            host_site_id,
            state: Mutex::new(state),
        });
        let handle = tokio::spawn(ingest(Arc::clone(&inner), subscription));
        inner.core.set_ingest(handle);
        (Self { inner }, ready_rx)
    }

    /// The joined portal.
    pub fn portal_id(&self) -> PortalId {
        self.inner.core.portal_id
    }

    /// This site's id.
    pub fn site_id(&self) -> SiteId {
        self.inner.core.site_id
    }

    /// The host's site id.
    pub fn host_site_id(&self) -> SiteId {
        self.inner.host_site_id
    }

    /// Ask the host for its full state.
    pub(crate) async fn request_replay(&self) -> Result<()> {
        let core = &self.inner.core;
        core.publish(&PortalMessage::ReplayRequest(ReplayRequest {
            requester: core.site_id,
        }))
        .await
    }

    /// Local view of a replica.
    pub async fn binding_for_buffer(&self, buffer_id: BufferId) -> Option<BufferBinding> {
        self.inner
            .state
            .lock()
            .await
            .buffers
            .get(buffer_id)
            .map(SharedBuffer::binding)
    }

    /// True if this guest holds a replica of the buffer.
    pub async fn has_buffer(&self, buffer_id: BufferId) -> bool {
        self.inner.state.lock().await.buffers.get(buffer_id).is_some()
    }

    /// Replicas in the order their snapshots arrived.
    pub async fn buffers(&self) -> Vec<BufferId> {
        self.inner.state.lock().await.buffers.ids().to_vec()
    }

    /// The buffer the host has focused.
    pub async fn host_active_buffer(&self) -> Option<BufferId> {
        self.inner.state.lock().await.host_active
    }

    /// Switch follow mode. Returns whether the guest now follows the host.
    ///
    /// Turning it on jumps to the host's focused buffer and cursor. Once the
    /// host is gone there is nobody to follow and this stays off.
    pub async fn toggle_follow_host_cursor(&self) -> Result<bool> {
        let inner = &self.inner;
        inner.core.ensure_active().await?;

        let mut state = inner.state.lock().await;
        if !state.host_present {
            return Ok(false);
        }
        let following = state.follow.toggle(inner.host_site_id);
        if following {
            inner.follow_host(&state);
        }
        inner
            .core
            .events
            .emit(PortalEvent::FollowChanged { following });
        tracing::debug!("Site {} following host: {}", inner.core.site_id, following);
        Ok(following)
    }

    /// True while following the host.
    pub async fn is_following(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.follow.is_following(self.inner.host_site_id)
    }

    /// Open a replica in the workspace and focus it.
    pub async fn open_replica(&self, buffer_id: BufferId) -> Result<()> {
        let state = self.inner.state.lock().await;
        if state.buffers.get(buffer_id).is_none() {
            return Err(PortalError::UnknownBuffer { buffer_id });
        }
        self.inner.show(&state, buffer_id);
        Ok(())
    }

    /// Move this guest's selections in a replica and tell the portal.
    ///
    /// Returns false when the input is ignored: while following the host in
    /// the buffer the host is in, the guest's cursor belongs to the host.
    pub async fn set_selections(
        &self,
        buffer_id: BufferId,
        ranges: &[SelectionRange],
    ) -> Result<bool> {
        let inner = &self.inner;
        let core = &inner.core;
        core.ensure_active().await?;

        let state = inner.state.lock().await;
        let buffer = state
            .buffers
            .get(buffer_id)
            .ok_or(PortalError::UnknownBuffer { buffer_id })?;
        if inner.mirrors_host_cursor(&state, buffer_id) {
            tracing::debug!("Ignoring local selections in {} while following", buffer_id);
            return Ok(false);
        }

        let selections = SelectionSet::new(ranges.iter().copied()).clamped(buffer.text());
        core.workspace.set_local_selections(buffer_id, &selections);
        if state.host_present {
            core.publish(&PortalMessage::CursorUpdate(CursorUpdate {
                site_id: core.site_id,
                buffer_id,
                revision: buffer.revision(),
                selections: selections.to_vec(),
            }))
            .await?;
        }
        Ok(true)
    }

    /// Another site's selections in a replica.
    pub async fn selections_of(
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

    /// Edit a replica. Only detached replicas accept local edits.
    pub async fn edit(&self, buffer_id: BufferId, edits: Vec<TextEdit>) -> Result<()> {
        let core = &self.inner.core;
        let mut state = self.inner.state.lock().await;
        let replica = state
            .buffers
            .replica_mut(buffer_id)
            .ok_or(PortalError::UnknownBuffer { buffer_id })?;
        replica.edit_local(&edits)?;

        if core.workspace.apply_edits(buffer_id, &edits).is_err() {
            core.workspace.set_text(buffer_id, replica.text());
        }
        core.workspace.set_modified(buffer_id, true);
        Ok(())
    }

    /// Sites currently in the portal, as seen by this guest.
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

    /// False once the host left or was evicted.
    pub async fn is_host_present(&self) -> bool {
        self.inner.state.lock().await.host_present
    }

    /// True until disposed or removed by the relay.
    pub async fn is_active(&self) -> bool {
        self.inner.core.is_active().await
    }

    /// Leave the portal. Replicas stay in the workspace. Idempotent.
    pub async fn dispose(&self) {
        self.inner.core.dispose().await;
        self.inner.state.lock().await.ready = None;
    }
}

async fn ingest(inner: Arc<GuestInner>, mut subscription: Subscription) {
    while let Some(envelope) = subscription.recv().await {
        inner.handle(envelope).await;
    }
    inner.state.lock().await.ready = None;
    inner.core.removed().await;
}

impl GuestInner {
    async fn handle(&self, envelope: Envelope) {
        let site_id = self.core.site_id;
        if envelope.sender == site_id {
            return;
        }
        let message = match envelope.open() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    "Guest dropping undecodable envelope #{}: {}",
                    envelope.sequence,
                    e
                );
                return;
            }
        };
        let kind = message.kind();
        let from_relay = envelope.sender == SiteId::RELAY;
        let from_host = envelope.sender == self.host_site_id;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match message {
            PortalMessage::SiteJoined(joined) if from_relay => {
                state.roster.insert(joined.site_id, joined.role);
                self.core.events.emit(PortalEvent::SiteJoined {
                    portal_id: self.core.portal_id,
                    site_id: joined.site_id,
                    role: joined.role,
                });
            }
            PortalMessage::SiteLeft(left) if from_relay => {
                self.site_gone(state, left.site_id, false);
            }
            PortalMessage::SiteEvicted(evicted) if from_relay => {
                self.site_gone(state, evicted.site_id, true);
            }
            PortalMessage::PortalState(portal_state)
                if from_host && portal_state.recipient == site_id =>
            {
                self.replay(state, portal_state);
            }
            PortalMessage::BufferSnapshot(snapshot) if from_host => {
                self.snapshot(state, &snapshot);
            }
            PortalMessage::BufferDelta(delta) if from_host => {
                self.delta(state, &delta).await;
            }
            PortalMessage::BufferMetadata(metadata) if from_host => {
                self.metadata(state, &metadata);
            }
            PortalMessage::BufferClosed(closed) if from_host => {
                state.missing.remove(&closed.buffer_id);
                if state.buffers.remove(closed.buffer_id).is_some() {
                    state.cursors.remove_buffer(closed.buffer_id);
                    self.core.workspace.close_buffer(closed.buffer_id);
                    self.core.events.emit(PortalEvent::ReplicaClosed {
                        buffer_id: closed.buffer_id,
                    });
                }
            }
            PortalMessage::ActiveBufferChanged(changed) if from_host => {
                state.host_active = changed.buffer_id;
                if let Some(buffer_id) = changed.buffer_id {
                    self.request_missing(state, buffer_id).await;
                }
                if state.follow.is_following(self.host_site_id) {
                    self.follow_host(state);
                }
                self.core.events.emit(PortalEvent::ActiveBufferChanged {
                    buffer_id: changed.buffer_id,
                });
            }
            PortalMessage::CursorUpdate(update) if update.site_id == envelope.sender => {
                self.cursor(state, &update);
            }
            PortalMessage::SiteJoined(_)
            | PortalMessage::SiteLeft(_)
            | PortalMessage::SiteEvicted(_)
            | PortalMessage::ReplayRequest(_)
            | PortalMessage::PortalState(_)
            | PortalMessage::BufferSnapshot(_)
            | PortalMessage::BufferDelta(_)
            | PortalMessage::BufferMetadata(_)
            | PortalMessage::BufferClosed(_)
            | PortalMessage::ResyncRequest(_)
            | PortalMessage::ActiveBufferChanged(_)
            | PortalMessage::CursorUpdate(_) => {
                tracing::trace!("Guest ignoring {} from site {}", kind, envelope.sender);
            }
        }
    }

    fn replay(&self, state: &mut GuestState, portal_state: PortalState) {
        tracing::debug!(
            "Site {} received replay: {} buffers, {} cursors",
            self.core.site_id,
            portal_state.buffers.len(),
            portal_state.cursors.len()
        );
        for snapshot in &portal_state.buffers {
            self.snapshot(state, snapshot);
        }
        state.host_active = portal_state.active_buffer;
        for update in &portal_state.cursors {
            if update.site_id != self.core.site_id {
                self.cursor(state, update);
            }
        }
        if state.follow.is_following(self.host_site_id) {
            self.follow_host(state);
        }
        if let Some(ready) = state.ready.take() {
            let _ = ready.send(());
        }
    }

    fn snapshot(&self, state: &mut GuestState, snapshot: &BufferSnapshot) {
        let buffer_id = snapshot.buffer_id;
        let workspace = &self.core.workspace;

        let Some(replica) = state.buffers.replica_mut(buffer_id) else {
            if state.buffers.get(buffer_id).is_none() {
                state.buffers.insert(SharedBuffer::GuestReplica(
                    ReplicaBuffer::from_snapshot(snapshot),
                ));
                tracing::debug!(
                    "Replica of {} created at revision {}",
                    buffer_id,
                    snapshot.revision
                );
                self.core.events.emit(PortalEvent::ReplicaOpened { buffer_id });
                self.host_cursor_from(state, snapshot);

                // Arrived late: the host may already be focused on it.
                let recovered = state.missing.remove(&buffer_id);
                if recovered
                    && state.host_active == Some(buffer_id)
                    && state.follow.is_following(self.host_site_id)
                {
                    self.follow_host(state);
                }
            }
            return;
        };

        if replica.apply_snapshot(snapshot) != ReplicaOutcome::Applied {
            return;
        }
        workspace.set_text(buffer_id, replica.text());
        workspace.set_title(buffer_id, &replica.title());
        workspace.set_modified(buffer_id, replica.is_modified());
        let revision = replica.revision();
        let text = replica.text().to_string();

        self.core
            .events
            .emit(PortalEvent::ReplicaUpdated { buffer_id, revision });
        self.promote(state, buffer_id, revision, &text);
        self.host_cursor_from(state, snapshot);
    }

    /// A snapshot carries the host's selections at its revision.
    fn host_cursor_from(&self, state: &mut GuestState, snapshot: &BufferSnapshot) {
        self.cursor(
            state,
            &CursorUpdate {
                site_id: self.host_site_id,
                buffer_id: snapshot.buffer_id,
                revision: snapshot.revision,
                selections: snapshot.selections.clone(),
            },
        );
    }

    /// Ask for a snapshot of a buffer the host mentioned but this guest never
    /// received. Before the replay lands it will carry the buffer anyway.
    async fn request_missing(&self, state: &mut GuestState, buffer_id: BufferId) {
        if state.ready.is_some()
            || !state.host_present
            || state.buffers.get(buffer_id).is_some()
            || !state.missing.insert(buffer_id)
        {
            return;
        }
        tracing::warn!("Host referenced unknown buffer {}; requesting snapshot", buffer_id);
        let last_applied = Revision::zero();
        self.core
            .publish_or_warn(&PortalMessage::ResyncRequest(ResyncRequest {
                buffer_id,
                requester: self.core.site_id,
                last_applied,
            }))
            .await;
        self.core.events.emit(PortalEvent::ResyncRequested {
            buffer_id,
            last_applied,
        });
    }

    async fn delta(&self, state: &mut GuestState, delta: &BufferDelta) {
        let buffer_id = delta.buffer_id;
        let workspace = &self.core.workspace;

        let Some(replica) = state.buffers.replica_mut(buffer_id) else {
            self.request_missing(state, buffer_id).await;
            return;
        };

        match replica.apply_delta(delta) {
            ReplicaOutcome::Applied => {
                if workspace.apply_edits(buffer_id, &delta.edits).is_err() {
                    workspace.set_text(buffer_id, replica.text());
                }
                workspace.set_modified(buffer_id, replica.is_modified());
                let revision = replica.revision();
                let text = replica.text().to_string();

                self.core
                    .events
                    .emit(PortalEvent::ReplicaUpdated { buffer_id, revision });
                self.promote(state, buffer_id, revision, &text);
            }
            ReplicaOutcome::ResyncNeeded(reason) => {
                let last_applied = replica.revision();
                tracing::warn!(
                    "Replica {} out of sync at revision {} ({:?}); requesting snapshot",
                    buffer_id,
                    last_applied,
                    reason
                );
                self.core
                    .publish_or_warn(&PortalMessage::ResyncRequest(ResyncRequest {
                        buffer_id,
                        requester: self.core.site_id,
                        last_applied,
                    }))
                    .await;
                self.core.events.emit(PortalEvent::ResyncRequested {
                    buffer_id,
                    last_applied,
                });
            }
            ReplicaOutcome::Ignored => {}
        }
    }

    fn metadata(&self, state: &mut GuestState, metadata: &BufferMetadata) {
        let buffer_id = metadata.buffer_id;
        let Some(replica) = state.buffers.replica_mut(buffer_id) else {
            return;
        };
        if replica.apply_metadata(metadata) != ReplicaOutcome::Applied {
            return;
        }

        let title = replica.title();
        self.core.workspace.set_title(buffer_id, &title);
        self.core
            .workspace
            .set_modified(buffer_id, replica.is_modified());
        self.core
            .events
            .emit(PortalEvent::TitleChanged { buffer_id, title });
    }

    fn cursor(&self, state: &mut GuestState, update: &CursorUpdate) {
        let Some(buffer) = state.buffers.get(update.buffer_id) else {
            return;
        };
        match state.cursors.accept(update, buffer.revision(), buffer.text()) {
            CursorOutcome::Stored => self.show_cursor(state, update.site_id, update.buffer_id),
            outcome => tracing::trace!("Cursor of site {} {:?}", update.site_id, outcome),
        }
    }

    /// Parked cursors that the replica has caught up with become visible.
    fn promote(
        &self,
        state: &mut GuestState,
        buffer_id: BufferId,
        revision: Revision,
        text: &str,
    ) {
        for site_id in state.cursors.promote(buffer_id, revision, text) {
            self.show_cursor(state, site_id, buffer_id);
        }
    }

    fn show_cursor(&self, state: &GuestState, site_id: SiteId, buffer_id: BufferId) {
        let Some(selections) = state.cursors.get(site_id, buffer_id) else {
            return;
        };
        let workspace = &self.core.workspace;
        workspace.set_decorations(buffer_id, site_id, selections);
        if site_id == self.host_site_id && self.mirrors_host_cursor(state, buffer_id) {
            workspace.set_local_selections(buffer_id, selections);
        }
        self.core
            .events
            .emit(PortalEvent::SelectionsChanged { buffer_id, site_id });
    }

    fn mirrors_host_cursor(&self, state: &GuestState, buffer_id: BufferId) -> bool {
        state.follow.is_following(self.host_site_id) && state.host_active == Some(buffer_id)
    }

    /// Open a replica in the workspace if needed, then focus it.
    fn show(&self, state: &GuestState, buffer_id: BufferId) {
        let workspace = &self.core.workspace;
        if !workspace.is_open(buffer_id) {
            let Some(buffer) = state.buffers.get(buffer_id) else {
                return;
            };
            let placement = workspace
                .active_buffer()
                .map(Placement::After)
                .unwrap_or_default();
            workspace.open_buffer(buffer_id, &buffer.title(), buffer.text(), placement);
            workspace.set_modified(buffer_id, buffer.is_modified());
            for (site_id, selections) in state.cursors.for_buffer(buffer_id) {
                workspace.set_decorations(buffer_id, site_id, &selections);
            }
        }
        workspace.activate_buffer(buffer_id);
    }

    fn follow_host(&self, state: &GuestState) {
        let Some(buffer_id) = state.host_active else {
            return;
        };
        if state.buffers.get(buffer_id).is_none() {
            return;
        }
        self.show(state, buffer_id);
        if let Some(selections) = state.cursors.get(self.host_site_id, buffer_id) {
            self.core
                .workspace
                .set_local_selections(buffer_id, selections);
        }
    }

    fn site_gone(&self, state: &mut GuestState, site_id: SiteId, evicted: bool) {
        state.roster.remove(&site_id);
        for buffer_id in state.cursors.remove_site(site_id) {
            self.core
                .workspace
                .set_decorations(buffer_id, site_id, &SelectionSet::default());
        }

        let portal_id = self.core.portal_id;
        self.core.events.emit(if evicted {
            PortalEvent::SiteEvicted { portal_id, site_id }
        } else {
            PortalEvent::SiteLeft { portal_id, site_id }
        });

        if site_id == self.host_site_id {
            self.host_lost(state, evicted);
        }
    }

    fn host_lost(&self, state: &mut GuestState, evicted: bool) {
        if !state.host_present {
            return;
        }
        state.host_present = false;
        state.ready = None;

        let workspace = &self.core.workspace;
        let events = &self.core.events;
        for replica in state.buffers.replicas_mut() {
            if !replica.detach() {
                continue;
            }
            let buffer_id = replica.id();
            let title = replica.title();
            workspace.set_title(buffer_id, &title);
            workspace.set_modified(buffer_id, true);
            events.emit(PortalEvent::ReplicaDetached { buffer_id });
            events.emit(PortalEvent::TitleChanged { buffer_id, title });
        }

        if state.follow.leader().is_some() {
            state.follow.stop();
            events.emit(PortalEvent::FollowChanged { following: false });
        }
        tracing::info!(
            "Host of {:?} {}; {} replicas detached",
            self.core.portal_id,
            if evicted { "evicted" } else { "left" },
            state.buffers.len()
        );
        events.emit(PortalEvent::HostLost {
            portal_id: self.core.portal_id,
            evicted,
        });
    }
}
