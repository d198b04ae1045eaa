//! Plumbing shared by host and guest sessions.
//!
//! A session owns its site's membership: the lifecycle state machine from
//! `portal-core`, the heartbeat and ingestion tasks, and the handles to the
//! transport, workspace and event channel.

use portal_core::{SessionAction, SessionEvent, SessionState, Workspace};
use portal_types::{PortalId, PortalMessage, SiteId};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::{PortalError, Result};
use crate::events::{EventSink, PortalEvent};
use crate::transport::Transport;

#[derive(Debug, Default)]
struct Tasks {
    heartbeat: Option<JoinHandle<()>>,
    ingest: Option<JoinHandle<()>>,
}

pub(crate) struct SessionCore {
    pub(crate) portal_id: PortalId,
    pub(crate) site_id: SiteId,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) workspace: Arc<dyn Workspace>,
    pub(crate) events: EventSink,
    state: Mutex<SessionState>,
    tasks: StdMutex<Tasks>,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("portal_id", &self.portal_id)
            .field("site_id", &self.site_id)
            .finish_non_exhaustive()
    }
}

impl SessionCore {
    /// Wrap an already active session.
    pub(crate) fn new(
        state: SessionState,
        transport: Arc<dyn Transport>,
        workspace: Arc<dyn Workspace>,
        events: EventSink,
    ) -> Result<Self> {
        let (portal_id, site_id) = state.membership().ok_or(PortalError::PortalClosed)?;
        Ok(Self {
            portal_id,
            site_id,
            transport,
            workspace,
            events,
            state: Mutex::new(state),
            tasks: StdMutex::new(Tasks::default()),
        })
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_heartbeat(&self, handle: JoinHandle<()>) {
        self.tasks().heartbeat = Some(handle);
    }

    pub(crate) fn set_ingest(&self, handle: JoinHandle<()>) {
        self.tasks().ingest = Some(handle);
    }

    /// Fail with `PortalClosed` unless the session is active.
    pub(crate) async fn ensure_active(&self) -> Result<()> {
        if self.state.lock().await.is_active() {
            Ok(())
        } else {
            Err(PortalError::PortalClosed)
        }
    }

    pub(crate) async fn is_active(&self) -> bool {
        self.state.lock().await.is_active()
    }

    /// Encode and publish a message from this site.
    pub(crate) async fn publish(&self, message: &PortalMessage) -> Result<()> {
        let payload = message.to_bytes()?;
        tracing::debug!(
            "Site {} publishing {} in {:?}",
            self.site_id,
            message.kind(),
            self.portal_id
        );
        self.transport
            .publish(self.portal_id, self.site_id, payload)
            .await?;
        Ok(())
    }

    /// Publish from a background task, where failures can only be logged.
    pub(crate) async fn publish_or_warn(&self, message: &PortalMessage) {
        if let Err(e) = self.publish(message).await {
            tracing::warn!(
                "Site {} failed to publish {}: {}",
                self.site_id,
                message.kind(),
                e
            );
        }
    }

    async fn transition(&self, event: SessionEvent) -> Vec<SessionAction> {
        let mut state = self.state.lock().await;
        let (next, actions) = state.clone().on_event(event);
        *state = next;
        actions
    }

    /// Stop tasks and leave the portal. Idempotent.
    pub(crate) async fn dispose(&self) {
        for action in self.transition(SessionEvent::DisposeRequested).await {
            match action {
                SessionAction::StopSession => {
                    let mut tasks = self.tasks();
                    for handle in [tasks.heartbeat.take(), tasks.ingest.take()]
                        .into_iter()
                        .flatten()
                    {
                        handle.abort();
                    }
                }
                SessionAction::Leave { portal_id, site_id } => {
                    if let Err(e) = self.transport.leave_portal(portal_id, site_id).await {
                        tracing::warn!("Leaving {:?} failed: {}", portal_id, e);
                    } else {
                        tracing::info!("Site {} left {:?}", site_id, portal_id);
                    }
                }
                other => tracing::debug!("Ignoring {:?} during dispose", other),
            }
        }
    }

    /// The relay closed our subscription (eviction or portal teardown).
    ///
    /// Called from the ingestion task itself, which is about to finish.
    pub(crate) async fn removed(&self) {
        let actions = self.transition(SessionEvent::Removed).await;
        if actions.contains(&SessionAction::StopSession) {
            if let Some(handle) = self.tasks().heartbeat.take() {
                handle.abort();
            }
            tracing::info!(
                "Site {} removed from {:?} by the relay",
                self.site_id,
                self.portal_id
            );
            self.events.emit(PortalEvent::SessionEnded {
                portal_id: self.portal_id,
            });
        }
    }
}
