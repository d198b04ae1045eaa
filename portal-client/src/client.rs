//! Portal client: the entry point applications use to share and join portals.
//!
//! One client drives one workspace and may host several portals and join
//! several others at the same time. All of them report on a single event
//! channel.

use portal_core::{BufferBinding, SessionAction, SessionEvent, SessionState, Workspace};
use portal_types::{BufferId, PortalId, SiteId};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};

use crate::config::PortalConfig;
use crate::error::{PortalError, Result};
use crate::events::{EventSink, PortalEvent};
use crate::guest::GuestPortal;
use crate::heartbeat::spawn_heartbeat;
use crate::host::HostPortal;
use crate::session::SessionCore;
use crate::transport::{Transport, TransportError};

/// Shares and joins portals for one workspace.
pub struct PortalClient {
    config: PortalConfig,
    transport: Arc<dyn Transport>,
    workspace: Arc<dyn Workspace>,
    events: EventSink,
    closed: watch::Sender<bool>,
    hosts: Mutex<Vec<HostPortal>>,
    guests: Mutex<Vec<GuestPortal>>,
}

impl std::fmt::Debug for PortalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalClient")
            .field("config", &self.config)
            .field("closed", &*self.closed.borrow())
            .finish_non_exhaustive()
    }
}

impl PortalClient {
    /// Create a client over a transport and a workspace.
    pub fn new(
        config: PortalConfig,
        transport: Arc<dyn Transport>,
        workspace: Arc<dyn Workspace>,
    ) -> Result<Self> {
        config.validate()?;
        let events = EventSink::new(config.event_capacity);
        let (closed, _) = watch::channel(false);
        Ok(Self {
            config,
            transport,
            workspace,
            events,
            closed,
            hosts: Mutex::new(Vec::new()),
            guests: Mutex::new(Vec::new()),
        })
    }

    /// The client's configuration.
    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Subscribe to portal events. Only events emitted after this call are seen.
    pub fn events(&self) -> broadcast::Receiver<PortalEvent> {
        self.events.subscribe()
    }

    /// True once [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_disposed() {
            Err(PortalError::PortalClosed)
        } else {
            Ok(())
        }
    }

    /// Run a gateway request, retrying allocation failures.
    ///
    /// Only `Allocation` is retried; every other error is final.
    async fn allocate<T, F, Fut>(&self, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let attempts = self.config.allocation_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match request().await {
                Ok(grant) => return Ok(grant),
                Err(TransportError::Allocation(reason)) if attempt < attempts => {
                    let delay = self.config.retry_delay(attempt);
                    tracing::warn!(
                        "Allocation attempt {}/{} failed ({}); retrying in {:?}",
                        attempt,
                        attempts,
                        reason,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(TransportError::Allocation(reason)) => {
                    return Err(PortalError::Allocation { attempts, reason });
                }
                Err(TransportError::PortalNotFound { portal_id }) => {
                    return Err(PortalError::PortalNotFound { portal_id });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drive a fresh lifecycle through a gateway request.
    ///
    /// Returns the active state, or fails if the request failed or the client
    /// was disposed while it was in flight. In the latter case the granted
    /// site is released right away.
    async fn establish(&self, granted: Result<(PortalId, SiteId)>) -> Result<SessionState> {
        let (state, _) = SessionState::new().on_event(SessionEvent::Requested);

        let (portal_id, site_id) = match granted {
            Ok(grant) => grant,
            Err(e) => {
                let (_, actions) = state.on_event(SessionEvent::Failed {
                    error: e.to_string(),
                });
                tracing::debug!("Session request rejected: {:?}", actions);
                return Err(e);
            }
        };

        let state = if self.is_disposed() {
            let (closed, _) = state.on_event(SessionEvent::DisposeRequested);
            closed
        } else {
            state
        };

        let (state, actions) = state.on_event(SessionEvent::Granted { portal_id, site_id });
        for action in actions {
            match action {
                SessionAction::Leave { portal_id, site_id } => {
                    tracing::info!(
                        "Client disposed during allocation; releasing site {} in {:?}",
                        site_id,
                        portal_id
                    );
                    if let Err(e) = self.transport.leave_portal(portal_id, site_id).await {
                        tracing::warn!("Releasing site {} failed: {}", site_id, e);
                    }
                    return Err(PortalError::PortalClosed);
                }
                SessionAction::StartSession { .. } => {}
                other => tracing::debug!("Unexpected action {:?} on grant", other),
            }
        }
        Ok(state)
    }

    /// Subscribe and wrap an active state into a session.
    async fn open_session(
        &self,
        state: SessionState,
    ) -> Result<(SessionCore, crate::transport::Subscription)> {
        let core = SessionCore::new(
            state,
            Arc::clone(&self.transport),
            Arc::clone(&self.workspace),
            self.events.clone(),
        )?;
        match self.transport.subscribe(core.portal_id, core.site_id).await {
            Ok(subscription) => Ok((core, subscription)),
            Err(e) => {
                core.dispose().await;
                Err(e.into())
            }
        }
    }

    fn start_heartbeat(&self, core: &SessionCore) {
        let handle = spawn_heartbeat(
            Arc::clone(&self.transport),
            core.portal_id,
            core.site_id,
            self.config.heartbeat_interval(),
        );
        core.set_heartbeat(handle);
    }

    /// Open a new portal hosted by this client.
    pub async fn share_portal(&self) -> Result<HostPortal> {
        self.ensure_open()?;

        let granted = self
            .allocate(|| self.transport.create_portal())
            .await
            .map(|grant| (grant.portal_id, grant.site_id));
        let state = self.establish(granted).await?;
        let (core, subscription) = self.open_session(state).await?;
        self.start_heartbeat(&core);

        let host = HostPortal::start(core, subscription);
        tracing::info!("Sharing portal {} as site {}", host.portal_id(), host.site_id());
        self.hosts.lock().await.push(host.clone());
        if self.is_disposed() {
            host.dispose().await;
            return Err(PortalError::PortalClosed);
        }
        Ok(host)
    }

    /// Join an existing portal as a guest.
    ///
    /// Completes once the host's state has been replayed into the workspace.
    /// Fails with `JoinTimeout` if that takes longer than the configured
    /// timeout, and with `PortalClosed` if the client is disposed or the host
    /// goes away first.
    pub async fn join_portal(&self, portal_id: PortalId) -> Result<GuestPortal> {
        self.ensure_open()?;

        let mut grant = None;
        let granted = self
            .allocate(|| self.transport.join_portal(portal_id))
            .await
            .map(|g| {
                let ids = (g.portal_id, g.site_id);
                grant = Some(g);
                ids
            });
        let state = self.establish(granted).await?;
        let grant = grant.ok_or(PortalError::PortalClosed)?;
        let (core, subscription) = self.open_session(state).await?;
        self.start_heartbeat(&core);

        let (guest, ready) = GuestPortal::start(
            core,
            grant.host_site_id,
            grant.roster,
            self.config.follow_host_on_join,
            subscription,
        );
        self.guests.lock().await.push(guest.clone());

        if let Err(e) = self.await_replay(&guest, ready).await {
            tracing::warn!("Joining {} failed: {}", portal_id, e);
            guest.dispose().await;
            self.guests
                .lock()
                .await
                .retain(|g| g.site_id() != guest.site_id() || g.portal_id() != portal_id);
            return Err(e);
        }

        tracing::info!(
            "Joined portal {} as site {} (host {})",
            portal_id,
            guest.site_id(),
            guest.host_site_id()
        );
        Ok(guest)
    }

    async fn await_replay(
        &self,
        guest: &GuestPortal,
        ready: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        guest.request_replay().await?;

        let mut closed = self.closed.subscribe();
        let timeout = self.config.join_timeout();
        tokio::select! {
            replayed = ready => replayed.map_err(|_| PortalError::PortalClosed),
            _ = async { closed.wait_for(|closed| *closed).await.map(|_| ()) } => {
                Err(PortalError::PortalClosed)
            }
            _ = tokio::time::sleep(timeout) => Err(PortalError::JoinTimeout {
                timeout_ms: self.config.join_timeout_ms,
            }),
        }
    }

    /// Portals this client hosts.
    pub async fn hosted_portals(&self) -> Vec<HostPortal> {
        self.hosts.lock().await.clone()
    }

    /// Portals this client joined.
    pub async fn joined_portals(&self) -> Vec<GuestPortal> {
        self.guests.lock().await.clone()
    }

    /// Local view of a buffer in any portal of this client.
    pub async fn binding_for_buffer(&self, buffer_id: BufferId) -> Option<BufferBinding> {
        for host in self.hosts.lock().await.iter() {
            if let Some(binding) = host.binding_for_buffer(buffer_id).await {
                return Some(binding);
            }
        }
        for guest in self.guests.lock().await.iter() {
            if let Some(binding) = guest.binding_for_buffer(buffer_id).await {
                return Some(binding);
            }
        }
        None
    }

    /// Toggle follow mode in the portal holding a replica of `buffer_id`.
    pub async fn toggle_follow_host_cursor(&self, buffer_id: BufferId) -> Result<bool> {
        self.ensure_open()?;

        let guest = {
            let guests = self.guests.lock().await;
            let mut found = None;
            for guest in guests.iter() {
                if guest.has_buffer(buffer_id).await {
                    found = Some(guest.clone());
                    break;
                }
            }
            found
        };
        match guest {
            Some(guest) => guest.toggle_follow_host_cursor().await,
            None => Err(PortalError::UnknownBuffer { buffer_id }),
        }
    }

    /// Leave every portal and stop all tasks. Idempotent.
    ///
    /// Pending joins fail with `PortalClosed`; later operations on this client
    /// fail the same way.
    pub async fn dispose(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let hosts: Vec<_> = self.hosts.lock().await.drain(..).collect();
        let guests: Vec<_> = self.guests.lock().await.drain(..).collect();
        tracing::info!(
            "Disposing client: {} hosted, {} joined portals",
            hosts.len(),
            guests.len()
        );
        for host in hosts {
            host.dispose().await;
        }
        for guest in guests {
            guest.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use portal_core::MemoryWorkspace;
    use portal_relay::{Config, PortalRelay};
    use std::time::Duration;

    fn client(transport: &LocalTransport, config: PortalConfig) -> PortalClient {
        PortalClient::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(MemoryWorkspace::new()),
        )
        .unwrap()
    }

    fn transport() -> LocalTransport {
        LocalTransport::new(PortalRelay::new(Config::default()).shared())
    }

    #[test]
    fn rejects_invalid_config() {
        let transport = transport();
        let result = PortalClient::new(
            PortalConfig::default().with_heartbeat_interval(Duration::ZERO),
            Arc::new(transport),
            Arc::new(MemoryWorkspace::new()),
        );
        assert!(matches!(result, Err(PortalError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn allocation_is_retried() {
        let transport = transport();
        let client = client(&transport, PortalConfig::default().with_allocation_retries(3));

        transport.fail_next_allocation(2);
        let host = client.share_portal().await.unwrap();
        assert!(host.is_active().await);
        assert_eq!(transport.relay().total_portals(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn allocation_gives_up_after_retries() {
        let transport = transport();
        let client = client(&transport, PortalConfig::default().with_allocation_retries(1));

        transport.fail_next_allocation(5);
        let err = client.share_portal().await.unwrap_err();
        assert!(matches!(err, PortalError::Allocation { attempts: 2, .. }));
        assert_eq!(transport.relay().total_portals(), 0);
    }

    #[tokio::test]
    async fn unknown_portal_is_not_retried() {
        let transport = transport();
        let client = client(&transport, PortalConfig::default());

        let missing = PortalId::new();
        let err = client.join_portal(missing).await.unwrap_err();
        assert!(matches!(err, PortalError::PortalNotFound { portal_id } if portal_id == missing));
    }

    #[tokio::test]
    async fn disposed_client_refuses_work() {
        let transport = transport();
        let client = client(&transport, PortalConfig::default());
        let host = client.share_portal().await.unwrap();

        client.dispose().await;
        client.dispose().await;

        assert!(client.is_disposed());
        assert!(!host.is_active().await);
        assert!(matches!(
            client.share_portal().await,
            Err(PortalError::PortalClosed)
        ));
        assert!(matches!(
            host.open_buffer("a.txt", "").await,
            Err(PortalError::PortalClosed)
        ));
        assert_eq!(transport.relay().total_portals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn join_times_out_without_replay() {
        let transport = transport();
        let host_client = client(&transport, PortalConfig::default());
        let guest_client = client(
            &transport,
            PortalConfig::default().with_join_timeout(Duration::from_secs(2)),
        );
        let host = host_client.share_portal().await.unwrap();

        // The replay request is lost, so the host never answers.
        transport.drop_next_publishes(1);
        let err = guest_client.join_portal(host.portal_id()).await.unwrap_err();

        assert!(matches!(err, PortalError::JoinTimeout { timeout_ms: 2000 }));
        assert!(guest_client.joined_portals().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_during_join_fails_it() {
        let transport = transport();
        let host_client = client(&transport, PortalConfig::default());
        let guest_client = Arc::new(client(&transport, PortalConfig::default()));
        let host = host_client.share_portal().await.unwrap();

        transport.drop_next_publishes(1);
        let joining = {
            let guest_client = Arc::clone(&guest_client);
            let portal_id = host.portal_id();
            tokio::spawn(async move { guest_client.join_portal(portal_id).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        guest_client.dispose().await;

        let result = joining.await.unwrap();
        assert!(matches!(result, Err(PortalError::PortalClosed)));
        let roster = transport.relay().roster(host.portal_id()).await.unwrap();
        assert_eq!(roster.len(), 1);
    }
}
