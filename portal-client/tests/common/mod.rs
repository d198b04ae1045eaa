//! Test harness: one in-process relay and any number of sites around it.

#![allow(dead_code)]

use portal_client::{LocalTransport, PortalClient, PortalConfig, PortalEvent};
use portal_core::MemoryWorkspace;
use portal_relay::{Config, PortalRelay};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// How long a test waits for an event before failing.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A relay shared by every site of a test.
pub struct Harness {
    pub relay: Arc<PortalRelay>,
}

/// One editor: its client, its own transport (so faults can be injected per
/// site) and its workspace.
pub struct Site {
    pub client: Arc<PortalClient>,
    pub transport: LocalTransport,
    pub workspace: MemoryWorkspace,
    pub events: broadcast::Receiver<PortalEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            relay: PortalRelay::new(Config::default()).shared(),
        }
    }

    pub fn site(&self) -> Site {
        self.site_with(PortalConfig::default())
    }

    pub fn site_with(&self, config: PortalConfig) -> Site {
        let transport = LocalTransport::new(Arc::clone(&self.relay));
        let workspace = MemoryWorkspace::new();
        let client = PortalClient::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(workspace.clone()),
        )
        .expect("valid config");
        let events = client.events();
        Site {
            client: Arc::new(client),
            transport,
            workspace,
            events,
        }
    }
}

impl Site {
    /// Forget events received so far.
    pub fn drain(&mut self) {
        while self.events.try_recv().is_ok() {}
    }

    /// Wait for the first event matching `predicate`, skipping the others.
    pub async fn wait_for(&mut self, predicate: impl Fn(&PortalEvent) -> bool) -> PortalEvent {
        let mut seen = self.collect_until(predicate).await;
        seen.pop().expect("collect_until returns the matching event")
    }

    /// Every event up to and including the first one matching `predicate`.
    pub async fn collect_until(
        &mut self,
        predicate: impl Fn(&PortalEvent) -> bool,
    ) -> Vec<PortalEvent> {
        let events = &mut self.events;
        tokio::time::timeout(EVENT_TIMEOUT, async {
            let mut seen = Vec::new();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let done = predicate(&event);
                        seen.push(event);
                        if done {
                            return seen;
                        }
                    }
                    Err(RecvError::Lagged(n)) => panic!("missed {n} events"),
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}
