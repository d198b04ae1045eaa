//! Run a host and a guest against an in-process relay.

use anyhow::{bail, Context, Result};
use portal_client::{LocalTransport, PortalClient, PortalConfig, PortalEvent};
use portal_core::text::end_point;
use portal_core::{BufferBinding, MemoryWorkspace};
use portal_relay::{
    spawn_eviction_sweep, Config, HeartbeatConfig, MetricsSnapshot, PortalRelay, RosterEntry,
    SweepConfig,
};
use portal_types::{PortalId, SelectionRange, SiteId, TextEdit};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

const SAMPLE_TITLE: &str = "sample.txt";
const SAMPLE_TEXT: &str = "Shared through a portal.\n";
const HOST_LINE: &str = "Appended by the host.\n";

/// What to simulate.
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// File to share instead of the sample.
    pub file: Option<PathBuf>,
    /// Silence the host until the relay evicts it.
    pub host_loss: bool,
    /// Relay eviction period in milliseconds.
    pub eviction_ms: u64,
}

/// Outcome of a demo run.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// The shared portal.
    pub portal_id: PortalId,
    /// Host site.
    pub host_site_id: SiteId,
    /// Guest site.
    pub guest_site_id: SiteId,
    /// Roster as the relay saw it after the guest caught up.
    pub roster: Vec<RosterEntry>,
    /// The host's buffer.
    pub host_buffer: BufferBinding,
    /// The guest's replica at the end of the run.
    pub guest_buffer: BufferBinding,
    /// Whether the guest was still following the host.
    pub guest_following: bool,
    /// Whether the guest saw the host go away.
    pub host_lost: bool,
    /// Relay counters at the end of the run.
    pub metrics: MetricsSnapshot,
}

/// Run the demo command.
pub async fn run(options: &DemoOptions, json: bool) -> Result<()> {
    let report = simulate(options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== portal demo ===");
    println!();
    println!("Portal: {}", report.portal_id);
    for entry in &report.roster {
        println!("  site {} ({:?})", entry.site_id, entry.role);
    }
    println!();
    println!("Host buffer:");
    print_binding(&report.host_buffer);
    println!();
    println!("Guest replica (site {}):", report.guest_site_id);
    print_binding(&report.guest_buffer);
    println!("  Following: {}", report.guest_following);
    if report.host_lost {
        println!();
        println!("Host was evicted; the replica is now a local buffer.");
    }
    println!();
    println!(
        "Relay: {} messages, {} heartbeats, {} evictions",
        report.metrics.messages_published,
        report.metrics.heartbeats_total,
        report.metrics.sites_evicted
    );
    Ok(())
}

fn print_binding(binding: &BufferBinding) {
    println!("  Title:    {}", binding.title);
    println!("  Revision: {}", binding.revision);
    println!("  Modified: {}", binding.modified);
    println!("  Detached: {}", binding.detached);
    println!("  Length:   {} chars", binding.text.chars().count());
}

struct DemoSite {
    client: PortalClient,
    transport: LocalTransport,
    events: broadcast::Receiver<PortalEvent>,
}

fn site(relay: &Arc<PortalRelay>, config: &PortalConfig) -> Result<DemoSite> {
    let transport = LocalTransport::new(Arc::clone(relay));
    let client = PortalClient::new(
        config.clone(),
        Arc::new(transport.clone()),
        Arc::new(MemoryWorkspace::new()),
    )?;
    let events = client.events();
    Ok(DemoSite {
        client,
        transport,
        events,
    })
}

async fn wait_for(
    events: &mut broadcast::Receiver<PortalEvent>,
    timeout: Duration,
    predicate: impl Fn(&PortalEvent) -> bool,
) -> Result<PortalEvent> {
    let waited = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("event channel closed"),
            }
        }
    })
    .await;
    waited.context("Timed out waiting for the guest")?
}

async fn load_text(options: &DemoOptions) -> Result<(String, String)> {
    match &options.file {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let title = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok((title, text))
        }
        None => Ok((SAMPLE_TITLE.to_string(), SAMPLE_TEXT.to_string())),
    }
}

/// Share one buffer, let a guest join and catch up with an edit, then
/// optionally lose the host.
pub async fn simulate(options: &DemoOptions) -> Result<DemoReport> {
    if options.eviction_ms < 4 {
        bail!("eviction period must be at least 4ms");
    }
    let eviction = Duration::from_millis(options.eviction_ms);
    let relay_config = Config {
        heartbeat: HeartbeatConfig {
            eviction_period_ms: options.eviction_ms,
        },
        sweep: SweepConfig {
            interval_ms: options.eviction_ms / 4,
            enabled: true,
        },
        ..Config::default()
    };
    relay_config.validate()?;
    let portal_config = PortalConfig::default().with_heartbeat_interval(eviction / 3);
    portal_config.validate_against(eviction)?;

    let relay = PortalRelay::new(relay_config).shared();
    let sweep = spawn_eviction_sweep(Arc::clone(&relay), relay.config().sweep.clone());

    let result = drive(options, &relay, &portal_config, eviction).await;
    sweep.abort();
    result
}

async fn drive(
    options: &DemoOptions,
    relay: &Arc<PortalRelay>,
    portal_config: &PortalConfig,
    eviction: Duration,
) -> Result<DemoReport> {
    let (title, text) = load_text(options).await?;
    let host_site = site(relay, portal_config)?;
    let mut guest_site = site(relay, portal_config)?;

    let host = host_site.client.share_portal().await?;
    let buffer = host.open_buffer(&title, &text).await?;
    host.activate_buffer(buffer).await?;
    tracing::info!("Host shared {} in portal {}", title, host.portal_id());

    let guest = guest_site.client.join_portal(host.portal_id()).await?;

    let revision = host
        .edit(buffer, vec![TextEdit::insert(end_point(&text), HOST_LINE)])
        .await?;
    host.set_selections(buffer, &[SelectionRange::cursor(end_point(&text))])
        .await?;
    wait_for(&mut guest_site.events, eviction, |e| {
        matches!(e, PortalEvent::ReplicaUpdated { revision: r, .. } if *r == revision)
    })
    .await?;
    let roster = relay.roster(host.portal_id()).await?;

    let mut host_lost = false;
    if options.host_loss {
        tracing::info!("Silencing host heartbeats");
        host_site.transport.pause_heartbeats(true);
        wait_for(&mut guest_site.events, eviction * 4, |e| {
            matches!(e, PortalEvent::HostLost { .. })
        })
        .await?;
        host_lost = true;
    }

    let host_buffer = host
        .binding_for_buffer(buffer)
        .await
        .context("Host lost its buffer")?;
    let guest_buffer = guest
        .binding_for_buffer(buffer)
        .await
        .context("Guest has no replica")?;
    let report = DemoReport {
        portal_id: host.portal_id(),
        host_site_id: host.site_id(),
        guest_site_id: guest.site_id(),
        roster,
        host_buffer,
        guest_buffer,
        guest_following: guest.is_following().await,
        host_lost,
        metrics: relay.metrics().snapshot(),
    };

    guest_site.client.dispose().await;
    host_site.client.dispose().await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::DETACHED_TITLE;

    fn options(host_loss: bool) -> DemoOptions {
        DemoOptions {
            file: None,
            host_loss,
            eviction_ms: 400,
        }
    }

    #[tokio::test]
    async fn guest_catches_up_with_host() {
        let report = simulate(&options(false)).await.unwrap();

        assert_eq!(report.roster.len(), 2);
        assert_eq!(report.guest_buffer.text, report.host_buffer.text);
        assert_eq!(report.guest_buffer.text, format!("{SAMPLE_TEXT}{HOST_LINE}"));
        assert_eq!(report.guest_buffer.title, "Remote Buffer: sample.txt");
        assert!(report.guest_following);
        assert!(!report.host_lost);
    }

    #[tokio::test]
    async fn host_loss_detaches_replica() {
        let report = simulate(&options(true)).await.unwrap();

        assert!(report.host_lost);
        assert!(report.guest_buffer.detached);
        assert_eq!(report.guest_buffer.title, DETACHED_TITLE);
        assert_eq!(report.guest_buffer.text, report.host_buffer.text);
        assert!(!report.guest_following);
        assert_eq!(report.metrics.sites_evicted, 1);
    }

    #[tokio::test]
    async fn shares_file_under_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Notes\n").unwrap();

        let report = simulate(&DemoOptions {
            file: Some(path),
            ..options(false)
        })
        .await
        .unwrap();
        assert_eq!(report.host_buffer.title, "notes.md");
        assert_eq!(report.guest_buffer.text, format!("# Notes\n{HOST_LINE}"));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(simulate(&options(false)))
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["roster"].as_array().map(Vec::len), Some(2));
        assert!(json["metrics"]["messages_published"].as_u64().unwrap() > 0);
    }
}
