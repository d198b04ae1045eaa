//! Validate a relay configuration file.

use anyhow::{Context, Result};
use portal_client::PortalConfig;
use portal_relay::Config;
use std::path::Path;
use std::time::Duration;

/// Run the check-config command.
pub fn run(path: &Path, heartbeat_ms: Option<u64>) -> Result<()> {
    let config = check(path, heartbeat_ms)?;

    println!("=== relay config: {} ===", path.display());
    println!();
    println!("Heartbeat:");
    println!("  Eviction period: {}ms", config.heartbeat.eviction_period_ms);
    println!("Limits:");
    println!("  Portals:         {}", config.limits.max_portals);
    println!("  Sites/portal:    {}", config.limits.max_sites_per_portal);
    println!("Sweep:");
    if config.sweep.enabled {
        println!("  Interval:        {}ms", config.sweep.interval_ms);
    } else {
        println!("  DISABLED (sites are never evicted)");
    }
    if let Some(ms) = heartbeat_ms {
        println!();
        println!("Client heartbeat of {}ms: OK", ms);
    }
    Ok(())
}

/// Load the file and check it, optionally against a client heartbeat.
fn check(path: &Path, heartbeat_ms: Option<u64>) -> Result<Config> {
    let config = Config::from_file(path)
        .with_context(|| format!("Invalid relay config {}", path.display()))?;

    if let Some(ms) = heartbeat_ms {
        PortalConfig::default()
            .with_heartbeat_interval(Duration::from_millis(ms))
            .validate_against(config.heartbeat.eviction_period())
            .context("Client heartbeat does not fit the relay")?;
    }
    Ok(config)
}
