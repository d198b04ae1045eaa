//! # portal-relay
//!
//! The relay side of Tandem portals.
//!
//! This crate implements the shared service every site talks to:
//! - Creates portals and admits sites, allocating site ids per portal
//! - Fans out every message of a portal to all its subscribers in one order
//! - Tracks heartbeats and evicts sites that fall silent
//! - Never looks inside site payloads (they are opaque bytes)
//!
//! ## Architecture
//!
//! ```text
//!  Host (site 1) ──┐                       ┌── Guest (site 2)
//!                  │  publish / subscribe  │
//!                  ├──────────────────────►│
//!              ┌───┴───────────────────────┴───┐
//!              │          portal-relay         │
//!              │  PortalRegistry (per portal   │
//!              │  mutex + ordered channel)     │
//!              │  HeartbeatService + sweep     │
//!              └───────────────────────────────┘
//! ```
//!
//! Membership changes (`SiteJoined`, `SiteLeft`, `SiteEvicted`) are published
//! by the relay itself with sender [`portal_types::SiteId::RELAY`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod membership;
pub mod server;
pub mod sweep;

pub use channel::Subscription;
pub use config::{Config, ConfigError, HeartbeatConfig, LimitsConfig, SweepConfig};
pub use error::RelayError;
pub use membership::{JoinGrant, PortalGrant, RosterEntry};
pub use server::{MetricsSnapshot, PortalRelay, RelayMetrics};
pub use sweep::spawn_eviction_sweep;
