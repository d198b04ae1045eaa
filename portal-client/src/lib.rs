//! # portal-client
//!
//! Client library for Tandem portals.
//!
//! This is the library an editor embeds to collaborate in real time.
//!
//! ## Features
//!
//! - **Hosting**: share local buffers; edits, titles and cursors stream to guests
//! - **Joining**: mirror a host's buffers as read-only replicas, kept in step
//!   by revision and repaired with a fresh snapshot when a gap appears
//! - **Follow mode**: a guest's focus and cursor track the host's
//! - **Host loss**: replicas turn into ordinary local buffers when the host
//!   leaves or is evicted
//! - **Transport abstraction**: the relay is reached through [`Transport`];
//!   [`LocalTransport`] talks to an in-process relay
//!
//! ## Example
//!
//! ```ignore
//! use portal_client::{LocalTransport, PortalClient, PortalConfig};
//! use portal_core::MemoryWorkspace;
//!
//! let transport = Arc::new(LocalTransport::new(relay));
//! let workspace = Arc::new(MemoryWorkspace::new());
//! let host = PortalClient::new(PortalConfig::default(), transport.clone(), workspace)?;
//! let portal = host.share_portal().await?;
//! let buffer = portal.open_buffer("notes.md", "hello").await?;
//!
//! let workspace = Arc::new(MemoryWorkspace::new());
//! let guest = PortalClient::new(PortalConfig::default(), transport, workspace)?;
//! let joined = guest.join_portal(portal.portal_id()).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod guest;
mod heartbeat;
pub mod host;
mod session;
pub mod transport;

pub use client::PortalClient;
pub use config::PortalConfig;
pub use error::{PortalError, Result};
pub use events::PortalEvent;
pub use guest::GuestPortal;
pub use host::HostPortal;
pub use transport::{
    Gateway, JoinGrant, LocalTransport, PortalGrant, PubSub, RosterEntry, Subscription,
    Transport, TransportError,
};
