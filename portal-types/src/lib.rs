//! # portal-types
//!
//! Wire format types for Tandem portals.
//!
//! This crate provides the foundational types used across all portal crates:
//! - [`PortalId`], [`SiteId`], [`BufferId`], [`Revision`] - Identity and ordering types
//! - [`Point`], [`SelectionRange`], [`TextEdit`] - Text geometry shared by buffers and cursors
//! - [`Envelope`] - Channel wrapper with routing metadata
//! - [`PortalMessage`] - The closed set of messages multiplexed on a portal channel
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;
mod text;

pub use envelope::Envelope;
pub use error::WireError;
pub use ids::{BufferId, PortalId, Revision, SiteId, SiteRole};
pub use messages::{
    ActiveBufferChanged, BufferClosed, BufferDelta, BufferMetadata, BufferSnapshot,
    CursorUpdate, PortalMessage, PortalState, ReplayRequest, ResyncRequest, SiteEvicted,
    SiteJoined, SiteLeft,
};
pub use text::{Point, SelectionRange, TextEdit};
