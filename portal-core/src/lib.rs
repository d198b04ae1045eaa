//! # portal-core
//!
//! Pure logic for Tandem portals (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms behind portal
//! synchronization without any network access or timers, enabling fast unit
//! tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time, where it matters) and produce output without side effects.
//! This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (channels, heartbeats, timers) is performed by
//! `portal-relay` and `portal-client`, which drive these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod follow;
pub mod liveness;
pub mod pane;
pub mod selection;
pub mod state;
pub mod text;
pub mod workspace;

pub use buffer::{
    remote_title, BufferBinding, BufferError, BufferTable, HostBuffer, ReplicaBuffer,
    ReplicaOutcome, ResyncReason, SharedBuffer, DETACHED_TITLE, REMOTE_TITLE_PREFIX,
};
pub use follow::FollowState;
pub use liveness::{HeartbeatRecord, Liveness, LivenessError, LivenessTracker, SiteKey};
pub use pane::{PaneOrder, Placement};
pub use selection::{CursorOutcome, CursorStore, SelectionSet};
pub use state::{SessionAction, SessionEvent, SessionState};
pub use text::EditError;
pub use workspace::{MemoryWorkspace, Workspace};
