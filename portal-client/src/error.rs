//! Errors surfaced by portal sessions.

use portal_core::{BufferError, EditError};
use portal_types::{BufferId, PortalId, WireError};
use thiserror::Error;

use crate::transport::TransportError;

/// Portal errors.
#[derive(Debug, Error)]
pub enum PortalError {
    /// No live host is registered for the portal.
    #[error("portal not found: {portal_id}")]
    PortalNotFound {
        /// The requested portal.
        portal_id: PortalId,
    },

    /// The relay refused to allocate, even after retrying.
    #[error("allocation failed after {attempts} attempts: {reason}")]
    Allocation {
        /// Attempts made.
        attempts: u32,
        /// Last reason given by the relay.
        reason: String,
    },

    /// The portal (or the client) has been disposed.
    #[error("portal closed")]
    PortalClosed,

    /// The host did not send its state in time.
    #[error("join timed out after {timeout_ms}ms")]
    JoinTimeout {
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// Guests cannot edit an attached replica.
    #[error("buffer {buffer_id} is a read-only replica")]
    ReadOnlyReplica {
        /// The replica.
        buffer_id: BufferId,
    },

    /// No such buffer in this portal.
    #[error("unknown buffer {buffer_id}")]
    UnknownBuffer {
        /// The requested id.
        buffer_id: BufferId,
    },

    /// The edit does not apply to the buffer's text.
    #[error("invalid edit in buffer {buffer_id}: {source}")]
    InvalidEdit {
        /// The buffer.
        buffer_id: BufferId,
        /// What went wrong.
        #[source]
        source: EditError,
    },

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Encoding or decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl From<BufferError> for PortalError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::ReadOnlyReplica { buffer_id } => Self::ReadOnlyReplica { buffer_id },
            BufferError::UnknownBuffer { buffer_id } => Self::UnknownBuffer { buffer_id },
            BufferError::InvalidEdit { buffer_id, source } => {
                Self::InvalidEdit { buffer_id, source }
            }
        }
    }
}

/// Result type alias for portal operations.
pub type Result<T> = std::result::Result<T, PortalError>;
