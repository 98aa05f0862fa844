//! Diff conversation failures.

use thiserror::Error;

use capsule_core::{RecordHash, ValidationError};
use capsule_store::StoreError;

use crate::engine::PeerState;
use crate::messages::Phase;

/// Errors that can occur during a diff conversation.
///
/// Every variant returned from the engine has already reset the peer's
/// conversation to `Resting`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Incoming phase does not follow from the peer's current state.
    #[error("unexpected phase {phase} in state {state:?}")]
    ProtocolState { state: PeerState, phase: Phase },

    /// Message failed to decode or has the wrong shape for its phase.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// A shipped record failed validation.
    #[error("rejected record: {0}")]
    Validation(#[from] ValidationError),

    /// A backward walk came back to a hash it had already visited.
    #[error("cycle detected at {0}")]
    CycleDetected(RecordHash),

    /// Peer unreachable or the channel closed.
    #[error("transport: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
