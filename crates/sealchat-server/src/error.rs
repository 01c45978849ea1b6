//! Conversation service errors.

use sealchat_crypto::RatchetError;
use thiserror::Error;

use crate::storage::StoreError;

/// Errors returned by [`ConversationService`](crate::ConversationService).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// Ratchet engine refused the operation.
    ///
    /// The stored session is unchanged. See `RatchetError::is_fatal` for
    /// whether the message can ever be processed.
    #[error("ratchet error: {0}")]
    Ratchet(#[from] RatchetError),

    /// Storage backend failed.
    ///
    /// Conflicts and I/O failures are transient: reload and retry.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// No identity registered under this handle
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// `owner` never opened a conversation with `peer`
    #[error("{owner} has no session with {peer}")]
    NoSession {
        /// Handle of the caller
        owner: String,
        /// Handle of the other participant
        peer: String,
    },

    /// Both participants are the same user
    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    /// Handle is empty, too long or contains control characters
    #[error("invalid handle {handle:?}: {reason}")]
    InvalidHandle {
        /// The rejected handle
        handle: String,
        /// Why it was rejected
        reason: &'static str,
    },
}

impl ConversationError {
    /// Returns true if repeating the call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
