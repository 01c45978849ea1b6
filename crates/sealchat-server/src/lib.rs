//! Sealchat conversation service.
//!
//! Persistence and orchestration around the [`sealchat_crypto`] ratchet
//! engine: identity registration, session bootstrap, sending, receiving and
//! paginated history over a pluggable [`SessionStore`].
//!
//! # Components
//!
//! - [`ConversationService`]: per-user operations, one lock per conversation
//!   side, optimistic version checks on every commit
//! - [`SessionStore`]: storage trait with [`MemoryStore`] (tests),
//!   [`RedbStore`] (durable) and [`ChaoticStore`] (fault injection)
//! - [`ConversationId`]: order-independent id for a pair of handles

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod conversation;
mod error;
mod id;
pub mod storage;

pub use config::ConversationConfig;
pub use conversation::{
    ConversationOverview, ConversationService, HistoryPage, LastMessage, MAX_HANDLE_LEN,
    OpenedConversation, ReceiveOutcome, ReceivedMessage, validate_handle,
};
pub use error::ConversationError;
pub use id::ConversationId;
pub use storage::{
    ChaoticStore, ConversationSummary, MemoryStore, RedbStore, SessionRecord, SessionStore,
    StoreError, StoredMessage,
};
