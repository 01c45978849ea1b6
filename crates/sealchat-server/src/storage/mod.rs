//! Storage abstraction for sealchat conversations
//!
//! Trait-based abstraction for persisting identity keys, per-participant
//! ratchet state and the shared message log of each conversation. The trait is
//! synchronous (no async) to maintain a clean synchronous API design.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
pub use error::StoreError;
pub use memory::MemoryStore;
use sealchat_crypto::{KeyPair, SessionState};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStore;
use crate::id::ConversationId;

/// One participant's side of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Incremented on every commit. Writers must present the version they
    /// loaded; a mismatch means someone else committed in between.
    pub version: u64,
    /// Handle of the other participant
    pub peer: String,
    /// Current ratchet state
    pub state: SessionState,
    /// Index of the first message in the conversation log this participant
    /// has not processed yet
    pub read_cursor: u64,
}

impl SessionRecord {
    /// Record for a freshly bootstrapped session.
    pub fn new(peer: impl Into<String>, state: SessionState) -> Self {
        Self { version: 0, peer: peer.into(), state, read_cursor: 0 }
    }
}

/// Entry in a conversation's message log. Only ciphertext is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Position in the conversation log
    pub index: u64,
    /// Handle of the sender
    pub sender: String,
    /// Sender's clock when the message was committed, in Unix milliseconds
    pub sent_at: u64,
    /// Encoded `EncryptedEnvelope`
    pub envelope: Vec<u8>,
}

/// Conversation listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    /// Conversation id
    pub conversation: ConversationId,
    /// Handle of the other participant
    pub peer: String,
}

/// Storage abstraction for identities, sessions and message logs
///
/// Must be Clone (shared between service instances), Send + Sync
/// (thread-safe), and synchronous (no async methods). Implementations share
/// internal state via Arc, so clones access the same underlying storage.
///
/// # Atomicity
///
/// `commit_send` and `commit_receive` update the session record and the
/// message log (or read cursor) in one transaction. Either both changes are
/// visible afterwards or neither is.
pub trait SessionStore: Clone + Send + Sync + 'static {
    /// Store a user's long-term identity key pair.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if the user is already registered
    fn store_identity(&self, user: &str, identity: &KeyPair) -> Result<(), StoreError>;

    /// Load a user's identity key pair. `None` if not registered.
    fn load_identity(&self, user: &str) -> Result<Option<KeyPair>, StoreError>;

    /// Create `owner`'s side of a conversation.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if `owner` already has a session for `conversation`
    fn create_session(
        &self,
        conversation: ConversationId,
        owner: &str,
        record: &SessionRecord,
    ) -> Result<(), StoreError>;

    /// Load `owner`'s side of a conversation. `None` if it doesn't exist.
    fn load_session(
        &self,
        conversation: ConversationId,
        owner: &str,
    ) -> Result<Option<SessionRecord>, StoreError>;

    /// Append an outgoing message and persist the successor state.
    ///
    /// Returns the log index assigned to the message.
    ///
    /// # Invariants
    ///
    /// - Pre: the stored record version equals `expected_version`
    /// - Post: record version is `expected_version + 1`, the message is the
    ///   last entry of the log
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session doesn't exist
    /// - `Conflict` if the stored version differs from `expected_version`
    fn commit_send(
        &self,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        state: &SessionState,
        envelope: &[u8],
        sent_at: u64,
    ) -> Result<u64, StoreError>;

    /// Persist the successor state after receiving and move the read cursor.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session doesn't exist
    /// - `Conflict` if the stored version differs from `expected_version`
    fn commit_receive(
        &self,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        state: &SessionState,
        read_cursor: u64,
    ) -> Result<(), StoreError>;

    /// Load messages from a conversation log
    ///
    /// Returns messages in range `[from, from+limit)`.
    /// If fewer than `limit` messages exist, returns all available messages.
    fn load_messages(
        &self,
        conversation: ConversationId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Number of messages in a conversation log.
    fn message_count(&self, conversation: ConversationId) -> Result<u64, StoreError>;

    /// All conversations `owner` has a session in. Order is not guaranteed.
    fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>, StoreError>;
}
