//! Conversation service
//!
//! Glues the ratchet engine to a [`SessionStore`]. Every operation follows the
//! same shape: lock the caller's side of the conversation, load the session
//! record, run the engine on it and commit the successor state with the
//! version that was loaded. The engine never mutates in place, so a failure
//! anywhere before the commit leaves the stored session as it was.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use sealchat_crypto::{
    EncryptedEnvelope, Environment, KeyPair, PublicKey, RatchetError, Role, initialize_session,
};

use crate::{
    config::ConversationConfig,
    error::ConversationError,
    id::ConversationId,
    storage::{SessionRecord, SessionStore, StoreError, StoredMessage},
};

/// Longest accepted user handle, in characters
pub const MAX_HANDLE_LEN: usize = 64;

/// Result of opening a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedConversation {
    /// Conversation id shared by both participants
    pub conversation: ConversationId,
    /// Role the caller bootstrapped with
    pub role: Role,
    /// True if the caller's session already existed and was left untouched
    pub existing: bool,
}

/// A peer message decrypted by `receive_pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Position in the conversation log
    pub index: u64,
    /// Handle of the sender
    pub sender: String,
    /// Decrypted content
    pub plaintext: Vec<u8>,
}

/// Outcome of a `receive_pending` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiveOutcome {
    /// Messages decrypted, in log order
    pub messages: Vec<ReceivedMessage>,
    /// First message that could not be decrypted, if any.
    ///
    /// The read cursor stops in front of it, so later calls report it again.
    pub stalled: Option<(u64, RatchetError)>,
    /// True if the batch limit was reached before the end of the log
    pub has_more: bool,
}

/// One page of a conversation's history. Ciphertext only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Messages on this page, oldest first
    pub messages: Vec<StoredMessage>,
    /// 1-based page number; page 1 holds the newest messages
    pub page: u64,
    /// Page size used
    pub limit: usize,
    /// Messages in the whole conversation
    pub total_count: u64,
    /// Number of pages at this page size
    pub total_pages: u64,
}

/// Latest entry of a conversation log, as shown in a conversation listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    /// Position in the conversation log
    pub index: u64,
    /// Handle of the sender
    pub sender: String,
    /// Sender's clock at commit, in Unix milliseconds
    pub sent_at: u64,
    /// Size of the encoded envelope in bytes
    pub envelope_len: usize,
}

/// Conversation listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationOverview {
    /// Conversation id
    pub conversation: ConversationId,
    /// Handle of the other participant
    pub peer: String,
    /// Messages in the conversation log
    pub message_count: u64,
    /// Newest message, `None` while the log is empty
    pub last_message: Option<LastMessage>,
}

/// Per-user conversation operations over a session store.
///
/// Operations on the same `(conversation, owner)` pair are serialized by an
/// exclusive lock. A lock lives in the map only while someone holds or waits
/// for it. The store's version check catches writers outside this service
/// (another process on the same database).
pub struct ConversationService<S: SessionStore, E: Environment> {
    store: S,
    env: E,
    config: ConversationConfig,
    locks: Mutex<HashMap<(ConversationId, String), Arc<Mutex<()>>>>,
}

impl<S: SessionStore, E: Environment> ConversationService<S, E> {
    /// Create a service with the default configuration.
    pub fn new(store: S, env: E) -> Self {
        Self::with_config(store, env, ConversationConfig::default())
    }

    /// Create a service with an explicit configuration.
    pub fn with_config(store: S, env: E, config: ConversationConfig) -> Self {
        Self { store, env, config, locks: Mutex::new(HashMap::new()) }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Generate and store an identity key pair for `user`.
    ///
    /// Returns the public identity key.
    ///
    /// # Errors
    ///
    /// - `InvalidHandle` if `user` is not a valid handle
    /// - `Store(AlreadyExists)` if `user` is already registered
    pub fn register(&self, user: &str) -> Result<PublicKey, ConversationError> {
        validate_handle(user)?;

        let identity = KeyPair::generate(&self.env);
        self.store.store_identity(user, &identity)?;

        tracing::info!(user, "identity registered");

        Ok(identity.public())
    }

    /// Bootstrap `user`'s side of a conversation with `peer`.
    ///
    /// Without an explicit role, the handle that sorts first is the initiator.
    /// Both sides reach the same answer no matter who opens first, so two
    /// racing opens still end up with complementary roles.
    ///
    /// Opening again is a no-op that returns the stored session with
    /// `existing` set; a requested role is ignored then.
    ///
    /// # Errors
    ///
    /// - `SelfConversation` if `user == peer`
    /// - `UnknownUser` if either side has no identity
    pub fn open(
        &self,
        user: &str,
        peer: &str,
        role: Option<Role>,
    ) -> Result<OpenedConversation, ConversationError> {
        let conversation = self.conversation_between(user, peer)?;

        let identity = self
            .store
            .load_identity(user)?
            .ok_or_else(|| ConversationError::UnknownUser(user.to_string()))?;
        let peer_identity = self
            .store
            .load_identity(peer)?
            .ok_or_else(|| ConversationError::UnknownUser(peer.to_string()))?;

        self.with_session_lock(conversation, user, || {
            if let Some(record) = self.store.load_session(conversation, user)? {
                return Ok(Self::reopened(conversation, &record));
            }

            let role = role.unwrap_or(if user < peer { Role::Initiator } else { Role::Responder });
            let state =
                initialize_session(&self.env, identity.private(), &peer_identity.public(), role)?;

            match self.store.create_session(conversation, user, &SessionRecord::new(peer, state)) {
                Ok(()) => {},
                // Another process on the same database got there first.
                Err(StoreError::AlreadyExists(_)) => {
                    let record = self.load_record(conversation, user, peer)?;
                    return Ok(Self::reopened(conversation, &record));
                },
                Err(err) => return Err(err.into()),
            }

            tracing::info!(%conversation, owner = user, peer, ?role, "session opened");

            Ok(OpenedConversation { conversation, role, existing: false })
        })
    }

    /// Encrypt `plaintext` from `user` to `peer` and append it to the log.
    ///
    /// Returns the log index of the new message.
    ///
    /// # Errors
    ///
    /// - `NoSession` if `user` never opened the conversation
    /// - `Ratchet` if encryption fails (e.g. counter overflow)
    /// - `Store(Conflict)` if the session changed since it was loaded
    pub fn send(&self, user: &str, peer: &str, plaintext: &[u8]) -> Result<u64, ConversationError> {
        let conversation = self.conversation_between(user, peer)?;

        self.with_session_lock(conversation, user, || {
            let record = self.load_record(conversation, user, peer)?;

            let (envelope, next) = record.state.encrypt(&self.env, plaintext)?;
            let bytes = envelope.encode().map_err(RatchetError::from)?;

            let sent_at = self.env.now_millis();
            let index =
                self.store.commit_send(conversation, user, record.version, &next, &bytes, sent_at)?;

            tracing::debug!(
                %conversation,
                owner = user,
                index,
                position = envelope.chain_position,
                epoch = envelope.key_material.epoch,
                "message sent"
            );

            Ok(index)
        })
    }

    /// Decrypt the peer's messages past `user`'s read cursor.
    ///
    /// Own messages are skipped. Processing stops at the first message that
    /// fails to decode or decrypt; everything before it is committed, the
    /// failing message stays unread and is reported in `stalled`.
    ///
    /// # Errors
    ///
    /// - `NoSession` if `user` never opened the conversation
    /// - `Store` if loading or committing fails. Nothing is committed then.
    pub fn receive_pending(
        &self,
        user: &str,
        peer: &str,
    ) -> Result<ReceiveOutcome, ConversationError> {
        let conversation = self.conversation_between(user, peer)?;

        self.with_session_lock(conversation, user, || {
            let record = self.load_record(conversation, user, peer)?;
            let batch = self.store.load_messages(
                conversation,
                record.read_cursor,
                self.config.receive_batch_limit,
            )?;
            let has_more = batch.len() >= self.config.receive_batch_limit;

            let mut outcome = ReceiveOutcome::default();
            let mut state = record.state.clone();
            let mut cursor = record.read_cursor;

            for message in batch {
                if message.sender == user {
                    cursor = message.index + 1;
                    continue;
                }

                let result = EncryptedEnvelope::decode(&message.envelope)
                    .map_err(RatchetError::from)
                    .and_then(|envelope| state.decrypt(&self.env, &envelope));

                match result {
                    Ok((plaintext, next)) => {
                        state = next;
                        cursor = message.index + 1;
                        outcome.messages.push(ReceivedMessage {
                            index: message.index,
                            sender: message.sender,
                            plaintext,
                        });
                    },
                    Err(err) => {
                        tracing::warn!(
                            %conversation,
                            owner = user,
                            index = message.index,
                            fatal = err.is_fatal(),
                            "message could not be decrypted: {err}"
                        );
                        outcome.stalled = Some((message.index, err));
                        break;
                    },
                }
            }

            outcome.has_more = has_more && outcome.stalled.is_none();

            if cursor != record.read_cursor {
                self.store.commit_receive(conversation, user, record.version, &state, cursor)?;
            }

            tracing::debug!(
                %conversation,
                owner = user,
                received = outcome.messages.len(),
                read_cursor = cursor,
                epoch = state.receiving_epoch(),
                "pending messages processed"
            );

            Ok(outcome)
        })
    }

    /// One page of the conversation log, newest page first.
    ///
    /// Page 1 holds the newest `limit` messages; messages within a page are
    /// oldest first. Page 0 is treated as page 1. A page past the end is
    /// empty.
    ///
    /// # Errors
    ///
    /// - `NoSession` if `user` is not a participant
    pub fn history(
        &self,
        user: &str,
        peer: &str,
        page: u64,
        limit: Option<usize>,
    ) -> Result<HistoryPage, ConversationError> {
        let conversation = self.conversation_between(user, peer)?;
        self.load_record(conversation, user, peer)?;

        let page = page.max(1);
        let limit = self.config.page_size(limit);
        let total_count = self.store.message_count(conversation)?;
        let total_pages = total_count.div_ceil(limit as u64);

        let newer = (page - 1).saturating_mul(limit as u64);
        let end = total_count.saturating_sub(newer);
        let start = end.saturating_sub(limit as u64);

        let messages = if end > start {
            self.store.load_messages(conversation, start, (end - start) as usize)?
        } else {
            Vec::new()
        };

        Ok(HistoryPage { messages, page, limit, total_count, total_pages })
    }

    /// Conversations `user` has opened, most recently active first.
    ///
    /// Conversations without messages come last. Ties are broken by peer
    /// handle.
    pub fn conversations(
        &self,
        user: &str,
    ) -> Result<Vec<ConversationOverview>, ConversationError> {
        validate_handle(user)?;

        let mut overviews = Vec::new();
        for summary in self.store.list_conversations(user)? {
            let message_count = self.store.message_count(summary.conversation)?;
            let last_message = match message_count.checked_sub(1) {
                Some(newest) => self
                    .store
                    .load_messages(summary.conversation, newest, 1)?
                    .into_iter()
                    .next()
                    .map(|message| LastMessage {
                        index: message.index,
                        sender: message.sender,
                        sent_at: message.sent_at,
                        envelope_len: message.envelope.len(),
                    }),
                None => None,
            };

            overviews.push(ConversationOverview {
                conversation: summary.conversation,
                peer: summary.peer,
                message_count,
                last_message,
            });
        }

        overviews.sort_by(|a, b| {
            let activity = |o: &ConversationOverview| o.last_message.as_ref().map(|m| m.sent_at);
            activity(b).cmp(&activity(a)).then_with(|| a.peer.cmp(&b.peer))
        });

        Ok(overviews)
    }

    fn conversation_between(
        &self,
        user: &str,
        peer: &str,
    ) -> Result<ConversationId, ConversationError> {
        validate_handle(user)?;
        validate_handle(peer)?;

        if user == peer {
            return Err(ConversationError::SelfConversation);
        }

        Ok(ConversationId::between(user, peer))
    }

    fn load_record(
        &self,
        conversation: ConversationId,
        user: &str,
        peer: &str,
    ) -> Result<SessionRecord, ConversationError> {
        self.store.load_session(conversation, user)?.ok_or_else(|| ConversationError::NoSession {
            owner: user.to_string(),
            peer: peer.to_string(),
        })
    }

    fn reopened(conversation: ConversationId, record: &SessionRecord) -> OpenedConversation {
        OpenedConversation { conversation, role: record.state.role(), existing: true }
    }

    /// Run `operation` holding the lock on `owner`'s side of `conversation`.
    ///
    /// The lock is dropped from the map afterwards unless another caller
    /// already holds or waits for it.
    fn with_session_lock<T>(
        &self,
        conversation: ConversationId,
        owner: &str,
        operation: impl FnOnce() -> Result<T, ConversationError>,
    ) -> Result<T, ConversationError> {
        let key = (conversation, owner.to_string());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            operation()
        };

        // Clones are only taken under the map lock, so the count is exact here.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }

        result
    }
}

/// Check that `handle` is usable as a user handle.
pub fn validate_handle(handle: &str) -> Result<(), ConversationError> {
    let reason = if handle.is_empty() {
        "empty"
    } else if handle.chars().count() > MAX_HANDLE_LEN {
        "too long"
    } else if handle.chars().any(char::is_control) {
        "contains control characters"
    } else {
        return Ok(());
    };

    Err(ConversationError::InvalidHandle { handle: handle.to_string(), reason })
}

#[cfg(test)]
mod tests {
    use sealchat_crypto::SeededEnv;

    use super::*;
    use crate::storage::MemoryStore;

    fn service(seed: u64) -> ConversationService<MemoryStore, SeededEnv> {
        ConversationService::new(MemoryStore::new(), SeededEnv::from_u64(seed))
    }

    fn pair(seed: u64) -> ConversationService<MemoryStore, SeededEnv> {
        let service = service(seed);
        service.register("alice").unwrap();
        service.register("bob").unwrap();
        service.open("alice", "bob", None).unwrap();
        service.open("bob", "alice", None).unwrap();
        service
    }

    #[test]
    fn handle_validation() {
        assert!(validate_handle("alice").is_ok());
        assert!(validate_handle(&"x".repeat(MAX_HANDLE_LEN)).is_ok());

        for bad in ["", "ali\0ce", "tab\there"] {
            assert!(matches!(
                validate_handle(bad),
                Err(ConversationError::InvalidHandle { .. })
            ));
        }
        assert!(validate_handle(&"x".repeat(MAX_HANDLE_LEN + 1)).is_err());
    }

    #[test]
    fn roles_follow_handle_order_not_open_order() {
        let service = service(1);
        service.register("alice").unwrap();
        service.register("bob").unwrap();

        assert_eq!(service.open("bob", "alice", None).unwrap().role, Role::Responder);
        assert_eq!(service.open("alice", "bob", None).unwrap().role, Role::Initiator);
    }

    #[test]
    fn reopening_returns_the_stored_session() {
        let service = pair(7);
        service.send("alice", "bob", b"kept").unwrap();
        let conversation = ConversationId::between("alice", "bob");
        let before = service.store().load_session(conversation, "alice").unwrap().unwrap();

        let again = service.open("alice", "bob", Some(Role::Responder)).unwrap();
        assert_eq!(
            again,
            OpenedConversation { conversation, role: Role::Initiator, existing: true }
        );

        let after = service.store().load_session(conversation, "alice").unwrap().unwrap();
        assert_eq!(after, before);
        assert_eq!(service.receive_pending("bob", "alice").unwrap().messages.len(), 1);
    }

    #[test]
    fn idle_session_locks_are_released() {
        let service = pair(8);
        service.register("carol").unwrap();
        service.open("carol", "alice", None).unwrap();

        service.send("alice", "bob", b"one").unwrap();
        service.receive_pending("bob", "alice").unwrap();
        service.send("carol", "alice", b"two").unwrap();
        assert!(service.send("carol", "bob", b"none").is_err());

        assert!(service.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn open_requires_both_identities() {
        let service = service(2);
        service.register("alice").unwrap();

        let result = service.open("alice", "bob", None);
        assert_eq!(result, Err(ConversationError::UnknownUser("bob".to_string())));
    }

    #[test]
    fn send_then_receive() {
        let service = pair(3);

        assert_eq!(service.send("alice", "bob", b"hello").unwrap(), 0);
        let outcome = service.receive_pending("bob", "alice").unwrap();

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].plaintext, b"hello");
        assert_eq!(outcome.messages[0].sender, "alice");
        assert!(outcome.stalled.is_none());

        // Already read.
        assert!(service.receive_pending("bob", "alice").unwrap().messages.is_empty());
    }

    #[test]
    fn own_messages_are_skipped() {
        let service = pair(4);

        service.send("alice", "bob", b"one").unwrap();
        service.send("alice", "bob", b"two").unwrap();

        let outcome = service.receive_pending("alice", "bob").unwrap();
        assert!(outcome.messages.is_empty());

        let conversation = ConversationId::between("alice", "bob");
        let record = service.store().load_session(conversation, "alice").unwrap().unwrap();
        assert_eq!(record.read_cursor, 2);
    }

    #[test]
    fn send_without_session_fails() {
        let service = service(5);
        service.register("alice").unwrap();
        service.register("bob").unwrap();

        let expected =
            ConversationError::NoSession { owner: "alice".to_string(), peer: "bob".to_string() };
        assert_eq!(service.send("alice", "bob", b"hi"), Err(expected));
    }

    #[test]
    fn history_pages_from_newest() {
        let service = pair(6);
        for i in 0..5u8 {
            service.send("alice", "bob", &[i]).unwrap();
        }

        let first = service.history("bob", "alice", 1, Some(2)).unwrap();
        assert_eq!(first.messages.iter().map(|m| m.index).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(first.total_count, 5);
        assert_eq!(first.total_pages, 3);

        let last = service.history("bob", "alice", 3, Some(2)).unwrap();
        assert_eq!(last.messages.iter().map(|m| m.index).collect::<Vec<_>>(), vec![0]);

        assert!(service.history("bob", "alice", 4, Some(2)).unwrap().messages.is_empty());
    }
}
