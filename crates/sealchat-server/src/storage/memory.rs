use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use sealchat_crypto::{KeyPair, SessionState};

use super::{ConversationSummary, SessionRecord, SessionStore, StoreError, StoredMessage};
use crate::id::ConversationId;

/// In-memory storage implementation for testing and simulation
///
/// Uses `HashMap` for lookups and a Vec per conversation for the ordered
/// message log. All state is wrapped in `Arc<Mutex<>>` so clones share it.
/// A poisoned mutex surfaces as `StoreError::Io`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Identity key pairs by user handle
    identities: HashMap<String, KeyPair>,

    /// Session records by (conversation, owner)
    sessions: HashMap<(ConversationId, String), SessionRecord>,

    /// Message logs, stored in index order
    messages: HashMap<ConversationId, Vec<StoredMessage>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of messages across all conversations.
    pub fn total_message_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.messages.values().map(Vec::len).sum())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Io("memory store mutex poisoned".to_string()))
    }
}

/// Session record ready to be replaced, after the version check.
fn session_for_commit<'a>(
    sessions: &'a mut HashMap<(ConversationId, String), SessionRecord>,
    conversation: ConversationId,
    owner: &str,
    expected_version: u64,
) -> Result<&'a mut SessionRecord, StoreError> {
    let record = sessions
        .get_mut(&(conversation, owner.to_string()))
        .ok_or_else(|| StoreError::NotFound(format!("session {conversation} for {owner}")))?;

    if record.version != expected_version {
        return Err(StoreError::Conflict { expected: record.version, got: expected_version });
    }

    Ok(record)
}

impl SessionStore for MemoryStore {
    fn store_identity(&self, user: &str, identity: &KeyPair) -> Result<(), StoreError> {
        let mut inner = self.lock()?;

        if inner.identities.contains_key(user) {
            return Err(StoreError::AlreadyExists(format!("identity {user}")));
        }

        inner.identities.insert(user.to_string(), identity.clone());
        Ok(())
    }

    fn load_identity(&self, user: &str) -> Result<Option<KeyPair>, StoreError> {
        Ok(self.lock()?.identities.get(user).cloned())
    }

    fn create_session(
        &self,
        conversation: ConversationId,
        owner: &str,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let key = (conversation, owner.to_string());

        if inner.sessions.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("session {conversation} for {owner}")));
        }

        inner.sessions.insert(key, record.clone());
        Ok(())
    }

    fn load_session(
        &self,
        conversation: ConversationId,
        owner: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.lock()?.sessions.get(&(conversation, owner.to_string())).cloned())
    }

    fn commit_send(
        &self,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        state: &SessionState,
        envelope: &[u8],
        sent_at: u64,
    ) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;

        let record =
            session_for_commit(&mut inner.sessions, conversation, owner, expected_version)?;

        let log = inner.messages.entry(conversation).or_default();
        let index = log.len() as u64;
        log.push(StoredMessage {
            index,
            sender: owner.to_string(),
            sent_at,
            envelope: envelope.to_vec(),
        });

        record.state = state.clone();
        record.version += 1;

        Ok(index)
    }

    fn commit_receive(
        &self,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        state: &SessionState,
        read_cursor: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;

        let record =
            session_for_commit(&mut inner.sessions, conversation, owner, expected_version)?;
        record.state = state.clone();
        record.read_cursor = read_cursor;
        record.version += 1;

        Ok(())
    }

    fn load_messages(
        &self,
        conversation: ConversationId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.lock()?;

        let Some(log) = inner.messages.get(&conversation) else {
            return Ok(Vec::new());
        };

        let start = (from as usize).min(log.len());
        let end = start.saturating_add(limit).min(log.len());

        Ok(log[start..end].to_vec())
    }

    fn message_count(&self, conversation: ConversationId) -> Result<u64, StoreError> {
        Ok(self.lock()?.messages.get(&conversation).map_or(0, |log| log.len() as u64))
    }

    fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>, StoreError> {
        let inner = self.lock()?;

        Ok(inner
            .sessions
            .iter()
            .filter(|((_, session_owner), _)| session_owner == owner)
            .map(|((conversation, _), record)| ConversationSummary {
                conversation: *conversation,
                peer: record.peer.clone(),
            })
            .collect())
    }
}
