//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A
//! commit writes the session record and the message log entry in the same
//! write transaction, so a crash never leaves a ratchet state without the
//! message it produced (or the reverse).

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use sealchat_crypto::{KeyPair, SessionState};
use serde::{Serialize, de::DeserializeOwned};

use super::{ConversationSummary, SessionRecord, SessionStore, StoreError, StoredMessage};
use crate::id::ConversationId;

/// Table: identities
/// Key: user handle (UTF-8 bytes)
/// Value: CBOR-encoded KeyPair
const IDENTITIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("identities");

/// Table: sessions
/// Key: owner handle || 0x00 || conversation_id (16 bytes BE)
/// Value: CBOR-encoded SessionRecord
const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

/// Table: messages
/// Key: (conversation_id: u128, index: u64) as big-endian bytes [24 bytes]
/// Value: CBOR-encoded StoredMessage
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (IDENTITIES, SESSIONS, MESSAGES).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(IDENTITIES).map_err(io)?;
            let _ = txn.open_table(SESSIONS).map_err(io)?;
            let _ = txn.open_table(MESSAGES).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Next free index in a conversation log.
    fn next_message_index<T: ReadableTable<&'static [u8], &'static [u8]>>(
        table: &T,
        conversation: ConversationId,
    ) -> Result<u64, StoreError> {
        let start_key = encode_message_key(conversation, 0);
        let end_key = encode_message_key(conversation, u64::MAX);

        let mut range = table.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)?;

        match range.next_back() {
            Some(entry) => {
                let (key, _) = entry.map_err(io)?;
                let (_, index) = decode_message_key(key.value())?;
                Ok(index + 1)
            },
            None => Ok(0),
        }
    }

    /// Load, version-check and replace a session record inside `txn`.
    fn replace_session(
        txn: &redb::WriteTransaction,
        conversation: ConversationId,
        owner: &str,
        expected_version: u64,
        update: impl FnOnce(&mut SessionRecord),
    ) -> Result<(), StoreError> {
        let mut table = txn.open_table(SESSIONS).map_err(io)?;
        let key = encode_session_key(owner, conversation);

        let mut record: SessionRecord = match table.get(key.as_slice()).map_err(io)? {
            Some(value) => from_cbor(value.value())?,
            None => {
                return Err(StoreError::NotFound(format!("session {conversation} for {owner}")));
            },
        };

        if record.version != expected_version {
            return Err(StoreError::Conflict { expected: record.version, got: expected_version });
        }

        update(&mut record);
        record.version += 1;

        let bytes = to_cbor(&record)?;
        table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;

        Ok(())
    }
}

impl SessionStore for RedbStore {
    fn store_identity(&self, user: &str, identity: &KeyPair) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut table = txn.open_table(IDENTITIES).map_err(io)?;

            if table.get(user.as_bytes()).map_err(io)?.is_some() {
                return Err(StoreError::AlreadyExists(format!("identity {user}")));
            }

            let bytes = to_cbor(identity)?;
            table.insert(user.as_bytes(), bytes.as_slice()).map_err(io)?;
        }

        txn.commit().map_err(io)?;

        Ok(())
    }

    fn load_identity(&self, user: &str) -> Result<Option<KeyPair>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(IDENTITIES).map_err(io)?;

        match table.get(user.as_bytes()).map_err(io)? {
            Some(value) => Ok(Some(from_cbor(value.value())?)),
            None => Ok(None),
        }
    }

    fn create_session(
        &self,
        conversation: ConversationId,
        owner: &str,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut table = txn.open_table(SESSIONS).map_err(io)?;
            let key = encode_session_key(owner, conversation);

            if table.get(key.as_slice()).map_err(io)?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "session {conversation} for {owner}"
                )));
            }

            let bytes = to_cbor(record)?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;
        }

        txn.commit().map_err(io)?;

        Ok(())
    }

    fn load_session(
        &self,
        conversation: ConversationId,
        owner: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;

        let key = encode_session_key(owner, conversation);

        match table.get(key.as_slice()).map_err(io)? {
            Some(value) => Ok(Some(from_cbor(value.value())?)),
            None => Ok(None),
        }
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
        let txn = self.db.begin_write().map_err(io)?;

        Self::replace_session(&txn, conversation, owner, expected_version, |record| {
            record.state = state.clone();
        })?;

        let index = {
            let mut table = txn.open_table(MESSAGES).map_err(io)?;
            let index = Self::next_message_index(&table, conversation)?;

            let message = StoredMessage {
                index,
                sender: owner.to_string(),
                sent_at,
                envelope: envelope.to_vec(),
            };
            let bytes = to_cbor(&message)?;

            let key = encode_message_key(conversation, index);
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io)?;
            index
        };

        txn.commit().map_err(io)?;

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
        let txn = self.db.begin_write().map_err(io)?;

        Self::replace_session(&txn, conversation, owner, expected_version, |record| {
            record.state = state.clone();
            record.read_cursor = read_cursor;
        })?;

        txn.commit().map_err(io)?;

        Ok(())
    }

    fn load_messages(
        &self,
        conversation: ConversationId,
        from: u64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        let start_key = encode_message_key(conversation, from);
        let end_key = encode_message_key(conversation, u64::MAX);

        let results = table.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)?;

        let mut messages = Vec::with_capacity(limit.min(1024));
        for result in results.take(limit) {
            let (_, value) = result.map_err(io)?;
            messages.push(from_cbor(value.value())?);
        }

        Ok(messages)
    }

    fn message_count(&self, conversation: ConversationId) -> Result<u64, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        Self::next_message_index(&table, conversation)
    }

    fn list_conversations(&self, owner: &str) -> Result<Vec<ConversationSummary>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;

        let start_key = encode_session_key(owner, ConversationId::from_u128(0));
        let end_key = encode_session_key(owner, ConversationId::from_u128(u128::MAX));

        let mut conversations = Vec::new();
        for result in table.range(start_key.as_slice()..=end_key.as_slice()).map_err(io)? {
            let (key, value) = result.map_err(io)?;
            let record: SessionRecord = from_cbor(value.value())?;
            conversations.push(ConversationSummary {
                conversation: decode_session_conversation(key.value())?,
                peer: record.peer,
            });
        }

        Ok(conversations)
    }
}

fn io(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}

fn to_cbor(value: &impl Serialize) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Encode (conversation_id, index) as 24-byte big-endian key.
///
/// Layout: [conversation_id: 16 bytes BE][index: 8 bytes BE]
/// This ensures lexicographic ordering matches numeric ordering.
fn encode_message_key(conversation: ConversationId, index: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(&conversation.as_u128().to_be_bytes());
    key[16..].copy_from_slice(&index.to_be_bytes());
    key
}

/// Decode message key back to (conversation_id, index).
fn decode_message_key(key: &[u8]) -> Result<(ConversationId, u64), StoreError> {
    let Some((conversation, index)) = key.split_first_chunk::<16>() else {
        return Err(StoreError::Serialization("message key too short".to_string()));
    };
    let index: [u8; 8] = index
        .try_into()
        .map_err(|_| StoreError::Serialization("message key has wrong length".to_string()))?;

    Ok((ConversationId::from_u128(u128::from_be_bytes(*conversation)), u64::from_be_bytes(index)))
}

/// Encode (owner, conversation_id) so all of an owner's sessions are adjacent.
///
/// Layout: [owner: UTF-8][0x00][conversation_id: 16 bytes BE]. Handles never
/// contain NUL, so one owner's keys can't interleave with another's.
fn encode_session_key(owner: &str, conversation: ConversationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 17);
    key.extend_from_slice(owner.as_bytes());
    key.push(0);
    key.extend_from_slice(&conversation.as_u128().to_be_bytes());
    key
}

/// Conversation id from the tail of a session key.
fn decode_session_conversation(key: &[u8]) -> Result<ConversationId, StoreError> {
    let Some((_, conversation)) = key.split_last_chunk::<16>() else {
        return Err(StoreError::Serialization("session key too short".to_string()));
    };
    Ok(ConversationId::from_u128(u128::from_be_bytes(*conversation)))
}
