//! Crash recovery tests for `RedbStore`.
//!
//! Sessions, identities and the message log must survive closing and
//! reopening the database, and a conversation must continue afterwards as if
//! nothing happened.

use sealchat_crypto::SeededEnv;
use sealchat_server::{ConversationId, ConversationService, RedbStore, SessionStore};
use tempfile::tempdir;

#[test]
fn conversation_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.redb");

    {
        let store = RedbStore::open(&db_path).unwrap();
        let service = ConversationService::new(store, SeededEnv::from_u64(1));

        service.register("alice").unwrap();
        service.register("bob").unwrap();
        service.open("alice", "bob", None).unwrap();
        service.open("bob", "alice", None).unwrap();

        service.send("alice", "bob", b"before restart").unwrap();

        // Database dropped
    }

    {
        let store = RedbStore::open(&db_path).unwrap();
        let service = ConversationService::new(store, SeededEnv::from_u64(2));

        let outcome = service.receive_pending("bob", "alice").unwrap();
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].plaintext, b"before restart");

        service.send("bob", "alice", b"after restart").unwrap();
        let outcome = service.receive_pending("alice", "bob").unwrap();
        assert_eq!(outcome.messages[0].plaintext, b"after restart");
    }
}

#[test]
fn read_cursor_and_versions_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.redb");
    let conversation = ConversationId::between("alice", "bob");

    {
        let service =
            ConversationService::new(RedbStore::open(&db_path).unwrap(), SeededEnv::from_u64(3));
        service.register("alice").unwrap();
        service.register("bob").unwrap();
        service.open("alice", "bob", None).unwrap();
        service.open("bob", "alice", None).unwrap();

        for i in 0..10u8 {
            service.send("alice", "bob", &[i]).unwrap();
        }
        assert_eq!(service.receive_pending("bob", "alice").unwrap().messages.len(), 10);
    }

    {
        let store = RedbStore::open(&db_path).unwrap();

        let alice = store.load_session(conversation, "alice").unwrap().unwrap();
        let bob = store.load_session(conversation, "bob").unwrap().unwrap();
        assert_eq!(alice.version, 10);
        assert_eq!(alice.state.send_message_number(), 10);
        assert_eq!(bob.read_cursor, 10);
        assert_eq!(bob.state.receive_message_number(), 10);

        let service = ConversationService::new(store, SeededEnv::from_u64(4));
        assert!(service.receive_pending("bob", "alice").unwrap().messages.is_empty());
    }
}

#[test]
fn history_survives_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test.redb");

    {
        let service =
            ConversationService::new(RedbStore::open(&db_path).unwrap(), SeededEnv::from_u64(5));
        service.register("alice").unwrap();
        service.register("bob").unwrap();
        service.open("alice", "bob", None).unwrap();
        service.open("bob", "alice", None).unwrap();

        for i in 0..7u8 {
            service.send("alice", "bob", &[i]).unwrap();
            service.send("bob", "alice", &[i]).unwrap();
        }
    }

    {
        let service =
            ConversationService::new(RedbStore::open(&db_path).unwrap(), SeededEnv::from_u64(6));

        let newest = service.history("alice", "bob", 1, Some(5)).unwrap();
        assert_eq!(newest.total_count, 14);
        assert_eq!(newest.total_pages, 3);
        assert_eq!(newest.messages.iter().map(|m| m.index).collect::<Vec<_>>(), vec![
            9, 10, 11, 12, 13
        ]);

        let oldest = service.history("bob", "alice", 3, Some(5)).unwrap();
        assert_eq!(oldest.messages.iter().map(|m| m.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(oldest.messages[0].sender, "alice");

        let listed = service.conversations("bob").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].conversation, ConversationId::between("alice", "bob"));
        assert_eq!(listed[0].message_count, 14);
        assert_eq!(listed[0].last_message.as_ref().unwrap().index, 13);
    }
}
