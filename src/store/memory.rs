//! In-memory message store

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{MessageStore, StoreResult, StoredMessage};
use crate::protocol::MessageKey;

/// Process-local store backed by concurrent maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: DashMap<MessageKey, StoredMessage>,
    muted: DashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Keys of every stored message of a session, oldest first
    pub fn session_keys(&self, session_id: &str) -> Vec<MessageKey> {
        let mut keys: Vec<MessageKey> = self
            .messages
            .iter()
            .filter(|entry| entry.key().session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn get_message(&self, key: &MessageKey) -> StoreResult<Option<StoredMessage>> {
        Ok(self.messages.get(key).map(|entry| entry.value().clone()))
    }

    async fn put_message(&self, message: StoredMessage) -> StoreResult<()> {
        self.messages.insert(message.key.clone(), message);
        Ok(())
    }

    async fn is_session_muted(&self, session_id: &str) -> StoreResult<bool> {
        Ok(self.muted.contains(session_id))
    }

    async fn set_session_muted(&self, session_id: &str, muted: bool) -> StoreResult<()> {
        if muted {
            self.muted.insert(session_id.to_string());
        } else {
            self.muted.remove(session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_put_get_message() {
        let store = MemoryStore::new();
        let key = MessageKey::new("room", 7);
        assert!(store.get_message(&key).await.unwrap().is_none());

        let message = StoredMessage::new(key.clone(), vec![Bytes::from_static(b"\x01ab")], false);
        store.put_message(message.clone()).await.unwrap();
        assert_eq!(store.get_message(&key).await.unwrap(), Some(message));
        assert_eq!(store.message_count(), 1);
    }

    #[tokio::test]
    async fn test_mute_toggle() {
        let store = MemoryStore::new();
        assert!(!store.is_session_muted("room").await.unwrap());
        store.set_session_muted("room", true).await.unwrap();
        assert!(store.is_session_muted("room").await.unwrap());
        store.set_session_muted("room", false).await.unwrap();
        assert!(!store.is_session_muted("room").await.unwrap());
    }

    #[test]
    fn test_session_keys_sorted() {
        let store = MemoryStore::new();
        for id in [3, 1, 2] {
            let key = MessageKey::new("a", id);
            store.messages.insert(key.clone(), StoredMessage::new(key, Vec::new(), false));
        }
        let key = MessageKey::new("b", 9);
        store.messages.insert(key.clone(), StoredMessage::new(key, Vec::new(), true));

        let ids: Vec<u64> = store.session_keys("a").iter().map(|k| k.message_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
