//! Persistence consumed by the orchestrator

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::PttError;
use crate::protocol::MessageKey;

pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, PttError>;

/// A reassembled voice message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub key: MessageKey,
    /// Length-prefix encoded frame runs, in arrival order
    pub chunks: Vec<Bytes>,
    /// Completed by the inactivity timeout rather than a terminal fragment
    pub forced: bool,
    pub received_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(key: MessageKey, chunks: Vec<Bytes>, forced: bool) -> Self {
        Self {
            key,
            chunks,
            forced,
            received_at: Utc::now(),
        }
    }

    /// Total encoded payload size
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get_message(&self, key: &MessageKey) -> StoreResult<Option<StoredMessage>>;
    async fn put_message(&self, message: StoredMessage) -> StoreResult<()>;
    async fn is_session_muted(&self, session_id: &str) -> StoreResult<bool>;
    async fn set_session_muted(&self, session_id: &str, muted: bool) -> StoreResult<()>;
}
