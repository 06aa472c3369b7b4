//! Realtime priority queue with a waiting area for muted sessions

use std::collections::HashMap;

use super::item::AudioItem;
use crate::protocol::MessageKey;
use crate::store::MessageStore;

/// Pending realtime items, higher priority first and FIFO within a priority
#[derive(Debug, Default)]
pub struct PlayQueue {
    order: Vec<MessageKey>,
    items: HashMap<MessageKey, AudioItem>,
    /// Incomplete items skipped because their session was muted
    waiting: HashMap<MessageKey, AudioItem>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: AudioItem) {
        let key = item.key.clone();
        if self.items.contains_key(&key) {
            self.items.insert(key, item);
            return;
        }

        let position = self
            .order
            .iter()
            .position(|queued| {
                self.items
                    .get(queued)
                    .map_or(false, |other| other.priority < item.priority)
            })
            .unwrap_or(self.order.len());
        self.order.insert(position, key.clone());
        self.items.insert(key, item);
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.items.contains_key(key) || self.waiting.contains_key(key)
    }

    /// Look an item up in the queue or the waiting area
    pub fn get_mut(&mut self, key: &MessageKey) -> Option<&mut AudioItem> {
        match self.items.get_mut(key) {
            Some(item) => Some(item),
            None => self.waiting.get_mut(key),
        }
    }

    /// Mark an item complete
    ///
    /// A parked item has nothing left to wait for once complete and is
    /// dropped. Returns whether the item is still queued.
    pub fn complete(&mut self, key: &MessageKey) -> bool {
        if let Some(item) = self.items.get_mut(key) {
            item.mark_completed();
            return true;
        }
        if self.waiting.remove(key).is_some() {
            tracing::debug!("Dropping completed {} from muted session", key);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Pop the next item whose session is not muted
    ///
    /// Skipped items that are still receiving chunks move to the waiting
    /// area; skipped complete items are discarded.
    pub async fn next_playing_item(&mut self, store: &dyn MessageStore) -> Option<AudioItem> {
        while !self.order.is_empty() {
            let key = self.order.remove(0);
            let Some(item) = self.items.remove(&key) else {
                continue;
            };

            let muted = match store.is_session_muted(&key.session_id).await {
                Ok(muted) => muted,
                Err(e) => {
                    tracing::warn!("Mute lookup for {} failed, playing anyway: {}", key, e);
                    false
                }
            };
            if !muted {
                return Some(item);
            }

            if item.is_completed() {
                tracing::debug!("Discarding {} from muted session", key);
            } else {
                tracing::debug!("Parking {} from muted session", key);
                self.waiting.insert(key, item);
            }
        }
        None
    }

    /// Move a session's waiting items back into the queue
    pub fn restore_session(&mut self, session_id: &str) -> usize {
        let keys: Vec<MessageKey> = self
            .waiting
            .keys()
            .filter(|key| key.session_id == session_id)
            .cloned()
            .collect();

        let restored = keys.len();
        let mut items: Vec<AudioItem> = keys
            .iter()
            .filter_map(|key| self.waiting.remove(key))
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        for item in items {
            self.insert(item);
        }
        restored
    }

    /// Drop every queued and waiting item
    pub fn clear(&mut self) {
        self.order.clear();
        self.items.clear();
        self.waiting.clear();
    }
}
