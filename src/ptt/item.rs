//! Playable unit of audio

use bytes::Bytes;

use crate::engine::PlayerSlot;
use crate::protocol::{decode_frames, FrameBundle, MessageKey};
use crate::store::StoredMessage;

/// One message's worth of chunks and its playback progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioItem {
    pub key: MessageKey,
    pub slot: PlayerSlot,
    pub priority: u8,
    chunks: Vec<Bytes>,
    cursor: usize,
    completed: bool,
    end_sent: bool,
}

impl AudioItem {
    pub fn new(key: MessageKey, slot: PlayerSlot, priority: u8) -> Self {
        Self {
            key,
            slot,
            priority,
            chunks: Vec::new(),
            cursor: 0,
            completed: false,
            end_sent: false,
        }
    }

    /// A complete item built from a stored message
    pub fn from_stored(message: StoredMessage, slot: PlayerSlot) -> Self {
        Self {
            key: message.key,
            slot,
            priority: 0,
            chunks: message.chunks,
            cursor: 0,
            completed: true,
            end_sent: false,
        }
    }

    pub fn push_chunk(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunks not yet handed to a player
    pub fn has_pending(&self) -> bool {
        self.cursor < self.chunks.len()
    }

    /// Decode the unplayed chunks into one bundle and advance the cursor
    ///
    /// Malformed chunks are skipped.
    pub fn take_pending(&mut self) -> FrameBundle {
        let mut bundle = FrameBundle::new();
        for chunk in &self.chunks[self.cursor..] {
            match decode_frames(chunk) {
                Ok(frames) => bundle.put_arrays(frames),
                Err(e) => tracing::warn!("Skipping malformed chunk of {}: {}", self.key, e),
            }
        }
        self.cursor = self.chunks.len();
        bundle
    }

    /// Whether end-of-data is due: complete, fully fed and not yet ended
    pub fn needs_end(&self) -> bool {
        self.completed && !self.has_pending() && !self.end_sent
    }

    pub fn mark_end_sent(&mut self) {
        self.end_sent = true;
    }

    /// A finish from the player can only belong to an item whose end was sent
    pub fn awaits_finish(&self) -> bool {
        self.end_sent
    }
}
