//! Accumulates PTT fragments into complete messages

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;

use crate::protocol::{Marker, MessageKey, PttFragment};
use crate::store::StoredMessage;

/// What accepting one fragment did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// Duplicate or late fragment of a finished message
    Ignored,
    /// First fragment of a new message
    Started,
    Continued,
    Completed {
        message: StoredMessage,
        /// The completing fragment was also the first one seen
        started: bool,
    },
}

#[derive(Debug)]
pub struct Reassembler {
    partial: HashMap<MessageKey, Vec<Bytes>>,
    recent: VecDeque<MessageKey>,
    recent_keys: HashSet<MessageKey>,
    recent_capacity: usize,
}

impl Reassembler {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            partial: HashMap::new(),
            recent: VecDeque::new(),
            recent_keys: HashSet::new(),
            recent_capacity: recent_capacity.max(1),
        }
    }

    pub fn accept(&mut self, fragment: &PttFragment) -> Assembly {
        let key = &fragment.key;
        if self.recent_keys.contains(key) {
            tracing::debug!("Ignoring {:?} fragment of completed {}", fragment.marker, key);
            return Assembly::Ignored;
        }

        let started = !self.partial.contains_key(key);
        if started && fragment.marker == Marker::Inter {
            tracing::debug!("{} joined mid-burst", key);
        }

        let chunks = self.partial.entry(key.clone()).or_default();
        if !fragment.payload.is_empty() {
            chunks.push(fragment.payload.clone());
        }

        if !fragment.marker.is_terminal() {
            return if started {
                Assembly::Started
            } else {
                Assembly::Continued
            };
        }

        let chunks = self.partial.remove(key).unwrap_or_default();
        self.remember(key.clone());
        Assembly::Completed {
            message: StoredMessage::new(key.clone(), chunks, false),
            started,
        }
    }

    /// Complete a message that stopped receiving fragments
    pub fn force_complete(&mut self, key: &MessageKey) -> Option<StoredMessage> {
        let chunks = self.partial.remove(key)?;
        self.remember(key.clone());
        Some(StoredMessage::new(key.clone(), chunks, true))
    }

    pub fn is_partial(&self, key: &MessageKey) -> bool {
        self.partial.contains_key(key)
    }

    pub fn partial_count(&self) -> usize {
        self.partial.len()
    }

    fn remember(&mut self, key: MessageKey) {
        if self.recent_keys.insert(key.clone()) {
            self.recent.push_back(key);
        }
        while self.recent.len() > self.recent_capacity {
            if let Some(old) = self.recent.pop_front() {
                self.recent_keys.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(id: u64, marker: Marker, payload: &'static [u8]) -> PttFragment {
        PttFragment::new(MessageKey::new("s", id), marker, Bytes::from_static(payload))
    }

    #[test]
    fn test_first_inter_end() {
        let mut reassembler = Reassembler::new(8);
        assert_eq!(reassembler.accept(&fragment(1, Marker::First, b"\x00a")), Assembly::Started);
        assert_eq!(reassembler.accept(&fragment(1, Marker::Inter, b"\x00b")), Assembly::Continued);
        assert!(reassembler.is_partial(&MessageKey::new("s", 1)));

        match reassembler.accept(&fragment(1, Marker::End, b"")) {
            Assembly::Completed { message, started } => {
                assert!(!started);
                assert!(!message.forced);
                assert_eq!(message.chunks.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reassembler.partial_count(), 0);
    }

    #[test]
    fn test_whole_and_late_duplicates() {
        let mut reassembler = Reassembler::new(8);
        assert!(matches!(
            reassembler.accept(&fragment(2, Marker::Whole, b"\x00z")),
            Assembly::Completed { started: true, .. }
        ));
        assert_eq!(reassembler.accept(&fragment(2, Marker::Inter, b"\x00z")), Assembly::Ignored);
        assert_eq!(reassembler.partial_count(), 0);
    }

    #[test]
    fn test_force_complete() {
        let mut reassembler = Reassembler::new(8);
        reassembler.accept(&fragment(3, Marker::First, b"\x00a"));
        let message = reassembler.force_complete(&MessageKey::new("s", 3)).unwrap();
        assert!(message.forced);
        assert_eq!(message.chunks.len(), 1);
        assert!(reassembler.force_complete(&MessageKey::new("s", 3)).is_none());
        assert_eq!(reassembler.accept(&fragment(3, Marker::End, b"")), Assembly::Ignored);
    }

    #[test]
    fn test_recent_keys_are_bounded() {
        let mut reassembler = Reassembler::new(2);
        for id in 0..3 {
            reassembler.accept(&fragment(id, Marker::Whole, b"\x00a"));
        }
        // The oldest key was forgotten and starts a new message
        assert_eq!(reassembler.accept(&fragment(0, Marker::First, b"\x00a")), Assembly::Started);
        assert_eq!(reassembler.accept(&fragment(2, Marker::First, b"\x00a")), Assembly::Ignored);
    }
}
