//! PTT message identities and packet types

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::framing;

/// Composite identity of one voice message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub session_id: String,
    pub message_id: u64,
}

impl MessageKey {
    pub fn new(session_id: impl Into<String>, message_id: u64) -> Self {
        Self {
            session_id: session_id.into(),
            message_id,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.session_id, self.message_id)
    }
}

/// Role of a packet within one PTT burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// Opens a burst that continues in later packets
    First,
    /// Middle of a burst
    Inter,
    /// Closes a burst
    End,
    /// A burst carried by a single packet
    Whole,
}

impl Marker {
    /// Whether this packet completes its message
    pub fn is_terminal(self) -> bool {
        matches!(self, Marker::End | Marker::Whole)
    }
}

/// One incoming fragment of a voice message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PttFragment {
    pub key: MessageKey,
    pub marker: Marker,
    /// Length-prefixed compressed frames
    pub payload: Bytes,
    /// Higher plays first
    pub priority: u8,
}

impl PttFragment {
    pub fn new(key: MessageKey, marker: Marker, payload: Bytes) -> Self {
        Self {
            key,
            marker,
            payload,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// One outgoing packet of a talk burst
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkPacket {
    /// Talk session sequence number
    pub sequence: u32,
    /// Position of this packet within the session
    pub package_sequence: u16,
    pub marker: Marker,
    /// Number of encoded frames in `payload`
    pub frame_count: usize,
    /// Length-prefixed compressed frames
    pub payload: Bytes,
}

impl TalkPacket {
    /// Frames carried by this packet
    pub fn frames(&self) -> Result<Vec<Bytes>, crate::error::ProtocolError> {
        framing::decode_frames(&self.payload)
    }

    /// View this packet as an incoming fragment of `session_id`
    pub fn to_fragment(&self, session_id: impl Into<String>) -> PttFragment {
        PttFragment::new(
            MessageKey::new(session_id, self.sequence as u64),
            self.marker,
            self.payload.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Marker::Whole).unwrap(), "\"whole\"");
        let marker: Marker = serde_json::from_str("\"inter\"").unwrap();
        assert_eq!(marker, Marker::Inter);
        assert!(Marker::End.is_terminal());
        assert!(!Marker::First.is_terminal());
    }

    #[test]
    fn test_key_display() {
        let key = MessageKey::new("group-7", 42);
        assert_eq!(key.to_string(), "group-7#42");

        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["sessionId"], "group-7");
        assert_eq!(json["messageId"], 42);
    }

    #[test]
    fn test_packet_to_fragment() {
        let payload = framing::encode_frames([[1u8, 2, 3]]).unwrap();
        let packet = TalkPacket {
            sequence: 9,
            package_sequence: 0,
            marker: Marker::Whole,
            frame_count: 1,
            payload,
        };

        let fragment = packet.to_fragment("loop");
        assert_eq!(fragment.key, MessageKey::new("loop", 9));
        assert_eq!(fragment.marker, Marker::Whole);
        assert_eq!(packet.frames().unwrap().len(), 1);
    }
}
