//! Packages captured frames into outgoing talk packets

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_WIRE_FRAME;
use crate::error::ProtocolError;
use crate::protocol::{encode_frames, Marker, TalkPacket};

/// Outcome of a finished talk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalkSummary {
    pub sequence: u32,
    pub packets: u16,
    pub frames: usize,
}

pub struct TalkSession {
    sequence: u32,
    package_sequence: u16,
    batch: usize,
    cache: Vec<Bytes>,
    frames: usize,
    ticket: u64,
    interrupted: bool,
    failure: Option<String>,
}

impl TalkSession {
    pub fn new(sequence: u32, batch: usize, ticket: u64) -> Self {
        let batch = batch.max(1);
        Self {
            sequence,
            package_sequence: 0,
            batch,
            cache: Vec::with_capacity(batch),
            frames: 0,
            ticket,
            interrupted: false,
            failure: None,
        }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn packets_sent(&self) -> u16 {
        self.package_sequence
    }

    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Add one encoded frame; returns a packet once a batch is full
    pub fn push_frame(&mut self, frame: Bytes) -> Result<Option<TalkPacket>, ProtocolError> {
        if frame.is_empty() {
            return Ok(None);
        }
        if frame.len() > MAX_WIRE_FRAME {
            return Err(ProtocolError::FrameTooLarge(frame.len()));
        }

        self.cache.push(frame);
        self.frames += 1;
        if self.cache.len() < self.batch {
            return Ok(None);
        }

        let marker = if self.package_sequence == 0 {
            Marker::First
        } else {
            Marker::Inter
        };
        self.package(marker).map(Some)
    }

    /// Flush the trailing packet
    ///
    /// `End` if packets were already sent (possibly with no frames),
    /// `Whole` if everything fits one packet, nothing if nothing was captured.
    pub fn finish(&mut self) -> Result<Option<TalkPacket>, ProtocolError> {
        if self.package_sequence > 0 {
            return self.package(Marker::End).map(Some);
        }
        if self.cache.is_empty() {
            return Ok(None);
        }
        self.package(Marker::Whole).map(Some)
    }

    pub fn summary(&self) -> TalkSummary {
        TalkSummary {
            sequence: self.sequence,
            packets: self.package_sequence,
            frames: self.frames,
        }
    }

    fn package(&mut self, marker: Marker) -> Result<TalkPacket, ProtocolError> {
        let frames = std::mem::take(&mut self.cache);
        let payload = encode_frames(&frames)?;
        let packet = TalkPacket {
            sequence: self.sequence,
            package_sequence: self.package_sequence,
            marker,
            frame_count: frames.len(),
            payload,
        };
        self.package_sequence = self.package_sequence.wrapping_add(1);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: usize) -> Bytes {
        Bytes::from(vec![n as u8; 3 + n % 7])
    }

    fn capture(session: &mut TalkSession, count: usize) -> Vec<TalkPacket> {
        (1..=count)
            .filter_map(|n| session.push_frame(frame(n)).unwrap())
            .collect()
    }

    #[test]
    fn test_37_frames_make_first_and_end() {
        let mut session = TalkSession::new(7, 25, 1);
        let mut packets = capture(&mut session, 37);
        assert_eq!(packets.len(), 1);
        packets.extend(session.finish().unwrap());

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].marker, Marker::First);
        assert_eq!(packets[0].frame_count, 25);
        assert_eq!(packets[0].frames().unwrap()[0], frame(1));
        assert_eq!(packets[1].marker, Marker::End);
        assert_eq!(packets[1].frame_count, 12);
        assert_eq!(packets[1].package_sequence, 1);
        assert_eq!(packets[1].frames().unwrap()[11], frame(37));
        assert_eq!(session.summary().frames, 37);
    }

    #[test]
    fn test_short_talk_is_whole() {
        let mut session = TalkSession::new(1, 25, 1);
        assert!(capture(&mut session, 10).is_empty());
        let packet = session.finish().unwrap().unwrap();
        assert_eq!(packet.marker, Marker::Whole);
        assert_eq!(packet.frame_count, 10);
    }

    #[test]
    fn test_exact_batches_end_with_empty_packet() {
        let mut session = TalkSession::new(1, 25, 1);
        let packets = capture(&mut session, 50);
        assert_eq!(
            packets.iter().map(|p| p.marker).collect::<Vec<_>>(),
            vec![Marker::First, Marker::Inter]
        );
        let end = session.finish().unwrap().unwrap();
        assert_eq!(end.marker, Marker::End);
        assert_eq!(end.frame_count, 0);
        assert!(end.payload.is_empty());
    }

    #[test]
    fn test_nothing_captured() {
        let mut session = TalkSession::new(1, 25, 1);
        assert!(session.push_frame(Bytes::new()).unwrap().is_none());
        assert!(session.finish().unwrap().is_none());
        assert_eq!(session.packets_sent(), 0);
    }
}
