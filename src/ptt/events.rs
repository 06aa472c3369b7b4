//! Notifications the orchestrator emits to its host

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::PlayerSlot;
use crate::protocol::{MessageKey, TalkPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayState {
    /// An item was selected for playback
    Start,
    /// The player is rendering it
    Playing,
    /// The item left the player
    End,
}

/// Playback progress of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayIndication {
    pub key: MessageKey,
    pub source: PlayerSlot,
    pub state: PlayState,
}

/// Receives playback indications and outgoing talk packets
///
/// Called from the orchestrator task; implementations must not block.
pub trait PttListener: Send + Sync {
    fn on_play_indication(&self, indication: PlayIndication);
    fn on_record_packet(&self, packet: TalkPacket);
}

/// Everything a [`ChannelListener`] forwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PttNotification {
    Play(PlayIndication),
    Packet(TalkPacket),
}

/// Forwards notifications into a tokio channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<PttNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PttNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PttListener for ChannelListener {
    fn on_play_indication(&self, indication: PlayIndication) {
        if self.tx.send(PttNotification::Play(indication)).is_err() {
            tracing::debug!("Play indication dropped, receiver gone");
        }
    }

    fn on_record_packet(&self, packet: TalkPacket) {
        if self.tx.send(PttNotification::Packet(packet)).is_err() {
            tracing::debug!("Talk packet dropped, receiver gone");
        }
    }
}
