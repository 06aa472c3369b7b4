//! Messages exchanged between the control context and the rendering contexts

use tokio::sync::mpsc;

use super::{PlayerSlot, ResponseId};
use crate::protocol::FrameBundle;

/// Request addressed to one player engine
#[derive(Debug)]
pub enum PlayerRequest {
    Open { sample_rate: u32 },
    PutData(FrameBundle),
    EndData,
    ClearCurrent,
    Start,
    Pause,
    Resume,
    Stop,
    Close,
    /// Connect the slot's output to the mixer
    AttachSource,
    /// Disconnect the slot's output from the mixer
    DetachSource,
}

impl PlayerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerRequest::Open { .. } => "open",
            PlayerRequest::PutData(_) => "put-data",
            PlayerRequest::EndData => "end-data",
            PlayerRequest::ClearCurrent => "clear-current",
            PlayerRequest::Start => "start",
            PlayerRequest::Pause => "pause",
            PlayerRequest::Resume => "resume",
            PlayerRequest::Stop => "stop",
            PlayerRequest::Close => "close",
            PlayerRequest::AttachSource => "attach-source",
            PlayerRequest::DetachSource => "detach-source",
        }
    }
}

/// A player request tagged with its slot
#[derive(Debug)]
pub struct PlayerCommand {
    pub slot: PlayerSlot,
    pub request: PlayerRequest,
}

impl PlayerCommand {
    pub fn new(slot: PlayerSlot, request: PlayerRequest) -> Self {
        Self { slot, request }
    }
}

/// Request addressed to the recorder engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderRequest {
    Open {
        sample_rate: u32,
        bit_rate: Option<u32>,
    },
    Start,
    Stop,
    Close,
}

/// Reply to a lifecycle request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResponse {
    pub id: ResponseId,
    pub success: bool,
    pub error: Option<String>,
}

impl EngineResponse {
    pub fn ok(id: ResponseId) -> Self {
        Self {
            id,
            success: true,
            error: None,
        }
    }

    pub fn failed(id: ResponseId, reason: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// Encoded capture output handed to the control context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedData {
    /// The bundle itself was moved across
    Buffer(FrameBundle),
    /// Copied fallback when moving is unavailable
    Array { bytes: Vec<u8>, lengths: Vec<usize> },
}

impl RecordedData {
    /// Wire tag of the transfer mode
    pub fn tag(&self) -> &'static str {
        match self {
            RecordedData::Buffer(_) => "buffer",
            RecordedData::Array { .. } => "array",
        }
    }

    /// Normalize either mode into a bundle
    pub fn into_bundle(self) -> Result<FrameBundle, crate::error::ProtocolError> {
        match self {
            RecordedData::Buffer(bundle) => Ok(bundle),
            RecordedData::Array { bytes, lengths } => {
                FrameBundle::from_parts(bytes.into(), lengths)
            }
        }
    }
}

/// Messages posted from a rendering context
#[derive(Debug)]
pub enum EngineMessage {
    Response(EngineResponse),
    FinishPlay { slot: PlayerSlot },
    DataIndication(RecordedData),
}

/// Non-blocking sender used on audio threads
#[derive(Debug, Clone)]
pub struct EventPoster {
    tx: mpsc::Sender<EngineMessage>,
}

impl EventPoster {
    pub fn new(tx: mpsc::Sender<EngineMessage>) -> Self {
        Self { tx }
    }

    /// Post without blocking; a full or closed queue drops the message
    pub fn post(&self, message: EngineMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!("Engine event queue full, dropping {:?}", kind(&message));
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn respond(&self, response: EngineResponse) -> bool {
        self.post(EngineMessage::Response(response))
    }
}

fn kind(message: &EngineMessage) -> String {
    match message {
        EngineMessage::Response(response) => response.id.to_string(),
        EngineMessage::FinishPlay { slot } => format!("finish-play ({})", slot),
        EngineMessage::DataIndication(data) => format!("data-indication ({})", data.tag()),
    }
}
