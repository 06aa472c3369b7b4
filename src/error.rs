//! Error types for the PTT audio engine

use thiserror::Error;

use crate::engine::{EngineTarget, Operation, ResponseId};
use crate::protocol::MessageKey;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("PTT error: {0}")]
    Ptt(#[from] PttError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device and render-thread errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Failed to spawn audio thread: {0}")]
    ThreadSpawn(String),
}

/// Codec gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Codec initialization failed: {0}")]
    Init(String),

    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Scratch allocation of {0} samples failed")]
    AllocationFailed(usize),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Unsupported sample rate: {0}")]
    UnsupportedSampleRate(u32),
}

/// Framing and bundling errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Empty frames cannot be encoded")]
    EmptyFrame,

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Length table covers {expected} bytes but buffer holds {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Lifecycle errors reported by the audio facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Cannot {operation} {target} while {state}")]
    InvalidState {
        target: EngineTarget,
        operation: Operation,
        state: String,
    },

    #[error("No response to {0} within {1} ms")]
    Timeout(ResponseId, u64),

    #[error("{0} failed: {1}")]
    Rejected(ResponseId, String),

    #[error("{0} was superseded by a newer request")]
    Superseded(ResponseId),

    #[error("Engine command queue is full")]
    QueueFull,

    #[error("Engine rendering context is gone")]
    Disconnected,
}

/// Orchestrator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PttError {
    #[error("Talk was interrupted")]
    TalkInterrupted,

    #[error("Talk failed: {0}")]
    TalkFailed(String),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageKey),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Orchestrator has shut down")]
    Shutdown,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
