//! Rendering-context engines
//!
//! Players and the recorder run inside audio callbacks. They are driven
//! by [`PlayerRequest`]/[`RecorderRequest`] commands drained at the top of
//! each callback and report back with [`EngineMessage`]s. Lifecycle
//! transitions other than `open` are acknowledged from inside a callback,
//! so they always line up with the audio timeline.

pub mod clock;
pub mod context;
pub mod message;
pub mod player;
pub mod recorder;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::CodecGateway;
use crate::config::AppConfig;
use crate::constants::PLAYER_SLOTS;
use crate::facade::{AudioEvent, AudioFacade};

pub use clock::RenderClock;
pub use context::{CaptureContext, PlaybackContext};
pub use message::{
    EngineMessage, EngineResponse, EventPoster, PlayerCommand, PlayerRequest, RecordedData,
    RecorderRequest,
};
pub use player::{PlayerEngine, PlayerSettings};
pub use recorder::{AlwaysTransfer, RecorderEngine, RecorderSettings, TransferProbe};

/// Independent playback slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSlot {
    /// Live incoming messages
    Stream,
    /// Stored message list
    History,
    /// One stored message
    Single,
}

impl PlayerSlot {
    pub const ALL: [PlayerSlot; PLAYER_SLOTS] = [PlayerSlot::Stream, PlayerSlot::History, PlayerSlot::Single];

    pub fn index(self) -> usize {
        match self {
            PlayerSlot::Stream => 0,
            PlayerSlot::History => 1,
            PlayerSlot::Single => 2,
        }
    }
}

impl fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerSlot::Stream => "stream",
            PlayerSlot::History => "history",
            PlayerSlot::Single => "single",
        };
        f.write_str(name)
    }
}

/// Lifecycle operations that are answered with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Start,
    Pause,
    Resume,
    Stop,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open",
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Stop => "stop",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

/// Which engine a command or response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineTarget {
    Player(PlayerSlot),
    Recorder,
}

impl fmt::Display for EngineTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineTarget::Player(slot) => write!(f, "{} player", slot),
            EngineTarget::Recorder => f.write_str("recorder"),
        }
    }
}

/// Identity of a response event: one per target and operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseId {
    pub target: EngineTarget,
    pub operation: Operation,
}

impl ResponseId {
    pub fn new(target: EngineTarget, operation: Operation) -> Self {
        Self { target, operation }
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-response ({})", self.operation, self.target)
    }
}

/// Player lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Closed,
    Opening,
    Stopped,
    Starting,
    Started,
    Pausing,
    Paused,
    Resuming,
    Stopping,
    Closing,
}

impl PlayerState {
    /// Whether `operation` may be issued from this state
    pub fn accepts(self, operation: Operation) -> bool {
        use PlayerState::*;
        match operation {
            Operation::Open => self == Closed,
            Operation::Start => self == Stopped,
            Operation::Pause => self == Started,
            Operation::Resume => self == Paused,
            Operation::Stop => matches!(self, Started | Paused),
            Operation::Close => !matches!(self, Closed | Closing),
        }
    }

    /// State entered while `operation` is in flight
    pub fn transitional(operation: Operation) -> Self {
        match operation {
            Operation::Open => PlayerState::Opening,
            Operation::Start => PlayerState::Starting,
            Operation::Pause => PlayerState::Pausing,
            Operation::Resume => PlayerState::Resuming,
            Operation::Stop => PlayerState::Stopping,
            Operation::Close => PlayerState::Closing,
        }
    }

    /// State reached once the response for `operation` arrives
    pub fn settled(operation: Operation, success: bool) -> Self {
        use PlayerState::*;
        match (operation, success) {
            (Operation::Open, true) => Stopped,
            (Operation::Open, false) => Closed,
            (Operation::Start, true) => Started,
            (Operation::Start, false) => Stopped,
            (Operation::Pause, true) => Paused,
            (Operation::Pause, false) => Started,
            (Operation::Resume, true) => Started,
            (Operation::Resume, false) => Paused,
            (Operation::Stop, true) => Stopped,
            (Operation::Stop, false) => Started,
            (Operation::Close, _) => Closed,
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Recorder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Closed,
    Opening,
    Stopped,
    Starting,
    Started,
    Stopping,
    Closing,
}

impl RecorderState {
    pub fn accepts(self, operation: Operation) -> bool {
        use RecorderState::*;
        match operation {
            Operation::Open => self == Closed,
            Operation::Start => self == Stopped,
            Operation::Stop => self == Started,
            Operation::Close => !matches!(self, Closed | Closing),
            Operation::Pause | Operation::Resume => false,
        }
    }

    pub fn transitional(operation: Operation) -> Self {
        match operation {
            Operation::Open => RecorderState::Opening,
            Operation::Start => RecorderState::Starting,
            Operation::Stop | Operation::Pause | Operation::Resume => RecorderState::Stopping,
            Operation::Close => RecorderState::Closing,
        }
    }

    pub fn settled(operation: Operation, success: bool) -> Self {
        use RecorderState::*;
        match (operation, success) {
            (Operation::Open, true) => Stopped,
            (Operation::Open, false) => Closed,
            (Operation::Start, true) => Started,
            (Operation::Start, false) => Stopped,
            (Operation::Stop, true) => Stopped,
            (Operation::Stop, false) => Started,
            (Operation::Close, _) => Closed,
            (Operation::Pause | Operation::Resume, _) => Stopped,
        }
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything needed to run one engine instance
pub struct EngineParts {
    /// Control-side lifecycle API
    pub facade: AudioFacade,
    /// Upward finish-play and coded-data events
    pub audio_events: mpsc::UnboundedReceiver<AudioEvent>,
    /// Give to the output callback thread
    pub playback: PlaybackContext,
    /// Give to the input callback thread
    pub capture: CaptureContext,
}

/// Wire a facade to fresh playback and capture contexts
///
/// Must be called from within a tokio runtime: the facade spawns its
/// response dispatcher.
pub fn build_engine(config: &AppConfig, codec: Arc<dyn CodecGateway>) -> EngineParts {
    build_engine_with_probe(config, codec, Box::new(AlwaysTransfer))
}

/// Like [`build_engine`] with an explicit zero-copy transfer probe
pub fn build_engine_with_probe(
    config: &AppConfig,
    codec: Arc<dyn CodecGateway>,
    probe: Box<dyn TransferProbe>,
) -> EngineParts {
    let audio = &config.audio;
    let (player_tx, player_rx) = crossbeam_channel::bounded(audio.command_queue);
    let (recorder_tx, recorder_rx) = crossbeam_channel::bounded(audio.command_queue);
    let (event_tx, event_rx) = mpsc::channel(audio.event_queue);
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();

    let poster = EventPoster::new(event_tx);
    let playback = PlaybackContext::new(
        PlayerSettings::from_config(audio),
        codec.clone(),
        player_rx,
        poster.clone(),
    );
    let capture = CaptureContext::new(
        RecorderSettings::from_config(audio),
        codec,
        recorder_rx,
        poster,
        probe,
    );
    let facade = AudioFacade::new(&config.facade, player_tx, recorder_tx, event_rx, audio_tx);

    EngineParts {
        facade,
        audio_events: audio_rx,
        playback,
        capture,
    }
}
