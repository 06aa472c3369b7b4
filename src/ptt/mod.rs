//! Push-to-talk orchestration
//!
//! Arbitrates the audio path between realtime playback, history and
//! single-message playback and talking. Incoming fragments are
//! reassembled, queued by priority and fed to the matching player slot;
//! captured frames are packaged into talk packets.

pub mod events;
pub mod item;
pub mod orchestrator;
pub mod queue;
pub mod reassembly;
pub mod scheduler;
pub mod state;
pub mod talk;

pub use events::{ChannelListener, PlayIndication, PlayState, PttListener, PttNotification};
pub use item::AudioItem;
pub use orchestrator::{PttOrchestrator, PttSettings};
pub use queue::PlayQueue;
pub use reassembly::{Assembly, Reassembler};
pub use state::{Activity, Effect, HistoryPhase, PttEvent, PttMachine, PttState, RealtimePhase};
pub use talk::{TalkSession, TalkSummary};
