//! # PTT Audio Engine
//!
//! Real-time push-to-talk audio engine for walkie-talkie style messaging.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── CONTROL CONTEXT (tokio) ────────────────────────────┐
//! │                                                                                 │
//! │   network / storage ──► PttOrchestrator (ptt) ──► PttListener (play / packets)  │
//! │                          │   ▲                                                  │
//! │                 lifecycle│   │AudioEvent (finish-play, coded data)              │
//! │                          ▼   │                                                  │
//! │                        AudioFacade (facade) ── pending requests + timeouts      │
//! └──────────────────────────┼───▲──────────────────────────────────────────────────┘
//!          crossbeam commands│   │tokio mpsc (try_send)
//! ┌──────────────────────────▼───┼──── RENDERING CONTEXTS ──────────────────────────┐
//! │  PlaybackContext                              CaptureContext                    │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐          ┌──────────────┐                  │
//! │  │ Stream  │ │ History │ │ Single  │          │   Recorder   │                  │
//! │  │ Player  │ │ Player  │ │ Player  │          │    Engine    │                  │
//! │  └────┬────┘ └────┬────┘ └────┬────┘          └──────▲───────┘                  │
//! │       │ decode → RingBuffer<f32>                     │ RingBuffer<i16> → encode │
//! │       ▼           ▼           ▼                      │                          │
//! │   output callback (mix of attached slots)       input callback                  │
//! └─────────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod ptt;
pub mod store;

pub use config::AppConfig;
pub use engine::{build_engine, EngineParts};
pub use error::{Error, Result};
pub use facade::{AudioEvent, AudioFacade};
pub use ptt::{PttOrchestrator, PttState};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate for voice capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Default channel count (mono voice)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 24_000;

    /// Default codec frame duration in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

    /// Longest frame a decoder may produce (120 ms at 48 kHz stereo)
    pub const MAX_DECODED_SAMPLES: usize = 48_000 * 2 * 120 / 1000;

    /// Largest encoded frame the recorder will emit
    pub const MAX_ENCODED_FRAME: usize = 4000;

    /// Largest frame the length-prefix framing can describe
    pub const MAX_WIRE_FRAME: usize = 0x8000;

    /// Encoded frames per outgoing talk packet
    pub const TALK_BATCH_FRAMES: usize = 25;

    /// Window for a lifecycle response from the rendering context
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Inactivity window before a fragmented message is force-completed
    pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Number of concurrent player slots
    pub const PLAYER_SLOTS: usize = 3;
}
