//! Player engine: decodes bundles into a ring buffer and renders them
//!
//! One engine per player slot. Everything here runs on the playback
//! rendering thread.

use super::message::{EngineMessage, EngineResponse, EventPoster, PlayerRequest};
use super::{EngineTarget, Operation, PlayerSlot, PlayerState, ResponseId};
use crate::audio::{i16_to_f32, RingBuffer};
use crate::codec::{CodecContext, FrameDecoder};
use crate::config::AudioConfig;
use crate::constants::MAX_DECODED_SAMPLES;
use crate::error::CodecError;
use crate::protocol::FrameBundle;

/// Buffering parameters shared by all player slots
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub channels: u16,
    /// Ring capacity in milliseconds
    pub ring_buffer_ms: u32,
    /// Audio that must be buffered before output resumes after an underrun
    pub cache_threshold_ms: u32,
}

impl PlayerSettings {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            channels: config.channels,
            ring_buffer_ms: config.ring_buffer_ms,
            cache_threshold_ms: config.cache_threshold_ms,
        }
    }
}

/// Counters kept per player
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub frames_decoded: u64,
    pub decode_errors: u64,
    /// Samples per channel lost because the ring was full
    pub frames_dropped: u64,
}

/// Playback engine for one slot
pub struct PlayerEngine {
    slot: PlayerSlot,
    settings: PlayerSettings,
    state: PlayerState,
    sample_rate: u32,
    decoder: Option<Box<dyn FrameDecoder>>,
    ring: Option<RingBuffer<f32>>,
    /// Decoder output scratch
    pcm: Vec<i16>,
    /// Normalized scratch pushed into the ring
    samples: Vec<f32>,
    cache_frames: usize,
    caching: bool,
    data_ended: bool,
    finished: bool,
    poster: EventPoster,
    stats: PlayerStats,
}

impl PlayerEngine {
    pub fn new(slot: PlayerSlot, settings: PlayerSettings, poster: EventPoster) -> Self {
        Self {
            slot,
            settings,
            state: PlayerState::Closed,
            sample_rate: 0,
            decoder: None,
            ring: None,
            pcm: Vec::new(),
            samples: Vec::new(),
            cache_frames: 0,
            caching: true,
            data_ended: false,
            finished: false,
            poster,
            stats: PlayerStats::default(),
        }
    }

    pub fn slot(&self) -> PlayerSlot {
        self.slot
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    /// Frames currently buffered
    pub fn buffered_frames(&self) -> usize {
        self.ring.as_ref().map_or(0, RingBuffer::frames_available)
    }

    fn response_id(&self, operation: Operation) -> ResponseId {
        ResponseId::new(EngineTarget::Player(self.slot), operation)
    }

    fn reply(&self, operation: Operation, result: Result<(), String>) {
        let id = self.response_id(operation);
        let response = match result {
            Ok(()) => EngineResponse::ok(id),
            Err(reason) => EngineResponse::failed(id, reason),
        };
        self.poster.respond(response);
    }

    fn reject(&self, operation: Operation) {
        self.reply(
            operation,
            Err(format!("cannot {} {} player while {}", operation, self.slot, self.state)),
        );
    }

    /// Apply one control request
    ///
    /// `open` is answered immediately, the other lifecycle requests are
    /// acknowledged by the next [`render`](Self::render) call.
    pub fn handle(&mut self, request: PlayerRequest, codec: &mut CodecContext) {
        match request {
            PlayerRequest::Open { sample_rate } => self.open(sample_rate, codec),
            PlayerRequest::PutData(bundle) => self.put_data(&bundle),
            PlayerRequest::EndData => {
                if self.is_open() {
                    self.data_ended = true;
                }
            }
            PlayerRequest::ClearCurrent => self.clear_current(),
            PlayerRequest::Start => self.begin(Operation::Start),
            PlayerRequest::Pause => self.begin(Operation::Pause),
            PlayerRequest::Resume => self.begin(Operation::Resume),
            PlayerRequest::Stop => self.begin(Operation::Stop),
            PlayerRequest::Close => self.begin(Operation::Close),
            // Routing is owned by the playback context
            PlayerRequest::AttachSource | PlayerRequest::DetachSource => {}
        }
    }

    fn is_open(&self) -> bool {
        !matches!(
            self.state,
            PlayerState::Closed | PlayerState::Opening | PlayerState::Closing
        )
    }

    fn open(&mut self, sample_rate: u32, codec: &mut CodecContext) {
        if self.state != PlayerState::Closed {
            self.reject(Operation::Open);
            return;
        }

        self.state = PlayerState::Opening;
        match self.allocate(sample_rate, codec) {
            Ok(()) => {
                self.state = PlayerState::Stopped;
                tracing::debug!("{} player opened at {} Hz", self.slot, sample_rate);
                self.reply(Operation::Open, Ok(()));
            }
            Err(e) => {
                tracing::error!("Failed to open {} player: {}", self.slot, e);
                self.teardown();
                self.reply(Operation::Open, Err(e.to_string()));
            }
        }
    }

    fn allocate(&mut self, sample_rate: u32, codec: &mut CodecContext) -> Result<(), CodecError> {
        let gateway = codec.gateway()?;
        let decoder = gateway.open_decoder(sample_rate, self.settings.channels)?;
        let pcm = gateway.allocate(MAX_DECODED_SAMPLES)?;

        let mut samples = Vec::new();
        samples
            .try_reserve_exact(MAX_DECODED_SAMPLES)
            .map_err(|_| CodecError::AllocationFailed(MAX_DECODED_SAMPLES))?;
        samples.resize(MAX_DECODED_SAMPLES, 0.0);

        self.ring = Some(RingBuffer::with_duration(
            sample_rate,
            self.settings.channels,
            self.settings.ring_buffer_ms,
        ));
        self.decoder = Some(decoder);
        self.pcm = pcm;
        self.samples = samples;
        self.sample_rate = sample_rate;
        self.cache_frames =
            (sample_rate as u64 * self.settings.cache_threshold_ms as u64 / 1000) as usize;
        self.reset_flags();
        Ok(())
    }

    fn teardown(&mut self) {
        self.decoder = None;
        self.ring = None;
        self.pcm = Vec::new();
        self.samples = Vec::new();
        self.sample_rate = 0;
        self.state = PlayerState::Closed;
        self.reset_flags();
    }

    fn reset_flags(&mut self) {
        self.caching = true;
        self.data_ended = false;
        self.finished = false;
    }

    fn put_data(&mut self, bundle: &FrameBundle) {
        if !self.is_open() {
            return;
        }
        let (Some(decoder), Some(ring)) = (self.decoder.as_mut(), self.ring.as_mut()) else {
            return;
        };
        let channels = decoder.channels().max(1) as usize;

        for frame in bundle.frames() {
            match decoder.decode(frame, &mut self.pcm) {
                Ok(per_channel) => {
                    let count = (per_channel * channels).min(self.samples.len());
                    for (dst, src) in self.samples[..count].iter_mut().zip(&self.pcm[..count]) {
                        *dst = i16_to_f32(*src);
                    }
                    let pushed = ring.push(&self.samples[..count]);
                    self.stats.frames_decoded += 1;
                    self.stats.frames_dropped += (count / channels - pushed) as u64;
                }
                Err(e) => {
                    self.stats.decode_errors += 1;
                    tracing::error!("{} player failed to decode a frame: {}", self.slot, e);
                }
            }
        }
    }

    fn clear_current(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            ring.clear();
        }
        self.reset_flags();
    }

    fn begin(&mut self, operation: Operation) {
        if !self.state.accepts(operation) {
            self.reject(operation);
            return;
        }

        // Close overtakes whatever transition is still waiting for a callback
        if operation == Operation::Close {
            if let Some(pending) = self.in_flight() {
                self.reply(pending, Err(format!("{} player is closing", self.slot)));
            }
        }
        self.state = PlayerState::transitional(operation);
    }

    fn in_flight(&self) -> Option<Operation> {
        match self.state {
            PlayerState::Starting => Some(Operation::Start),
            PlayerState::Pausing => Some(Operation::Pause),
            PlayerState::Resuming => Some(Operation::Resume),
            PlayerState::Stopping => Some(Operation::Stop),
            _ => None,
        }
    }

    /// Render one callback buffer into `out`
    ///
    /// Returns `true` if the player is started and `out` holds its output
    /// (possibly silence while caching). Otherwise `out` is zeroed.
    pub fn render(&mut self, out: &mut [f32]) -> bool {
        match self.state {
            PlayerState::Starting => {
                self.state = PlayerState::Started;
                self.reply(Operation::Start, Ok(()));
            }
            PlayerState::Resuming => {
                self.state = PlayerState::Started;
                self.reply(Operation::Resume, Ok(()));
            }
            PlayerState::Pausing => {
                self.state = PlayerState::Paused;
                self.reply(Operation::Pause, Ok(()));
            }
            PlayerState::Stopping => {
                self.clear_current();
                self.state = PlayerState::Stopped;
                self.reply(Operation::Stop, Ok(()));
            }
            PlayerState::Closing => {
                self.teardown();
                tracing::debug!("{} player closed", self.slot);
                self.reply(Operation::Close, Ok(()));
            }
            _ => {}
        }

        if self.state != PlayerState::Started {
            out.fill(0.0);
            return false;
        }
        self.produce(out);
        true
    }

    fn produce(&mut self, out: &mut [f32]) {
        let Some(ring) = self.ring.as_mut() else {
            out.fill(0.0);
            return;
        };

        if self.caching {
            if self.data_ended || ring.frames_available() >= self.cache_frames {
                self.caching = false;
            } else {
                out.fill(0.0);
                return;
            }
        }

        let channels = ring.channels();
        let wanted = out.len() / channels;
        let read = ring.pull(out);
        out[read * channels..].fill(0.0);

        if read < wanted {
            if !self.data_ended {
                self.caching = true;
            } else if ring.is_empty() && !self.finished {
                self.finished = true;
                self.poster.post(EngineMessage::FinishPlay { slot: self.slot });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmGateway;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const RATE: u32 = 16_000;
    const BLOCK: usize = 160;

    fn settings() -> PlayerSettings {
        PlayerSettings {
            channels: 1,
            ring_buffer_ms: 1000,
            cache_threshold_ms: 20,
        }
    }

    fn setup() -> (PlayerEngine, CodecContext, mpsc::Receiver<EngineMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let player = PlayerEngine::new(PlayerSlot::Stream, settings(), EventPoster::new(tx));
        (player, CodecContext::new(Arc::new(PcmGateway)), rx)
    }

    fn pcm_bundle(frames: usize, samples_per_frame: usize, value: i16) -> FrameBundle {
        let mut bundle = FrameBundle::new();
        let frame: Vec<u8> = std::iter::repeat(value.to_le_bytes())
            .take(samples_per_frame)
            .flatten()
            .collect();
        for _ in 0..frames {
            bundle.put(&frame);
        }
        bundle
    }

    fn expect_response(rx: &mut mpsc::Receiver<EngineMessage>, operation: Operation, success: bool) {
        match rx.try_recv() {
            Ok(EngineMessage::Response(response)) => {
                assert_eq!(response.id.operation, operation);
                assert_eq!(response.success, success, "{:?}", response.error);
            }
            other => panic!("expected {} response, got {:?}", operation, other),
        }
    }

    fn started() -> (PlayerEngine, CodecContext, mpsc::Receiver<EngineMessage>) {
        let (mut player, mut codec, mut rx) = setup();
        player.handle(PlayerRequest::Open { sample_rate: RATE }, &mut codec);
        expect_response(&mut rx, Operation::Open, true);
        player.handle(PlayerRequest::Start, &mut codec);
        let mut out = [0.0f32; BLOCK];
        player.render(&mut out);
        expect_response(&mut rx, Operation::Start, true);
        (player, codec, rx)
    }

    #[test]
    fn test_open_replies_immediately_and_start_in_callback() {
        let (mut player, mut codec, mut rx) = setup();
        player.handle(PlayerRequest::Open { sample_rate: RATE }, &mut codec);
        expect_response(&mut rx, Operation::Open, true);
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(codec.is_initialized());

        player.handle(PlayerRequest::Start, &mut codec);
        assert_eq!(player.state(), PlayerState::Starting);
        assert!(rx.try_recv().is_err());

        let mut out = [1.0f32; BLOCK];
        assert!(player.render(&mut out));
        expect_response(&mut rx, Operation::Start, true);
        assert_eq!(player.state(), PlayerState::Started);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_open_failure_resets_to_closed() {
        let (mut player, mut codec, mut rx) = setup();
        player.handle(PlayerRequest::Open { sample_rate: 0 }, &mut codec);
        expect_response(&mut rx, Operation::Open, false);
        assert_eq!(player.state(), PlayerState::Closed);
    }

    #[test]
    fn test_invalid_request_replies_failure() {
        let (mut player, mut codec, mut rx) = setup();
        player.handle(PlayerRequest::Pause, &mut codec);
        expect_response(&mut rx, Operation::Pause, false);
        assert_eq!(player.state(), PlayerState::Closed);
    }

    #[test]
    fn test_caches_until_threshold() {
        let (mut player, mut codec, _rx) = started();
        let mut out = [0.0f32; BLOCK];

        // 10 ms buffered, threshold is 20 ms
        player.handle(PlayerRequest::PutData(pcm_bundle(1, 160, 16_384)), &mut codec);
        player.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        player.handle(PlayerRequest::PutData(pcm_bundle(1, 160, 16_384)), &mut codec);
        player.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
        assert_eq!(player.buffered_frames(), 160);
    }

    #[test]
    fn test_finish_play_posted_once() {
        let (mut player, mut codec, mut rx) = started();
        let mut out = [0.0f32; BLOCK];

        player.handle(PlayerRequest::PutData(pcm_bundle(1, 100, 100)), &mut codec);
        player.handle(PlayerRequest::EndData, &mut codec);

        // Short read pads with silence and finishes
        player.render(&mut out);
        assert!(out[..100].iter().all(|&s| s != 0.0));
        assert!(out[100..].iter().all(|&s| s == 0.0));
        player.render(&mut out);
        player.render(&mut out);

        let finishes = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|m| matches!(m, EngineMessage::FinishPlay { .. }))
            .count();
        assert_eq!(finishes, 1);
    }

    #[test]
    fn test_clear_current_allows_next_item() {
        let (mut player, mut codec, mut rx) = started();
        let mut out = [0.0f32; BLOCK];

        player.handle(PlayerRequest::EndData, &mut codec);
        player.render(&mut out);
        assert!(matches!(rx.try_recv(), Ok(EngineMessage::FinishPlay { .. })));

        player.handle(PlayerRequest::ClearCurrent, &mut codec);
        player.handle(PlayerRequest::PutData(pcm_bundle(2, 160, 50)), &mut codec);
        player.handle(PlayerRequest::EndData, &mut codec);
        for _ in 0..3 {
            player.render(&mut out);
        }
        assert!(matches!(rx.try_recv(), Ok(EngineMessage::FinishPlay { .. })));
    }

    #[test]
    fn test_underrun_reenters_caching() {
        let (mut player, mut codec, _rx) = started();
        let mut out = [0.0f32; BLOCK];

        player.handle(PlayerRequest::PutData(pcm_bundle(2, 200, 1000)), &mut codec);
        player.render(&mut out);
        player.render(&mut out);
        // 80 frames left, below threshold after the short read
        player.render(&mut out);
        assert_eq!(player.buffered_frames(), 0);

        player.handle(PlayerRequest::PutData(pcm_bundle(1, 100, 1000)), &mut codec);
        player.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(player.buffered_frames(), 100);
    }

    #[test]
    fn test_pause_resume_stop_close() {
        let (mut player, mut codec, mut rx) = started();
        let mut out = [0.0f32; BLOCK];

        player.handle(PlayerRequest::Pause, &mut codec);
        assert!(!player.render(&mut out));
        expect_response(&mut rx, Operation::Pause, true);

        player.handle(PlayerRequest::Resume, &mut codec);
        assert!(player.render(&mut out));
        expect_response(&mut rx, Operation::Resume, true);

        player.handle(PlayerRequest::PutData(pcm_bundle(4, 160, 1)), &mut codec);
        player.handle(PlayerRequest::Stop, &mut codec);
        player.render(&mut out);
        expect_response(&mut rx, Operation::Stop, true);
        assert_eq!(player.buffered_frames(), 0);

        player.handle(PlayerRequest::Close, &mut codec);
        player.render(&mut out);
        expect_response(&mut rx, Operation::Close, true);
        assert_eq!(player.state(), PlayerState::Closed);

        // Ignored once closed
        player.handle(PlayerRequest::PutData(pcm_bundle(1, 160, 1)), &mut codec);
        assert_eq!(player.stats().frames_decoded, 4);
    }

    #[test]
    fn test_close_fails_pending_start() {
        let (mut player, mut codec, mut rx) = setup();
        player.handle(PlayerRequest::Open { sample_rate: RATE }, &mut codec);
        expect_response(&mut rx, Operation::Open, true);

        player.handle(PlayerRequest::Start, &mut codec);
        player.handle(PlayerRequest::Close, &mut codec);
        expect_response(&mut rx, Operation::Start, false);

        let mut out = [0.0f32; BLOCK];
        player.render(&mut out);
        expect_response(&mut rx, Operation::Close, true);
    }

    #[test]
    fn test_decode_error_skips_frame() {
        let (mut player, mut codec, _rx) = started();
        let mut bundle = FrameBundle::new();
        bundle.put(&[1, 2, 3]);
        bundle.put(&[0, 0, 0, 0]);
        player.handle(PlayerRequest::PutData(bundle), &mut codec);
        assert_eq!(player.stats().decode_errors, 1);
        assert_eq!(player.buffered_frames(), 2);
    }
}
