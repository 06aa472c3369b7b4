//! Recorder engine: buffers captured audio and encodes whole codec frames
//!
//! Runs on the capture rendering thread.

use super::message::{EngineMessage, EngineResponse, EventPoster, RecordedData, RecorderRequest};
use super::{EngineTarget, Operation, RecorderState, ResponseId};
use crate::audio::{f32_to_i16, RingBuffer};
use crate::codec::{frame_size_from_ms, CodecContext, FrameEncoder};
use crate::config::AudioConfig;
use crate::constants::MAX_ENCODED_FRAME;
use crate::error::CodecError;
use crate::protocol::FrameBundle;

/// Samples converted per pass over the capture input
const CONVERT_CHUNK: usize = 1024;

/// Answers whether recorded bundles can be moved to the control context
///
/// Queried once per recording session, on its first data indication.
pub trait TransferProbe: Send {
    fn can_transfer(&mut self) -> bool;
}

/// Probe for hosts where moving buffers always works
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysTransfer;

impl TransferProbe for AlwaysTransfer {
    fn can_transfer(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferMode {
    Unprobed,
    Move,
    Copy,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub channels: u16,
    pub frame_duration_ms: u32,
    pub ring_buffer_ms: u32,
}

impl RecorderSettings {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            channels: config.channels,
            frame_duration_ms: config.frame_duration_ms,
            ring_buffer_ms: config.ring_buffer_ms,
        }
    }
}

/// Capture-side engine, one per process
pub struct RecorderEngine {
    settings: RecorderSettings,
    state: RecorderState,
    encoder: Option<Box<dyn FrameEncoder>>,
    ring: Option<RingBuffer<i16>>,
    /// One codec frame of interleaved samples
    frame: Vec<i16>,
    converted: Vec<i16>,
    encoded: Vec<u8>,
    transfer: TransferMode,
    probe: Box<dyn TransferProbe>,
    poster: EventPoster,
    frames_encoded: u64,
    encode_errors: u64,
}

impl RecorderEngine {
    pub fn new(settings: RecorderSettings, poster: EventPoster, probe: Box<dyn TransferProbe>) -> Self {
        Self {
            settings,
            state: RecorderState::Closed,
            encoder: None,
            ring: None,
            frame: Vec::new(),
            converted: Vec::new(),
            encoded: Vec::new(),
            transfer: TransferMode::Unprobed,
            probe,
            poster,
            frames_encoded: 0,
            encode_errors: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn encode_errors(&self) -> u64 {
        self.encode_errors
    }

    fn reply(&self, operation: Operation, result: Result<(), String>) {
        let id = ResponseId::new(EngineTarget::Recorder, operation);
        let response = match result {
            Ok(()) => EngineResponse::ok(id),
            Err(reason) => EngineResponse::failed(id, reason),
        };
        self.poster.respond(response);
    }

    pub fn handle(&mut self, request: RecorderRequest, codec: &mut CodecContext) {
        match request {
            RecorderRequest::Open {
                sample_rate,
                bit_rate,
            } => self.open(sample_rate, bit_rate, codec),
            RecorderRequest::Start => self.begin(Operation::Start),
            RecorderRequest::Stop => self.begin(Operation::Stop),
            RecorderRequest::Close => self.begin(Operation::Close),
        }
    }

    fn open(&mut self, sample_rate: u32, bit_rate: Option<u32>, codec: &mut CodecContext) {
        if self.state != RecorderState::Closed {
            self.reply(
                Operation::Open,
                Err(format!("cannot open recorder while {}", self.state)),
            );
            return;
        }

        self.state = RecorderState::Opening;
        match self.allocate(sample_rate, bit_rate, codec) {
            Ok(()) => {
                self.state = RecorderState::Stopped;
                tracing::debug!("Recorder opened at {} Hz", sample_rate);
                self.reply(Operation::Open, Ok(()));
            }
            Err(e) => {
                tracing::error!("Failed to open recorder: {}", e);
                self.teardown();
                self.reply(Operation::Open, Err(e.to_string()));
            }
        }
    }

    fn allocate(
        &mut self,
        sample_rate: u32,
        bit_rate: Option<u32>,
        codec: &mut CodecContext,
    ) -> Result<(), CodecError> {
        let channels = self.settings.channels;
        let frame_size = frame_size_from_ms(sample_rate, self.settings.frame_duration_ms);
        if frame_size == 0 {
            return Err(CodecError::InvalidFrameSize(frame_size));
        }

        let gateway = codec.gateway()?;
        let encoder = gateway.open_encoder(sample_rate, channels, frame_size, bit_rate)?;
        let frame = gateway.allocate(frame_size * channels as usize)?;
        let converted = gateway.allocate(CONVERT_CHUNK * channels as usize)?;

        self.ring = Some(RingBuffer::with_duration(
            sample_rate,
            channels,
            self.settings.ring_buffer_ms,
        ));
        self.encoder = Some(encoder);
        self.frame = frame;
        self.converted = converted;
        self.encoded = vec![0; MAX_ENCODED_FRAME];
        self.transfer = TransferMode::Unprobed;
        Ok(())
    }

    fn teardown(&mut self) {
        self.encoder = None;
        self.ring = None;
        self.frame = Vec::new();
        self.converted = Vec::new();
        self.encoded = Vec::new();
        self.state = RecorderState::Closed;
    }

    fn begin(&mut self, operation: Operation) {
        if !self.state.accepts(operation) {
            self.reply(
                operation,
                Err(format!("cannot {} recorder while {}", operation, self.state)),
            );
            return;
        }

        if operation == Operation::Close {
            let pending = match self.state {
                RecorderState::Starting => Some(Operation::Start),
                RecorderState::Stopping => Some(Operation::Stop),
                _ => None,
            };
            if let Some(pending) = pending {
                self.reply(pending, Err("recorder is closing".into()));
            }
        }
        self.state = RecorderState::transitional(operation);
    }

    /// Process one capture callback of interleaved `f32` samples
    pub fn capture(&mut self, input: &[f32]) {
        match self.state {
            RecorderState::Starting => {
                if let Some(ring) = self.ring.as_mut() {
                    ring.clear();
                }
                self.state = RecorderState::Started;
                self.reply(Operation::Start, Ok(()));
            }
            RecorderState::Stopping => {
                // A partial trailing frame is discarded
                if let Some(ring) = self.ring.as_mut() {
                    ring.clear();
                }
                self.state = RecorderState::Stopped;
                self.reply(Operation::Stop, Ok(()));
            }
            RecorderState::Closing => {
                self.teardown();
                tracing::debug!("Recorder closed");
                self.reply(Operation::Close, Ok(()));
            }
            _ => {}
        }

        if self.state != RecorderState::Started {
            return;
        }

        let bundle = self.encode_input(input);
        if !bundle.is_empty() {
            self.indicate(bundle);
        }
    }

    fn encode_input(&mut self, input: &[f32]) -> FrameBundle {
        let mut bundle = FrameBundle::new();
        let (Some(encoder), Some(ring)) = (self.encoder.as_mut(), self.ring.as_mut()) else {
            return bundle;
        };
        let frame_frames = self.frame.len() / ring.channels();
        if self.converted.is_empty() || frame_frames == 0 {
            return bundle;
        }

        for chunk in input.chunks(self.converted.len()) {
            let converted = &mut self.converted[..chunk.len()];
            for (dst, src) in converted.iter_mut().zip(chunk) {
                *dst = f32_to_i16(*src);
            }
            ring.push(converted);

            while ring.frames_available() >= frame_frames {
                ring.pull(&mut self.frame);
                match encoder.encode(&self.frame, &mut self.encoded) {
                    Ok(written) => {
                        bundle.put(&self.encoded[..written]);
                        self.frames_encoded += 1;
                    }
                    Err(e) => {
                        self.encode_errors += 1;
                        tracing::error!("Recorder failed to encode a frame: {}", e);
                    }
                }
            }
        }
        bundle
    }

    fn indicate(&mut self, bundle: FrameBundle) {
        if self.transfer == TransferMode::Unprobed {
            self.transfer = if self.probe.can_transfer() {
                TransferMode::Move
            } else {
                tracing::warn!("Buffer transfer unavailable, copying recorded data for this session");
                TransferMode::Copy
            };
        }

        let data = match self.transfer {
            TransferMode::Copy => {
                let (bytes, lengths) = bundle.into_parts();
                RecordedData::Array {
                    bytes: bytes.to_vec(),
                    lengths,
                }
            }
            _ => RecordedData::Buffer(bundle),
        };
        self.poster.post(EngineMessage::DataIndication(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmGateway;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct CountingProbe {
        calls: Arc<AtomicUsize>,
        available: bool,
    }

    impl TransferProbe for CountingProbe {
        fn can_transfer(&mut self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.available
        }
    }

    fn settings() -> RecorderSettings {
        RecorderSettings {
            channels: 1,
            frame_duration_ms: 20,
            ring_buffer_ms: 500,
        }
    }

    fn started(
        probe: Box<dyn TransferProbe>,
    ) -> (RecorderEngine, CodecContext, mpsc::Receiver<EngineMessage>) {
        let (tx, mut rx) = mpsc::channel(64);
        let mut recorder = RecorderEngine::new(settings(), EventPoster::new(tx), probe);
        let mut codec = CodecContext::new(Arc::new(PcmGateway));

        recorder.handle(
            RecorderRequest::Open {
                sample_rate: 16_000,
                bit_rate: None,
            },
            &mut codec,
        );
        recorder.handle(RecorderRequest::Start, &mut codec);
        recorder.capture(&[]);
        assert_eq!(recorder.state(), RecorderState::Started);

        for _ in 0..2 {
            assert!(matches!(rx.try_recv(), Ok(EngineMessage::Response(r)) if r.success));
        }
        (recorder, codec, rx)
    }

    #[test]
    fn test_batches_frames_per_callback() {
        let (mut recorder, _codec, mut rx) = started(Box::new(AlwaysTransfer));

        // 2.5 frames of 320 samples
        recorder.capture(&vec![0.25f32; 800]);
        match rx.try_recv() {
            Ok(EngineMessage::DataIndication(RecordedData::Buffer(bundle))) => {
                assert_eq!(bundle.compo_length_list(), &[640, 640]);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Remaining 160 samples complete a frame
        recorder.capture(&vec![0.25f32; 160]);
        match rx.try_recv() {
            Ok(EngineMessage::DataIndication(data)) => assert_eq!(data.into_bundle().unwrap().len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(recorder.frames_encoded(), 3);
    }

    #[test]
    fn test_no_indication_without_full_frame() {
        let (mut recorder, _codec, mut rx) = started(Box::new(AlwaysTransfer));
        recorder.capture(&[0.1; 100]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_falls_back_to_copy_once_per_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = CountingProbe {
            calls: calls.clone(),
            available: false,
        };
        let (mut recorder, _codec, mut rx) = started(Box::new(probe));

        for _ in 0..3 {
            recorder.capture(&[0.0; 320]);
            match rx.try_recv() {
                Ok(EngineMessage::DataIndication(data)) => assert_eq!(data.tag(), "array"),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_and_invalid_requests() {
        let (mut recorder, mut codec, mut rx) = started(Box::new(AlwaysTransfer));

        recorder.handle(RecorderRequest::Start, &mut codec);
        assert!(matches!(rx.try_recv(), Ok(EngineMessage::Response(r)) if !r.success));

        recorder.handle(RecorderRequest::Stop, &mut codec);
        recorder.capture(&[0.0; 640]);
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineMessage::Response(r)) if r.success && r.id.operation == Operation::Stop
        ));
        // Stopped: input is ignored
        assert!(rx.try_recv().is_err());

        recorder.handle(RecorderRequest::Close, &mut codec);
        recorder.capture(&[]);
        assert_eq!(recorder.state(), RecorderState::Closed);
    }

    #[test]
    fn test_samples_are_clamped() {
        let (mut recorder, _codec, mut rx) = started(Box::new(AlwaysTransfer));
        recorder.capture(&[2.0; 320]);
        let Ok(EngineMessage::DataIndication(data)) = rx.try_recv() else {
            panic!("expected data");
        };
        let bundle = data.into_bundle().unwrap();
        let bytes = bundle.compo_array();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
    }
}
