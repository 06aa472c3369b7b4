//! Frame codec gateway
//!
//! The engines only depend on the lifecycle and byte-level contract of a
//! codec: initialize once, open per-stream encoders/decoders, allocate
//! scratch memory, and turn one frame into PCM (or back). Dropping a
//! decoder, encoder or scratch buffer releases it.

pub mod pcm;

#[cfg(feature = "opus")]
pub mod decoder;
#[cfg(feature = "opus")]
pub mod encoder;

use std::sync::Arc;

use crate::error::CodecError;

pub use pcm::PcmGateway;

#[cfg(feature = "opus")]
pub use decoder::OpusDecoder;
#[cfg(feature = "opus")]
pub use encoder::{OpusEncoder, OpusGateway};

/// Decodes compressed frames into interleaved 16-bit PCM
pub trait FrameDecoder: Send {
    /// Decode one frame into `pcm`, returning samples per channel written
    fn decode(&mut self, frame: &[u8], pcm: &mut [i16]) -> Result<usize, CodecError>;

    fn channels(&self) -> u16;
}

/// Encodes fixed-size blocks of interleaved 16-bit PCM
pub trait FrameEncoder: Send {
    /// Encode exactly one frame of `pcm` into `out`, returning bytes written
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError>;

    /// Samples per channel the encoder expects per call
    fn frame_size(&self) -> usize;
}

/// Entry point to a codec implementation
pub trait CodecGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-time setup before the first encoder or decoder is opened
    fn initialize(&self) -> Result<(), CodecError> {
        Ok(())
    }

    fn open_decoder(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameDecoder>, CodecError>;

    fn open_encoder(
        &self,
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        bit_rate: Option<u32>,
    ) -> Result<Box<dyn FrameEncoder>, CodecError>;

    /// Allocate a zeroed scratch buffer of `samples` samples
    fn allocate(&self, samples: usize) -> Result<Vec<i16>, CodecError> {
        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(samples)
            .map_err(|_| CodecError::AllocationFailed(samples))?;
        scratch.resize(samples, 0);
        Ok(scratch)
    }
}

/// Per-rendering-context handle that initializes its gateway lazily, once
///
/// All player slots of a playback context share one of these, so the codec
/// is set up by the first `open` and reused afterwards.
pub struct CodecContext {
    gateway: Arc<dyn CodecGateway>,
    initialized: bool,
}

impl CodecContext {
    pub fn new(gateway: Arc<dyn CodecGateway>) -> Self {
        Self {
            gateway,
            initialized: false,
        }
    }

    /// Get the gateway, initializing it on first use
    ///
    /// A failed initialization is not remembered; the next call tries again.
    pub fn gateway(&mut self) -> Result<&dyn CodecGateway, CodecError> {
        if !self.initialized {
            self.gateway.initialize()?;
            self.initialized = true;
            tracing::debug!("Codec gateway '{}' initialized", self.gateway.name());
        }
        Ok(self.gateway.as_ref())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// The gateway used when none is configured explicitly
pub fn default_gateway() -> Arc<dyn CodecGateway> {
    #[cfg(feature = "opus")]
    {
        Arc::new(OpusGateway::default())
    }
    #[cfg(not(feature = "opus"))]
    {
        Arc::new(PcmGateway)
    }
}

/// Samples per channel in a frame of `duration_ms`
pub fn frame_size_from_ms(sample_rate: u32, duration_ms: u32) -> usize {
    (sample_rate as u64 * duration_ms as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        inits: AtomicUsize,
        fail_first: bool,
    }

    impl CodecGateway for CountingGateway {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn initialize(&self) -> Result<(), CodecError> {
            let n = self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(CodecError::Init("not yet".into()));
            }
            Ok(())
        }

        fn open_decoder(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameDecoder>, CodecError> {
            PcmGateway.open_decoder(sample_rate, channels)
        }

        fn open_encoder(
            &self,
            sample_rate: u32,
            channels: u16,
            frame_size: usize,
            bit_rate: Option<u32>,
        ) -> Result<Box<dyn FrameEncoder>, CodecError> {
            PcmGateway.open_encoder(sample_rate, channels, frame_size, bit_rate)
        }
    }

    #[test]
    fn test_context_initializes_once() {
        let gateway = Arc::new(CountingGateway {
            inits: AtomicUsize::new(0),
            fail_first: false,
        });
        let mut context = CodecContext::new(gateway.clone());

        assert!(context.gateway().is_ok());
        assert!(context.gateway().is_ok());
        assert_eq!(gateway.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_init_is_retried_by_next_caller() {
        let gateway = Arc::new(CountingGateway {
            inits: AtomicUsize::new(0),
            fail_first: true,
        });
        let mut context = CodecContext::new(gateway.clone());

        assert!(context.gateway().is_err());
        assert!(!context.is_initialized());
        assert!(context.gateway().is_ok());
        assert_eq!(gateway.inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_allocate() {
        let scratch = PcmGateway.allocate(480).unwrap();
        assert_eq!(scratch.len(), 480);
        assert!(scratch.iter().all(|&s| s == 0));
        assert_eq!(frame_size_from_ms(16_000, 20), 320);
    }
}
