//! Opus decoder wrapper

use opus::{Channels, Decoder};

use super::FrameDecoder;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    channels: u16,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::UnsupportedChannels(channels)),
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self { decoder, channels })
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, frame: &[u8], pcm: &mut [i16]) -> Result<usize, CodecError> {
        self.decoder
            .decode(frame, pcm, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}
