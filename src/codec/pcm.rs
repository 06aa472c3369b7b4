//! Uncompressed 16-bit little-endian "codec"
//!
//! Useful where libopus is unavailable and for deterministic tests: each
//! frame is the raw PCM block.

use super::{CodecGateway, FrameDecoder, FrameEncoder};
use crate::error::CodecError;

/// Gateway producing raw PCM encoders and decoders
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmGateway;

impl CodecGateway for PcmGateway {
    fn name(&self) -> &'static str {
        "pcm16le"
    }

    fn open_decoder(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameDecoder>, CodecError> {
        if sample_rate == 0 {
            return Err(CodecError::UnsupportedSampleRate(sample_rate));
        }
        if channels == 0 {
            return Err(CodecError::UnsupportedChannels(channels));
        }
        Ok(Box::new(PcmDecoder { channels }))
    }

    fn open_encoder(
        &self,
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        _bit_rate: Option<u32>,
    ) -> Result<Box<dyn FrameEncoder>, CodecError> {
        if sample_rate == 0 {
            return Err(CodecError::UnsupportedSampleRate(sample_rate));
        }
        if channels == 0 {
            return Err(CodecError::UnsupportedChannels(channels));
        }
        if frame_size == 0 {
            return Err(CodecError::InvalidFrameSize(frame_size));
        }
        Ok(Box::new(PcmEncoder {
            channels,
            frame_size,
        }))
    }
}

struct PcmDecoder {
    channels: u16,
}

impl FrameDecoder for PcmDecoder {
    fn decode(&mut self, frame: &[u8], pcm: &mut [i16]) -> Result<usize, CodecError> {
        let channels = self.channels as usize;
        if frame.len() % (2 * channels) != 0 {
            return Err(CodecError::DecodingFailed(format!(
                "{} bytes is not a whole number of frames",
                frame.len()
            )));
        }

        let samples = frame.len() / 2;
        if samples > pcm.len() {
            return Err(CodecError::InvalidFrameSize(samples));
        }

        for (out, bytes) in pcm.iter_mut().zip(frame.chunks_exact(2)) {
            *out = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Ok(samples / channels)
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

struct PcmEncoder {
    channels: u16,
    frame_size: usize,
}

impl FrameEncoder for PcmEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        let expected = self.frame_size * self.channels as usize;
        if pcm.len() != expected {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }
        let bytes = pcm.len() * 2;
        if bytes > out.len() {
            return Err(CodecError::EncodingFailed(format!(
                "output buffer holds {} bytes, need {}",
                out.len(),
                bytes
            )));
        }

        for (chunk, sample) in out.chunks_exact_mut(2).zip(pcm) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(bytes)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}
