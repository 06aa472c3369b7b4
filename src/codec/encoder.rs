//! Opus encoder wrapper and gateway
//!
//! Provides low-latency Opus encoding tuned for push-to-talk voice.

use opus::{Application, Channels, Encoder};

use super::{CodecGateway, FrameDecoder, FrameEncoder, OpusDecoder};
use crate::constants::DEFAULT_BITRATE;
use crate::error::CodecError;

const SUPPORTED_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Encoder tuning shared by every encoder a gateway opens
#[derive(Debug, Clone)]
pub struct OpusSettings {
    pub bitrate: u32,
    pub vbr: bool,
    pub fec: bool,
    pub packet_loss_perc: u8,
    pub application: Application,
}

impl Default for OpusSettings {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            vbr: true,
            fec: true,
            packet_loss_perc: 10,
            application: Application::Voip,
        }
    }
}

/// Opus encoder wrapper with optimized settings
pub struct OpusEncoder {
    encoder: Encoder,
    channels: u16,
    frame_size: usize,
}

impl OpusEncoder {
    /// Create a new Opus encoder
    pub fn new(
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        settings: &OpusSettings,
    ) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::UnsupportedChannels(channels)),
        };
        if !SUPPORTED_RATES.contains(&sample_rate) {
            return Err(CodecError::UnsupportedSampleRate(sample_rate));
        }
        // 2.5, 5, 10, 20, 40 or 60 ms
        let valid_sizes = [sample_rate / 400, sample_rate / 200, sample_rate / 100, sample_rate / 50, sample_rate / 25, sample_rate * 3 / 50];
        if !valid_sizes.contains(&(frame_size as u32)) {
            return Err(CodecError::InvalidFrameSize(frame_size));
        }

        let mut encoder = Encoder::new(sample_rate, opus_channels, settings.application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, settings)?;

        Ok(Self {
            encoder,
            channels,
            frame_size,
        })
    }

    /// Create encoder optimized for voice at an optional bitrate
    pub fn voice(
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        bit_rate: Option<u32>,
    ) -> Result<Self, CodecError> {
        let mut settings = OpusSettings::default();
        if let Some(bit_rate) = bit_rate {
            settings.bitrate = bit_rate;
        }
        Self::new(sample_rate, channels, frame_size, &settings)
    }

    /// Configure the encoder with all settings
    fn configure_encoder(encoder: &mut Encoder, settings: &OpusSettings) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(settings.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_vbr(settings.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        encoder
            .set_inband_fec(settings.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if settings.fec {
            encoder
                .set_packet_loss_perc(settings.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        Ok(())
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        let expected = self.frame_size * self.channels as usize;
        if pcm.len() != expected {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        self.encoder
            .encode(pcm, out)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Gateway backed by libopus
#[derive(Debug, Clone, Default)]
pub struct OpusGateway {
    settings: OpusSettings,
}

impl OpusGateway {
    pub fn new(settings: OpusSettings) -> Self {
        Self { settings }
    }
}

impl CodecGateway for OpusGateway {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn open_decoder(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn FrameDecoder>, CodecError> {
        if !SUPPORTED_RATES.contains(&sample_rate) {
            return Err(CodecError::UnsupportedSampleRate(sample_rate));
        }
        Ok(Box::new(OpusDecoder::new(sample_rate, channels)?))
    }

    fn open_encoder(
        &self,
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        bit_rate: Option<u32>,
    ) -> Result<Box<dyn FrameEncoder>, CodecError> {
        let mut settings = self.settings.clone();
        if let Some(bit_rate) = bit_rate {
            settings.bitrate = bit_rate;
        }
        Ok(Box::new(OpusEncoder::new(sample_rate, channels, frame_size, &settings)?))
    }
}
