//! Audio subsystem module

pub mod buffer;
#[cfg(feature = "device")]
pub mod device;

pub use buffer::{RingBuffer, Sample};

/// Convert a 16-bit sample to the `[-1.0, 1.0)` float range
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert a float sample to 16 bits, clamping out-of-range input
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}
