//! Length-prefixed PTT frame encoding
//!
//! Every compressed frame is prefixed by its length minus one:
//!
//! ```text
//! len <= 128   [0LLLLLLL] payload...                 (L = len - 1)
//! len >  128   [1HHHHHHH][LLLLLLLL] payload...       (H:L = len - 1, big endian)
//! ```
//!
//! Frames are packed back to back with no padding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::MAX_WIRE_FRAME;
use crate::error::ProtocolError;

/// Longest frame that fits the one-byte prefix
pub const SHORT_FRAME_MAX: usize = 128;

const LONG_FLAG: u8 = 0x80;

/// Number of prefix bytes used for a frame of `len` bytes
pub fn prefix_len(len: usize) -> usize {
    if len <= SHORT_FRAME_MAX {
        1
    } else {
        2
    }
}

/// Append one length-prefixed frame to `out`
pub fn encode_frame_into(out: &mut BytesMut, frame: &[u8]) -> Result<(), ProtocolError> {
    let len = frame.len();
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > MAX_WIRE_FRAME {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let biased = len - 1;
    if len <= SHORT_FRAME_MAX {
        out.put_u8(biased as u8);
    } else {
        out.put_u8(LONG_FLAG | (biased >> 8) as u8);
        out.put_u8((biased & 0xFF) as u8);
    }
    out.extend_from_slice(frame);
    Ok(())
}

/// Encode a run of frames into one payload
pub fn encode_frames<I, B>(frames: I) -> Result<Bytes, ProtocolError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = BytesMut::new();
    for frame in frames {
        encode_frame_into(&mut out, frame.as_ref())?;
    }
    Ok(out.freeze())
}

/// Split a payload back into its frames
///
/// The returned frames share the payload's allocation.
pub fn decode_frames(payload: &Bytes) -> Result<Vec<Bytes>, ProtocolError> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset < payload.len() {
        let head = payload[offset];
        let (len, header) = if head & LONG_FLAG == 0 {
            (head as usize + 1, 1)
        } else {
            if offset + 2 > payload.len() {
                return Err(ProtocolError::Truncated {
                    offset,
                    needed: 2,
                    available: payload.len() - offset,
                });
            }
            let biased = (((head & !LONG_FLAG) as usize) << 8) | payload[offset + 1] as usize;
            (biased + 1, 2)
        };

        let start = offset + header;
        if start + len > payload.len() {
            return Err(ProtocolError::Truncated {
                offset,
                needed: header + len,
                available: payload.len() - offset,
            });
        }

        frames.push(payload.slice(start..start + len));
        offset = start + len;
    }

    Ok(frames)
}

/// Count the frames of a payload without splitting it
pub fn count_frames(payload: &[u8]) -> usize {
    let mut offset = 0;
    let mut count = 0;
    while offset < payload.len() {
        let head = payload[offset];
        let step = if head & LONG_FLAG == 0 {
            1 + head as usize + 1
        } else if offset + 1 < payload.len() {
            2 + ((((head & !LONG_FLAG) as usize) << 8) | payload[offset + 1] as usize) + 1
        } else {
            break;
        };
        if offset + step > payload.len() {
            break;
        }
        offset += step;
        count += 1;
    }
    count
}
