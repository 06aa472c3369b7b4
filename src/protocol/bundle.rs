//! Frame bundling for cross-thread transfer
//!
//! A bundle packs variable-length frames into one contiguous buffer plus a
//! length table, so a whole batch crosses a channel as a single message.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;

/// Contiguous frame buffer with its length table
///
/// Invariant: the lengths always sum to the buffer length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBundle {
    buffer: BytesMut,
    lengths: Vec<usize>,
}

impl FrameBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate room for `frames` frames totalling `bytes` bytes
    pub fn with_capacity(frames: usize, bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(bytes),
            lengths: Vec::with_capacity(frames),
        }
    }

    /// Rebuild a bundle from a transferred buffer and length table
    pub fn from_parts(buffer: Bytes, lengths: Vec<usize>) -> Result<Self, ProtocolError> {
        let expected: usize = lengths.iter().sum();
        if expected != buffer.len() {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        // Reclaims the allocation when the buffer is not shared
        Ok(Self {
            buffer: BytesMut::from(buffer),
            lengths,
        })
    }

    /// Append one frame
    pub fn put(&mut self, frame: &[u8]) {
        self.buffer.extend_from_slice(frame);
        self.lengths.push(frame.len());
    }

    /// Append every frame of `frames` in order
    pub fn put_arrays<I, B>(&mut self, frames: I)
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for frame in frames {
            self.put(frame.as_ref());
        }
    }

    /// The concatenated frame bytes
    pub fn compo_array(&self) -> &[u8] {
        &self.buffer
    }

    /// Byte length of each frame, in order
    pub fn compo_length_list(&self) -> &[usize] {
        &self.lengths
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Total payload size in bytes
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// Iterate over the frames without copying
    pub fn frames(&self) -> Frames<'_> {
        Frames {
            buffer: &self.buffer,
            lengths: self.lengths.iter(),
            offset: 0,
        }
    }

    /// Hand the buffer over without copying it
    pub fn into_parts(self) -> (Bytes, Vec<usize>) {
        (self.buffer.freeze(), self.lengths)
    }

    /// Split into owned frames sharing the bundle's allocation
    pub fn into_frames(self) -> Vec<Bytes> {
        let (buffer, lengths) = self.into_parts();
        let mut frames = Vec::with_capacity(lengths.len());
        let mut offset = 0;
        for len in lengths {
            frames.push(buffer.slice(offset..offset + len));
            offset += len;
        }
        frames
    }

    /// Reconstruct the frame list from a buffer and its length table
    pub fn parse_array_list(buffer: &Bytes, lengths: &[usize]) -> Result<Vec<Bytes>, ProtocolError> {
        let expected: usize = lengths.iter().sum();
        if expected != buffer.len() {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        let mut frames = Vec::with_capacity(lengths.len());
        let mut offset = 0;
        for &len in lengths {
            frames.push(buffer.slice(offset..offset + len));
            offset += len;
        }
        Ok(frames)
    }
}

/// Borrowing iterator over the frames of a bundle
pub struct Frames<'a> {
    buffer: &'a [u8],
    lengths: std::slice::Iter<'a, usize>,
    offset: usize,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.lengths.next()?;
        let frame = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Some(frame)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lengths.size_hint()
    }
}
