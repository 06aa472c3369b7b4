//! Fixed-capacity ring buffer for interleaved audio samples
//!
//! The producer and the consumer of one buffer always live on the same
//! rendering thread, so no synchronization is involved. Capacity and
//! indices are counted in frames (one sample per channel).

/// Sample types the ring buffer can carry
pub trait Sample: Copy + Default + Send + 'static {}

impl Sample for i16 {}
impl Sample for f32 {}

/// Circular buffer of interleaved frames
///
/// `push` drops the tail of its input once the buffer is full and
/// `pull` returns short reads when fewer frames are buffered. Neither
/// ever fails; callers must inspect the returned frame counts.
pub struct RingBuffer<T: Sample> {
    data: Box<[T]>,
    channels: usize,
    capacity: usize,
    read_index: usize,
    write_index: usize,
    frames_available: usize,
    overflow_frames: u64,
    underrun_frames: u64,
}

impl<T: Sample> RingBuffer<T> {
    /// Create a ring buffer holding `capacity` frames of `channels` samples
    pub fn new(capacity: usize, channels: u16) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");
        let channels = channels.max(1) as usize;

        Self {
            data: vec![T::default(); capacity * channels].into_boxed_slice(),
            channels,
            capacity,
            read_index: 0,
            write_index: 0,
            frames_available: 0,
            overflow_frames: 0,
            underrun_frames: 0,
        }
    }

    /// Create a buffer sized for `duration_ms` of audio at `sample_rate`
    pub fn with_duration(sample_rate: u32, channels: u16, duration_ms: u32) -> Self {
        let frames = (sample_rate as u64 * duration_ms as u64 / 1000).max(1);
        Self::new(frames as usize, channels)
    }

    /// Append interleaved samples, returning the number of frames written
    ///
    /// Frames beyond the remaining capacity are dropped.
    pub fn push(&mut self, samples: &[T]) -> usize {
        let ch = self.channels;
        let frames = samples.len() / ch;
        let writable = frames.min(self.capacity - self.frames_available);
        if writable < frames {
            self.overflow_frames += (frames - writable) as u64;
        }
        if writable == 0 {
            return 0;
        }

        let first = writable.min(self.capacity - self.write_index);
        let start = self.write_index * ch;
        self.data[start..start + first * ch].copy_from_slice(&samples[..first * ch]);

        let second = writable - first;
        if second > 0 {
            self.data[..second * ch].copy_from_slice(&samples[first * ch..writable * ch]);
        }

        self.write_index = (self.write_index + writable) % self.capacity;
        self.frames_available += writable;
        writable
    }

    /// Copy up to `destination.len() / channels` frames out of the buffer
    ///
    /// Returns the number of frames actually copied. The remainder of
    /// `destination` is left untouched.
    pub fn pull(&mut self, destination: &mut [T]) -> usize {
        let ch = self.channels;
        let requested = destination.len() / ch;
        let readable = requested.min(self.frames_available);
        if readable < requested {
            self.underrun_frames += (requested - readable) as u64;
        }
        if readable == 0 {
            return 0;
        }

        let first = readable.min(self.capacity - self.read_index);
        let start = self.read_index * ch;
        destination[..first * ch].copy_from_slice(&self.data[start..start + first * ch]);

        let second = readable - first;
        if second > 0 {
            destination[first * ch..readable * ch].copy_from_slice(&self.data[..second * ch]);
        }

        self.read_index = (self.read_index + readable) % self.capacity;
        self.frames_available -= readable;
        readable
    }

    /// Discard all buffered frames
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
        self.frames_available = 0;
    }

    /// Frames currently buffered
    pub fn frames_available(&self) -> usize {
        self.frames_available
    }

    /// Buffer capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per frame
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.frames_available == 0
    }

    pub fn is_full(&self) -> bool {
        self.frames_available == self.capacity
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.frames_available as f32 / self.capacity as f32
    }

    /// Frames dropped by `push` since the last reset
    pub fn overflow_frames(&self) -> u64 {
        self.overflow_frames
    }

    /// Frames requested by `pull` but not available since the last reset
    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.overflow_frames = 0;
        self.underrun_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ring_buffer_basic() {
        let mut buffer = RingBuffer::<f32>::new(8, 1);

        assert_eq!(buffer.push(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(buffer.frames_available(), 3);

        let mut out = [0.0f32; 2];
        assert_eq!(buffer.pull(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(buffer.frames_available(), 1);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let mut buffer = RingBuffer::<i16>::new(100, 1);

        // Move both indices to 90
        let filler: Vec<i16> = (0..90).collect();
        assert_eq!(buffer.push(&filler), 90);
        let mut sink = vec![0i16; 90];
        assert_eq!(buffer.pull(&mut sink), 90);

        let pushed: Vec<i16> = (1000..1020).collect();
        assert_eq!(buffer.push(&pushed), 20);

        let mut out = vec![0i16; 20];
        assert_eq!(buffer.pull(&mut out), 20);
        assert_eq!(out, pushed);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_truncates() {
        let mut buffer = RingBuffer::<i16>::new(10, 1);
        assert_eq!(buffer.push(&[7; 6]), 6);
        assert_eq!(buffer.push(&[8; 6]), 4);
        assert!(buffer.is_full());
        assert_eq!(buffer.overflow_frames(), 2);
        assert_eq!(buffer.push(&[9; 3]), 0);
    }

    #[test]
    fn test_underflow_returns_short_read() {
        let mut buffer = RingBuffer::<f32>::new(10, 1);
        buffer.push(&[0.5; 3]);

        let mut out = [-1.0f32; 5];
        assert_eq!(buffer.pull(&mut out), 3);
        assert_eq!(&out[..3], &[0.5; 3]);
        // Untouched tail
        assert_eq!(&out[3..], &[-1.0; 2]);
        assert_eq!(buffer.underrun_frames(), 2);

        assert_eq!(buffer.pull(&mut out), 0);
    }

    #[test]
    fn test_interleaved_frames() {
        let mut buffer = RingBuffer::<f32>::new(4, 2);

        // 3 stereo frames plus a dangling sample that is ignored
        assert_eq!(buffer.push(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0, 9.0]), 3);
        assert_eq!(buffer.frames_available(), 3);

        let mut out = [0.0f32; 4];
        assert_eq!(buffer.pull(&mut out), 2);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0]);

        assert_eq!(buffer.push(&[4.0, -4.0, 5.0, -5.0]), 2);
        let mut out = [0.0f32; 6];
        assert_eq!(buffer.pull(&mut out), 3);
        assert_eq!(out, [3.0, -3.0, 4.0, -4.0, 5.0, -5.0]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RingBuffer::<i16>::with_duration(16_000, 1, 10);
        assert_eq!(buffer.capacity(), 160);
        buffer.push(&[1; 100]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.push(&[1; 160]), 160);
        assert!((buffer.fill_level() - 1.0).abs() < f32::EPSILON);
    }

    proptest! {
        #[test]
        fn test_pull_returns_pushed_data(
            capacity in 1usize..64,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<i16>(), 0..64), 1..20),
        ) {
            let mut buffer = RingBuffer::<i16>::new(capacity, 1);
            for chunk in chunks {
                let chunk = &chunk[..chunk.len().min(capacity)];
                prop_assert_eq!(buffer.push(chunk), chunk.len());
                let mut out = vec![0i16; chunk.len()];
                prop_assert_eq!(buffer.pull(&mut out), chunk.len());
                prop_assert_eq!(&out[..], chunk);
            }
        }
    }
}
