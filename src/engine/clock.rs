//! Headless fixed-cadence driver for rendering contexts
//!
//! Stands in for a hardware callback: a dedicated thread that ticks a
//! context every `period`, catching up without sleeping when it falls
//! behind.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::context::{CaptureContext, PlaybackContext};
use crate::error::AudioError;

/// Owns a render thread; stops it on drop
pub struct RenderClock {
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RenderClock {
    /// Render `frames` frames every `period`, handing each block to `sink`
    pub fn spawn_playback<F>(
        mut context: PlaybackContext,
        frames: usize,
        period: Duration,
        mut sink: F,
    ) -> Result<Self, AudioError>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let mut block = vec![0.0f32; frames * context.channels().max(1) as usize];
        Self::spawn("ptt-playback", period, move || {
            context.render(&mut block);
            sink(&block);
        })
    }

    /// Capture `frames` frames every `period`, filled by `source`
    pub fn spawn_capture<F>(
        mut context: CaptureContext,
        frames: usize,
        period: Duration,
        mut source: F,
    ) -> Result<Self, AudioError>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        let mut block = vec![0.0f32; frames * context.channels().max(1) as usize];
        Self::spawn("ptt-capture", period, move || {
            source(&mut block);
            context.capture(&block);
        })
    }

    fn spawn<T>(name: &str, period: Duration, mut tick: T) -> Result<Self, AudioError>
    where
        T: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let ticks = Arc::new(AtomicU64::new(0));
        let running_for_loop = running.clone();
        let ticks_for_loop = ticks.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                while running_for_loop.load(Ordering::Relaxed) {
                    tick();
                    ticks_for_loop.fetch_add(1, Ordering::Relaxed);

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
            })
            .map_err(|e| AudioError::ThreadSpawn(e.to_string()))?;

        tracing::debug!("Render clock '{}' started with a {:?} period", name, period);
        Ok(Self {
            running,
            ticks,
            thread_handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Callbacks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for RenderClock {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PcmGateway;
    use crate::engine::{EventPoster, PlayerSettings};

    #[test]
    fn test_clock_ticks_and_stops() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let (event_tx, _event_rx) = tokio::sync::mpsc::channel(1);
        let settings = PlayerSettings {
            channels: 2,
            ring_buffer_ms: 100,
            cache_threshold_ms: 0,
        };
        let context = PlaybackContext::new(settings, Arc::new(PcmGateway), rx, EventPoster::new(event_tx));

        let (block_tx, block_rx) = crossbeam_channel::unbounded();
        let mut clock = RenderClock::spawn_playback(context, 8, Duration::from_millis(1), move |block| {
            let _ = block_tx.send(block.len());
        })
        .unwrap();

        assert_eq!(block_rx.recv_timeout(Duration::from_secs(2)).unwrap(), 16);
        clock.stop();
        assert!(!clock.is_running());
        assert!(clock.ticks() >= 1);
    }
}
