//! Hardware binding for the rendering contexts
//!
//! Each stream lives on its own thread, which owns the cpal stream and
//! hands the rendering context to the device callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};

use crate::engine::{CaptureContext, PlaybackContext};
use crate::error::AudioError;

/// Basic facts about an audio device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List input and output devices of the default host
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());
    let mut devices: Vec<DeviceInfo> = Vec::new();

    if let Ok(inputs) = host.input_devices() {
        for name in inputs.filter_map(|d| d.name().ok()) {
            devices.push(DeviceInfo {
                is_default: default_input.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for name in outputs.filter_map(|d| d.name().ok()) {
            let is_default = default_output.as_ref() == Some(&name);
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
            } else {
                devices.push(DeviceInfo {
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                });
            }
        }
    }

    devices
}

fn find_device(name: Option<&str>, input: bool) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let Some(name) = name else {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| AudioError::DeviceNotFound("no default device".into()));
    };

    let devices = if input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// A running device stream; stops when dropped
pub struct DeviceStream {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl DeviceStream {
    /// Drive `context` from an output device
    pub fn output(
        device_name: Option<&str>,
        mut context: PlaybackContext,
        sample_rate: u32,
        callback_frames: u32,
    ) -> Result<Self, AudioError> {
        let device = find_device(device_name, false)?;
        let config = stream_config(context.channels(), sample_rate, callback_frames);

        Self::spawn("ptt-output", move |errors| {
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| context.render(data),
                    move |err| {
                        let _ = errors.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })
    }

    /// Drive `context` from an input device
    pub fn input(
        device_name: Option<&str>,
        mut context: CaptureContext,
        sample_rate: u32,
        callback_frames: u32,
    ) -> Result<Self, AudioError> {
        let device = find_device(device_name, true)?;
        let config = stream_config(context.channels(), sample_rate, callback_frames);

        Self::spawn("ptt-input", move |errors| {
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| context.capture(data),
                    move |err| {
                        let _ = errors.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })
    }

    fn spawn<B>(name: &str, build: B) -> Result<Self, AudioError>
    where
        B: FnOnce(crossbeam_channel::Sender<AudioError>) -> Result<cpal::Stream, AudioError>
            + Send
            + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build(error_tx).and_then(|stream| {
                    stream
                        .play()
                        .map(|_| stream)
                        .map_err(|e| AudioError::StreamError(e.to_string()))
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::ThreadSpawn(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("stream thread exited".into()))?;
        let mut stream = Self {
            running,
            thread_handle: Some(handle),
            error_rx,
        };
        if let Err(e) = ready {
            stream.stop();
            return Err(e);
        }
        tracing::info!("Audio stream '{}' running", name);
        Ok(stream)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next error reported by the device, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_config(channels: u16, sample_rate: u32, callback_frames: u32) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: if callback_frames > 0 {
            cpal::BufferSize::Fixed(callback_frames)
        } else {
            cpal::BufferSize::Default
        },
    }
}
