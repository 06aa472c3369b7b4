//! Rendering contexts
//!
//! A context is owned by exactly one audio thread. It drains its command
//! queue at the top of every callback, then runs its engines.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::message::{EventPoster, PlayerCommand, PlayerRequest, RecorderRequest};
use super::player::{PlayerEngine, PlayerSettings};
use super::recorder::{RecorderEngine, RecorderSettings, TransferProbe};
use super::{PlayerSlot, PlayerState, RecorderState};
use crate::codec::{CodecContext, CodecGateway};
use crate::constants::PLAYER_SLOTS;

/// Output-side context: every player slot plus the mixer
pub struct PlaybackContext {
    players: Vec<PlayerEngine>,
    attached: [bool; PLAYER_SLOTS],
    commands: Receiver<PlayerCommand>,
    codec: CodecContext,
    channels: u16,
    scratch: Vec<f32>,
}

impl PlaybackContext {
    pub fn new(
        settings: PlayerSettings,
        gateway: Arc<dyn CodecGateway>,
        commands: Receiver<PlayerCommand>,
        poster: EventPoster,
    ) -> Self {
        let channels = settings.channels;
        let players = PlayerSlot::ALL
            .iter()
            .map(|&slot| PlayerEngine::new(slot, settings.clone(), poster.clone()))
            .collect();

        Self {
            players,
            attached: [false; PLAYER_SLOTS],
            commands,
            codec: CodecContext::new(gateway),
            channels,
            scratch: Vec::new(),
        }
    }

    /// Interleaved output channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn player_state(&self, slot: PlayerSlot) -> PlayerState {
        self.players[slot.index()].state()
    }

    pub fn player(&self, slot: PlayerSlot) -> &PlayerEngine {
        &self.players[slot.index()]
    }

    pub fn is_attached(&self, slot: PlayerSlot) -> bool {
        self.attached[slot.index()]
    }

    /// Apply queued commands without rendering
    pub fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let index = command.slot.index();
            match command.request {
                PlayerRequest::AttachSource => self.attached[index] = true,
                PlayerRequest::DetachSource => self.attached[index] = false,
                request => self.players[index].handle(request, &mut self.codec),
            }
        }
    }

    /// Output callback: fill `out` with the mix of attached, started players
    pub fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();

        out.fill(0.0);
        if self.scratch.len() < out.len() {
            self.scratch.resize(out.len(), 0.0);
        }
        let scratch = &mut self.scratch[..out.len()];

        for (index, player) in self.players.iter_mut().enumerate() {
            let active = player.render(scratch);
            if active && self.attached[index] {
                for (mixed, sample) in out.iter_mut().zip(scratch.iter()) {
                    *mixed += *sample;
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }
}

/// Input-side context: the recorder
pub struct CaptureContext {
    recorder: RecorderEngine,
    commands: Receiver<RecorderRequest>,
    codec: CodecContext,
    channels: u16,
}

impl CaptureContext {
    pub fn new(
        settings: RecorderSettings,
        gateway: Arc<dyn CodecGateway>,
        commands: Receiver<RecorderRequest>,
        poster: EventPoster,
        probe: Box<dyn TransferProbe>,
    ) -> Self {
        let channels = settings.channels;
        Self {
            recorder: RecorderEngine::new(settings, poster, probe),
            commands,
            codec: CodecContext::new(gateway),
            channels,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.recorder.state()
    }

    /// Input callback with interleaved `f32` samples
    pub fn capture(&mut self, input: &[f32]) {
        while let Ok(request) = self.commands.try_recv() {
            self.recorder.handle(request, &mut self.codec);
        }
        self.recorder.capture(input);
    }
}
