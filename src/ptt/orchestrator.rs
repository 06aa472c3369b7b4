//! The PTT orchestrator actor
//!
//! One task owns every piece of playback and talk state. Host calls are
//! turned into commands, engine upcalls arrive as [`AudioEvent`]s and
//! reassembly deadlines come from the [`Scheduler`]. Each input is mapped
//! to machine events; [`PttMachine::step`] decides the next state and the
//! effects, which run here against the [`AudioFacade`] and may report
//! back with further events.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use super::events::{PlayIndication, PlayState, PttListener};
use super::item::AudioItem;
use super::queue::PlayQueue;
use super::reassembly::{Assembly, Reassembler};
use super::scheduler::{Fired, Scheduler};
use super::state::{Activity, Effect, PttEvent, PttMachine, PttState};
use super::talk::{TalkSession, TalkSummary};
use crate::config::AppConfig;
use crate::engine::{PlayerSlot, PlayerState, RecorderState};
use crate::error::{EngineError, PttError};
use crate::facade::{AudioEvent, AudioFacade};
use crate::protocol::{MessageKey, PttFragment};
use crate::store::{MessageStore, StoreResult, StoredMessage};

type TalkReply = oneshot::Sender<Result<TalkSummary, PttError>>;

/// Orchestrator parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PttSettings {
    pub sample_rate: u32,
    pub bit_rate: Option<u32>,
    pub talk_batch_frames: usize,
    pub reassembly_timeout: Duration,
    pub default_priority: u8,
    pub recent_completed: usize,
}

impl PttSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sample_rate: config.audio.sample_rate,
            bit_rate: config.audio.bit_rate,
            talk_batch_frames: config.ptt.talk_batch_frames,
            reassembly_timeout: config.ptt.reassembly_timeout(),
            default_priority: config.ptt.default_priority,
            recent_completed: config.ptt.recent_completed,
        }
    }
}

enum Command {
    Fragment(PttFragment),
    PlayHistory(Vec<MessageKey>),
    PlaySingle(MessageKey),
    StopPlayback,
    Talk(TalkReply),
    ReleaseTalk,
    SetMuted {
        session_id: String,
        muted: bool,
        reply: oneshot::Sender<StoreResult<()>>,
    },
    Shutdown(oneshot::Sender<()>),
}

enum Input {
    Command(Command),
    Timer(Fired<MessageKey>),
    Audio(AudioEvent),
    AudioClosed,
}

/// Handle to the orchestrator task
///
/// Cheap to clone. The task exits after [`PttOrchestrator::shutdown`] or
/// once every handle is dropped.
#[derive(Clone)]
pub struct PttOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PttState>,
}

impl PttOrchestrator {
    /// Spawn the orchestrator task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        facade: AudioFacade,
        audio_events: mpsc::UnboundedReceiver<AudioEvent>,
        store: Arc<dyn MessageStore>,
        listener: Arc<dyn PttListener>,
        settings: PttSettings,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PttState::Idle);
        let actor = Actor::new(
            facade,
            audio_events,
            store,
            listener,
            settings,
            commands_rx,
            state_tx,
        );
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Current orchestrator state
    pub fn state(&self) -> PttState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<PttState> {
        self.state.clone()
    }

    /// Deliver one incoming fragment
    pub fn on_message(&self, fragment: PttFragment) -> Result<(), PttError> {
        self.send(Command::Fragment(fragment))
    }

    /// Play stored messages in order
    pub fn play_history(&self, keys: Vec<MessageKey>) -> Result<(), PttError> {
        self.send(Command::PlayHistory(keys))
    }

    pub fn play_single(&self, key: MessageKey) -> Result<(), PttError> {
        self.send(Command::PlaySingle(key))
    }

    /// Stop whatever is currently playing
    pub fn stop_playback(&self) -> Result<(), PttError> {
        self.send(Command::StopPlayback)
    }

    /// Talk until [`release_talk`](Self::release_talk)
    ///
    /// Resolves once the talk is over and its last packet was emitted.
    pub async fn talk(&self) -> Result<TalkSummary, PttError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Talk(tx))?;
        rx.await.map_err(|_| PttError::Shutdown)?
    }

    pub fn release_talk(&self) -> Result<(), PttError> {
        self.send(Command::ReleaseTalk)
    }

    /// Mute or unmute a session; unmuting resumes its parked messages
    pub async fn set_session_muted(
        &self,
        session_id: impl Into<String>,
        muted: bool,
    ) -> Result<(), PttError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetMuted {
            session_id: session_id.into(),
            muted,
            reply: tx,
        })?;
        rx.await.map_err(|_| PttError::Shutdown)?
    }

    /// Stop all activity and end the task
    pub async fn shutdown(&self) -> Result<(), PttError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| PttError::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), PttError> {
        self.commands.send(command).map_err(|_| PttError::Shutdown)
    }
}

struct Actor {
    machine: PttMachine,
    facade: AudioFacade,
    store: Arc<dyn MessageStore>,
    listener: Arc<dyn PttListener>,
    settings: PttSettings,
    queue: PlayQueue,
    /// Item loaded into a player
    current: Option<AudioItem>,
    history: VecDeque<MessageKey>,
    reassembler: Reassembler,
    timers: Scheduler<MessageKey, Fired<MessageKey>>,
    talk: Option<TalkSession>,
    talk_waiters: HashMap<u64, TalkReply>,
    next_ticket: u64,
    next_sequence: u32,
    /// Machine events raised while running effects
    events: VecDeque<PttEvent>,
    state_tx: watch::Sender<PttState>,
    commands: mpsc::UnboundedReceiver<Command>,
    timer_rx: mpsc::UnboundedReceiver<Fired<MessageKey>>,
    audio_events: mpsc::UnboundedReceiver<AudioEvent>,
    audio_open: bool,
}

impl Actor {
    fn new(
        facade: AudioFacade,
        audio_events: mpsc::UnboundedReceiver<AudioEvent>,
        store: Arc<dyn MessageStore>,
        listener: Arc<dyn PttListener>,
        settings: PttSettings,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<PttState>,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            machine: PttMachine::new(),
            facade,
            store,
            listener,
            reassembler: Reassembler::new(settings.recent_completed),
            settings,
            queue: PlayQueue::new(),
            current: None,
            history: VecDeque::new(),
            timers: Scheduler::new(timer_tx, |fired| fired),
            talk: None,
            talk_waiters: HashMap::new(),
            next_ticket: 1,
            next_sequence: 1,
            events: VecDeque::new(),
            state_tx,
            commands,
            timer_rx,
            audio_events,
            audio_open: true,
        }
    }

    async fn run(mut self) {
        tracing::info!("PTT orchestrator started");

        loop {
            let input = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => break,
                },
                Some(fired) = self.timer_rx.recv() => Input::Timer(fired),
                event = self.audio_events.recv(), if self.audio_open => match event {
                    Some(event) => Input::Audio(event),
                    None => Input::AudioClosed,
                },
            };

            match input {
                Input::Command(command) => {
                    if self.handle_command(command).await.is_break() {
                        tracing::info!("PTT orchestrator shut down");
                        return;
                    }
                }
                Input::Timer(fired) => self.handle_timeout(fired).await,
                Input::Audio(event) => {
                    self.handle_audio_event(event);
                    self.drive().await;
                }
                Input::AudioClosed => {
                    tracing::warn!("Audio event channel closed");
                    self.audio_open = false;
                }
            }
        }

        tracing::info!("All orchestrator handles dropped");
        self.teardown().await;
    }

    async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Fragment(fragment) => self.handle_fragment(fragment).await,
            Command::PlayHistory(keys) => {
                self.events.push_back(PttEvent::Request(Activity::History(keys)))
            }
            Command::PlaySingle(key) => {
                self.events.push_back(PttEvent::Request(Activity::Single(key)))
            }
            Command::StopPlayback => self.events.push_back(PttEvent::StopPlayback),
            Command::Talk(reply) => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                self.talk_waiters.insert(ticket, reply);
                self.events.push_back(PttEvent::Request(Activity::Talk(ticket)));
            }
            Command::ReleaseTalk => self.events.push_back(PttEvent::TalkReleased),
            Command::SetMuted {
                session_id,
                muted,
                reply,
            } => {
                let result = self.store.set_session_muted(&session_id, muted).await;
                if result.is_ok() && !muted {
                    let restored = self.queue.restore_session(&session_id);
                    if restored > 0 {
                        tracing::debug!("Restored {} parked items of {}", restored, session_id);
                        self.events.push_back(PttEvent::ItemQueued);
                    }
                }
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                self.teardown().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        self.drive().await;
        ControlFlow::Continue(())
    }

    async fn handle_fragment(&mut self, fragment: PttFragment) {
        let key = fragment.key.clone();
        let assembly = self.reassembler.accept(&fragment);
        let (is_new, completed) = match assembly {
            Assembly::Ignored => return,
            Assembly::Started => {
                self.timers.schedule(key.clone(), self.settings.reassembly_timeout);
                (true, false)
            }
            Assembly::Continued => {
                self.timers.schedule(key.clone(), self.settings.reassembly_timeout);
                (false, false)
            }
            Assembly::Completed { message, started } => {
                self.timers.cancel(&key);
                self.persist(message).await;
                (started, true)
            }
        };

        if self.is_current_realtime(&key) {
            if let Some(current) = self.current.as_mut() {
                current.push_chunk(fragment.payload);
                if completed {
                    current.mark_completed();
                }
            }
            self.events.push_back(PttEvent::PayloadAvailable);
        } else if let Some(item) = self.queue.get_mut(&key) {
            item.push_chunk(fragment.payload);
            if completed {
                self.queue.complete(&key);
            }
        } else if is_new {
            let priority = fragment.priority.max(self.settings.default_priority);
            let mut item = AudioItem::new(key.clone(), PlayerSlot::Stream, priority);
            item.push_chunk(fragment.payload);
            if completed {
                item.mark_completed();
            }
            tracing::debug!("Queued {} at priority {}", key, priority);
            self.queue.insert(item);
            self.events.push_back(PttEvent::ItemQueued);
        } else {
            tracing::debug!("{} is no longer playable, storing only", key);
        }
    }

    async fn handle_timeout(&mut self, fired: Fired<MessageKey>) {
        if !self.timers.fired(&fired) {
            return;
        }
        let Some(message) = self.reassembler.force_complete(&fired.key) else {
            return;
        };
        tracing::warn!(
            "{} timed out after {} chunks, completing",
            fired.key,
            message.chunks.len()
        );
        self.persist(message).await;

        if self.is_current_realtime(&fired.key) {
            if let Some(current) = self.current.as_mut() {
                current.mark_completed();
            }
            self.events.push_back(PttEvent::PayloadAvailable);
        } else {
            self.queue.complete(&fired.key);
        }
        self.drive().await;
    }

    fn handle_audio_event(&mut self, event: AudioEvent) {
        match event {
            AudioEvent::FinishPlay { slot } => {
                let ours = self
                    .current
                    .as_ref()
                    .map_or(false, |item| item.slot == slot && item.awaits_finish());
                if ours {
                    self.events.push_back(PttEvent::PlaybackFinished);
                } else {
                    tracing::debug!("Ignoring stale finish-play of {} player", slot);
                }
            }
            AudioEvent::OpusCodedData { frames } => {
                let Some(session) = self.talk.as_mut() else {
                    tracing::debug!("Dropping {} coded frames outside a talk", frames.len());
                    return;
                };
                for frame in frames {
                    match session.push_frame(frame) {
                        Ok(Some(packet)) => self.listener.on_record_packet(packet),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Dropping captured frame: {}", e),
                    }
                }
            }
        }
    }

    /// Run queued machine events to completion
    async fn drive(&mut self) {
        while let Some(event) = self.events.pop_front() {
            let previous = self.machine.state;
            let (machine, effects) = std::mem::take(&mut self.machine).step(event);
            self.machine = machine;

            if self.machine.state != previous {
                tracing::info!("PTT state: {:?} -> {:?}", previous, self.machine.state);
                self.state_tx.send_replace(self.machine.state);
            }
            for effect in effects {
                self.execute(effect).await;
            }
        }
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::SelectRealtimeItem => {
                self.finish_current();
                match self.queue.next_playing_item(self.store.as_ref()).await {
                    Some(item) => self.load(item).await,
                    None => self.events.push_back(PttEvent::SourceExhausted),
                }
            }
            Effect::LoadHistory(keys) => self.history = keys.into(),
            Effect::SelectHistoryItem => {
                self.finish_current();
                match self.next_history_item().await {
                    Some(item) => self.load(item).await,
                    None => self.events.push_back(PttEvent::SourceExhausted),
                }
            }
            Effect::SelectSingleItem(key) => match self.fetch(&key).await {
                Some(message) => {
                    self.load(AudioItem::from_stored(message, PlayerSlot::Single))
                        .await
                }
                None => {
                    tracing::warn!("{}", PttError::MessageNotFound(key));
                    self.events.push_back(PttEvent::SourceExhausted);
                }
            },
            Effect::FeedCurrent => self.feed_current(),
            Effect::StopPlayer(slot) => {
                self.finish_current();
                self.stop_player(slot).await;
                self.discard_finish(slot);
                self.events.push_back(PttEvent::Stopped);
            }
            Effect::OpenRecorder(ticket) => self.open_recorder(ticket).await,
            Effect::StopRecorder => {
                self.stop_recorder().await;
                self.events.push_back(PttEvent::Stopped);
            }
            Effect::InterruptTalk => {
                if let Some(session) = self.talk.as_mut() {
                    session.interrupt();
                }
            }
            Effect::DropTalk(ticket) => {
                if let Some(reply) = self.talk_waiters.remove(&ticket) {
                    let _ = reply.send(Err(PttError::TalkInterrupted));
                }
            }
            Effect::ResumeQueued => {
                if !self.queue.is_empty() {
                    self.events.push_back(PttEvent::ItemQueued);
                }
            }
        }
    }

    /// Hand an item to its player and announce it
    async fn load(&mut self, item: AudioItem) {
        let key = item.key.clone();
        let slot = item.slot;
        self.indicate(&key, slot, PlayState::Start);

        match self.ensure_player(slot).await {
            Ok(()) => {
                self.indicate(&key, slot, PlayState::Playing);
                self.current = Some(item);
                self.events.push_back(PttEvent::SourceFound);
            }
            Err(e) => {
                tracing::error!("Failed to start {} player for {}: {}", slot, key, e);
                self.indicate(&key, slot, PlayState::End);
                self.events.push_back(PttEvent::PlaybackFailed(e.to_string()));
            }
        }
    }

    /// Bring a slot to `Started` with an empty buffer
    async fn ensure_player(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        let state = self.facade.player_state(slot);
        match state {
            PlayerState::Started => return self.facade.clear_current(slot),
            PlayerState::Stopped => self.facade.clear_current(slot)?,
            PlayerState::Paused => {
                self.facade.stop_player(slot).await?;
                self.facade.clear_current(slot)?;
            }
            PlayerState::Closed => {
                self.facade
                    .open_player(slot, self.settings.sample_rate)
                    .await?
            }
            _ => {
                tracing::warn!("{} player stuck in {}, reopening", slot, state);
                self.facade.close_player(slot).await?;
                self.facade
                    .open_player(slot, self.settings.sample_rate)
                    .await?;
            }
        }
        self.facade.start_player(slot).await
    }

    fn feed_current(&mut self) {
        let Some(item) = self.current.as_mut() else {
            return;
        };
        let slot = item.slot;

        let bundle = item.take_pending();
        if !bundle.is_empty() {
            if let Err(e) = self.facade.put_data(slot, bundle) {
                self.events.push_back(PttEvent::PlaybackFailed(e.to_string()));
                return;
            }
        }

        if item.needs_end() {
            if let Err(e) = self.facade.end_data(slot) {
                self.events.push_back(PttEvent::PlaybackFailed(e.to_string()));
                return;
            }
            item.mark_end_sent();
        } else if !item.is_completed() {
            self.events.push_back(PttEvent::PayloadDrained);
        }
    }

    async fn stop_player(&self, slot: PlayerSlot) {
        let state = self.facade.player_state(slot);
        if matches!(state, PlayerState::Started | PlayerState::Paused) {
            if let Err(e) = self.facade.stop_player(slot).await {
                tracing::warn!("Failed to stop {} player: {}", slot, e);
            }
        }
        if self.facade.player_state(slot) != PlayerState::Closed {
            if let Err(e) = self.facade.close_player(slot).await {
                tracing::warn!("Failed to close {} player: {}", slot, e);
            }
        }
    }

    /// Drop finish-play events the stopped player posted before its stop
    ///
    /// Engine messages are ordered, so anything the player sent ahead of the
    /// stop response is already queued here.
    fn discard_finish(&mut self, stopped: PlayerSlot) {
        while let Ok(event) = self.audio_events.try_recv() {
            match event {
                AudioEvent::FinishPlay { slot } if slot == stopped => {
                    tracing::debug!("Discarding finish-play of stopped {} player", slot);
                }
                event => self.handle_audio_event(event),
            }
        }
    }

    async fn open_recorder(&mut self, ticket: u64) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let mut session = TalkSession::new(sequence, self.settings.talk_batch_frames, ticket);
        tracing::info!("Talk {} starting", sequence);

        match self.start_recorder().await {
            Ok(()) => {
                self.talk = Some(session);
                self.events.push_back(PttEvent::TalkStarted);
            }
            Err(e) => {
                tracing::error!("Talk {} could not start: {}", sequence, e);
                session.fail(e.to_string());
                self.talk = Some(session);
                self.events.push_back(PttEvent::TalkFailed(e.to_string()));
            }
        }
    }

    async fn start_recorder(&self) -> Result<(), EngineError> {
        if self.facade.recorder_state() != RecorderState::Closed {
            self.facade.close_recorder().await?;
        }
        self.facade
            .open_recorder(self.settings.sample_rate, self.settings.bit_rate)
            .await?;
        self.facade.start_recorder().await
    }

    /// Stop capture, flush the last packet and resolve the talk
    async fn stop_recorder(&mut self) {
        if self.facade.recorder_state() == RecorderState::Started {
            if let Err(e) = self.facade.stop_recorder().await {
                tracing::warn!("Failed to stop recorder: {}", e);
            }
        }
        if self.facade.recorder_state() != RecorderState::Closed {
            if let Err(e) = self.facade.close_recorder().await {
                tracing::warn!("Failed to close recorder: {}", e);
            }
        }

        // Coded data posted before the stop response is already queued
        while let Ok(event) = self.audio_events.try_recv() {
            self.handle_audio_event(event);
        }

        let Some(mut session) = self.talk.take() else {
            return;
        };
        match session.finish() {
            Ok(Some(packet)) => self.listener.on_record_packet(packet),
            Ok(None) => {}
            Err(e) => tracing::warn!("Dropping last packet of talk {}: {}", session.sequence(), e),
        }

        let result = if let Some(reason) = session.failure() {
            Err(PttError::TalkFailed(reason.to_string()))
        } else if session.is_interrupted() {
            Err(PttError::TalkInterrupted)
        } else {
            Ok(session.summary())
        };
        let summary = session.summary();
        tracing::info!(
            "Talk {} ended: {} frames in {} packets",
            summary.sequence,
            summary.frames,
            summary.packets
        );

        if let Some(reply) = self.talk_waiters.remove(&session.ticket()) {
            let _ = reply.send(result);
        }
    }

    /// Announce the end of the current item
    fn finish_current(&mut self) {
        if let Some(item) = self.current.take() {
            self.indicate(&item.key, item.slot, PlayState::End);
        }
    }

    async fn next_history_item(&mut self) -> Option<AudioItem> {
        while let Some(key) = self.history.pop_front() {
            match self.fetch(&key).await {
                Some(message) => return Some(AudioItem::from_stored(message, PlayerSlot::History)),
                None => tracing::warn!("Skipping history entry: {}", PttError::MessageNotFound(key)),
            }
        }
        None
    }

    async fn fetch(&self, key: &MessageKey) -> Option<StoredMessage> {
        match self.store.get_message(key).await {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to load {}: {}", key, e);
                None
            }
        }
    }

    async fn persist(&self, message: StoredMessage) {
        let key = message.key.clone();
        if let Err(e) = self.store.put_message(message).await {
            tracing::warn!("Failed to store {}: {}", key, e);
        }
    }

    fn is_current_realtime(&self, key: &MessageKey) -> bool {
        self.current
            .as_ref()
            .map_or(false, |item| item.slot == PlayerSlot::Stream && &item.key == key)
    }

    fn indicate(&self, key: &MessageKey, source: PlayerSlot, state: PlayState) {
        self.listener.on_play_indication(PlayIndication {
            key: key.clone(),
            source,
            state,
        });
    }

    async fn teardown(&mut self) {
        self.finish_current();
        for slot in PlayerSlot::ALL {
            self.stop_player(slot).await;
        }
        if self.talk.is_some() {
            self.stop_recorder().await;
        } else if self.facade.recorder_state() != RecorderState::Closed {
            if let Err(e) = self.facade.close_recorder().await {
                tracing::warn!("Failed to close recorder: {}", e);
            }
        }

        for (_, reply) in self.talk_waiters.drain() {
            let _ = reply.send(Err(PttError::Shutdown));
        }
        self.timers.cancel_all();
        self.queue.clear();
        self.history.clear();
        self.events.clear();
        self.machine = PttMachine::new();
        self.state_tx.send_replace(PttState::Idle);
    }
}
