//! Control-side lifecycle API for the rendering-context engines
//!
//! Every lifecycle call validates the mirrored engine state, moves it to
//! the transitional state, sends the request and waits for the matching
//! response under a deadline. A response nobody waits for anymore is
//! ignored.

pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::FacadeConfig;
use crate::constants::PLAYER_SLOTS;
use crate::engine::{
    EngineMessage, EngineTarget, Operation, PlayerCommand, PlayerRequest, PlayerSlot, PlayerState,
    RecorderRequest, RecorderState, ResponseId,
};
use crate::error::EngineError;
use crate::protocol::FrameBundle;

pub use pending::PendingRequests;

/// Upward events from the engines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A player drained all data after end-of-data
    FinishPlay { slot: PlayerSlot },
    /// Frames encoded during one capture callback
    OpusCodedData { frames: Vec<Bytes> },
}

impl AudioEvent {
    /// Stable event id
    pub fn id(&self) -> &'static str {
        match self {
            AudioEvent::FinishPlay { .. } => "finish-play",
            AudioEvent::OpusCodedData { .. } => "opus-coded-data-indication",
        }
    }
}

struct Inner {
    player_tx: Sender<PlayerCommand>,
    recorder_tx: Sender<RecorderRequest>,
    players: Mutex<[PlayerState; PLAYER_SLOTS]>,
    attached: Mutex<[bool; PLAYER_SLOTS]>,
    recorder: Mutex<RecorderState>,
    pending: Arc<Mutex<PendingRequests>>,
    timeout: Duration,
}

/// Cheap to clone; all clones share one set of engines
#[derive(Clone)]
pub struct AudioFacade {
    inner: Arc<Inner>,
}

impl AudioFacade {
    /// Create the facade and spawn its response dispatcher
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &FacadeConfig,
        player_tx: Sender<PlayerCommand>,
        recorder_tx: Sender<RecorderRequest>,
        events: mpsc::Receiver<EngineMessage>,
        audio_tx: mpsc::UnboundedSender<AudioEvent>,
    ) -> Self {
        let pending = Arc::new(Mutex::new(PendingRequests::new()));
        tokio::spawn(dispatch(events, pending.clone(), audio_tx));

        Self {
            inner: Arc::new(Inner {
                player_tx,
                recorder_tx,
                players: Mutex::new([PlayerState::Closed; PLAYER_SLOTS]),
                attached: Mutex::new([false; PLAYER_SLOTS]),
                recorder: Mutex::new(RecorderState::Closed),
                pending,
                timeout: config.request_timeout(),
            }),
        }
    }

    pub fn player_state(&self, slot: PlayerSlot) -> PlayerState {
        self.inner.players.lock()[slot.index()]
    }

    pub fn recorder_state(&self) -> RecorderState {
        *self.inner.recorder.lock()
    }

    /// Whether the slot's output is currently routed to the mixer
    pub fn is_source_attached(&self, slot: PlayerSlot) -> bool {
        self.inner.attached.lock()[slot.index()]
    }

    /// Lifecycle requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub async fn open_player(&self, slot: PlayerSlot, sample_rate: u32) -> Result<(), EngineError> {
        self.player_lifecycle(slot, Operation::Open, PlayerRequest::Open { sample_rate })
            .await
    }

    pub async fn start_player(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.player_lifecycle(slot, Operation::Start, PlayerRequest::Start).await
    }

    pub async fn pause_player(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.player_lifecycle(slot, Operation::Pause, PlayerRequest::Pause).await
    }

    pub async fn resume_player(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.player_lifecycle(slot, Operation::Resume, PlayerRequest::Resume).await
    }

    pub async fn stop_player(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.player_lifecycle(slot, Operation::Stop, PlayerRequest::Stop).await
    }

    pub async fn close_player(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.player_lifecycle(slot, Operation::Close, PlayerRequest::Close).await
    }

    /// Queue encoded frames for a player
    pub fn put_data(&self, slot: PlayerSlot, bundle: FrameBundle) -> Result<(), EngineError> {
        self.send_player(slot, PlayerRequest::PutData(bundle))
    }

    /// Signal that no more data follows for the current item
    pub fn end_data(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.send_player(slot, PlayerRequest::EndData)
    }

    /// Drop buffered audio so the slot can continue with a new item
    pub fn clear_current(&self, slot: PlayerSlot) -> Result<(), EngineError> {
        self.send_player(slot, PlayerRequest::ClearCurrent)
    }

    pub async fn open_recorder(&self, sample_rate: u32, bit_rate: Option<u32>) -> Result<(), EngineError> {
        self.recorder_lifecycle(
            Operation::Open,
            RecorderRequest::Open {
                sample_rate,
                bit_rate,
            },
        )
        .await
    }

    pub async fn start_recorder(&self) -> Result<(), EngineError> {
        self.recorder_lifecycle(Operation::Start, RecorderRequest::Start).await
    }

    pub async fn stop_recorder(&self) -> Result<(), EngineError> {
        self.recorder_lifecycle(Operation::Stop, RecorderRequest::Stop).await
    }

    pub async fn close_recorder(&self) -> Result<(), EngineError> {
        self.recorder_lifecycle(Operation::Close, RecorderRequest::Close).await
    }

    fn send_player(&self, slot: PlayerSlot, request: PlayerRequest) -> Result<(), EngineError> {
        let name = request.name();
        self.inner
            .player_tx
            .try_send(PlayerCommand::new(slot, request))
            .map_err(|e| {
                let error = queue_error(e);
                tracing::warn!("Failed to send {} to {} player: {}", name, slot, error);
                error
            })
    }

    fn set_attached(&self, slot: PlayerSlot, attached: bool) -> Result<(), EngineError> {
        let request = if attached {
            PlayerRequest::AttachSource
        } else {
            PlayerRequest::DetachSource
        };
        self.send_player(slot, request)?;
        self.inner.attached.lock()[slot.index()] = attached;
        Ok(())
    }

    async fn player_lifecycle(
        &self,
        slot: PlayerSlot,
        operation: Operation,
        request: PlayerRequest,
    ) -> Result<(), EngineError> {
        let id = ResponseId::new(EngineTarget::Player(slot), operation);
        let previous = {
            let mut players = self.inner.players.lock();
            let state = players[slot.index()];
            if !state.accepts(operation) {
                return Err(EngineError::InvalidState {
                    target: id.target,
                    operation,
                    state: state.to_string(),
                });
            }
            players[slot.index()] = PlayerState::transitional(operation);
            state
        };
        tracing::debug!("{} player: {} -> {}", slot, previous, PlayerState::transitional(operation));

        let sent = if matches!(operation, Operation::Start | Operation::Resume) {
            self.set_attached(slot, true)
        } else {
            Ok(())
        };
        let response = match sent {
            Ok(()) => self.request(id, || self.send_player(slot, request)).await,
            Err(e) => Err(e),
        };

        let response = match response {
            Ok(response) => response,
            Err(e @ (EngineError::QueueFull | EngineError::Disconnected)) => {
                // Nothing reached the engine
                self.inner.players.lock()[slot.index()] = previous;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let settled = PlayerState::settled(operation, response.success);
        self.inner.players.lock()[slot.index()] = settled;
        tracing::debug!("{} player: {}", slot, settled);

        let leaves_started = response.success
            && matches!(operation, Operation::Pause | Operation::Stop | Operation::Close);
        let failed_to_start =
            !response.success && matches!(operation, Operation::Start | Operation::Resume);
        if leaves_started || failed_to_start {
            if let Err(e) = self.set_attached(slot, false) {
                tracing::warn!("Could not detach {} player: {}", slot, e);
            }
        }

        into_result(response)
    }

    async fn recorder_lifecycle(
        &self,
        operation: Operation,
        request: RecorderRequest,
    ) -> Result<(), EngineError> {
        let id = ResponseId::new(EngineTarget::Recorder, operation);
        let previous = {
            let mut recorder = self.inner.recorder.lock();
            let state = *recorder;
            if !state.accepts(operation) {
                return Err(EngineError::InvalidState {
                    target: id.target,
                    operation,
                    state: state.to_string(),
                });
            }
            *recorder = RecorderState::transitional(operation);
            state
        };

        let response = match self
            .request(id, || {
                self.inner
                    .recorder_tx
                    .try_send(request)
                    .map_err(queue_error)
            })
            .await
        {
            Ok(response) => response,
            Err(e @ (EngineError::QueueFull | EngineError::Disconnected)) => {
                *self.inner.recorder.lock() = previous;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let settled = RecorderState::settled(operation, response.success);
        *self.inner.recorder.lock() = settled;
        tracing::debug!("Recorder: {}", settled);
        into_result(response)
    }

    /// Register a waiter, send, and await the response under the deadline
    async fn request<S>(&self, id: ResponseId, send: S) -> Result<crate::engine::EngineResponse, EngineError>
    where
        S: FnOnce() -> Result<(), EngineError>,
    {
        let (serial, rx) = self.inner.pending.lock().register(id);
        if let Err(e) = send() {
            self.inner.pending.lock().expire(id, serial);
            return Err(e);
        }

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Disconnected),
            Err(_) => {
                self.inner.pending.lock().expire(id, serial);
                let ms = self.inner.timeout.as_millis() as u64;
                tracing::warn!("{} timed out after {} ms", id, ms);
                Err(EngineError::Timeout(id, ms))
            }
        }
    }
}

fn queue_error<T>(error: TrySendError<T>) -> EngineError {
    match error {
        TrySendError::Full(_) => EngineError::QueueFull,
        TrySendError::Disconnected(_) => EngineError::Disconnected,
    }
}

fn into_result(response: crate::engine::EngineResponse) -> Result<(), EngineError> {
    if response.success {
        Ok(())
    } else {
        Err(EngineError::Rejected(
            response.id,
            response.error.unwrap_or_else(|| "unknown error".into()),
        ))
    }
}

/// Route engine messages to waiters and upward listeners
async fn dispatch(
    mut events: mpsc::Receiver<EngineMessage>,
    pending: Arc<Mutex<PendingRequests>>,
    audio_tx: mpsc::UnboundedSender<AudioEvent>,
) {
    while let Some(message) = events.recv().await {
        match message {
            EngineMessage::Response(response) => {
                let id = response.id;
                if !pending.lock().resolve(response) {
                    tracing::debug!("Ignoring {} with no pending request", id);
                }
            }
            EngineMessage::FinishPlay { slot } => {
                let _ = audio_tx.send(AudioEvent::FinishPlay { slot });
            }
            EngineMessage::DataIndication(data) => match data.into_bundle() {
                Ok(bundle) => {
                    let _ = audio_tx.send(AudioEvent::OpusCodedData {
                        frames: bundle.into_frames(),
                    });
                }
                Err(e) => tracing::warn!("Dropping malformed data indication: {}", e),
            },
        }
    }

    tracing::debug!("Engine event queue closed");
    pending.lock().fail_all(EngineError::Disconnected);
}
