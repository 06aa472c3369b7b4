//! Orchestrator state machine
//!
//! [`PttMachine::step`] is pure: it maps the current state and one event
//! to the next state and the effects the actor must run. Effects report
//! back with further events.

use serde::{Deserialize, Serialize};

use crate::engine::PlayerSlot;
use crate::protocol::MessageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RealtimePhase {
    Playing,
    CheckingSource,
    /// Every received chunk is fed; more are expected
    WaitingPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryPhase {
    Playing,
    CheckingSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PttState {
    Idle,
    Realtime(RealtimePhase),
    RealtimeStop,
    History(HistoryPhase),
    HistoryStopping,
    StartTalk,
    Talking,
    TalkStop,
    SinglePlaying,
    SingleStopping,
}

impl PttState {
    /// Whether this is one of the exit paths
    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            PttState::RealtimeStop
                | PttState::HistoryStopping
                | PttState::TalkStop
                | PttState::SingleStopping
        )
    }

    pub fn is_talk(self) -> bool {
        matches!(self, PttState::StartTalk | PttState::Talking | PttState::TalkStop)
    }
}

impl Default for PttState {
    fn default() -> Self {
        PttState::Idle
    }
}

/// An activity that must wait for exclusive use of the audio path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    History(Vec<MessageKey>),
    Single(MessageKey),
    /// Talk request identified by its ticket
    Talk(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PttEvent {
    /// A realtime item is ready to play
    ItemQueued,
    SourceFound,
    SourceExhausted,
    /// New chunks arrived for the current item
    PayloadAvailable,
    /// The current item is fed up to what has arrived
    PayloadDrained,
    PlaybackFinished,
    PlaybackFailed(String),
    Request(Activity),
    StopPlayback,
    TalkStarted,
    TalkFailed(String),
    TalkReleased,
    /// The running exit path completed
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SelectRealtimeItem,
    LoadHistory(Vec<MessageKey>),
    SelectHistoryItem,
    SelectSingleItem(MessageKey),
    FeedCurrent,
    /// Stop and close a player, then report `Stopped`
    StopPlayer(PlayerSlot),
    OpenRecorder(u64),
    /// Stop and close the recorder, flush the talk, then report `Stopped`
    StopRecorder,
    InterruptTalk,
    /// Reject a talk request that never started
    DropTalk(u64),
    /// Re-check the realtime queue after returning to idle
    ResumeQueued,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PttMachine {
    pub state: PttState,
    /// Latest request waiting for the current exit path
    pub deferred: Option<Activity>,
}

impl PttMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, event: PttEvent) -> (Self, Vec<Effect>) {
        use PttEvent as E;
        use PttState as S;

        let mut effects = Vec::new();
        let next = match (self.state, event) {
            (S::Idle, E::ItemQueued) => {
                effects.push(Effect::SelectRealtimeItem);
                S::Realtime(RealtimePhase::CheckingSource)
            }
            (S::Idle, E::Request(activity)) => Self::begin(activity, &mut effects),
            (S::Idle, E::TalkReleased) => S::Idle,

            // Exit paths: remember the latest request, finish on Stopped
            (state, E::Request(activity)) if state.is_stopping() => {
                self.defer(activity, &mut effects);
                state
            }
            (state, E::TalkReleased) if state.is_stopping() => {
                if let Some(Activity::Talk(ticket)) = self.deferred {
                    self.deferred = None;
                    effects.push(Effect::DropTalk(ticket));
                }
                state
            }
            (state, E::Stopped) if state.is_stopping() => match self.deferred.take() {
                Some(activity) => Self::begin(activity, &mut effects),
                None => {
                    effects.push(Effect::ResumeQueued);
                    S::Idle
                }
            },

            // Realtime
            (S::Realtime(_), E::Request(activity)) => {
                self.defer(activity, &mut effects);
                effects.push(Effect::StopPlayer(PlayerSlot::Stream));
                S::RealtimeStop
            }
            (S::Realtime(_), E::StopPlayback | E::PlaybackFailed(_)) => {
                effects.push(Effect::StopPlayer(PlayerSlot::Stream));
                S::RealtimeStop
            }
            (S::Realtime(RealtimePhase::CheckingSource), E::SourceFound) => {
                effects.push(Effect::FeedCurrent);
                S::Realtime(RealtimePhase::Playing)
            }
            (S::Realtime(RealtimePhase::CheckingSource), E::SourceExhausted) => {
                effects.push(Effect::StopPlayer(PlayerSlot::Stream));
                S::RealtimeStop
            }
            (S::Realtime(RealtimePhase::Playing), E::PayloadDrained) => {
                S::Realtime(RealtimePhase::WaitingPayload)
            }
            (
                S::Realtime(RealtimePhase::Playing | RealtimePhase::WaitingPayload),
                E::PayloadAvailable,
            ) => {
                effects.push(Effect::FeedCurrent);
                S::Realtime(RealtimePhase::Playing)
            }
            (S::Realtime(RealtimePhase::Playing), E::PlaybackFinished) => {
                effects.push(Effect::SelectRealtimeItem);
                S::Realtime(RealtimePhase::CheckingSource)
            }

            // History
            (S::History(_), E::Request(activity)) => {
                self.defer(activity, &mut effects);
                effects.push(Effect::StopPlayer(PlayerSlot::History));
                S::HistoryStopping
            }
            (S::History(_), E::StopPlayback | E::PlaybackFailed(_)) => {
                effects.push(Effect::StopPlayer(PlayerSlot::History));
                S::HistoryStopping
            }
            (S::History(HistoryPhase::CheckingSource), E::SourceFound) => {
                effects.push(Effect::FeedCurrent);
                S::History(HistoryPhase::Playing)
            }
            (S::History(HistoryPhase::CheckingSource), E::SourceExhausted) => {
                effects.push(Effect::StopPlayer(PlayerSlot::History));
                S::HistoryStopping
            }
            (S::History(HistoryPhase::Playing), E::PlaybackFinished) => {
                effects.push(Effect::SelectHistoryItem);
                S::History(HistoryPhase::CheckingSource)
            }

            // Single
            (S::SinglePlaying, E::Request(activity)) => {
                self.defer(activity, &mut effects);
                effects.push(Effect::StopPlayer(PlayerSlot::Single));
                S::SingleStopping
            }
            (S::SinglePlaying, E::SourceFound) => {
                effects.push(Effect::FeedCurrent);
                S::SinglePlaying
            }
            (
                S::SinglePlaying,
                E::SourceExhausted | E::PlaybackFinished | E::PlaybackFailed(_) | E::StopPlayback,
            ) => {
                effects.push(Effect::StopPlayer(PlayerSlot::Single));
                S::SingleStopping
            }

            // Talk
            (S::StartTalk | S::Talking, E::Request(activity)) => {
                self.defer(activity, &mut effects);
                effects.push(Effect::InterruptTalk);
                effects.push(Effect::StopRecorder);
                S::TalkStop
            }
            (S::StartTalk, E::TalkStarted) => S::Talking,
            (S::StartTalk, E::TalkFailed(_)) | (S::StartTalk | S::Talking, E::TalkReleased) => {
                effects.push(Effect::StopRecorder);
                S::TalkStop
            }

            (state, _) => state,
        };

        self.state = next;
        (self, effects)
    }

    fn begin(activity: Activity, effects: &mut Vec<Effect>) -> PttState {
        match activity {
            Activity::History(keys) => {
                effects.push(Effect::LoadHistory(keys));
                effects.push(Effect::SelectHistoryItem);
                PttState::History(HistoryPhase::CheckingSource)
            }
            Activity::Single(key) => {
                effects.push(Effect::SelectSingleItem(key));
                PttState::SinglePlaying
            }
            Activity::Talk(ticket) => {
                effects.push(Effect::OpenRecorder(ticket));
                PttState::StartTalk
            }
        }
    }

    fn defer(&mut self, activity: Activity, effects: &mut Vec<Effect>) {
        if let Some(Activity::Talk(ticket)) = self.deferred.replace(activity) {
            effects.push(Effect::DropTalk(ticket));
        }
    }
}
