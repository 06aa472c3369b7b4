//! End-to-end flows on headless render clocks with the PCM codec

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use ptt_audio_engine::codec::PcmGateway;
use ptt_audio_engine::engine::{build_engine, PlayerSlot, RenderClock};
use ptt_audio_engine::error::PttError;
use ptt_audio_engine::protocol::{encode_frames, Marker, MessageKey, PttFragment, TalkPacket};
use ptt_audio_engine::ptt::{
    ChannelListener, PlayIndication, PlayState, PttNotification, PttSettings,
};
use ptt_audio_engine::store::{MemoryStore, MessageStore, StoredMessage};
use ptt_audio_engine::{AppConfig, EngineParts, PttOrchestrator, PttState};

const WAIT: Duration = Duration::from_secs(10);
/// 20 ms of mono 16 kHz audio
const FRAME_SAMPLES: usize = 320;

struct Rig {
    orchestrator: PttOrchestrator,
    store: Arc<MemoryStore>,
    notifications: mpsc::UnboundedReceiver<PttNotification>,
    audible: Arc<AtomicUsize>,
    _clocks: (RenderClock, RenderClock),
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.callback_frames = 160;
    config.audio.cache_threshold_ms = 40;
    config
}

fn rig(config: AppConfig) -> Rig {
    let EngineParts {
        facade,
        audio_events,
        playback,
        capture,
    } = build_engine(&config, Arc::new(PcmGateway));

    let frames = config.audio.callback_frames as usize;
    let period = config.audio.callback_period();

    let audible = Arc::new(AtomicUsize::new(0));
    let audible_for_sink = audible.clone();
    let playback_clock = RenderClock::spawn_playback(playback, frames, period, move |block| {
        let loud = block.iter().filter(|s| s.abs() > 0.01).count();
        audible_for_sink.fetch_add(loud, Ordering::Relaxed);
    })
    .unwrap();
    let capture_clock = RenderClock::spawn_capture(capture, frames, period, |block| {
        block.fill(0.25);
    })
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let (listener, notifications) = ChannelListener::new();
    let orchestrator = PttOrchestrator::spawn(
        facade,
        audio_events,
        store.clone(),
        Arc::new(listener),
        PttSettings::from_config(&config),
    );

    Rig {
        orchestrator,
        store,
        notifications,
        audible,
        _clocks: (playback_clock, capture_clock),
    }
}

fn pcm_payload(frames: usize) -> Bytes {
    let frame: Vec<u8> = (0..FRAME_SAMPLES)
        .flat_map(|_| 8_000i16.to_le_bytes())
        .collect();
    encode_frames(std::iter::repeat(frame).take(frames)).unwrap()
}

fn fragment(session: &str, id: u64, marker: Marker, frames: usize) -> PttFragment {
    PttFragment::new(MessageKey::new(session, id), marker, pcm_payload(frames))
}

/// Collect indications until `key` ends
async fn play_through(rig: &mut Rig, key: &MessageKey) -> Vec<PlayIndication> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        while let Some(notification) = rig.notifications.recv().await {
            if let PttNotification::Play(indication) = notification {
                let done = &indication.key == key && indication.state == PlayState::End;
                seen.push(indication);
                if done {
                    return;
                }
            }
        }
    })
    .await
    .expect("playback did not end in time");
    seen
}

async fn wait_for_state(rig: &Rig, wanted: PttState) {
    let mut state = rig.orchestrator.subscribe();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached in time")
        .unwrap();
}

fn drain_packets(rig: &mut Rig) -> Vec<TalkPacket> {
    let mut packets = Vec::new();
    while let Ok(notification) = rig.notifications.try_recv() {
        if let PttNotification::Packet(packet) = notification {
            packets.push(packet);
        }
    }
    packets
}

fn states_of(indications: &[PlayIndication], key: &MessageKey) -> Vec<PlayState> {
    indications
        .iter()
        .filter(|i| &i.key == key)
        .map(|i| i.state)
        .collect()
}

fn assert_burst_shape(packets: &[TalkPacket]) {
    assert!(!packets.is_empty());
    if packets.len() == 1 {
        assert_eq!(packets[0].marker, Marker::Whole);
        return;
    }
    assert_eq!(packets[0].marker, Marker::First);
    assert_eq!(packets[packets.len() - 1].marker, Marker::End);
    for packet in &packets[1..packets.len() - 1] {
        assert_eq!(packet.marker, Marker::Inter);
    }
    for (index, packet) in packets.iter().enumerate() {
        assert_eq!(packet.package_sequence as usize, index);
        assert_eq!(packet.sequence, packets[0].sequence);
    }
}

#[tokio::test]
async fn test_realtime_message_plays_once_and_returns_to_idle() {
    let mut rig = rig(test_config());
    let key = MessageKey::new("group", 1);

    rig.orchestrator
        .on_message(fragment("group", 1, Marker::Whole, 10))
        .unwrap();
    let indications = play_through(&mut rig, &key).await;

    assert_eq!(
        states_of(&indications, &key),
        vec![PlayState::Start, PlayState::Playing, PlayState::End]
    );
    assert!(indications.iter().all(|i| i.source == PlayerSlot::Stream));
    wait_for_state(&rig, PttState::Idle).await;

    assert!(rig.audible.load(Ordering::Relaxed) > 0);
    let stored = rig.store.get_message(&key).await.unwrap().unwrap();
    assert!(!stored.forced);
    assert_eq!(stored.chunks.len(), 1);

    rig.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_three_chunk_message_plays_once() {
    let mut rig = rig(test_config());
    let key = MessageKey::new("group", 2);

    rig.orchestrator
        .on_message(fragment("group", 2, Marker::First, 5))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    rig.orchestrator
        .on_message(fragment("group", 2, Marker::Inter, 5))
        .unwrap();
    rig.orchestrator
        .on_message(fragment("group", 2, Marker::End, 5))
        .unwrap();

    let indications = play_through(&mut rig, &key).await;
    assert_eq!(
        states_of(&indications, &key),
        vec![PlayState::Start, PlayState::Playing, PlayState::End]
    );
    wait_for_state(&rig, PttState::Idle).await;

    let stored = rig.store.get_message(&key).await.unwrap().unwrap();
    assert_eq!(stored.chunks.len(), 3);
    rig.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_talk_emits_a_complete_burst() {
    let mut rig = rig(test_config());

    let talker = rig.orchestrator.clone();
    let talk = tokio::spawn(async move { talker.talk().await });
    wait_for_state(&rig, PttState::Talking).await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    rig.orchestrator.release_talk().unwrap();
    let summary = talk.await.unwrap().unwrap();
    wait_for_state(&rig, PttState::Idle).await;

    let packets = drain_packets(&mut rig);
    assert_burst_shape(&packets);
    assert_eq!(summary.packets as usize, packets.len());
    assert_eq!(
        summary.frames,
        packets.iter().map(|p| p.frame_count).sum::<usize>()
    );
    assert!(summary.frames > 0);

    let frames = packets[0].frames().unwrap();
    assert_eq!(frames[0].len(), FRAME_SAMPLES * 2);

    rig.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_playback_request_interrupts_talk() {
    let mut rig = rig(test_config());
    let key = MessageKey::new("archive", 7);
    rig.store
        .put_message(StoredMessage::new(key.clone(), vec![pcm_payload(5)], false))
        .await
        .unwrap();

    let talker = rig.orchestrator.clone();
    let talk = tokio::spawn(async move { talker.talk().await });
    wait_for_state(&rig, PttState::Talking).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    rig.orchestrator.play_single(key.clone()).unwrap();
    assert_eq!(talk.await.unwrap(), Err(PttError::TalkInterrupted));

    let indications = play_through(&mut rig, &key).await;
    assert_eq!(
        states_of(&indications, &key),
        vec![PlayState::Start, PlayState::Playing, PlayState::End]
    );
    assert!(indications.iter().all(|i| i.source == PlayerSlot::Single));
    wait_for_state(&rig, PttState::Idle).await;

    rig.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_muted_session_is_skipped() {
    let mut rig = rig(test_config());
    rig.orchestrator.set_session_muted("muted", true).await.unwrap();

    rig.orchestrator
        .on_message(fragment("muted", 1, Marker::Whole, 3))
        .unwrap();
    rig.orchestrator
        .on_message(fragment("open", 1, Marker::Whole, 3))
        .unwrap();

    let open = MessageKey::new("open", 1);
    let indications = play_through(&mut rig, &open).await;
    assert!(indications.iter().all(|i| i.key == open));
    wait_for_state(&rig, PttState::Idle).await;

    // Muted messages are still stored
    assert!(rig
        .store
        .get_message(&MessageKey::new("muted", 1))
        .await
        .unwrap()
        .is_some());
    rig.orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stalled_message_is_force_completed() {
    let mut config = test_config();
    config.ptt.reassembly_timeout_secs = 1;
    let mut rig = rig(config);
    let key = MessageKey::new("flaky", 3);

    rig.orchestrator
        .on_message(fragment("flaky", 3, Marker::First, 4))
        .unwrap();
    let indications = play_through(&mut rig, &key).await;
    assert_eq!(
        states_of(&indications, &key),
        vec![PlayState::Start, PlayState::Playing, PlayState::End]
    );
    wait_for_state(&rig, PttState::Idle).await;

    let stored = rig.store.get_message(&key).await.unwrap().unwrap();
    assert!(stored.forced);

    // The late end of the burst is dropped
    rig.orchestrator
        .on_message(fragment("flaky", 3, Marker::End, 1))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.orchestrator.state(), PttState::Idle);
    assert_eq!(rig.store.message_count(), 1);

    rig.orchestrator.shutdown().await.unwrap();
}
