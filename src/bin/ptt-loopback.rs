//! PTT Loopback
//!
//! Talks a generated tone for a few seconds, feeds the outgoing packets
//! straight back in as an incoming message and plays it, all on headless
//! render clocks.
//!
//! Usage: ptt-loopback [seconds] [config.toml]

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ptt_audio_engine::{
    codec::default_gateway,
    engine::{build_engine, RenderClock},
    ptt::{ChannelListener, PttNotification, PttSettings},
    store::MemoryStore,
    AppConfig, EngineParts, PttOrchestrator, PttState,
};

const TONE_HZ: f32 = 440.0;
const LOOPBACK_SESSION: &str = "loopback";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()
        .context("seconds must be a whole number")?
        .unwrap_or(2);
    let config = match std::env::args().nth(2) {
        Some(path) => AppConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::load_or_default(),
    };
    config.validate()?;

    tracing::info!("Starting PTT loopback for {} s", seconds);

    let EngineParts {
        facade,
        audio_events,
        playback,
        capture,
    } = build_engine(&config, default_gateway());

    let frames = config.audio.callback_frames as usize;
    let period = config.audio.callback_period();
    let sample_rate = config.audio.sample_rate as f32;
    let channels = config.audio.channels.max(1) as usize;

    let mut phase = 0.0f32;
    let _capture_clock = RenderClock::spawn_capture(capture, frames, period, move |block| {
        for frame in block.chunks_mut(channels) {
            let value = (phase * TAU).sin() * 0.3;
            frame.fill(value);
            phase = (phase + TONE_HZ / sample_rate).fract();
        }
    })?;

    // Peak output level in thousandths
    let peak = Arc::new(AtomicU32::new(0));
    let peak_for_sink = peak.clone();
    let _playback_clock = RenderClock::spawn_playback(playback, frames, period, move |block| {
        let level = block.iter().fold(0.0f32, |max, s| max.max(s.abs()));
        peak_for_sink.fetch_max((level * 1000.0) as u32, Ordering::Relaxed);
    })?;

    let (listener, mut notifications) = ChannelListener::new();
    let orchestrator = PttOrchestrator::spawn(
        facade,
        audio_events,
        Arc::new(MemoryStore::new()),
        Arc::new(listener),
        PttSettings::from_config(&config),
    );

    // Outgoing packets come straight back as an incoming message
    let inbound = orchestrator.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            match notification {
                PttNotification::Packet(packet) => {
                    tracing::info!(
                        "Packet {} of talk {}: {:?} with {} frames",
                        packet.package_sequence,
                        packet.sequence,
                        packet.marker,
                        packet.frame_count
                    );
                    if inbound.on_message(packet.to_fragment(LOOPBACK_SESSION)).is_err() {
                        break;
                    }
                }
                PttNotification::Play(indication) => {
                    tracing::info!("{} {:?} on {}", indication.key, indication.state, indication.source);
                }
            }
        }
    });

    let talker = orchestrator.clone();
    let talk = tokio::spawn(async move { talker.talk().await });
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    orchestrator.release_talk()?;

    let summary = talk.await??;
    tracing::info!(
        "Talk {} sent {} frames in {} packets",
        summary.sequence,
        summary.frames,
        summary.packets
    );

    // Let the looped-back message play out
    let mut state = orchestrator.subscribe();
    let playout = Duration::from_secs(seconds + 5);
    let finished = tokio::time::timeout(playout, async {
        // Wait for playback to begin, then for the return to idle
        state.wait_for(|s| *s != PttState::Idle).await?;
        state.wait_for(|s| *s == PttState::Idle).await?;
        Ok::<_, tokio::sync::watch::error::RecvError>(())
    })
    .await;
    if finished.is_err() {
        tracing::warn!("Playback did not finish within {:?}", playout);
    }

    orchestrator.shutdown().await?;
    drop(orchestrator);
    forwarder.abort();

    tracing::info!(
        "Peak playback level: {:.3}",
        peak.load(Ordering::Relaxed) as f32 / 1000.0
    );
    Ok(())
}
