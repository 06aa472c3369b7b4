//! Engine configuration
//!
//! Loaded from TOML. Every section and field has a default, so an empty
//! file is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BITRATE, DEFAULT_CHANNELS, DEFAULT_FRAME_DURATION_MS, DEFAULT_SAMPLE_RATE,
    REASSEMBLY_TIMEOUT, REQUEST_TIMEOUT, TALK_BATCH_FRAMES,
};
use crate::error::{Error, Result};

const CONFIG_FILE: &str = "ptt-audio.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub facade: FacadeConfig,
    pub ptt: PttConfig,
}

/// Rendering-context parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Encoder bit rate; the codec default is used when absent
    pub bit_rate: Option<u32>,
    pub frame_duration_ms: u32,
    pub ring_buffer_ms: u32,
    /// Buffered audio required before playback leaves the caching state
    pub cache_threshold_ms: u32,
    /// Frames per hardware or clock callback
    pub callback_frames: u32,
    pub command_queue: usize,
    pub event_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bit_rate: Some(DEFAULT_BITRATE),
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            ring_buffer_ms: 2000,
            cache_threshold_ms: 100,
            callback_frames: 320,
            command_queue: 256,
            event_queue: 256,
        }
    }
}

impl AudioConfig {
    /// Wall-clock length of one callback
    pub fn callback_period(&self) -> Duration {
        Duration::from_micros(self.callback_frames as u64 * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FacadeConfig {
    pub request_timeout_ms: u64,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

impl FacadeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PttConfig {
    /// Encoded frames per outgoing talk packet
    pub talk_batch_frames: usize,
    /// Inactivity before a partial message is force-completed
    pub reassembly_timeout_secs: u64,
    pub default_priority: u8,
    /// Completed keys remembered to drop late fragments
    pub recent_completed: usize,
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            talk_batch_frames: TALK_BATCH_FRAMES,
            reassembly_timeout_secs: REASSEMBLY_TIMEOUT.as_secs(),
            default_priority: 0,
            recent_completed: 256,
        }
    }
}

impl PttConfig {
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_secs(self.reassembly_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be > 0".into()));
        }
        if !(1..=2).contains(&audio.channels) {
            return Err(Error::Config(format!(
                "audio.channels must be 1 or 2, got {}",
                audio.channels
            )));
        }
        if audio.bit_rate == Some(0) {
            return Err(Error::Config("audio.bit_rate must be > 0".into()));
        }
        if audio.frame_duration_ms == 0 {
            return Err(Error::Config("audio.frame_duration_ms must be > 0".into()));
        }
        if audio.ring_buffer_ms < audio.cache_threshold_ms {
            return Err(Error::Config(
                "audio.ring_buffer_ms must not be smaller than audio.cache_threshold_ms".into(),
            ));
        }
        if audio.ring_buffer_ms < audio.frame_duration_ms {
            return Err(Error::Config(
                "audio.ring_buffer_ms must hold at least one codec frame".into(),
            ));
        }
        if audio.callback_frames == 0 {
            return Err(Error::Config("audio.callback_frames must be > 0".into()));
        }
        if audio.command_queue == 0 || audio.event_queue == 0 {
            return Err(Error::Config("queue sizes must be > 0".into()));
        }
        if self.facade.request_timeout_ms == 0 {
            return Err(Error::Config("facade.request_timeout_ms must be > 0".into()));
        }
        if self.ptt.talk_batch_frames == 0 {
            return Err(Error::Config("ptt.talk_batch_frames must be > 0".into()));
        }
        if self.ptt.reassembly_timeout_secs == 0 {
            return Err(Error::Config("ptt.reassembly_timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Platform configuration file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "ptt-audio-engine")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from [`default_path`](Self::default_path), falling back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring configuration at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.facade.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.ptt.talk_batch_frames, 25);
        assert_eq!(config.ptt.reassembly_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_override() {
        let config = AppConfig::from_toml_str(
            r#"
            [audio]
            sample_rate = 48000
            channels = 2

            [ptt]
            default_priority = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.frame_duration_ms, 20);
        assert_eq!(config.ptt.default_priority, 3);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            AppConfig::from_toml_str("[audio]\nchannels = 3"),
            Err(Error::Config(_))
        ));
        assert!(AppConfig::from_toml_str("[facade]\nrequest_timeout_ms = 0").is_err());
        assert!(AppConfig::from_toml_str("[audio]\nring_buffer_ms = 50").is_err());
        assert!(AppConfig::from_toml_str("not toml [").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ptt-config-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.audio.bit_rate = Some(32_000);
        config.ptt.recent_completed = 16;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_callback_period() {
        assert_eq!(AudioConfig::default().callback_period(), Duration::from_millis(20));
    }
}
