//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::fsm::{EngineConfig, Timing, VoiceSettings};
use crate::keypad::KeyMap;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Dialogue file describing the ballot
    pub dialogue_path: PathBuf,

    /// Play time assumed for media without a readable header
    pub nominal_duration: Duration,

    pub engine: EngineConfig,

    pub key_map: KeyMap,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::from_lookup(Path::new(&home), |key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup, rooted at `home`
    pub fn from_lookup(home: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = |key: &str| lookup(key).map(PathBuf::from);

        let data_dir = path("VOICE_BALLOT_DATA_DIR")
            .unwrap_or_else(|| home.join(".local").join("share").join("voice-ballot"));
        let content_dir = path("VOICE_BALLOT_CONTENT_DIR").unwrap_or_else(|| data_dir.join("content"));
        let dialogue_path =
            path("VOICE_BALLOT_DIALOGUE").unwrap_or_else(|| data_dir.join("dialogue.json"));
        let socket_path = path("VOICE_BALLOT_SOCKET").unwrap_or_else(|| data_dir.join("daemon.sock"));

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            Ok(parse_var::<u64>(&lookup, key)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let defaults = Timing::default();
        let timing = Timing {
            inter_segment_offset: millis(
                "VOICE_BALLOT_SEGMENT_OFFSET_MS",
                defaults.inter_segment_offset,
            )?,
            repeat_timeout: millis("VOICE_BALLOT_REPEAT_TIMEOUT_MS", defaults.repeat_timeout)?,
            settle_delay: millis("VOICE_BALLOT_SETTLE_DELAY_MS", defaults.settle_delay)?,
        };

        let mut voice = VoiceSettings::default();
        if let Some(speed) = parse_var::<u8>(&lookup, "VOICE_BALLOT_SPEED")? {
            if !(voice.min_speed..=voice.max_speed).contains(&speed) {
                bail!(
                    "VOICE_BALLOT_SPEED must be between {} and {}",
                    voice.min_speed,
                    voice.max_speed
                );
            }
            voice.speed = speed;
        }
        if let Some(gain) = parse_var::<f32>(&lookup, "VOICE_BALLOT_GAIN")? {
            if !(0.0..=1.0).contains(&gain) {
                bail!("VOICE_BALLOT_GAIN must be between 0.0 and 1.0");
            }
            voice.gain = gain;
        }

        let max_repeats =
            parse_var(&lookup, "VOICE_BALLOT_MAX_REPEATS")?.unwrap_or(EngineConfig::default().max_repeats);

        let key_map = KeyMap {
            confirm_key: parse_var(&lookup, "VOICE_BALLOT_CONFIRM_KEY")?,
            ..KeyMap::default()
        };

        let nominal_duration = millis("VOICE_BALLOT_NOMINAL_MS", Duration::from_secs(3))?;

        Ok(Self {
            socket_path,
            data_dir,
            dialogue_path,
            nominal_duration,
            engine: EngineConfig {
                content_dir,
                timing,
                voice,
                max_repeats,
            },
            key_map,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
