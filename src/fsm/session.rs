//! Shared context of one voting session
//!
//! Everything the dispatch section and the playback timer tasks both need:
//! the output capabilities, media resolution, voice settings, the lifecycle
//! flag and the fault slot. Timer tasks hold an `Arc<Session>`; they report
//! fatal errors here instead of transitioning the machine themselves.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{error, warn};

use crate::events::EngineEvent;
use crate::playback::{Caption, CaptionDisplay, MediaRef, MediaResolver, Playback, Track};

use super::error::EngineError;

/// Timing of a state's presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause added before every segment after the first
    pub inter_segment_offset: Duration,
    /// Silence after the last segment before the content repeats
    pub repeat_timeout: Duration,
    /// Pause after interrupting playback so the output device settles
    pub settle_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            inter_segment_offset: Duration::from_millis(500),
            repeat_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Speech speed and output gain controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    /// Initial speech-speed level, selects `name_<speed>` media variants
    pub speed: u8,
    pub min_speed: u8,
    pub max_speed: u8,
    /// Initial output gain in `0.0..=1.0`
    pub gain: f32,
    /// Amount one gain step changes the gain
    pub gain_step: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            speed: 1,
            min_speed: 0,
            max_speed: 2,
            gain: 1.0,
            gain_step: 0.1,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory media and caption paths are relative to
    pub content_dir: PathBuf,
    pub timing: Timing,
    pub voice: VoiceSettings,
    /// Default repeat ceiling for states added to the machine
    pub max_repeats: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("."),
            timing: Timing::default(),
            voice: VoiceSettings::default(),
            max_repeats: 50,
        }
    }
}

/// Lifecycle of a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    NotStarted,
    Running,
    /// Terminal: reached the stop state, stopped, or faulted
    Stopped,
}

pub(crate) struct Session {
    playback: Arc<dyn Playback>,
    captions: Arc<dyn CaptionDisplay>,
    resolver: MediaResolver,
    timing: Timing,
    voice: VoiceSettings,
    speed: AtomicU8,
    gain: Mutex<f32>,
    max_repeats: AtomicU32,
    lifecycle: watch::Sender<Lifecycle>,
    fault: Mutex<Option<EngineError>>,
    events: broadcast::Sender<EngineEvent>,
}

impl Session {
    pub(crate) fn new(
        playback: Arc<dyn Playback>,
        captions: Arc<dyn CaptionDisplay>,
        config: &EngineConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let voice = config.voice;
        let (lifecycle, _) = watch::channel(Lifecycle::NotStarted);
        Self {
            playback,
            captions,
            resolver: MediaResolver::new(config.content_dir.clone()),
            timing: config.timing,
            voice,
            speed: AtomicU8::new(voice.speed.clamp(voice.min_speed, voice.max_speed)),
            gain: Mutex::new(voice.gain.clamp(0.0, 1.0)),
            max_repeats: AtomicU32::new(config.max_repeats),
            lifecycle,
            fault: Mutex::new(None),
            events,
        }
    }

    pub(crate) fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Resolve and open a segment's media at the current speed
    pub(crate) fn open(&self, media: &MediaRef) -> Result<Box<dyn Track>, EngineError> {
        let path = self
            .resolver
            .resolve(media, self.speed(), self.playback.as_ref())?;
        self.playback
            .open(&path)
            .map_err(|e| EngineError::Playback {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Show a caption; display failures are logged and never abort playback
    pub(crate) fn show_caption(&self, caption: &Caption) {
        let shown = caption
            .load(self.resolver.content_dir())
            .and_then(|text| self.captions.show(&text));
        if let Err(e) = shown {
            warn!(?caption, error = %e, "caption not shown");
        }
    }

    pub(crate) fn clear_captions(&self) {
        if let Err(e) = self.captions.clear() {
            warn!(error = %e, "failed to clear captions");
        }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Repeat ceiling for states without their own
    pub(crate) fn max_repeats(&self) -> u32 {
        self.max_repeats.load(Ordering::SeqCst)
    }

    pub(crate) fn set_max_repeats(&self, max_repeats: u32) {
        self.max_repeats.store(max_repeats, Ordering::SeqCst);
    }

    pub(crate) fn speed(&self) -> u8 {
        self.speed.load(Ordering::SeqCst)
    }

    /// Move the speed level one step, clamped to the configured range
    pub(crate) fn step_speed(&self, faster: bool) -> u8 {
        let (min, max) = (self.voice.min_speed, self.voice.max_speed);
        let step = |s: u8| {
            if faster {
                s.saturating_add(1).min(max)
            } else {
                s.saturating_sub(1).max(min)
            }
        };
        let previous = self
            .speed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| Some(step(s)))
            .unwrap_or_else(|s| s);
        step(previous)
    }

    pub(crate) fn gain(&self) -> f32 {
        *self.gain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a gain level clamped to `0.0..=1.0` and return it
    pub(crate) fn set_gain(&self, level: f32) -> f32 {
        let level = level.clamp(0.0, 1.0);
        *self.gain.lock().unwrap_or_else(PoisonError::into_inner) = level;
        level
    }

    pub(crate) fn gain_step(&self) -> f32 {
        self.voice.gain_step
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.send_replace(lifecycle);
    }

    pub(crate) fn watch_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Record a fatal error and halt the session
    ///
    /// Only the first fault is kept; later ones are consequences of it.
    pub(crate) fn raise(&self, err: EngineError) {
        {
            let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
            if fault.is_none() {
                error!(error = %err, "voting session fault");
                self.emit(EngineEvent::SessionFault {
                    message: err.to_string(),
                });
                *fault = Some(err);
            }
        }
        self.set_lifecycle(Lifecycle::Stopped);
    }

    pub(crate) fn fault(&self) -> Option<EngineError> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
