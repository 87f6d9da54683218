//! Test doubles for the playback and caption capabilities

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::fsm::session::Session;
use crate::fsm::EngineConfig;
use crate::keypad::{InputCode, InputSet};
use crate::playback::{CaptionDisplay, Playback, PlaybackError, Track};

pub(crate) fn code(value: u8) -> InputCode {
    InputCode::new(value).unwrap()
}

pub(crate) fn inputs(values: &[u8]) -> InputSet {
    InputSet::from_codes(values).unwrap()
}

pub(crate) fn test_config() -> EngineConfig {
    EngineConfig {
        content_dir: "content".into(),
        ..EngineConfig::default()
    }
}

pub(crate) fn session_with(
    playback: &Arc<MockPlayback>,
    captions: &Arc<RecordingCaptions>,
) -> Arc<Session> {
    let (events, _) = broadcast::channel(64);
    Arc::new(Session::new(
        playback.clone(),
        captions.clone(),
        &test_config(),
        events,
    ))
}

#[derive(Debug, Clone)]
pub(crate) struct TrackRecord {
    pub name: String,
    pub duration: Duration,
    pub started_at: Option<Instant>,
    pub plays: u32,
    pub stopped: bool,
    pub released: bool,
    pub gain: Option<f32>,
}

/// Playback backend that records what the engine does with its tracks
///
/// Files are keyed by file name. Every name can be opened unless marked
/// missing.
pub(crate) struct MockPlayback {
    default_duration: Duration,
    durations: HashMap<String, Duration>,
    missing: HashSet<String>,
    records: Arc<Mutex<Vec<TrackRecord>>>,
}

impl MockPlayback {
    pub fn new(default_duration: Duration) -> Self {
        Self {
            default_duration,
            durations: HashMap::new(),
            missing: HashSet::new(),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_duration(mut self, name: &str, duration: Duration) -> Self {
        self.durations.insert(name.to_string(), duration);
        self
    }

    pub fn missing(mut self, names: &[&str]) -> Self {
        self.missing.extend(names.iter().map(|n| n.to_string()));
        self
    }

    fn records_of(&self, name: &str) -> Vec<TrackRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    /// Total plays across every track opened for `name`
    pub fn plays(&self, name: &str) -> u32 {
        self.records_of(name).iter().map(|r| r.plays).sum()
    }

    pub fn is_playing(&self, name: &str) -> bool {
        self.records_of(name).iter().any(playing)
    }

    /// Whether every track opened for `name` was released
    pub fn is_released(&self, name: &str) -> bool {
        let records = self.records_of(name);
        !records.is_empty() && records.iter().all(|r| r.released)
    }

    /// Gain last applied to the newest track for `name`
    pub fn gain(&self, name: &str) -> Option<f32> {
        self.records_of(name).last().and_then(|r| r.gain)
    }

    pub fn opened(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Names of tracks currently playing
    pub fn playing(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| playing(r))
            .map(|r| r.name.clone())
            .collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn playing(record: &TrackRecord) -> bool {
    !record.stopped
        && !record.released
        && record
            .started_at
            .is_some_and(|started| started.elapsed() < record.duration)
}

impl Playback for MockPlayback {
    fn open(&self, path: &Path) -> Result<Box<dyn Track>, PlaybackError> {
        let name = file_name(path);
        if self.missing.contains(&name) {
            return Err(PlaybackError::Open {
                path: path.display().to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }

        let duration = self
            .durations
            .get(&name)
            .copied()
            .unwrap_or(self.default_duration);
        let mut records = self.records.lock().unwrap();
        records.push(TrackRecord {
            name,
            duration,
            started_at: None,
            plays: 0,
            stopped: false,
            released: false,
            gain: None,
        });

        Ok(Box::new(MockTrack {
            index: records.len() - 1,
            duration,
            records: Arc::clone(&self.records),
        }))
    }

    fn can_open(&self, path: &Path) -> bool {
        !self.missing.contains(&file_name(path))
    }
}

struct MockTrack {
    index: usize,
    duration: Duration,
    records: Arc<Mutex<Vec<TrackRecord>>>,
}

impl MockTrack {
    fn update(&self, f: impl FnOnce(&mut TrackRecord)) {
        if let Some(record) = self.records.lock().unwrap().get_mut(self.index) {
            f(record);
        }
    }
}

impl Track for MockTrack {
    fn play(&mut self) {
        self.update(|r| {
            r.started_at = Some(Instant::now());
            r.stopped = false;
            r.plays += 1;
        });
    }

    fn stop(&mut self) {
        self.update(|r| r.stopped = true);
    }

    fn is_playing(&self) -> bool {
        self.records
            .lock()
            .unwrap()
            .get(self.index)
            .is_some_and(playing)
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn set_gain(&mut self, level: f32) -> bool {
        self.update(|r| r.gain = Some(level));
        true
    }

    fn release(&mut self) {
        self.update(|r| r.released = true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CaptionCall {
    Show(String),
    Clear,
}

#[derive(Default)]
pub(crate) struct RecordingCaptions {
    calls: Mutex<Vec<CaptionCall>>,
}

impl RecordingCaptions {
    pub fn calls(&self) -> Vec<CaptionCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Caption texts shown so far, in order
    pub fn shown(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                CaptionCall::Show(text) => Some(text),
                CaptionCall::Clear => None,
            })
            .collect()
    }
}

impl CaptionDisplay for RecordingCaptions {
    fn show(&self, text: &str) -> io::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(CaptionCall::Show(text.to_string()));
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        self.calls.lock().unwrap().push(CaptionCall::Clear);
        Ok(())
    }
}
