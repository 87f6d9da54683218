//! Wall-clock playback backend
//!
//! Models playback timing without producing sound: a track "plays" for its
//! duration measured on the tokio clock. WAV durations come from the file
//! header; other formats use a nominal duration. Lets the daemon run a
//! full dialogue on machines with no audio stack.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::{PlaybackError, Track, Playback};

/// Bytes read from the front of a WAV file when looking for its header
const HEADER_PEEK: u64 = 4096;

/// Playback backend that only keeps time
#[derive(Debug, Clone)]
pub struct ClockPlayback {
    nominal: Duration,
}

impl ClockPlayback {
    /// Create a backend using `nominal` for files without a readable header
    pub fn new(nominal: Duration) -> Self {
        Self { nominal }
    }
}

impl Default for ClockPlayback {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl Playback for ClockPlayback {
    fn open(&self, path: &Path) -> Result<Box<dyn Track>, PlaybackError> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        let duration = if is_wav {
            let bytes = read_header(path).map_err(|source| PlaybackError::Open {
                path: path.display().to_string(),
                source,
            })?;
            wav_duration(&bytes).unwrap_or(self.nominal)
        } else if path.is_file() {
            self.nominal
        } else {
            return Err(PlaybackError::Open {
                path: path.display().to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        };

        debug!(
            path = %path.display(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "track opened"
        );

        Ok(Box::new(ClockTrack {
            path: path.to_path_buf(),
            duration,
            started_at: None,
            gain: 1.0,
        }))
    }
}

struct ClockTrack {
    path: PathBuf,
    duration: Duration,
    started_at: Option<Instant>,
    gain: f32,
}

impl Track for ClockTrack {
    fn play(&mut self) {
        info!(path = %self.path.display(), gain = self.gain, "playing");
        self.started_at = Some(Instant::now());
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn is_playing(&self) -> bool {
        self.started_at
            .is_some_and(|started| started.elapsed() < self.duration)
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn set_gain(&mut self, level: f32) -> bool {
        self.gain = level;
        true
    }

    fn release(&mut self) {
        self.started_at = None;
    }
}

fn read_header(path: &Path) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    File::open(path)?.take(HEADER_PEEK).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Duration of a RIFF/WAVE file from its `fmt ` and `data` chunks
fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let read_u32 = |at: usize| -> Option<u32> {
        bytes
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let mut byte_rate = None;
    let mut data_len = None;
    let mut at = 12;
    while at + 8 <= bytes.len() {
        let id = &bytes[at..at + 4];
        let len = read_u32(at + 4)? as usize;
        match id {
            b"fmt " => byte_rate = read_u32(at + 16),
            b"data" => data_len = Some(len),
            _ => {}
        }
        // chunks are padded to even length
        at += 8 + len + (len & 1);
    }

    let byte_rate = u64::from(byte_rate.filter(|&r| r > 0)?);
    let millis = data_len? as u64 * 1000 / byte_rate;
    Some(Duration::from_millis(millis))
}
