//! Playback and caption capabilities
//!
//! The engine never decodes audio itself. It talks to an output backend
//! through [`Playback`]/[`Track`] and echoes captions through
//! [`CaptionDisplay`]:
//! - `Playback` probes and opens media files into tracks
//! - `Track` is one opened file: play, stop, gain, release
//! - `CaptionDisplay` shows or clears the text accompanying a segment

mod clock;
mod console;
mod resolver;
mod segment;

use std::io;
use std::path::Path;
use std::time::Duration;

pub use clock::ClockPlayback;
pub use console::ConsoleCaptions;
pub use resolver::{MediaResolver, SUPPORTED_FORMATS};
pub use segment::{Caption, MediaRef, Segment};

/// An opened media file owned by the state presenting it
pub trait Track: Send {
    /// Start playing from the beginning
    fn play(&mut self);

    /// Stop playing; a no-op if the track is not playing
    fn stop(&mut self);

    fn is_playing(&self) -> bool;

    /// Total play time of the track
    fn duration(&self) -> Duration;

    /// Set the output gain in `0.0..=1.0`; returns false if unsupported
    fn set_gain(&mut self, _level: f32) -> bool {
        false
    }

    /// Release any output resources held by the track
    fn release(&mut self);
}

/// Audio output backend
pub trait Playback: Send + Sync {
    /// Open `path` into a track ready to play
    fn open(&self, path: &Path) -> Result<Box<dyn Track>, PlaybackError>;

    /// Whether `path` exists and could be opened
    fn can_open(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Visual echo of the spoken content
pub trait CaptionDisplay: Send + Sync {
    fn show(&self, text: &str) -> io::Result<()>;
    fn clear(&self) -> io::Result<()>;
}

/// Errors from an audio backend
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("unsupported media format: {0}")]
    Unsupported(String),

    #[error("failed to open {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
}
