//! Segment definitions: what a state says and shows

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Reference to a media file, relative to the content directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub path: PathBuf,
    /// Play the file exactly as named, without speech-speed variants
    #[serde(default)]
    pub verbatim: bool,
}

impl MediaRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            verbatim: false,
        }
    }

    /// A media file that has no speed variants, such as a voter recording
    pub fn verbatim(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            verbatim: true,
        }
    }
}

/// Text shown while a segment plays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Caption {
    /// Inline caption text
    Text(String),
    /// A text file, relative to the content directory
    File(PathBuf),
}

impl Caption {
    /// Load the caption text
    pub fn load(&self, content_dir: &Path) -> io::Result<String> {
        match self {
            Caption::Text(text) => Ok(text.clone()),
            Caption::File(path) => std::fs::read_to_string(content_dir.join(path)),
        }
    }
}

/// One (media, caption) pair of a state's playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub media: MediaRef,
    #[serde(default)]
    pub caption: Option<Caption>,
}

impl Segment {
    /// A segment captioned by the `.txt` file next to its media
    pub fn new(media: impl Into<PathBuf>) -> Self {
        let media = MediaRef::new(media);
        let caption = Caption::File(media.path.with_extension("txt"));
        Self {
            media,
            caption: Some(caption),
        }
    }

    /// A segment with inline caption text
    pub fn with_text(media: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            media: MediaRef::new(media),
            caption: Some(Caption::Text(text.into())),
        }
    }

    /// A segment with no caption
    pub fn silent_caption(media: MediaRef) -> Self {
        Self {
            media,
            caption: None,
        }
    }
}
