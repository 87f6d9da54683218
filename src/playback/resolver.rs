//! Media file resolution across speech speeds and container formats
//!
//! Prompts are recorded at several speaking speeds as `name_<speed>.ext`.
//! For `name.ext` at speed `s` the candidates, in order, are:
//! `name_s.ext`, `name.ext`, `name_s.alt`, `name.alt`, where `alt` is the
//! other supported container format.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::segment::MediaRef;
use super::Playback;
use crate::fsm::EngineError;

/// Container formats the backends understand
pub const SUPPORTED_FORMATS: [&str; 2] = ["wav", "mp3"];

/// Resolves media references to playable files under a content directory
#[derive(Debug, Clone)]
pub struct MediaResolver {
    content_dir: PathBuf,
}

impl MediaResolver {
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Find the first candidate file that `playback` can open
    pub fn resolve(
        &self,
        media: &MediaRef,
        speed: u8,
        playback: &dyn Playback,
    ) -> Result<PathBuf, EngineError> {
        let found = self
            .candidates(media, speed)
            .into_iter()
            .find(|candidate| playback.can_open(candidate));

        match found {
            Some(path) => {
                debug!(media = %media.path.display(), resolved = %path.display(), "media resolved");
                Ok(path)
            }
            None => Err(EngineError::MissingContent {
                media: media.path.display().to_string(),
            }),
        }
    }

    /// Candidate paths in resolution order
    pub fn candidates(&self, media: &MediaRef, speed: u8) -> Vec<PathBuf> {
        let base = self.content_dir.join(&media.path);
        let (Some(stem), Some(extension)) = (
            base.file_stem().and_then(|s| s.to_str()),
            base.extension().and_then(|e| e.to_str()),
        ) else {
            return vec![base];
        };
        let dir = base.parent().unwrap_or(Path::new(""));

        let mut formats = vec![extension];
        let lowered = extension.to_ascii_lowercase();
        if SUPPORTED_FORMATS.contains(&lowered.as_str()) {
            formats.extend(SUPPORTED_FORMATS.iter().filter(|&&f| f != lowered));
        }

        let mut candidates = Vec::with_capacity(formats.len() * 2);
        for format in formats {
            if !media.verbatim {
                candidates.push(dir.join(format!("{stem}_{speed}.{format}")));
            }
            candidates.push(dir.join(format!("{stem}.{format}")));
        }
        candidates
    }
}
