//! Persistence of received clips

use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::AudioClip;
use crate::error::Result;

/// Somewhere to keep a copy of each received clip
pub trait ClipStore: Send + Sync {
    /// Persist the clip and return where it went
    fn store(&self, clip: &AudioClip) -> Result<PathBuf>;
}

/// Writes each clip as `sample-<millis>.mp3` into one directory
#[derive(Debug, Clone)]
pub struct DirectoryClipStore {
    dir: PathBuf,
}

impl DirectoryClipStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ClipStore for DirectoryClipStore {
    fn store(&self, clip: &AudioClip) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(clip.file_name());
        fs::write(&path, &clip.payload)?;
        Ok(path)
    }
}
