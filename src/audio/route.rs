//! Audio route capability
//!
//! The tunnel never touches hardware directly. Everything it needs from the
//! audio device goes through [`AudioRoute`], which the desktop build backs
//! with cpal and the tests back with scripted fakes.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::AudioError;

/// Capture and playback operations on the single shared audio device
pub trait AudioRoute: Send + Sync {
    /// Acquire the microphone and begin capture
    fn start_capture(&self) -> Result<(), AudioError>;

    /// Fill `buf` with captured 16-bit PCM.
    ///
    /// Returns the number of bytes written; 0 means the device produced
    /// nothing (busy or unavailable).
    fn read_chunk(&self, buf: &mut [u8]) -> usize;

    /// Release the microphone
    fn stop_capture(&self);

    /// Route output to the playback device
    fn start_output_route(&self) -> Result<(), AudioError>;

    /// Release the playback route
    fn stop_output_route(&self);

    /// Start playing an encoded clip; completion is reported asynchronously
    fn play_clip(&self, payload: Bytes) -> PlaybackCompletion;
}

/// Sending half of a playback completion
#[derive(Debug)]
pub struct PlaybackNotifier {
    tx: Sender<Result<(), AudioError>>,
}

impl PlaybackNotifier {
    /// Report how playback ended. Consumes the notifier.
    pub fn complete(self, result: Result<(), AudioError>) {
        let _ = self.tx.send(result);
    }
}

/// Receiving half of a playback completion
#[derive(Debug)]
pub struct PlaybackCompletion {
    rx: Receiver<Result<(), AudioError>>,
}

impl PlaybackCompletion {
    /// Create a connected notifier/completion pair
    pub fn channel() -> (PlaybackNotifier, Self) {
        let (tx, rx) = bounded(1);
        (PlaybackNotifier { tx }, Self { rx })
    }

    /// Completion that is already resolved
    pub fn ready(result: Result<(), AudioError>) -> Self {
        let (notifier, completion) = Self::channel();
        notifier.complete(result);
        completion
    }

    /// Block until playback ends.
    ///
    /// A notifier dropped without reporting counts as a failure.
    pub fn wait(self) -> Result<(), AudioError> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(AudioError::PlaybackFailed(
                "playback ended without reporting".to_string(),
            ))
        })
    }
}
