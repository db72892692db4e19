//! Playback coordination
//!
//! Clips handed over by the receive loop are queued and played one at a time
//! on a worker thread. Playing a clip takes the audio device away from
//! capture for its whole duration.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioClip, AudioRoute};
use crate::error::AudioError;
use crate::storage::ClipStore;
use crate::tunnel::state::{CaptureToggle, Exclusion, ExclusionState};

/// Everything needed to play one clip
struct CoordinatorCore {
    route: Arc<dyn AudioRoute>,
    exclusion: Arc<Exclusion>,
    toggle: CaptureToggle,
    store: Option<Arc<dyn ClipStore>>,
    settle: Duration,
}

/// Restores the device to `Idle` however playback ends
struct PlaybackGuard<'a> {
    core: &'a CoordinatorCore,
}

impl Drop for PlaybackGuard<'_> {
    fn drop(&mut self) {
        self.core.route.stop_output_route();
        self.core.exclusion.end_playback();
    }
}

impl CoordinatorCore {
    fn play_now(&self, clip: AudioClip) -> Result<(), AudioError> {
        if let Some(store) = &self.store {
            match store.store(&clip) {
                Ok(path) => tracing::info!("Clip saved: {} ({} bytes)", path.display(), clip.len()),
                Err(e) => tracing::warn!("Failed to save clip {}: {}", clip.file_name(), e),
            }
        }

        let previous = self.exclusion.begin_playback(|| self.route.stop_capture());
        let _guard = PlaybackGuard { core: self };
        if previous == ExclusionState::Capturing {
            tracing::debug!("Capture paused for playback");
        }
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        tracing::info!("Playback started: {} ({} bytes)", clip.file_name(), clip.len());
        let result = self
            .route
            .start_output_route()
            .and_then(|()| self.route.play_clip(clip.payload).wait());

        match &result {
            Ok(()) => tracing::info!("Playback finished"),
            Err(e) => tracing::warn!("Playback failed: {}", e),
        }
        if self.toggle.is_enabled() {
            tracing::debug!("Capture resumes on the next send iteration");
        }
        result
    }
}

/// Owns the exclusion between "capturing" and "playing" on the playback side
pub struct PlaybackCoordinator {
    core: Arc<CoordinatorCore>,
    queue: Mutex<Option<Sender<AudioClip>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackCoordinator {
    pub fn new(
        route: Arc<dyn AudioRoute>,
        exclusion: Arc<Exclusion>,
        toggle: CaptureToggle,
        store: Option<Arc<dyn ClipStore>>,
        settle: Duration,
    ) -> Self {
        Self {
            core: Arc::new(CoordinatorCore {
                route,
                exclusion,
                toggle,
                store,
                settle,
            }),
            queue: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Start the playback worker. Calling it again is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut queue = self.queue.lock();
        if queue.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded::<AudioClip>();
        let core = self.core.clone();
        let handle = thread::Builder::new()
            .name("tunnel-playback".to_string())
            .spawn(move || playback_worker(core, rx))?;

        *queue = Some(tx);
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Hand a clip over for playback.
    ///
    /// Returns immediately; clips play in arrival order. Without a running
    /// worker the clip is played on the calling thread.
    pub fn play(&self, clip: AudioClip) {
        let clip = match self.queue.lock().as_ref() {
            Some(tx) => match tx.send(clip) {
                Ok(()) => return,
                Err(e) => e.into_inner(),
            },
            None => clip,
        };
        let _ = self.core.play_now(clip);
    }

    /// Play a clip on the calling thread and wait for it to finish
    pub fn play_blocking(&self, clip: AudioClip) -> Result<(), AudioError> {
        self.core.play_now(clip)
    }

    /// Stop accepting clips and wait for queued ones to finish
    pub fn shutdown(&self) {
        self.queue.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn playback_worker(core: Arc<CoordinatorCore>, rx: Receiver<AudioClip>) {
    for clip in rx.iter() {
        // Failures are logged and count as completion
        let _ = core.play_now(clip);
    }
    tracing::debug!("Playback worker stopped");
}
