//! Shared state between the tunnel loops
//!
//! [`Exclusion`] is the only place the capture/playback tri-state lives. Each
//! transition runs under one mutex together with the audio route call that
//! goes with it, so the microphone can never be started while a clip plays
//! and an outbound chunk can never be written once playback has begun.
//!
//! Writers:
//! - the capture/send loop moves `Idle <-> Capturing`
//! - the playback coordinator moves `* -> Playing -> Idle`

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which direction currently owns the audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExclusionState {
    #[default]
    Idle,
    Capturing,
    Playing,
}

impl fmt::Display for ExclusionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExclusionState::Idle => "idle",
            ExclusionState::Capturing => "capturing",
            ExclusionState::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// Mutex-guarded [`ExclusionState`]
#[derive(Debug, Default)]
pub struct Exclusion {
    state: Mutex<ExclusionState>,
}

impl Exclusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ExclusionState {
        *self.state.lock()
    }

    pub fn is_playing(&self) -> bool {
        self.current() == ExclusionState::Playing
    }

    /// Move `Idle -> Capturing`, running `start` under the lock.
    ///
    /// Returns `Ok(true)` when capture is (now or already) active and
    /// `Ok(false)` when playback holds the device. If `start` fails the state
    /// stays `Idle`.
    pub fn begin_capture<E>(&self, start: impl FnOnce() -> Result<(), E>) -> Result<bool, E> {
        let mut state = self.state.lock();
        match *state {
            ExclusionState::Playing => Ok(false),
            ExclusionState::Capturing => Ok(true),
            ExclusionState::Idle => {
                start()?;
                *state = ExclusionState::Capturing;
                Ok(true)
            }
        }
    }

    /// Move `Capturing -> Idle`, running `stop` under the lock.
    ///
    /// Returns whether capture was active.
    pub fn end_capture(&self, stop: impl FnOnce()) -> bool {
        let mut state = self.state.lock();
        if *state == ExclusionState::Capturing {
            stop();
            *state = ExclusionState::Idle;
            true
        } else {
            false
        }
    }

    /// Run `f` only while capture owns the device; the state cannot change
    /// until `f` returns.
    pub fn while_capturing<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.lock();
        (*state == ExclusionState::Capturing).then(f)
    }

    /// Enter `Playing`. If capture was active, `stop_capture` runs first,
    /// under the lock. Returns the previous state.
    pub fn begin_playback(&self, stop_capture: impl FnOnce()) -> ExclusionState {
        let mut state = self.state.lock();
        let previous = *state;
        if previous == ExclusionState::Capturing {
            stop_capture();
        }
        *state = ExclusionState::Playing;
        previous
    }

    /// Leave `Playing` for `Idle`
    pub fn end_playback(&self) {
        let mut state = self.state.lock();
        if *state == ExclusionState::Playing {
            *state = ExclusionState::Idle;
        }
    }
}

/// Administrative microphone switch, flipped from outside the tunnel
///
/// The capture loop samples it once per iteration.
#[derive(Debug, Clone, Default)]
pub struct CaptureToggle(Arc<AtomicBool>);

impl CaptureToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, enabled: bool) {
        let previous = self.0.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!("Microphone {}", if enabled { "enabled" } else { "disabled" });
        }
    }
}
