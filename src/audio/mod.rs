//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod clip;
pub mod device;
pub mod playback;
pub mod route;

pub use buffer::PcmRingBuffer;
pub use capture::AudioCapture;
pub use clip::AudioClip;
pub use device::{list_devices, AudioDevice, AudioDeviceInfo};
pub use playback::ClipPlayer;
pub use route::{AudioRoute, PlaybackCompletion, PlaybackNotifier};

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, SharedPcmBuffer};
use crate::constants::CAPTURE_BUFFER_BLOCKS;
use crate::error::AudioError;

/// [`AudioRoute`] backed by the local sound hardware through cpal
pub struct CpalAudioRoute {
    capture: Mutex<AudioCapture>,
    buffer: SharedPcmBuffer,
    player: ClipPlayer,
    read_timeout: Duration,
    output_routed: AtomicBool,
}

impl CpalAudioRoute {
    pub fn new(input_device: Option<String>, output_device: Option<String>, read_timeout: Duration) -> Self {
        let buffer = create_shared_buffer(CAPTURE_BUFFER_BLOCKS);
        Self {
            capture: Mutex::new(AudioCapture::new(input_device, buffer.clone())),
            buffer,
            player: ClipPlayer::new(output_device),
            read_timeout,
            output_routed: AtomicBool::new(false),
        }
    }
}

impl AudioRoute for CpalAudioRoute {
    fn start_capture(&self) -> Result<(), AudioError> {
        self.capture.lock().start()
    }

    fn read_chunk(&self, buf: &mut [u8]) -> usize {
        self.buffer.read_chunk(buf, self.read_timeout)
    }

    fn stop_capture(&self) {
        self.capture.lock().stop();
    }

    fn start_output_route(&self) -> Result<(), AudioError> {
        // Desktop hosts route output per stream; only the state is tracked.
        if !self.output_routed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Output route acquired");
        }
        Ok(())
    }

    fn stop_output_route(&self) {
        if self.output_routed.swap(false, Ordering::SeqCst) {
            tracing::debug!("Output route released");
        }
    }

    fn play_clip(&self, payload: Bytes) -> PlaybackCompletion {
        self.player.play(payload)
    }
}
