//! Microphone capture
//!
//! The cpal input stream lives on its own thread for as long as capture is
//! running; its callback converts to 16 kHz mono 16-bit PCM and pushes into a
//! shared [`PcmRingBuffer`](crate::audio::buffer::PcmRingBuffer).

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BuildStreamError, StreamConfig};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{downmix_to_mono, SharedPcmBuffer};
use crate::audio::device::get_input_device;
use crate::error::AudioError;
use crate::protocol::PCM_SAMPLE_RATE;

/// How long `start` waits for the stream thread to report back
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Microphone capture feeding the outbound PCM buffer
pub struct AudioCapture {
    /// Input device name, `None` for the system default
    device_name: Option<String>,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Output buffer for captured PCM
    output_buffer: SharedPcmBuffer,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioCapture {
    pub fn new(device_name: Option<String>, output_buffer: SharedPcmBuffer) -> Self {
        Self {
            device_name,
            running: Arc::new(AtomicBool::new(false)),
            output_buffer,
            thread_handle: None,
        }
    }

    /// Start capturing audio
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // A previous stream thread may have exited on its own after an error.
        self.join_thread();

        let device = get_input_device(self.device_name.as_deref())?;
        let config: StreamConfig = device.input_config_at(PCM_SAMPLE_RATE)?;
        let channels = config.channels;

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let output_buffer = self.output_buffer.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        self.output_buffer.clear();
        running.store(true, Ordering::SeqCst);

        tracing::debug!(
            "Opening capture on {} ({} Hz, {} ch)",
            device.name,
            config.sample_rate.0,
            channels
        );

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        let mono = downmix_to_mono(data, channels);
                        // Overflow is counted by the buffer; stale audio is dropped.
                        let _ = output_buffer.push_samples(&mono);
                    },
                    move |err| {
                        tracing::warn!("Capture stream error: {}", err);
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(BuildStreamError::DeviceNotAvailable) => {
                        running_for_loop.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(AudioError::DeviceBusy));
                        return;
                    }
                    Err(e) => {
                        running_for_loop.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                match stream.play() {
                    Ok(()) => {
                        let _ = ready_tx.send(Ok(()));
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                        // Stream is dropped here, releasing the microphone
                    }
                    Err(e) => {
                        running_for_loop.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AudioError::StreamError(e.to_string())
            })?;
        self.thread_handle = Some(handle);

        let result = match ready_rx.recv_timeout(STREAM_OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(AudioError::StreamError("capture stream did not start".to_string())),
        };
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
            self.join_thread();
        }
        result
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.join_thread();
        self.output_buffer.clear();
        if was_running {
            tracing::debug!(
                "Capture stopped ({} overflows, {} underruns)",
                self.output_buffer.overflow_count(),
                self.output_buffer.underrun_count()
            );
        }
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
