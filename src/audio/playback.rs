//! Clip playback to the output device
//!
//! Clips arrive as MP3. Each one is decoded with minimp3, resampled to the
//! output rate when the device cannot run at the clip's rate, and rendered on
//! a dedicated thread that reports through a [`PlaybackCompletion`].

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::device::get_output_device;
use crate::audio::route::{PlaybackCompletion, PlaybackNotifier};
use crate::error::AudioError;

/// Mono audio decoded from a clip
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}


/// Plays clips on the default (or named) output device
#[derive(Debug, Clone, Default)]
pub struct ClipPlayer {
    device_name: Option<String>,
}

impl ClipPlayer {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// Start playback on a background thread
    pub fn play(&self, payload: Bytes) -> PlaybackCompletion {
        let (notifier, completion) = PlaybackCompletion::channel();
        let device_name = self.device_name.clone();

        let spawned = thread::Builder::new()
            .name("clip-playback".to_string())
            .spawn(move || run_playback(device_name, payload, notifier));

        match spawned {
            Ok(_) => completion,
            Err(e) => PlaybackCompletion::ready(Err(AudioError::PlaybackFailed(e.to_string()))),
        }
    }
}

fn run_playback(device_name: Option<String>, payload: Bytes, notifier: PlaybackNotifier) {
    let result = decode_mp3(&payload).and_then(|audio| play_blocking(device_name.as_deref(), audio));
    notifier.complete(result);
}

/// Decode MP3 bytes to mono f32 samples
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio, AudioError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        (left + right) / 2.0
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(AudioError::UnsupportedFormat(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(AudioError::UnsupportedFormat("clip contains no audio frames".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Resample mono audio with rubato
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let mut resampler = FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, 2, 1)
        .map_err(|e| AudioError::UnsupportedFormat(format!("Resampler init failed: {e}")))?;

    let mut output = Vec::with_capacity(samples.len() * to_rate as usize / from_rate as usize + chunk_size);
    for chunk in samples.chunks(chunk_size) {
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        // Pad the tail so the last partial chunk is not lost
        input.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[input], None)
            .map_err(|e| AudioError::UnsupportedFormat(format!("Resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}

fn play_blocking(device_name: Option<&str>, audio: DecodedAudio) -> Result<(), AudioError> {
    let device = get_output_device(device_name)?;
    let config = device.output_config_near(audio.sample_rate)?;
    let channels = config.channels as usize;
    let output_rate = config.sample_rate.0;

    let samples = resample(&audio.samples, audio.sample_rate, output_rate)?;
    let sample_count = samples.len();
    let expected = Duration::from_secs_f64(sample_count as f64 / output_rate as f64);

    let samples = Arc::new(samples);
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(AtomicBool::new(false));
    let failed: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let stream = {
        let samples = samples.clone();
        let position = position.clone();
        let finished = finished.clone();
        let failed = failed.clone();

        device
            .inner()
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = match samples.get(*pos) {
                            Some(&s) => {
                                *pos += 1;
                                s
                            }
                            None => {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            }
                        };
                        frame.fill(sample);
                    }
                },
                move |err| {
                    tracing::warn!("Playback stream error: {}", err);
                    *failed.lock() = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?
    };

    stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
    tracing::debug!(
        "Playing {} samples at {} Hz on {} ({:.1}s)",
        sample_count,
        output_rate,
        device.name,
        expected.as_secs_f32()
    );

    let start = Instant::now();
    let timeout = expected + Duration::from_millis(500);
    while !finished.load(Ordering::Relaxed) {
        if let Some(err) = failed.lock().take() {
            return Err(AudioError::PlaybackFailed(err));
        }
        if start.elapsed() > timeout {
            tracing::warn!("Playback did not drain in time, stopping");
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    // Let the device flush its last buffer
    thread::sleep(Duration::from_millis(100));
    drop(stream);
    Ok(())
}
