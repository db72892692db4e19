//! Lock-free buffer between the capture callback and the send loop
//!
//! The cpal callback pushes whole callback buffers as PCM byte blocks; the send
//! loop drains them into fixed-size outbound chunks.

use bytes::{Buf, Bytes};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for the capture callback
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Ring buffer of 16-bit little-endian PCM blocks
pub struct PcmRingBuffer {
    queue: ArrayQueue<Bytes>,
    /// Unconsumed tail of the last popped block
    carry: Mutex<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl PcmRingBuffer {
    /// Create a new ring buffer holding up to `capacity` blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            carry: Mutex::new(Bytes::new()),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a block from the capture callback.
    /// Returns false if the buffer is full (overflow); the block is dropped.
    pub fn push(&self, block: Bytes) -> bool {
        match self.queue.push(block) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Push samples converted to 16-bit little-endian PCM
    pub fn push_samples(&self, samples: &[f32]) -> bool {
        self.push(f32_to_pcm16(samples))
    }

    /// Fill `out` with buffered PCM, waiting at most `timeout` for it to fill.
    ///
    /// Returns the number of bytes written, possibly fewer than `out.len()`
    /// when the deadline passes; 0 is counted as an underrun.
    pub fn read_chunk(&self, out: &mut [u8], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < out.len() {
            // The carry lock is never held across a sleep, so `clear` stays prompt.
            let n = {
                let mut carry = self.carry.lock();
                if carry.is_empty() {
                    if let Some(block) = self.queue.pop() {
                        *carry = block;
                    }
                }
                let n = (out.len() - filled).min(carry.len());
                out[filled..filled + n].copy_from_slice(&carry[..n]);
                carry.advance(n);
                n
            };

            if n == 0 {
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            filled += n;
        }

        if filled == 0 {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        filled
    }

    /// Drop everything buffered, e.g. when capture stops
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
        *self.carry.lock() = Bytes::new();
    }

    /// Number of buffered blocks
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.carry.lock().is_empty()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a PCM buffer
pub type SharedPcmBuffer = Arc<PcmRingBuffer>;

/// Create a new shared PCM buffer
pub fn create_shared_buffer(capacity: usize) -> SharedPcmBuffer {
    Arc::new(PcmRingBuffer::new(capacity))
}

/// Convert float samples to 16-bit little-endian PCM
pub fn f32_to_pcm16(samples: &[f32]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(out)
}

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
