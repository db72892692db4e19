//! Outbound capture/send loop
//!
//! Reads microphone PCM in fixed-size chunks and writes it to the controller
//! verbatim, yielding the device whenever a clip is playing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::AudioRoute;
use crate::network::connection::ConnectionManager;
use crate::network::pause_while_running;
use crate::protocol::OUTBOUND_CHUNK_SIZE;
use crate::tunnel::state::{CaptureToggle, Exclusion};
use crate::tunnel::stats::TransferStats;

/// What one pass of the send loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStep {
    /// No connection; waited for the supervisor to dial
    Disconnected,
    /// Playback owns the device
    Yielded,
    /// Microphone switched off
    Disabled,
    /// Device gave nothing; backed off
    DeviceBusy,
    /// A chunk was written
    Sent(usize),
    /// Playback started between reading and writing; chunk discarded
    Discarded,
    /// Write failed; connection torn down
    WriteFailed,
}

/// Capture/send loop for the controller connection
pub struct OutboundCaptureSender {
    connection: Arc<ConnectionManager>,
    route: Arc<dyn AudioRoute>,
    exclusion: Arc<Exclusion>,
    toggle: CaptureToggle,
    stats: Arc<TransferStats>,
    running: Arc<AtomicBool>,
}

impl OutboundCaptureSender {
    pub fn new(
        connection: Arc<ConnectionManager>,
        route: Arc<dyn AudioRoute>,
        exclusion: Arc<Exclusion>,
        toggle: CaptureToggle,
        stats: Arc<TransferStats>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connection,
            route,
            exclusion,
            toggle,
            stats,
            running,
        }
    }

    /// Run until the running flag clears, then release the microphone
    pub fn run(&self) {
        let interval = self.connection.timings().capture_interval();
        let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];

        tracing::debug!("Send loop started");
        while self.running.load(Ordering::Relaxed) {
            pause_while_running(&self.running, interval);
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            self.step(&mut chunk);
        }

        self.release_capture();
        tracing::debug!("Send loop stopped");
    }

    /// One pass of the send loop
    pub fn step(&self, chunk: &mut [u8; OUTBOUND_CHUNK_SIZE]) -> SendStep {
        let timings = self.connection.timings();

        let Some(link) = self.connection.current() else {
            self.release_capture();
            pause_while_running(&self.running, timings.retry_delay());
            return SendStep::Disconnected;
        };

        if self.exclusion.is_playing() {
            return SendStep::Yielded;
        }

        if !self.toggle.is_enabled() {
            self.release_capture();
            return SendStep::Disabled;
        }

        match self.exclusion.begin_capture(|| self.route.start_capture()) {
            Ok(true) => {}
            Ok(false) => return SendStep::Yielded,
            Err(e) => {
                tracing::warn!(
                    "Microphone unavailable ({}), retrying in {}s",
                    e,
                    timings.device_busy_backoff().as_secs()
                );
                pause_while_running(&self.running, timings.device_busy_backoff());
                return SendStep::DeviceBusy;
            }
        }

        let n = self.route.read_chunk(chunk);
        if n == 0 {
            tracing::warn!(
                "Microphone returned no audio, releasing it for {}s",
                timings.device_busy_backoff().as_secs()
            );
            self.release_capture();
            pause_while_running(&self.running, timings.device_busy_backoff());
            return SendStep::DeviceBusy;
        }

        match self.exclusion.while_capturing(|| link.write_all(&chunk[..n])) {
            None => SendStep::Discarded,
            Some(Ok(())) => {
                self.stats.record_sent(n);
                SendStep::Sent(n)
            }
            Some(Err(e)) => {
                self.connection.disconnect(&link, &format!("send failed: {e}"));
                SendStep::WriteFailed
            }
        }
    }

    fn release_capture(&self) {
        if self.exclusion.end_capture(|| self.route.stop_capture()) {
            tracing::debug!("Microphone released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PlaybackCompletion;
    use crate::config::{StaticAddress, TunnelTimings};
    use crate::error::AudioError;
    use bytes::Bytes;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use crossbeam_channel::bounded;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Route whose microphone yields a fixed pattern, or nothing
    #[derive(Default)]
    struct FakeMic {
        silent: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl AudioRoute for FakeMic {
        fn start_capture(&self) -> Result<(), AudioError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_chunk(&self, buf: &mut [u8]) -> usize {
            if self.silent.load(Ordering::SeqCst) {
                return 0;
            }
            let n = buf.len().min(640);
            for (i, b) in buf[..n].iter_mut().enumerate() {
                *b = i as u8;
            }
            n
        }

        fn stop_capture(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn start_output_route(&self) -> Result<(), AudioError> {
            Ok(())
        }

        fn stop_output_route(&self) {}

        fn play_clip(&self, _payload: Bytes) -> PlaybackCompletion {
            PlaybackCompletion::ready(Ok(()))
        }
    }

    struct Harness {
        sender: OutboundCaptureSender,
        mic: Arc<FakeMic>,
        exclusion: Arc<Exclusion>,
        toggle: CaptureToggle,
        stats: Arc<TransferStats>,
        peer: Option<TcpStream>,
    }

    fn harness(connect: bool) -> Harness {
        harness_with(
            connect,
            TunnelTimings {
                retry_delay_ms: 10,
                device_busy_backoff_ms: 100,
                ..Default::default()
            },
        )
    }

    fn harness_with(connect: bool, timings: TunnelTimings) -> Harness {
        let (source, peer) = if connect {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            let accept = thread::spawn(move || listener.accept().map(|(s, _)| s));
            (StaticAddress::new(format!("127.0.0.1:{port}")), Some(accept))
        } else {
            (StaticAddress::unset(), None)
        };

        let connection = Arc::new(ConnectionManager::new(Arc::new(source), timings));
        connection.ensure_connected();
        let peer = peer.map(|accept| accept.join().unwrap().unwrap());

        let mic = Arc::new(FakeMic::default());
        let exclusion = Arc::new(Exclusion::new());
        let toggle = CaptureToggle::new(true);
        let stats = Arc::new(TransferStats::new());
        let sender = OutboundCaptureSender::new(
            connection,
            mic.clone(),
            exclusion.clone(),
            toggle.clone(),
            stats.clone(),
            Arc::new(AtomicBool::new(true)),
        );

        Harness {
            sender,
            mic,
            exclusion,
            toggle,
            stats,
            peer,
        }
    }

    #[test]
    fn test_chunk_written_verbatim() {
        let mut h = harness(true);
        let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];

        assert_eq!(h.sender.step(&mut chunk), SendStep::Sent(640));
        assert_eq!(h.exclusion.current(), crate::tunnel::ExclusionState::Capturing);
        assert_eq!(h.stats.snapshot().bytes_sent, 640);

        let mut received = vec![0u8; 640];
        h.peer.as_mut().unwrap().read_exact(&mut received).unwrap();
        assert_eq!(received[..4], [0, 1, 2, 3]);
        assert_eq!(received[639], (639 % 256) as u8);
    }

    #[test]
    fn test_no_capture_while_disconnected() {
        let h = harness(false);
        let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];

        assert_eq!(h.sender.step(&mut chunk), SendStep::Disconnected);
        assert_eq!(h.mic.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_yields_to_playback() {
        let h = harness(true);
        let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];
        h.exclusion.begin_playback(|| {});

        assert_eq!(h.sender.step(&mut chunk), SendStep::Yielded);
        assert_eq!(h.mic.starts.load(Ordering::SeqCst), 0);
        assert_eq!(h.stats.snapshot().chunks_sent, 0);
    }

    #[test]
    fn test_toggle_off_releases_microphone() {
        let h = harness(true);
        let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];

        assert!(matches!(h.sender.step(&mut chunk), SendStep::Sent(_)));
        h.toggle.set(false);
        assert_eq!(h.sender.step(&mut chunk), SendStep::Disabled);
        assert_eq!(h.mic.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.exclusion.current(), crate::tunnel::ExclusionState::Idle);

        assert_eq!(h.sender.step(&mut chunk), SendStep::Disabled);
        assert_eq!(h.mic.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_silent_device_backs_off() {
        let h = harness(true);
        let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];
        h.mic.silent.store(true, Ordering::SeqCst);

        let started = Instant::now();
        assert_eq!(h.sender.step(&mut chunk), SendStep::DeviceBusy);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(h.mic.starts.load(Ordering::SeqCst), 1);
        assert_eq!(h.mic.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.exclusion.current(), crate::tunnel::ExclusionState::Idle);
    }

    #[test]
    fn test_stalled_controller_does_not_block_playback() {
        let h = harness_with(
            true,
            TunnelTimings {
                write_timeout_ms: 200,
                ..Default::default()
            },
        );
        // The peer stays open in the harness but is never read from
        thread::scope(|scope| {
            let writer = scope.spawn(|| {
                let mut chunk = [0u8; OUTBOUND_CHUNK_SIZE];
                let deadline = Instant::now() + Duration::from_secs(20);
                loop {
                    match h.sender.step(&mut chunk) {
                        SendStep::Sent(_) if Instant::now() < deadline => {}
                        other => return other,
                    }
                }
            });

            // Wait for the socket buffers to fill and the write to stall
            let mut last = h.stats.snapshot().bytes_sent;
            let mut idle_polls = 0;
            while idle_polls < 2 {
                thread::sleep(Duration::from_millis(30));
                let now = h.stats.snapshot().bytes_sent;
                idle_polls = if now > 0 && now == last { idle_polls + 1 } else { 0 };
                last = now;
            }

            let (done_tx, done_rx) = bounded(1);
            let exclusion = h.exclusion.clone();
            scope.spawn(move || {
                let previous = exclusion.begin_playback(|| {});
                let _ = done_tx.send(previous);
            });

            let Ok(previous) = done_rx.recv_timeout(Duration::from_secs(3)) else {
                // Unblock the writer so the scope can end
                h.sender.connection.close("test");
                panic!("playback blocked behind a stalled write");
            };
            assert_eq!(previous, crate::tunnel::ExclusionState::Capturing);
            assert_eq!(writer.join().unwrap(), SendStep::WriteFailed);
        });

        assert!(!h.sender.connection.is_connected());
        assert!(h.stats.snapshot().bytes_sent > 0);
    }
}
