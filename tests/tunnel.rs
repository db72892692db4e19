//! End-to-end tunnel behaviour against a loopback controller

use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fay_connector::audio::{AudioRoute, PlaybackCompletion};
use fay_connector::config::{StaticAddress, TunnelTimings};
use fay_connector::error::AudioError;
use fay_connector::protocol::{CLIP_END_BYTES, CLIP_START_MARKER, HEARTBEAT_MARKER};
use fay_connector::tunnel::{ConnectionStatus, TunnelBuilder, TunnelService};

/// Audio route that produces a constant PCM pattern and "plays" clips by
/// sleeping for a fixed time
struct ScriptedRoute {
    silent: AtomicBool,
    play_time: Duration,
    capture_starts: Mutex<Vec<Instant>>,
    played: Mutex<Vec<Bytes>>,
    play_windows: Arc<Mutex<Vec<(Instant, Instant)>>>,
}

impl ScriptedRoute {
    fn new(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            silent: AtomicBool::new(false),
            play_time,
            capture_starts: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            play_windows: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

impl AudioRoute for ScriptedRoute {
    fn start_capture(&self) -> Result<(), AudioError> {
        self.capture_starts.lock().push(Instant::now());
        Ok(())
    }

    fn read_chunk(&self, buf: &mut [u8]) -> usize {
        if self.silent.load(Ordering::SeqCst) {
            return 0;
        }
        let n = buf.len().min(320);
        buf[..n].fill(0x11);
        n
    }

    fn stop_capture(&self) {}

    fn start_output_route(&self) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop_output_route(&self) {}

    fn play_clip(&self, payload: Bytes) -> PlaybackCompletion {
        self.played.lock().push(payload);
        let (notifier, completion) = PlaybackCompletion::channel();
        let play_time = self.play_time;
        let windows = self.play_windows.clone();
        let started = Instant::now();
        thread::spawn(move || {
            thread::sleep(play_time);
            windows.lock().push((started, Instant::now()));
            notifier.complete(Ok(()));
        });
        completion
    }
}

fn fast_timings() -> TunnelTimings {
    TunnelTimings {
        liveness_timeout_ms: 5_000,
        supervisor_interval_ms: 30,
        retry_delay_ms: 20,
        capture_interval_ms: 10,
        device_busy_backoff_ms: 400,
        receive_pause_ms: 10,
        connect_timeout_ms: 1_000,
        write_timeout_ms: 1_000,
        read_chunk_timeout_ms: 50,
        playback_settle_ms: 0,
    }
}

fn controller() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    (listener, address)
}

fn tunnel(address: &str, route: Arc<ScriptedRoute>, timings: TunnelTimings, mic: bool) -> TunnelService {
    let service = TunnelBuilder::new(Arc::new(StaticAddress::new(address)), route)
        .timings(timings)
        .mic_enabled(mic)
        .build();
    service.start().unwrap();
    service
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn clip_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = CLIP_START_MARKER.to_vec();
    frame.extend_from_slice(body);
    frame.extend_from_slice(&CLIP_END_BYTES);
    frame
}

/// Drain everything the connector sends, noting when each read returned
fn record_arrivals(mut peer: TcpStream) -> Arc<Mutex<Vec<(Instant, usize)>>> {
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let sink = arrivals.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        while let Ok(n) = peer.read(&mut buf) {
            if n == 0 {
                break;
            }
            sink.lock().push((Instant::now(), n));
        }
    });
    arrivals
}

#[test]
fn test_clip_delivered_to_playback() {
    let (listener, address) = controller();
    let route = ScriptedRoute::new(Duration::from_millis(20));
    let service = tunnel(&address, route.clone(), fast_timings(), false);

    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(&HEARTBEAT_MARKER).unwrap();
    peer.write_all(&clip_frame(&[0x41, 0x42, 0x43])).unwrap();

    assert!(wait_until(Duration::from_secs(3), || !route.played.lock().is_empty()));
    assert_eq!(route.played.lock()[0], Bytes::from_static(b"ABC"));

    let stats = service.stats();
    assert_eq!(stats.clips_received, 1);
    assert!(stats.heartbeats >= 1);
    service.shutdown();
}

#[test]
fn test_undecodable_clip_is_dropped_and_stream_continues() {
    let (listener, address) = controller();
    let route = ScriptedRoute::new(Duration::from_millis(20));
    let service = tunnel(&address, route.clone(), fast_timings(), false);

    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(&HEARTBEAT_MARKER).unwrap();

    // Body text "41" followed by a terminator that starts mid-byte, which
    // leaves an odd number of hex digits before it.
    let mut bad = CLIP_START_MARKER.to_vec();
    bad.extend_from_slice(&[0x41, 0x10, 0x80, 0x70, 0x60, 0x50, 0x40, 0x30, 0x20, 0x10, 0x0F]);
    peer.write_all(&bad).unwrap();
    assert!(wait_until(Duration::from_secs(3), || service.stats().clips_dropped == 1));

    peer.write_all(&clip_frame(b"ABC")).unwrap();
    assert!(wait_until(Duration::from_secs(3), || !route.played.lock().is_empty()));
    thread::sleep(Duration::from_millis(100));

    assert_eq!(*route.played.lock(), vec![Bytes::from_static(b"ABC")]);
    let stats = service.stats();
    assert_eq!(stats.clips_dropped, 1);
    assert_eq!(stats.clips_received, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(service.connection_status(), ConnectionStatus::Connected);
    service.shutdown();
}

#[test]
fn test_heartbeat_inside_clip_is_ignored() {
    let (listener, address) = controller();
    let route = ScriptedRoute::new(Duration::from_millis(20));
    let service = tunnel(&address, route.clone(), fast_timings(), false);

    let (mut peer, _) = listener.accept().unwrap();
    peer.write_all(&CLIP_START_MARKER).unwrap();
    peer.write_all(&[0x41]).unwrap();
    thread::sleep(Duration::from_millis(30));
    peer.write_all(&HEARTBEAT_MARKER).unwrap();
    thread::sleep(Duration::from_millis(30));
    peer.write_all(&[0x42, 0x43]).unwrap();
    peer.write_all(&CLIP_END_BYTES).unwrap();

    assert!(wait_until(Duration::from_secs(3), || !route.played.lock().is_empty()));
    assert_eq!(route.played.lock()[0], Bytes::from_static(b"ABC"));
    service.shutdown();
}

#[test]
fn test_silent_controller_is_dropped_and_redialed() {
    let (listener, address) = controller();
    let timings = TunnelTimings {
        liveness_timeout_ms: 200,
        ..fast_timings()
    };
    let route = ScriptedRoute::new(Duration::ZERO);
    let service = tunnel(&address, route, timings, false);

    let (mut first, _) = listener.accept().unwrap();
    first.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

    // Nothing is ever sent, so the connector must give up on this link
    let mut buf = [0u8; 16];
    let closed = matches!(first.read(&mut buf), Ok(0) | Err(_));
    assert!(closed);

    let (_second, _) = listener.accept().unwrap();
    assert!(wait_until(Duration::from_secs(2), || service.stats().reconnects >= 2));
    service.shutdown();
}

#[test]
fn test_no_audio_sent_while_playing() {
    let (listener, address) = controller();
    let route = ScriptedRoute::new(Duration::from_millis(400));
    let service = tunnel(&address, route.clone(), fast_timings(), true);

    let (peer, _) = listener.accept().unwrap();
    let mut controller_side = peer.try_clone().unwrap();
    let arrivals = record_arrivals(peer);

    assert!(wait_until(Duration::from_secs(3), || !arrivals.lock().is_empty()));
    controller_side.write_all(&clip_frame(b"clip")).unwrap();

    assert!(wait_until(Duration::from_secs(3), || !route.play_windows.lock().is_empty()));
    let (started, finished) = route.play_windows.lock()[0];

    // Audio resumes once the clip is done
    assert!(wait_until(Duration::from_secs(3), || {
        arrivals.lock().iter().any(|(at, _)| *at > finished)
    }));

    let margin = Duration::from_millis(50);
    let during: Vec<_> = arrivals
        .lock()
        .iter()
        .filter(|(at, _)| *at > started + margin && *at < finished)
        .copied()
        .collect();
    assert!(during.is_empty(), "{} chunks arrived during playback", during.len());

    service.shutdown();
}

#[test]
fn test_silent_microphone_backs_off() {
    let (listener, address) = controller();
    let route = ScriptedRoute::new(Duration::ZERO);
    route.silent.store(true, Ordering::SeqCst);
    let service = tunnel(&address, route.clone(), fast_timings(), true);

    let (_peer, _) = listener.accept().unwrap();
    thread::sleep(Duration::from_millis(1_000));
    service.shutdown();

    let starts = route.capture_starts.lock();
    assert!(!starts.is_empty());
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(400));
    }
}

#[test]
fn test_invalid_address_never_dials() {
    let route = ScriptedRoute::new(Duration::ZERO);
    let service = tunnel("bad-address", route.clone(), fast_timings(), true);

    thread::sleep(Duration::from_millis(200));
    assert_eq!(service.connection().dial_attempts(), 0);
    assert_eq!(service.connection_status(), ConnectionStatus::Connecting);
    assert!(route.capture_starts.lock().is_empty());

    service.shutdown();
    assert_eq!(service.connection_status(), ConnectionStatus::Disconnected);
}

#[test]
fn test_shutdown_leaves_no_connection_open() {
    let (listener, address) = controller();
    let route = ScriptedRoute::new(Duration::ZERO);
    let service = tunnel(&address, route, fast_timings(), false);

    let (mut peer, _) = listener.accept().unwrap();
    assert!(wait_until(Duration::from_secs(2), || service.connection().is_connected()));
    service.shutdown();

    assert!(!service.connection().is_connected());
    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 16];
    assert!(matches!(peer.read(&mut buf), Ok(0) | Err(_)));
}
