//! Controller Application
//!
//! Minimal controller peer for exercising a connector by hand: accepts one
//! connector at a time, sends heartbeats and framed clips, and records the
//! inbound microphone stream to a WAV file.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fay_connector::{
    constants::{CONTROLLER_HEARTBEAT_SECS, DEFAULT_CONTROLLER_PORT},
    protocol::{
        CLIP_END_BYTES, CLIP_START_MARKER, HEARTBEAT_MARKER, OUTBOUND_CHUNK_SIZE, PCM_BITS_PER_SAMPLE,
        PCM_CHANNELS, PCM_SAMPLE_RATE,
    },
};

#[derive(Debug, Parser)]
#[command(name = "controller", about = "Test controller for the audio tunnel")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROLLER_PORT)))]
    bind: SocketAddr,

    /// MP3 files to send, in order, after a connector connects
    #[arg(long = "clip")]
    clips: Vec<PathBuf>,

    /// Seconds between clips
    #[arg(long, default_value_t = 10)]
    clip_interval: u64,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = CONTROLLER_HEARTBEAT_SECS)]
    heartbeat: u64,

    /// Where inbound microphone audio is recorded
    #[arg(long, default_value = "inbound.wav")]
    record: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut clips = Vec::with_capacity(args.clips.len());
    for path in &args.clips {
        let data = fs::read(path).with_context(|| format!("reading clip {}", path.display()))?;
        tracing::info!("Loaded clip {} ({} bytes)", path.display(), data.len());
        clips.push(data);
    }
    let clips = Arc::new(clips);

    let listener = TcpListener::bind(args.bind).with_context(|| format!("binding {}", args.bind))?;
    tracing::info!("Controller listening on {}", args.bind);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
        tracing::info!("Connector connected from {}", peer);

        if let Err(e) = serve(stream, &args, clips.clone()) {
            tracing::warn!("Session with {} ended: {:#}", peer, e);
        } else {
            tracing::info!("Connector {} disconnected", peer);
        }
    }
    Ok(())
}

/// Run one session until the connector goes away
fn serve(stream: TcpStream, args: &Args, clips: Arc<Vec<Vec<u8>>>) -> Result<()> {
    stream.set_nodelay(true)?;
    let done = Arc::new(AtomicBool::new(false));

    let outbound = stream.try_clone()?;
    let heartbeat = Duration::from_secs(args.heartbeat);
    let clip_interval = Duration::from_secs(args.clip_interval);
    let writer_done = done.clone();
    let writer = thread::Builder::new()
        .name("controller-writer".to_string())
        .spawn(move || write_loop(outbound, heartbeat, clip_interval, &clips, &writer_done))?;

    let result = record(stream, &args.record);
    done.store(true, Ordering::SeqCst);
    if writer.join().is_err() {
        tracing::error!("Writer thread panicked");
    }
    result
}

/// Heartbeats on a fixed cadence, clips in between
fn write_loop(
    mut stream: TcpStream,
    heartbeat: Duration,
    clip_interval: Duration,
    clips: &[Vec<u8>],
    done: &AtomicBool,
) {
    let mut last_heartbeat: Option<Instant> = None;
    let mut next_clip = Instant::now() + clip_interval;
    let mut pending = clips.iter();

    while !done.load(Ordering::SeqCst) {
        let now = Instant::now();

        if last_heartbeat.map_or(true, |t| now.duration_since(t) >= heartbeat) {
            if let Err(e) = stream.write_all(&HEARTBEAT_MARKER) {
                tracing::debug!("Heartbeat failed: {}", e);
                break;
            }
            last_heartbeat = Some(now);
        }

        if now >= next_clip {
            if let Some(clip) = pending.next() {
                if let Err(e) = send_clip(&mut stream, clip) {
                    tracing::warn!("Failed to send clip: {}", e);
                    break;
                }
                tracing::info!("Sent clip ({} bytes)", clip.len());
            }
            next_clip = now + clip_interval;
        }

        thread::sleep(Duration::from_millis(100));
    }
}

fn send_clip(stream: &mut TcpStream, clip: &[u8]) -> std::io::Result<()> {
    stream.write_all(&CLIP_START_MARKER)?;
    stream.write_all(clip)?;
    stream.write_all(&CLIP_END_BYTES)?;
    stream.flush()
}

/// Record inbound 16-bit PCM until the stream ends
fn record(mut stream: TcpStream, path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: PCM_CHANNELS,
        sample_rate: PCM_SAMPLE_RATE,
        bits_per_sample: PCM_BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut wav = hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    tracing::info!("Recording microphone audio to {}", path.display());

    let mut buf = [0u8; OUTBOUND_CHUNK_SIZE];
    let mut carry: Option<u8> = None;
    let mut total = 0usize;
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Read failed: {}", e);
                break;
            }
        };
        total += n;

        let mut bytes = buf[..n].iter().copied();
        if let Some(low) = carry.take() {
            if let Some(high) = bytes.next() {
                wav.write_sample(i16::from_le_bytes([low, high]))?;
            }
        }
        let rest: Vec<u8> = bytes.collect();
        let mut pairs = rest.chunks_exact(2);
        for pair in &mut pairs {
            wav.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        carry = pairs.remainder().first().copied();
    }

    wav.finalize()?;
    tracing::info!("Recorded {:.1} KB of microphone audio", total as f64 / 1024.0);
    Ok(())
}
