//! Inbound stream processing
//!
//! Reads 9-byte frame headers from the controller connection, keeps the
//! connection alive on heartbeats, and assembles clip transfers into
//! [`AudioClip`]s for the playback coordinator.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::AudioClip;
use crate::codec::{detect_marker, ClipAssembler, ClipProgress};
use crate::error::CodecError;
use crate::network::connection::ConnectionManager;
use crate::network::pause_while_running;
use crate::protocol::{FrameMarker, CLIP_READ_CHUNK, FRAME_HEADER_SIZE};
use crate::tunnel::coordinator::PlaybackCoordinator;
use crate::tunnel::stats::TransferStats;

/// One unit of inbound traffic
#[derive(Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Heartbeat,
    /// A clip transfer finished; `Err` if its body could not be decoded
    Clip(Result<Vec<u8>, CodecError>),
    /// A header matching neither marker
    Unrecognized([u8; FRAME_HEADER_SIZE]),
}

/// Frame parser over any byte source
///
/// Bytes that arrive after a clip terminator in the same read are kept and
/// parsed as the start of the next frame.
#[derive(Debug, Default)]
pub struct InboundParser {
    pending: Vec<u8>,
    assembler: ClipAssembler,
}

impl InboundParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next event.
    ///
    /// `on_chunk` is called with the size of every chunk read while a clip is
    /// being accumulated. A clean end of stream is reported as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn next_event<R: Read>(
        &mut self,
        reader: &mut R,
        mut on_chunk: impl FnMut(usize),
    ) -> io::Result<InboundEvent> {
        let header = self.read_header(reader)?;

        match detect_marker(&header) {
            Some(FrameMarker::Heartbeat) => Ok(InboundEvent::Heartbeat),
            None => Ok(InboundEvent::Unrecognized(header)),
            Some(FrameMarker::ClipStart) => {
                let mut chunk = [0u8; CLIP_READ_CHUNK];
                loop {
                    let n = self.read_chunk(reader, &mut chunk)?;
                    on_chunk(n);
                    if let ClipProgress::Complete { clip, remainder } = self.assembler.push(&chunk[..n]) {
                        self.pending = remainder;
                        return Ok(InboundEvent::Clip(clip));
                    }
                }
            }
        }
    }

    /// Drop buffered bytes and any partial clip
    pub fn reset(&mut self) {
        self.pending.clear();
        self.assembler.reset();
    }

    /// Bytes of a clip currently being accumulated
    pub fn buffered_clip_bytes(&self) -> usize {
        self.assembler.buffered_bytes()
    }

    fn read_header<R: Read>(&mut self, reader: &mut R) -> io::Result<[u8; FRAME_HEADER_SIZE]> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let from_pending = self.pending.len().min(FRAME_HEADER_SIZE);
        header[..from_pending].copy_from_slice(&self.pending[..from_pending]);
        self.pending.drain(..from_pending);
        reader.read_exact(&mut header[from_pending..])?;
        Ok(header)
    }

    fn read_chunk<R: Read>(&mut self, reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(chunk.len());
            chunk[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        match reader.read(chunk)? {
            0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed during clip")),
            n => Ok(n),
        }
    }
}

/// Receive loop for the controller connection
pub struct InboundStreamProcessor {
    connection: Arc<ConnectionManager>,
    coordinator: Arc<PlaybackCoordinator>,
    stats: Arc<TransferStats>,
    running: Arc<AtomicBool>,
}

impl InboundStreamProcessor {
    pub fn new(
        connection: Arc<ConnectionManager>,
        coordinator: Arc<PlaybackCoordinator>,
        stats: Arc<TransferStats>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connection,
            coordinator,
            stats,
            running,
        }
    }

    /// Run until the running flag clears
    pub fn run(&self) {
        let timings = self.connection.timings().clone();
        let mut parser = InboundParser::new();
        let mut generation = None;

        tracing::debug!("Receive loop started");
        while self.running.load(Ordering::Relaxed) {
            let Some(mut link) = self.connection.current() else {
                parser.reset();
                pause_while_running(&self.running, timings.retry_delay());
                continue;
            };
            if generation != Some(link.generation()) {
                parser.reset();
                generation = Some(link.generation());
            }

            let connection = &self.connection;
            let event = parser.next_event(&mut link, |_| connection.touch());

            match event {
                Ok(InboundEvent::Heartbeat) => {
                    self.connection.touch();
                    self.stats.record_heartbeat();
                    tracing::trace!("Heartbeat");
                    continue;
                }
                Ok(InboundEvent::Clip(Ok(payload))) => {
                    self.connection.touch();
                    self.stats.record_clip(payload.len());
                    let clip = AudioClip::new(payload);
                    tracing::info!("Clip received: {} ({} bytes)", clip.file_name(), clip.len());
                    self.coordinator.play(clip);
                }
                Ok(InboundEvent::Clip(Err(e))) => {
                    self.stats.record_dropped_clip();
                    tracing::warn!("Dropping undecodable clip: {}", e);
                }
                Ok(InboundEvent::Unrecognized(header)) => {
                    tracing::debug!("Ignoring unrecognized frame {}", hex::encode_upper(header));
                }
                Err(e) => {
                    parser.reset();
                    if self.running.load(Ordering::Relaxed) {
                        self.connection.disconnect(&link, &format!("receive failed: {e}"));
                    }
                    continue;
                }
            }

            pause_while_running(&self.running, timings.receive_pause());
        }
        tracing::debug!("Receive loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CLIP_END_HEX, CLIP_START_MARKER, HEARTBEAT_MARKER};
    use std::io::Cursor;

    /// Clip transfer exactly as described on the wire: start marker, then the
    /// body followed by the terminator.
    fn clip_bytes(body: &[u8]) -> Vec<u8> {
        let mut bytes = CLIP_START_MARKER.to_vec();
        bytes.extend_from_slice(body);
        bytes.extend(hex::decode(CLIP_END_HEX).unwrap());
        bytes
    }

    /// Reader that hands out at most `step` bytes per read
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.step);
            self.data.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_heartbeat_then_clip() {
        let mut stream = HEARTBEAT_MARKER.to_vec();
        stream.extend(clip_bytes(&[0x41, 0x42, 0x43]));
        let mut reader = Cursor::new(stream);
        let mut parser = InboundParser::new();

        assert_eq!(parser.next_event(&mut reader, |_| {}).unwrap(), InboundEvent::Heartbeat);
        assert_eq!(
            parser.next_event(&mut reader, |_| {}).unwrap(),
            InboundEvent::Clip(Ok(vec![0x41, 0x42, 0x43]))
        );
        let err = parser.next_event(&mut reader, |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_heartbeat_inside_clip_is_noise() {
        let mut body = vec![0x41];
        body.extend_from_slice(&HEARTBEAT_MARKER);
        body.extend_from_slice(&[0x42, 0x43]);
        let mut reader = Trickle {
            data: Cursor::new(clip_bytes(&body)),
            step: 4,
        };

        let mut parser = InboundParser::new();
        let mut chunks = 0;
        let event = parser.next_event(&mut reader, |_| chunks += 1).unwrap();
        assert_eq!(event, InboundEvent::Clip(Ok(vec![0x41, 0x42, 0x43])));
        assert!(chunks > 1);
    }

    #[test]
    fn test_frames_after_terminator_are_kept() {
        let mut stream = clip_bytes(b"xyz");
        stream.extend_from_slice(&HEARTBEAT_MARKER);
        stream.extend(clip_bytes(b"second"));
        let mut reader = Cursor::new(stream);
        let mut parser = InboundParser::new();

        assert_eq!(parser.next_event(&mut reader, |_| {}).unwrap(), InboundEvent::Clip(Ok(b"xyz".to_vec())));
        assert_eq!(parser.next_event(&mut reader, |_| {}).unwrap(), InboundEvent::Heartbeat);
        assert_eq!(
            parser.next_event(&mut reader, |_| {}).unwrap(),
            InboundEvent::Clip(Ok(b"second".to_vec()))
        );
    }

    #[test]
    fn test_unrecognized_header_is_skipped() {
        let mut stream = vec![0xAA; FRAME_HEADER_SIZE];
        stream.extend_from_slice(&HEARTBEAT_MARKER);
        let mut reader = Cursor::new(stream);
        let mut parser = InboundParser::new();

        assert_eq!(
            parser.next_event(&mut reader, |_| {}).unwrap(),
            InboundEvent::Unrecognized([0xAA; FRAME_HEADER_SIZE])
        );
        assert_eq!(parser.next_event(&mut reader, |_| {}).unwrap(), InboundEvent::Heartbeat);
    }

    #[test]
    fn test_stream_closed_mid_clip() {
        let mut stream = CLIP_START_MARKER.to_vec();
        stream.extend_from_slice(b"partial");
        let mut reader = Cursor::new(stream);
        let mut parser = InboundParser::new();

        let err = parser.next_event(&mut reader, |_| {}).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(parser.buffered_clip_bytes(), 7);
        parser.reset();
        assert_eq!(parser.buffered_clip_bytes(), 0);
    }
}
