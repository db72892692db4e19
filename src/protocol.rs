//! Wire protocol between the connector and the remote controller
//!
//! Inbound (controller -> connector) is a sequence of 9-byte frames:
//!
//! ```text
//! F0 F1 F2 F3 F4 F5 F6 F7 F8                      heartbeat
//! 00 01 02 03 04 05 06 07 08  <clip bytes ...>    clip start, followed by the
//!                             08 07 06 05 04 03 02 01 00 as the clip terminator
//! ```
//!
//! Clip bodies are scanned as uppercase hex text, so the terminator is matched
//! textually (`"080706050403020100"`) and heartbeats that interleave with a
//! long transfer show up as `"F0F1F2F3F4F5F6F7F8"` inside the text.
//!
//! Outbound (connector -> controller) is raw 16 kHz mono 16-bit PCM with no
//! framing at all.

/// Size of an inbound frame header
pub const FRAME_HEADER_SIZE: usize = 9;

/// Heartbeat marker, ascending from 0xF0
pub const HEARTBEAT_MARKER: [u8; FRAME_HEADER_SIZE] =
    [0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8];

/// Clip start marker, ascending from 0x00
pub const CLIP_START_MARKER: [u8; FRAME_HEADER_SIZE] =
    [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

/// Clip terminator as bytes: the start marker reversed
pub const CLIP_END_BYTES: [u8; FRAME_HEADER_SIZE] =
    [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0x00];

/// Clip terminator as it appears in the accumulated hex text
pub const CLIP_END_HEX: &str = "080706050403020100";

/// Heartbeat marker as it appears in the accumulated hex text
pub const HEARTBEAT_HEX: &str = "F0F1F2F3F4F5F6F7F8";

/// Maximum bytes pulled from the socket per read while accumulating a clip
pub const CLIP_READ_CHUNK: usize = 1024;

/// Size of one outbound PCM chunk
pub const OUTBOUND_CHUNK_SIZE: usize = 1024;

/// Capture sample rate sent to the controller
pub const PCM_SAMPLE_RATE: u32 = 16_000;

/// Capture channel count sent to the controller
pub const PCM_CHANNELS: u16 = 1;

/// Bits per captured sample
pub const PCM_BITS_PER_SAMPLE: u16 = 16;

/// Classification of a 9-byte inbound frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMarker {
    Heartbeat,
    ClipStart,
}
