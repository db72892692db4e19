//! Stateless frame codec
//!
//! Marker detection and the hex-text clip encoding used by the inbound stream.

use crate::error::CodecError;
use crate::protocol::{
    FrameMarker, CLIP_END_HEX, CLIP_START_MARKER, FRAME_HEADER_SIZE, HEARTBEAT_HEX,
    HEARTBEAT_MARKER,
};

/// Classify a 9-byte frame header.
///
/// Returns `None` for anything that is not exactly one of the two markers.
pub fn detect_marker(header: &[u8; FRAME_HEADER_SIZE]) -> Option<FrameMarker> {
    if *header == HEARTBEAT_MARKER {
        Some(FrameMarker::Heartbeat)
    } else if *header == CLIP_START_MARKER {
        Some(FrameMarker::ClipStart)
    } else {
        None
    }
}

/// Append the uppercase hex text of `bytes` to `buffer`.
pub fn append_hex(buffer: &mut String, bytes: &[u8]) {
    buffer.push_str(&hex::encode_upper(bytes));
}

/// First occurrence of the clip terminator text in `buffer`.
pub fn find_end_marker(buffer: &str) -> Option<usize> {
    find_end_marker_from(buffer, 0)
}

/// Same as [`find_end_marker`] but skips the first `from` characters.
///
/// The returned offset is still relative to the start of `buffer`.
pub fn find_end_marker_from(buffer: &str, from: usize) -> Option<usize> {
    buffer
        .get(from..)
        .and_then(|tail| tail.find(CLIP_END_HEX))
        .map(|pos| pos + from)
}

/// Turn the clip text before `offset` back into bytes.
///
/// Heartbeat text interleaved with the clip body is removed before decoding.
/// Both upper and lower case hex digits are accepted.
pub fn finalize_clip(buffer: &str, offset: usize) -> Result<Vec<u8>, CodecError> {
    let prefix = buffer.get(..offset).unwrap_or(buffer);
    let body = strip_heartbeats(prefix);

    if body.is_empty() {
        return Err(CodecError::EmptyClip);
    }
    if body.len() % 2 != 0 {
        return Err(CodecError::OddLength(body.len()));
    }

    hex::decode(&body).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => CodecError::InvalidHex {
            character: c,
            index,
        },
        _ => CodecError::OddLength(body.len()),
    })
}

fn strip_heartbeats(text: &str) -> String {
    text.replace(HEARTBEAT_HEX, "")
}
