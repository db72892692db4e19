//! Clip accumulation
//!
//! After a clip start marker the inbound stream carries the clip body in
//! arbitrarily sized chunks. The assembler keeps the hex text of everything
//! seen so far and reports completion once the terminator text shows up.

use crate::codec::frame::{append_hex, find_end_marker_from, finalize_clip};
use crate::error::CodecError;
use crate::protocol::CLIP_END_HEX;

/// Result of feeding one chunk to the assembler
#[derive(Debug)]
pub enum ClipProgress {
    /// Terminator not seen yet
    Pending,
    /// Terminator found; the buffer has been reset
    Complete {
        /// Decoded clip body, or why it had to be dropped
        clip: Result<Vec<u8>, CodecError>,
        /// Bytes of the last chunk that followed the terminator
        remainder: Vec<u8>,
    },
}

/// Accumulates clip text between a clip start marker and the terminator
#[derive(Debug, Default)]
pub struct ClipAssembler {
    text: String,
}

impl ClipAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk read from the connection.
    pub fn push(&mut self, chunk: &[u8]) -> ClipProgress {
        let previous_len = self.text.len();
        append_hex(&mut self.text, chunk);

        // Earlier text was already searched; only a match reaching into the
        // new chunk is possible.
        let search_from = previous_len.saturating_sub(CLIP_END_HEX.len() - 1);
        let Some(offset) = find_end_marker_from(&self.text, search_from) else {
            return ClipProgress::Pending;
        };

        let clip = finalize_clip(&self.text, offset);

        // Each byte is two characters of text, so the terminator end maps back
        // to a byte index inside `chunk`. A terminator straddling a byte
        // boundary ends mid-byte; that byte is considered consumed.
        let end_in_text = offset + CLIP_END_HEX.len();
        let end_in_chunk = end_in_text.div_ceil(2).saturating_sub(previous_len / 2);
        let remainder = chunk.get(end_in_chunk..).unwrap_or_default().to_vec();

        self.reset();
        ClipProgress::Complete { clip, remainder }
    }

    /// Drop any partially accumulated clip.
    pub fn reset(&mut self) {
        self.text.clear();
    }

    /// Number of clip bytes buffered so far
    pub fn buffered_bytes(&self) -> usize {
        self.text.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
