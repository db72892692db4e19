//! Decoded audio clips received from the controller

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A complete clip as delivered by the inbound stream
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Encoded audio (MP3 from the controller)
    pub payload: Bytes,
    /// When the terminator was seen
    pub received_at: DateTime<Utc>,
}

impl AudioClip {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_timestamp(payload, Utc::now())
    }

    pub fn with_timestamp(payload: impl Into<Bytes>, received_at: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            received_at,
        }
    }

    /// Storage name derived from the receive time in milliseconds
    pub fn file_name(&self) -> String {
        format!("sample-{}.mp3", self.received_at.timestamp_millis())
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
