//! # Fay Connector
//!
//! Bidirectional audio tunnel between a device and a remote controller over a
//! single TCP connection.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               CONNECTOR                                  │
//! │                                                                          │
//! │  ┌──────────────────────┐        ┌──────────────────────────────────┐   │
//! │  │ Supervisor           │ dials  │ ConnectionManager                │   │
//! │  │ (network::supervisor)├───────▶│ (network::connection)            │   │
//! │  │ every 3s: liveness,  │        │ one TCP link, liveness clock     │   │
//! │  │ reconnect, status    │        └───────┬──────────────────▲───────┘   │
//! │  └──────────────────────┘                │ read             │ write     │
//! │                                          ▼                  │           │
//! │  ┌───────────────────────────────────────────┐  ┌───────────┴────────┐  │
//! │  │ InboundStreamProcessor (network::receiver)│  │ OutboundCapture-   │  │
//! │  │ heartbeat / clip-start headers,           │  │ Sender             │  │
//! │  │ hex accumulation, end marker (codec)      │  │ (network::sender)  │  │
//! │  └───────────────────┬───────────────────────┘  │ 1024-byte PCM      │  │
//! │                      │ AudioClip                │ chunks, 16kHz mono │  │
//! │                      ▼                          └───────────▲────────┘  │
//! │  ┌───────────────────────────────────────────┐              │           │
//! │  │ PlaybackCoordinator (tunnel::coordinator) │   Exclusion  │           │
//! │  │ Idle ⇄ Capturing ⇄ Playing                ├──────────────┘           │
//! │  └───────────────────┬───────────────────────┘  (tunnel::state)         │
//! │                      ▼                                                   │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │ AudioRoute (audio::route) ─ CpalAudioRoute: mic capture, MP3 play │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                     │ TCP
//!                                     ▼
//!                           ┌────────────────────┐
//!                           │     CONTROLLER     │
//!                           │ heartbeats, clips  │
//!                           │ records inbound PCM│
//!                           └────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod storage;
pub mod tunnel;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Capture blocks buffered between the audio callback and the send loop
    pub const CAPTURE_BUFFER_BLOCKS: usize = 256;

    /// Port the controller listens on unless told otherwise
    pub const DEFAULT_CONTROLLER_PORT: u16 = 10001;

    /// Heartbeat cadence of the controller peer
    pub const CONTROLLER_HEARTBEAT_SECS: u64 = 5;
}
