//! Tunnel orchestration: device exclusion, playback, counters and the service

pub mod coordinator;
pub mod service;
pub mod state;
pub mod stats;

pub use coordinator::PlaybackCoordinator;
pub use service::{TunnelBuilder, TunnelService};
pub use state::{CaptureToggle, Exclusion, ExclusionState};
pub use stats::{status_line, ConnectionStatus, LogStatusSink, StatsSnapshot, StatusSink, TransferStats};
