//! Transfer counters and the periodic status line

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Connectivity as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(text)
    }
}

/// Cumulative counters, updated lock-free by the loops
#[derive(Debug, Default)]
pub struct TransferStats {
    bytes_sent: AtomicU64,
    chunks_sent: AtomicU64,
    bytes_received: AtomicU64,
    clips_received: AtomicU64,
    clips_dropped: AtomicU64,
    heartbeats: AtomicU64,
    reconnects: AtomicU64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clip(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.clips_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_clip(&self) {
        self.clips_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            clips_received: self.clips_received.load(Ordering::Relaxed),
            clips_dropped: self.clips_dropped.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`TransferStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub chunks_sent: u64,
    pub bytes_received: u64,
    pub clips_received: u64,
    pub clips_dropped: u64,
    pub heartbeats: u64,
    pub reconnects: u64,
}

impl StatsSnapshot {
    /// Received/sent totals, in KB up to 2048 KB combined and in MB beyond
    pub fn transfer_summary(&self) -> String {
        let received_kb = self.bytes_received / 1024;
        let sent_kb = self.bytes_sent / 1024;
        if received_kb + sent_kb > 2048 {
            format!(
                "{:.2}/{:.2} MB",
                received_kb as f64 / 1024.0,
                sent_kb as f64 / 1024.0
            )
        } else {
            format!("{received_kb}/{sent_kb} KB")
        }
    }
}

/// Status line shown to the user each supervisory cycle
pub fn status_line(status: ConnectionStatus, stats: &StatsSnapshot) -> String {
    match status {
        ConnectionStatus::Disconnected => "disconnected from controller".to_string(),
        _ => format!("{status} controller, received/sent: {}", stats.transfer_summary()),
    }
}

/// Receives periodic status updates
pub trait StatusSink: Send + Sync {
    fn report(&self, status: ConnectionStatus, stats: &StatsSnapshot);
}

/// Writes status updates to the log
#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn report(&self, status: ConnectionStatus, stats: &StatsSnapshot) {
        tracing::info!(
            clips = stats.clips_received,
            dropped = stats.clips_dropped,
            reconnects = stats.reconnects,
            "{}",
            status_line(status, stats)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_in_kb() {
        let stats = TransferStats::new();
        stats.record_clip(10 * 1024);
        stats.record_sent(1024);
        stats.record_sent(1024);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.chunks_sent, 2);
        assert_eq!(
            status_line(ConnectionStatus::Connected, &snapshot),
            "connected controller, received/sent: 10/2 KB"
        );
    }

    #[test]
    fn test_summary_switches_to_mb() {
        let snapshot = StatsSnapshot {
            bytes_received: 2048 * 1024,
            bytes_sent: 512 * 1024,
            ..Default::default()
        };
        assert_eq!(snapshot.transfer_summary(), "2.00/0.50 MB");
    }

    #[test]
    fn test_disconnected_line() {
        assert_eq!(
            status_line(ConnectionStatus::Disconnected, &StatsSnapshot::default()),
            "disconnected from controller"
        );
        assert!(status_line(ConnectionStatus::Connecting, &StatsSnapshot::default())
            .starts_with("connecting controller"));
    }
}
