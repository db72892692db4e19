//! Reconnect supervision
//!
//! Every cycle the supervisor checks the connection, redials when it is down
//! or stale, and reports the status line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::network::connection::{ConnectionManager, DialOutcome};
use crate::network::pause_while_running;
use crate::tunnel::stats::{ConnectionStatus, StatusSink, TransferStats};

pub struct ConnectionSupervisor {
    connection: Arc<ConnectionManager>,
    stats: Arc<TransferStats>,
    status: Arc<dyn StatusSink>,
    running: Arc<AtomicBool>,
}

impl ConnectionSupervisor {
    pub fn new(
        connection: Arc<ConnectionManager>,
        stats: Arc<TransferStats>,
        status: Arc<dyn StatusSink>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            connection,
            stats,
            status,
            running,
        }
    }

    /// Run until the running flag clears
    pub fn run(&self) {
        let interval = self.connection.timings().supervisor_interval();

        tracing::debug!("Supervisor started");
        while self.running.load(Ordering::Relaxed) {
            self.tick();
            pause_while_running(&self.running, interval);
        }
        tracing::debug!("Supervisor stopped");
    }

    /// One supervisory cycle
    pub fn tick(&self) -> DialOutcome {
        let outcome = self.connection.ensure_connected();
        if matches!(outcome, DialOutcome::Connected(_)) {
            self.stats.record_reconnect();
        }

        let status = if self.connection.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Connecting
        };
        self.status.report(status, &self.stats.snapshot());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StaticAddress, TunnelTimings};
    use crate::tunnel::stats::StatsSnapshot;
    use parking_lot::Mutex;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ConnectionStatus>>);

    impl StatusSink for Recorder {
        fn report(&self, status: ConnectionStatus, _stats: &StatsSnapshot) {
            self.0.lock().push(status);
        }
    }

    fn supervisor(address: StaticAddress, timings: TunnelTimings) -> (ConnectionSupervisor, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let supervisor = ConnectionSupervisor::new(
            Arc::new(ConnectionManager::new(Arc::new(address), timings)),
            Arc::new(TransferStats::new()),
            recorder.clone(),
            Arc::new(AtomicBool::new(true)),
        );
        (supervisor, recorder)
    }

    #[test]
    fn test_no_address_reports_connecting() {
        let (supervisor, recorder) = supervisor(StaticAddress::new("nonsense"), TunnelTimings::default());

        assert_eq!(supervisor.tick(), DialOutcome::NoAddress);
        assert_eq!(supervisor.tick(), DialOutcome::NoAddress);
        assert_eq!(supervisor.connection.dial_attempts(), 0);
        assert_eq!(*recorder.0.lock(), vec![ConnectionStatus::Connecting; 2]);
    }

    #[test]
    fn test_redials_after_liveness_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = thread::spawn(move || {
            let first = listener.accept().map(|(s, _)| s);
            let second = listener.accept().map(|(s, _)| s);
            (first, second)
        });

        let timings = TunnelTimings {
            liveness_timeout_ms: 40,
            ..Default::default()
        };
        let (supervisor, recorder) = supervisor(StaticAddress::new(format!("127.0.0.1:{port}")), timings);

        assert!(matches!(supervisor.tick(), DialOutcome::Connected(_)));
        let first = supervisor.connection.current().unwrap().generation();
        assert_eq!(supervisor.tick(), DialOutcome::Alive);

        thread::sleep(Duration::from_millis(80));
        assert!(matches!(supervisor.tick(), DialOutcome::Connected(_)));
        let second = supervisor.connection.current().unwrap().generation();
        let _peers = accept.join().unwrap();

        assert_ne!(first, second);
        assert_eq!(supervisor.stats.snapshot().reconnects, 2);
        assert!(recorder.0.lock().iter().all(|s| *s == ConnectionStatus::Connected));
    }
}
