//! Tunnel service
//!
//! Wires the connection manager, the receive/send loops, the supervisor and
//! the playback coordinator together and owns their threads.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::AudioRoute;
use crate::config::{AddressSource, TunnelTimings};
use crate::error::Result;
use crate::network::{ConnectionManager, ConnectionSupervisor, InboundStreamProcessor, OutboundCaptureSender};
use crate::storage::ClipStore;
use crate::tunnel::coordinator::PlaybackCoordinator;
use crate::tunnel::state::{CaptureToggle, Exclusion, ExclusionState};
use crate::tunnel::stats::{status_line, ConnectionStatus, LogStatusSink, StatsSnapshot, StatusSink, TransferStats};

/// Builder for [`TunnelService`]
pub struct TunnelBuilder {
    source: Arc<dyn AddressSource>,
    route: Arc<dyn AudioRoute>,
    timings: TunnelTimings,
    mic_enabled: bool,
    store: Option<Arc<dyn ClipStore>>,
    status: Arc<dyn StatusSink>,
}

impl TunnelBuilder {
    pub fn new(source: Arc<dyn AddressSource>, route: Arc<dyn AudioRoute>) -> Self {
        Self {
            source,
            route,
            timings: TunnelTimings::default(),
            mic_enabled: true,
            store: None,
            status: Arc::new(LogStatusSink),
        }
    }

    pub fn timings(mut self, timings: TunnelTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Initial position of the microphone switch
    pub fn mic_enabled(mut self, enabled: bool) -> Self {
        self.mic_enabled = enabled;
        self
    }

    /// Keep a copy of every received clip
    pub fn clip_store(mut self, store: Arc<dyn ClipStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn build(self) -> TunnelService {
        let exclusion = Arc::new(Exclusion::new());
        let toggle = CaptureToggle::new(self.mic_enabled);
        let settle = self.timings.playback_settle();
        let coordinator = Arc::new(PlaybackCoordinator::new(
            self.route.clone(),
            exclusion.clone(),
            toggle.clone(),
            self.store,
            settle,
        ));

        TunnelService {
            connection: Arc::new(ConnectionManager::new(self.source, self.timings)),
            route: self.route,
            exclusion,
            toggle,
            stats: Arc::new(TransferStats::new()),
            status: self.status,
            coordinator,
            running: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }
}

/// The running tunnel client
pub struct TunnelService {
    /// Single controller connection
    connection: Arc<ConnectionManager>,

    /// Microphone and speaker
    route: Arc<dyn AudioRoute>,

    /// Capture/playback mutual exclusion
    exclusion: Arc<Exclusion>,

    /// Administrative microphone switch
    toggle: CaptureToggle,

    stats: Arc<TransferStats>,
    status: Arc<dyn StatusSink>,
    coordinator: Arc<PlaybackCoordinator>,

    /// Cleared to stop every loop
    running: Arc<AtomicBool>,

    /// Receive, send and supervisor threads
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TunnelService {
    /// Start all loops. Calling it on a running service is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Starting tunnel");

        if let Err(e) = self.spawn_all() {
            self.shutdown();
            return Err(e);
        }
        Ok(())
    }

    fn spawn_all(&self) -> Result<()> {
        self.coordinator.start()?;

        let supervisor = ConnectionSupervisor::new(
            self.connection.clone(),
            self.stats.clone(),
            self.status.clone(),
            self.running.clone(),
        );
        self.spawn("tunnel-supervisor", move || supervisor.run())?;

        let receiver = InboundStreamProcessor::new(
            self.connection.clone(),
            self.coordinator.clone(),
            self.stats.clone(),
            self.running.clone(),
        );
        self.spawn("tunnel-receiver", move || receiver.run())?;

        let sender = OutboundCaptureSender::new(
            self.connection.clone(),
            self.route.clone(),
            self.exclusion.clone(),
            self.toggle.clone(),
            self.stats.clone(),
            self.running.clone(),
        );
        self.spawn("tunnel-sender", move || sender.run())?;
        Ok(())
    }

    fn spawn(&self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Stop every loop, release the audio device and close the connection.
    ///
    /// Waits for queued clips to finish playing.
    pub fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.connection.close("shutdown");

        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("tunnel").to_string();
            if handle.join().is_err() {
                tracing::error!("Thread {} panicked", name);
            }
        }
        // The supervisor may have dialed between the first close and its exit
        self.connection.close("shutdown");
        self.coordinator.shutdown();
        self.exclusion.end_capture(|| self.route.stop_capture());

        if was_running {
            self.status.report(ConnectionStatus::Disconnected, &self.stats.snapshot());
            tracing::info!("Tunnel stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle for flipping the microphone from outside
    pub fn toggle(&self) -> &CaptureToggle {
        &self.toggle
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn exclusion_state(&self) -> ExclusionState {
        self.exclusion.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        if !self.is_running() {
            ConnectionStatus::Disconnected
        } else if self.connection.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Connecting
        }
    }

    /// The status line as it would be reported right now
    pub fn status_line(&self) -> String {
        status_line(self.connection_status(), &self.stats.snapshot())
    }
}

impl Drop for TunnelService {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}
