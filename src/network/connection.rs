//! Controller connection lifecycle
//!
//! The manager is the only writer of the live connection handle. Loops take
//! a cloned [`Link`] for their I/O and hand it back to
//! [`ConnectionManager::disconnect`] when it fails; the generation number
//! keeps a late failure on an old link from tearing down a newer one.
//!
//! Closing shuts the socket down in both directions, which wakes any thread
//! blocked reading or writing it.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{AddressSource, ServerAddress, TunnelTimings};
use crate::error::NetworkError;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Outcome of a reconnect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialOutcome {
    /// Already connected and alive; nothing done
    Alive,
    /// A new connection was established
    Connected(ServerAddress),
    /// No usable address configured; staying idle
    NoAddress,
    /// Dial failed; retried on the next cycle
    Failed(String),
}

/// Handle to one established connection
#[derive(Debug, Clone)]
pub struct Link {
    generation: u64,
    stream: Arc<TcpStream>,
}

impl Link {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Read exactly `buf.len()` bytes; a clean close is reported as
    /// [`io::ErrorKind::UnexpectedEof`]
    pub fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        (&*self.stream).read_exact(buf)
    }

    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&*self.stream).write_all(buf)
    }

    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Read for Link {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self.stream).read(buf)
    }
}

/// Time of the last sign of life from the controller
#[derive(Debug)]
pub struct LivenessClock {
    epoch: Instant,
    last_seen_ms: AtomicU64,
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn touch(&self) {
        self.last_seen_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Time since the last touch
    pub fn elapsed(&self) -> Duration {
        let last = self.last_seen_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.elapsed() > timeout
    }
}

/// Owns the single TCP connection to the controller
pub struct ConnectionManager {
    source: Arc<dyn AddressSource>,
    timings: TunnelTimings,
    link: Mutex<Option<Link>>,
    next_generation: AtomicU64,
    liveness: LivenessClock,
    dial_attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(source: Arc<dyn AddressSource>, timings: TunnelTimings) -> Self {
        Self {
            source,
            timings,
            link: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            liveness: LivenessClock::new(),
            dial_attempts: AtomicU64::new(0),
        }
    }

    pub fn timings(&self) -> &TunnelTimings {
        &self.timings
    }

    /// The live link, if connected
    pub fn current(&self) -> Option<Link> {
        self.link.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        if self.link.lock().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Record a sign of life from the controller
    pub fn touch(&self) {
        self.liveness.touch();
    }

    pub fn liveness(&self) -> &LivenessClock {
        &self.liveness
    }

    /// Connected, but nothing heard for longer than the liveness timeout
    pub fn is_stale(&self) -> bool {
        self.is_connected() && self.liveness.is_expired(self.timings.liveness_timeout())
    }

    /// Number of dials actually attempted (valid address present)
    pub fn dial_attempts(&self) -> u64 {
        self.dial_attempts.load(Ordering::Relaxed)
    }

    /// Tear down `link` if it is still the live connection.
    ///
    /// Returns whether anything was closed.
    pub fn disconnect(&self, link: &Link, reason: &str) -> bool {
        let mut current = self.link.lock();
        match current.as_ref() {
            Some(live) if live.generation == link.generation => {
                live.close();
                *current = None;
                tracing::info!("Disconnected from controller: {}", reason);
                true
            }
            _ => {
                // Already replaced; just make sure the stale socket is shut.
                link.close();
                false
            }
        }
    }

    /// Close whatever connection is live
    pub fn close(&self, reason: &str) {
        if let Some(link) = self.link.lock().take() {
            link.close();
            tracing::info!("Disconnected from controller: {}", reason);
        }
    }

    /// Reconnect if disconnected or stale.
    ///
    /// The address is re-read from the source on every attempt. A missing or
    /// malformed address is not an error: the manager just stays
    /// disconnected.
    pub fn ensure_connected(&self) -> DialOutcome {
        if self.is_connected() {
            if !self.is_stale() {
                return DialOutcome::Alive;
            }
            tracing::warn!(
                "No heartbeat for {:.1}s, dropping connection",
                self.liveness.elapsed().as_secs_f32()
            );
            self.close("liveness timeout");
        }

        let Some(raw) = self.source.server_address() else {
            tracing::debug!("No controller address configured");
            return DialOutcome::NoAddress;
        };
        let address = match ServerAddress::parse(&raw) {
            Ok(address) => address,
            Err(e) => {
                tracing::debug!("{}", e);
                return DialOutcome::NoAddress;
            }
        };

        self.dial_attempts.fetch_add(1, Ordering::Relaxed);
        match dial(&address, self.timings.connect_timeout(), self.timings.write_timeout()) {
            Ok(stream) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                self.liveness.touch();
                *self.link.lock() = Some(Link {
                    generation,
                    stream: Arc::new(stream),
                });
                tracing::info!("Connected to controller at {}", address);
                DialOutcome::Connected(address)
            }
            Err(e) => {
                tracing::warn!("Failed to connect to controller at {}: {}", address, e);
                DialOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Open a TCP connection with keepalive and no Nagle delay.
///
/// Writes on the returned stream fail after `write_timeout` instead of
/// blocking on a peer that stopped reading.
pub fn dial(address: &ServerAddress, timeout: Duration, write_timeout: Duration) -> Result<TcpStream, NetworkError> {
    let addrs = address
        .resolve()
        .map_err(|e| NetworkError::ConnectionFailed(format!("resolve {address}: {e}")))?;

    let mut last_error = NetworkError::ConnectionFailed(format!("{address} resolved to nothing"));
    for addr in addrs {
        match connect_one(addr, timeout, write_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = NetworkError::ConnectionFailed(format!("{addr}: {e}")),
        }
    }
    Err(last_error)
}

fn connect_one(addr: SocketAddr, timeout: Duration, write_timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nodelay(true)?;
    socket.set_write_timeout(Some(write_timeout))?;

    let stream: TcpStream = socket.into();
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(30));
    SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
    Ok(stream)
}
