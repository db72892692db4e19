//! Network subsystem for the controller TCP connection

pub mod connection;
pub mod receiver;
pub mod sender;
pub mod supervisor;

pub use connection::{dial, ConnectionManager, ConnectionState, DialOutcome, Link, LivenessClock};
pub use receiver::{InboundEvent, InboundParser, InboundStreamProcessor};
pub use sender::{OutboundCaptureSender, SendStep};
pub use supervisor::ConnectionSupervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep inside [`pause_while_running`]
const PAUSE_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `duration`, returning early once `running` clears
pub(crate) fn pause_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        if !running.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(PAUSE_SLICE));
    }
}
