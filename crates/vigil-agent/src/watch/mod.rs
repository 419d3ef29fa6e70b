//! Event-source watchers.
//!
//! Each watcher runs on its own thread, polls its kernel notification
//! source with a bounded timeout so the running flag is honored, and emits
//! matched events into the shared queue. Emission applies backpressure: a
//! full queue makes the watcher yield and retry until the reader catches up
//! or shutdown is requested - events are never dropped on the producer side.

use std::time::Duration;

use thiserror::Error;
use vigil_core::event::{EventCounter, EventKind, RawEvent};
use vigil_core::queue::EventQueue;
use vigil_core::shutdown::RunFlag;

pub mod fsdelete;
pub mod syslog;
pub mod usb;

/// Poll timeout for all change-notification sources.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that abort a watcher thread. Only setup failures land here;
/// per-event trouble is logged and retried.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watched file could not be inspected.
    #[error("failed to stat {path}: {source}")]
    Stat {
        /// The path that failed to stat.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An inotify instance or watch could not be set up.
    #[error("change notification setup failed: {0}")]
    Notify(#[from] nix::errno::Errno),

    /// The device-event monitor could not be set up.
    #[error("device monitor setup failed: {0}")]
    Monitor(#[from] std::io::Error),

    /// Every configured watch directory was rejected.
    #[error("no watchable directories")]
    NoWatchableDirs,
}

/// Everything a watcher needs to emit events.
#[derive(Clone, Copy)]
pub struct WatchCtx<'a> {
    /// The shared ring queue.
    pub queue: &'a EventQueue,
    /// Agent-wide event-id source.
    pub counter: &'a EventCounter,
    /// Shutdown flag, polled between waits and enqueue retries.
    pub run: RunFlag,
}

impl WatchCtx<'_> {
    /// Emits one event, yielding through queue-full backpressure until the
    /// enqueue lands or shutdown is requested.
    pub fn emit(&self, kind: EventKind, message: &str) {
        let event = RawEvent::new(kind, self.counter.next(), message);
        while !self.queue.enqueue(&event) {
            if !self.run.is_running() {
                return;
            }
            std::thread::yield_now();
        }
    }
}
