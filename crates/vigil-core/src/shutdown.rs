//! Graceful-shutdown signaling.
//!
//! `SIGINT` and `SIGTERM` clear a process-wide running flag; no other
//! signals are handled. Watchers, workers, and the flusher poll the flag
//! between iterations and between bounded waits, so a signal drains every
//! loop within one poll period.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use thiserror::Error;

/// Errors from installing the signal handlers.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// `sigaction` refused a handler.
    #[error("failed to install handler for {signal}: {source}")]
    Install {
        /// The signal whose handler failed to install.
        signal: Signal,
        /// Underlying errno.
        source: nix::errno::Errno,
    },
}

// Signal handlers can only reference static state; RunFlag hands out scoped
// views of this one flag.
static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_signal(_signum: std::os::raw::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Shared view of the process-wide running flag.
#[derive(Debug, Clone, Copy)]
pub struct RunFlag(&'static AtomicBool);

impl RunFlag {
    /// Installs the `SIGINT`/`SIGTERM` handlers and returns the flag.
    pub fn install() -> Result<Self, ShutdownError> {
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only performs an atomic store, which is
            // async-signal-safe.
            unsafe { sigaction(signal, &action) }
                .map_err(|source| ShutdownError::Install { signal, source })?;
        }
        Ok(Self(&RUNNING))
    }

    /// A flag without handlers, for tests and embedded use.
    #[must_use]
    pub fn detached() -> Self {
        Self(&RUNNING)
    }

    /// Whether the process should keep running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Requests shutdown, same as receiving a signal.
    pub fn trip(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_clears_and_reset_restores() {
        let flag = RunFlag::detached();
        flag.reset();
        assert!(flag.is_running());
        flag.trip();
        assert!(!flag.is_running());
        flag.reset();
        assert!(flag.is_running());
    }
}
