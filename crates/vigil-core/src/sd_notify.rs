//! Minimal `sd_notify(3)` protocol support.
//!
//! The agent tells an attached service manager when it is ready, pings the
//! watchdog on its heartbeat cadence, and announces shutdown. Messages go
//! over the Unix datagram socket named by `NOTIFY_SOCKET`; when no manager
//! is attached the functions are silent no-ops. Every failure here is
//! non-fatal: notification never affects pipeline operation.

use std::os::unix::net::UnixDatagram;
use std::path::Path;

use tracing::{debug, trace};

/// Longest `NOTIFY_SOCKET` path accepted.
const MAX_SOCKET_PATH: usize = 256;

fn socket_path_ok(path: &str) -> bool {
    path.len() <= MAX_SOCKET_PATH && (path.starts_with('/') || path.starts_with('@'))
}

fn notify(state: &str) -> bool {
    let Ok(socket_path) = std::env::var("NOTIFY_SOCKET") else {
        trace!("NOTIFY_SOCKET not set, skipping sd_notify");
        return false;
    };

    if !socket_path_ok(&socket_path) {
        debug!("NOTIFY_SOCKET path rejected, skipping sd_notify");
        return false;
    }

    // Abstract sockets spell their leading '@' as NUL on the wire.
    let resolved = socket_path
        .strip_prefix('@')
        .map_or_else(|| socket_path.clone(), |rest| format!("\0{rest}"));

    let Ok(socket) = UnixDatagram::unbound() else {
        debug!("could not create sd_notify socket");
        return false;
    };

    match socket.send_to(state.as_bytes(), Path::new(&resolved)) {
        Ok(_) => true,
        Err(err) => {
            debug!(%err, "sd_notify send failed");
            false
        }
    }
}

/// Announces that startup is complete (`READY=1`).
pub fn notify_ready() -> bool {
    notify("READY=1")
}

/// Sends a watchdog keepalive (`WATCHDOG=1`).
pub fn notify_watchdog() -> bool {
    notify("WATCHDOG=1")
}

/// Announces the start of shutdown (`STOPPING=1`).
pub fn notify_stopping() -> bool {
    notify("STOPPING=1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_validation() {
        assert!(socket_path_ok("/run/systemd/notify"));
        assert!(socket_path_ok("@abstract"));
        assert!(!socket_path_ok("relative/path"));
        assert!(!socket_path_ok(&"/x".repeat(200)));
    }
}
