//! Syslog tail watcher.
//!
//! Follows the system log file by offset: a modify notification triggers a
//! re-stat, and any newly appended byte range is read and split into lines.
//! A chunk that does not end on a newline loses its trailing partial line -
//! the offset has already advanced past it. That is the accepted tail-follow
//! tradeoff: partial lines are almost always completed by the next write,
//! and a matched line lost to a torn write is indistinguishable from one
//! written after shutdown.
//!
//! A size decrease means the file was rotated or truncated; the watcher
//! resets its offset to the new end and keeps following.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use tracing::{debug, info, warn};
use vigil_core::event::EventKind;
use vigil_core::patterns::PatternSet;

use super::{WatchCtx, WatchError, POLL_INTERVAL};

/// Tails `path`, emitting a `SYSLOG` event for every appended line the
/// pattern set accepts. Returns only on shutdown or failed setup.
pub fn run(ctx: WatchCtx<'_>, path: &Path, patterns: &PatternSet) -> Result<(), WatchError> {
    let mut offset = std::fs::metadata(path)
        .map_err(|source| WatchError::Stat {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let inotify = Inotify::init(InitFlags::IN_NONBLOCK)?;
    inotify.add_watch(path, AddWatchFlags::IN_MODIFY)?;
    info!(path = %path.display(), offset, "tailing syslog");

    while ctx.run.is_running() {
        match inotify.read_events() {
            Ok(events) if !events.is_empty() => {}
            Ok(_) => continue,
            Err(nix::errno::Errno::EAGAIN) => {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(errno) => return Err(WatchError::Notify(errno)),
        }

        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(path = %path.display(), %err, "syslog stat failed, will retry");
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        if len < offset {
            debug!(path = %path.display(), "syslog shrank, following the new end");
            offset = len;
            continue;
        }
        if len == offset {
            continue;
        }

        let chunk = match read_range(path, offset, len) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(path = %path.display(), %err, "syslog read failed, will retry");
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
        };
        offset = len;

        for line in complete_lines(&chunk) {
            let line = String::from_utf8_lossy(line);
            if patterns.scan(&line) {
                debug!(line = %line, "syslog line matched");
                ctx.emit(EventKind::Syslog, &line);
            }
        }
    }

    Ok(())
}

fn read_range(path: &Path, from: u64, to: u64) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut chunk = vec![0u8; (to - from) as usize];
    file.read_exact(&mut chunk)?;
    Ok(chunk)
}

/// The complete lines of a chunk; a trailing run with no newline is dropped.
fn complete_lines(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    let end = chunk
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |last| last + 1);
    chunk[..end]
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
}
